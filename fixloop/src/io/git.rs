//! Source-control adapter.
//!
//! The repair loop only needs four operations, so we keep a small, explicit
//! wrapper around `git` subprocess calls behind the [`SourceControl`] trait.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

/// Operations the repair loop performs against the target repository.
pub trait SourceControl {
    /// Clone `url` into `dest`, replacing anything already there.
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;
    fn create_or_reuse_branch(&self, workspace: &Path, branch: &str) -> Result<()>;
    /// Stage and commit everything; returns `false` when there was nothing to commit.
    fn commit(&self, workspace: &Path, message: &str) -> Result<bool>;
    /// Publish `branch`, retrying internally; returns the last error on exhaustion.
    fn push(&self, workspace: &Path, branch: &str) -> Result<()>;
}

/// Push/commit behaviour for [`GitCli`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSettings {
    pub remote: String,
    pub push_attempts: u32,
    pub push_retry_delay: Duration,
    pub commit_prefix: String,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            push_attempts: 3,
            push_retry_delay: Duration::from_secs(5),
            commit_prefix: "[AI-AGENT] ".to_string(),
        }
    }
}

/// [`SourceControl`] backed by the `git` binary.
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    settings: GitSettings,
}

impl GitCli {
    pub fn new(settings: GitSettings) -> Self {
        Self { settings }
    }
}

impl SourceControl for GitCli {
    #[instrument(skip_all, fields(url = %url))]
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        if dest.exists() {
            debug!(dest = %dest.display(), "removing existing workspace");
            fs::remove_dir_all(dest)
                .with_context(|| format!("remove existing workspace {}", dest.display()))?;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let dest_arg = dest.to_string_lossy();
        info!(dest = %dest.display(), "cloning repository");
        Git::new(".").run_checked(&["clone", url, &dest_arg])?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch = %branch))]
    fn create_or_reuse_branch(&self, workspace: &Path, branch: &str) -> Result<()> {
        let git = Git::new(workspace);
        if git.branch_exists(branch)? {
            git.checkout_branch(branch)
        } else {
            git.checkout_new_branch(branch)
        }
    }

    #[instrument(skip_all)]
    fn commit(&self, workspace: &Path, message: &str) -> Result<bool> {
        let git = Git::new(workspace);
        git.add_all()?;
        git.commit_staged(&format!("{}{message}", self.settings.commit_prefix))
    }

    #[instrument(skip_all, fields(branch = %branch))]
    fn push(&self, workspace: &Path, branch: &str) -> Result<()> {
        let git = Git::new(workspace);
        let attempts = self.settings.push_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match git.run_checked(&["push", "--set-upstream", &self.settings.remote, branch]) {
                Ok(_) => {
                    info!(attempt, "push succeeded");
                    return Ok(());
                }
                Err(err) => {
                    warn!(attempt, attempts, error = %err, "push failed");
                    last_err = Some(err);
                    if attempt < attempts {
                        thread::sleep(self.settings.push_retry_delay);
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("push made no attempts")))
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out existing branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

#[cfg(test)]
impl Git {
    /// Return the current branch name (errors on detached HEAD).
    fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            return Err(anyhow!("detached HEAD"));
        }
        Ok(name)
    }

    /// Subject line of the most recent commit.
    fn last_commit_subject(&self) -> Result<String> {
        let out = self.run_capture(&["log", "-1", "--format=%s"])?;
        Ok(out.trim().to_string())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git(dir: &Path, args: &[&str]) {
        Git::new(dir).run_checked(args).expect("git");
    }

    fn configure_identity(dir: &Path) {
        git(dir, &["config", "user.name", "Fixloop Test"]);
        git(dir, &["config", "user.email", "fixloop@example.com"]);
    }

    /// Bare remote with one commit on its default branch.
    fn seeded_remote(root: &Path) -> PathBuf {
        let remote = root.join("remote.git");
        let seed = root.join("seed");
        fs::create_dir_all(&seed).expect("mkdir");
        git(root, &["init", "--bare", &remote.to_string_lossy()]);
        git(&seed, &["init"]);
        configure_identity(&seed);
        fs::write(seed.join("app.py"), "x = 1\n").expect("write");
        git(&seed, &["add", "-A"]);
        git(&seed, &["commit", "-m", "seed"]);
        git(&seed, &["push", &remote.to_string_lossy(), "HEAD:refs/heads/main"]);
        git(root, &["--git-dir", &remote.to_string_lossy(), "symbolic-ref", "HEAD", "refs/heads/main"]);
        remote
    }

    fn no_delay() -> GitCli {
        GitCli::new(GitSettings {
            push_retry_delay: Duration::ZERO,
            ..GitSettings::default()
        })
    }

    #[test]
    fn clone_replaces_existing_destination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let remote = seeded_remote(temp.path());
        let dest = temp.path().join("work");
        fs::create_dir_all(&dest).expect("mkdir");
        fs::write(dest.join("stale.txt"), "old").expect("write");

        no_delay()
            .clone_repo(&remote.to_string_lossy(), &dest)
            .expect("clone");
        assert!(dest.join("app.py").is_file());
        assert!(!dest.join("stale.txt").exists());
    }

    #[test]
    fn commit_and_push_publish_prefixed_message() {
        let temp = tempfile::tempdir().expect("tempdir");
        let remote = seeded_remote(temp.path());
        let dest = temp.path().join("work");
        let scm = no_delay();
        scm.clone_repo(&remote.to_string_lossy(), &dest)
            .expect("clone");
        configure_identity(&dest);

        scm.create_or_reuse_branch(&dest, "TEAM_LEAD_AI_Fix")
            .expect("branch");
        assert!(!scm.commit(&dest, "nothing").expect("clean commit"));

        fs::write(dest.join("app.py"), "x = 2\n").expect("write");
        assert!(scm.commit(&dest, "Fix LOGIC: x").expect("commit"));
        let repo = Git::new(&dest);
        assert_eq!(repo.current_branch().expect("branch"), "TEAM_LEAD_AI_Fix");
        assert_eq!(
            repo.last_commit_subject().expect("subject"),
            "[AI-AGENT] Fix LOGIC: x"
        );

        scm.push(&dest, "TEAM_LEAD_AI_Fix").expect("push");
        assert!(
            Git::new(&remote)
                .branch_exists("TEAM_LEAD_AI_Fix")
                .expect("remote branch")
        );
    }

    #[test]
    fn existing_branch_is_reused() {
        let temp = tempfile::tempdir().expect("tempdir");
        let remote = seeded_remote(temp.path());
        let dest = temp.path().join("work");
        let scm = no_delay();
        scm.clone_repo(&remote.to_string_lossy(), &dest)
            .expect("clone");

        scm.create_or_reuse_branch(&dest, "A_B_AI_Fix").expect("create");
        git(&dest, &["checkout", "main"]);
        scm.create_or_reuse_branch(&dest, "A_B_AI_Fix").expect("reuse");
        assert_eq!(
            Git::new(&dest).current_branch().expect("branch"),
            "A_B_AI_Fix"
        );
    }

    #[test]
    fn push_returns_last_error_after_retries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let remote = seeded_remote(temp.path());
        let dest = temp.path().join("work");
        let scm = GitCli::new(GitSettings {
            remote: "nowhere".to_string(),
            push_attempts: 2,
            push_retry_delay: Duration::ZERO,
            ..GitSettings::default()
        });
        scm.clone_repo(&remote.to_string_lossy(), &dest)
            .expect("clone");

        let err = scm.push(&dest, "main").unwrap_err();
        assert!(err.to_string().contains("git push --set-upstream nowhere main failed"));
    }
}
