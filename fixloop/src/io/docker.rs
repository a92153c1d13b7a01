//! Container backend driven through the `docker` CLI.
//!
//! The [`ContainerBackend`] trait is the seam between the sandbox's
//! poll-and-kill discipline and the actual container engine. Tests use a fake
//! backend that tracks live containers in memory.

use std::fmt;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use tracing::{debug, instrument, warn};

use crate::io::process::{ProcessOutput, run_with_timeout};

/// Label attached to every sandbox container so they can be enumerated.
pub const SANDBOX_LABEL: &str = "fixloop.sandbox=1";

/// Observed lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Exited(i32),
}

/// Image build failure, distinguishable from other backend errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildError {
    pub tag: String,
    pub detail: String,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image build failed for {}: {}", self.tag, self.detail)
    }
}

impl std::error::Error for BuildError {}

/// Operations the sandbox needs from a container engine.
pub trait ContainerBackend {
    /// Remove an image by tag. Missing images are not an error.
    fn remove_image(&self, tag: &str) -> Result<()>;
    /// Build `context` into an image tagged `tag`.
    fn build_image(&self, context: &Path, tag: &str) -> Result<()>;
    /// Start a detached container running `/bin/sh -c <script>`; returns its id.
    fn start(&self, image: &str, script: &str) -> Result<String>;
    fn state(&self, id: &str) -> Result<ContainerState>;
    /// Combined stdout and stderr captured so far.
    fn logs(&self, id: &str) -> Result<String>;
    fn kill(&self, id: &str) -> Result<()>;
    fn remove(&self, id: &str) -> Result<()>;
    /// Ids of every sandbox container that still exists.
    fn list(&self) -> Result<Vec<String>>;
}

/// [`ContainerBackend`] that shells out to the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    cli: String,
    build_timeout: Duration,
    op_timeout: Duration,
    output_limit_bytes: usize,
}

impl DockerCli {
    pub fn new(cli: impl Into<String>, build_timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            cli: cli.into(),
            build_timeout,
            op_timeout: Duration::from_secs(60),
            output_limit_bytes,
        }
    }

    fn run(&self, args: &[&str], timeout: Duration) -> Result<ProcessOutput> {
        self.run_limited(args, timeout, self.output_limit_bytes)
    }

    fn run_limited(&self, args: &[&str], timeout: Duration, limit: usize) -> Result<ProcessOutput> {
        let mut cmd = Command::new(&self.cli);
        cmd.args(args);
        run_with_timeout(cmd, None, timeout, limit)
    }

    fn run_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args, self.op_timeout)?;
        if !output.success() {
            bail!(
                "{} {} failed: {}",
                self.cli,
                args.join(" "),
                output.stderr_text().trim()
            );
        }
        Ok(output.stdout_text())
    }
}

impl ContainerBackend for DockerCli {
    fn remove_image(&self, tag: &str) -> Result<()> {
        let output = self.run(&["rmi", "-f", tag], self.op_timeout)?;
        if !output.success() {
            debug!(tag, stderr = %output.stderr_text().trim(), "image not removed");
        }
        Ok(())
    }

    #[instrument(skip_all, fields(tag = %tag))]
    fn build_image(&self, context: &Path, tag: &str) -> Result<()> {
        let context = context.to_string_lossy();
        let output = self.run(&["build", "--rm", "-t", tag, &context], self.build_timeout)?;
        if output.timed_out {
            return Err(BuildError {
                tag: tag.to_string(),
                detail: format!("timed out after {}s", self.build_timeout.as_secs()),
            }
            .into());
        }
        if !output.status.success() {
            let detail = tail(&output.combined_text(), 40);
            warn!(exit_code = ?output.status.code(), "docker build failed");
            return Err(BuildError {
                tag: tag.to_string(),
                detail,
            }
            .into());
        }
        Ok(())
    }

    fn start(&self, image: &str, script: &str) -> Result<String> {
        let out = self.run_checked(&[
            "run",
            "-d",
            "--label",
            SANDBOX_LABEL,
            image,
            "/bin/sh",
            "-c",
            script,
        ])?;
        let id = out.trim().to_string();
        if id.is_empty() {
            bail!("docker run returned no container id");
        }
        Ok(id)
    }

    fn state(&self, id: &str) -> Result<ContainerState> {
        let out = self.run_checked(&[
            "inspect",
            "-f",
            "{{.State.Status}} {{.State.ExitCode}}",
            id,
        ])?;
        parse_state(&out)
    }

    /// Container logs are never capped on the host; a cut payload would lose
    /// the closing delimiter the parsers look for.
    fn logs(&self, id: &str) -> Result<String> {
        let output = self.run_limited(&["logs", id], self.op_timeout, usize::MAX)?;
        if !output.success() {
            bail!("docker logs {id} failed: {}", output.stderr_text().trim());
        }
        Ok(output.combined_text())
    }

    fn kill(&self, id: &str) -> Result<()> {
        self.run_checked(&["kill", id]).map(|_| ())
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.run_checked(&["rm", "-f", id]).map(|_| ())
    }

    fn list(&self) -> Result<Vec<String>> {
        let filter = format!("label={SANDBOX_LABEL}");
        let out = self.run_checked(&["ps", "-a", "-q", "--no-trunc", "--filter", &filter])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Parse `docker inspect -f '{{.State.Status}} {{.State.ExitCode}}'` output.
fn parse_state(raw: &str) -> Result<ContainerState> {
    let mut parts = raw.split_whitespace();
    let status = parts
        .next()
        .ok_or_else(|| anyhow!("empty container state"))?;
    let code: i32 = parts
        .next()
        .ok_or_else(|| anyhow!("missing exit code in container state '{raw}'"))?
        .parse()
        .map_err(|e| anyhow!("bad exit code in container state '{raw}': {e}"))?;
    match status {
        "exited" | "dead" => Ok(ContainerState::Exited(code)),
        "created" | "running" | "restarting" | "paused" | "removing" => {
            Ok(ContainerState::Running)
        }
        other => Err(anyhow!("unknown container status '{other}'")),
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}


#[cfg(all(test, unix))]
mod cli_tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    use super::*;
    use crate::core::lint::parse_lint_output;
    use crate::io::config::FixloopConfig;
    use crate::io::sandbox::{ImageHandle, Sandbox, SandboxRunner};

    /// Writes a stand-in `docker` executable that appends its argv to
    /// `argv.log` and answers `inspect` with `state`.
    fn fake_docker(dir: &Path, state: &str) -> PathBuf {
        let script = format!(
            "#!/bin/sh\n\
             echo \"$*\" >> '{dir}/argv.log'\n\
             case \"$1\" in\n\
               run) echo cid-42 ;;\n\
               inspect) echo '{state}' ;;\n\
               logs) cat '{dir}/payload' ;;\n\
               ps) printf 'cid-1\\n\\ncid-2\\n' ;;\n\
             esac\n",
            dir = dir.display(),
        );
        let path = dir.join("docker");
        fs::write(&path, script).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    fn argv(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join("argv.log"))
            .expect("argv log")
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn sandbox(cli: &Path, config: &FixloopConfig) -> Sandbox<DockerCli> {
        let mut settings = config.sandbox_settings(None);
        settings.poll_interval = Duration::from_millis(5);
        Sandbox::new(
            DockerCli::new(
                cli.to_string_lossy(),
                config.build_timeout(),
                config.sandbox.output_limit_bytes,
            ),
            settings,
        )
    }

    fn image() -> ImageHandle {
        ImageHandle {
            tag: "fixloop-sandbox:test".to_string(),
        }
    }

    #[test]
    fn exited_container_is_inspected_read_and_removed() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("payload"), "[]\n").expect("payload");
        let cli = fake_docker(temp.path(), "exited 4");

        let result = sandbox(&cli, &FixloopConfig::default()).run(&image(), "pylint src", Duration::from_secs(5));
        assert_eq!(result.exit_code, 4);
        assert_eq!(result.output, "[]\n");

        assert_eq!(
            argv(temp.path()),
            vec![
                "run -d --label fixloop.sandbox=1 fixloop-sandbox:test /bin/sh -c pylint src",
                "inspect -f {{.State.Status}} {{.State.ExitCode}} cid-42",
                "logs cid-42",
                "rm -f cid-42",
            ]
        );
    }

    #[test]
    fn timed_out_container_is_killed_then_removed() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("payload"), "partial\n").expect("payload");
        let cli = fake_docker(temp.path(), "running 0");

        let result = sandbox(&cli, &FixloopConfig::default()).run(&image(), "sleep 999", Duration::ZERO);
        assert!(result.timed_out);
        assert!(result.output.contains("partial"));

        let calls = argv(temp.path());
        assert!(calls.contains(&"kill cid-42".to_string()));
        assert_eq!(calls.last().map(String::as_str), Some("rm -f cid-42"));
    }

    #[test]
    fn list_filters_by_sandbox_label() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cli = fake_docker(temp.path(), "exited 0");
        let docker = DockerCli::new(cli.to_string_lossy(), Duration::from_secs(5), 1024);

        assert_eq!(docker.list().expect("list"), vec!["cid-1", "cid-2"]);
        assert_eq!(
            argv(temp.path()),
            vec!["ps -a -q --no-trunc --filter label=fixloop.sandbox=1"]
        );
    }

    #[test]
    fn large_lint_report_reaches_the_parser_intact() {
        let temp = tempfile::tempdir().expect("tempdir");
        let items: Vec<String> = (0..4000)
            .map(|i| {
                format!(
                    r#"{{"type":"convention","module":"app","obj":"","line":{i},"column":0,"path":"src/app.py","symbol":"missing-function-docstring","message":"Missing function or method docstring padding padding padding padding padding padding padding padding padding padding padding padding padding padding padding padding padding padding padding padding padding padding padding","message-id":"C0116"}}"#
                )
            })
            .collect();
        let payload = format!("[{}]\n", items.join(",\n"));
        let config = FixloopConfig::default();
        assert!(payload.len() > config.sandbox.output_limit_bytes);
        fs::write(temp.path().join("payload"), &payload).expect("payload");
        let cli = fake_docker(temp.path(), "exited 16");

        let result = sandbox(&cli, &config).run(&image(), "pylint src", Duration::from_secs(30));
        assert_eq!(result.output.len(), payload.len());

        let report = parse_lint_output(&result.output);
        assert_eq!(report.records.len(), 4000);
        assert!(report.inconclusive.is_none());
    }
}
