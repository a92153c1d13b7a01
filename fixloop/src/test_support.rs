//! Scripted fakes for driving the sandbox and repair loop without docker,
//! git, or a generative model.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};

use crate::core::types::SandboxResult;
use crate::io::analyzer::{Analysis, Diagnostics};
use crate::io::docker::{BuildError, ContainerBackend, ContainerState};
use crate::io::generative::{FixModel, FixRequest, RateLimitedError};
use crate::io::git::SourceControl;
use crate::io::sandbox::{DESCRIPTOR_NAME, ImageHandle, SandboxRunner};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scripted behaviour for one container started on a [`FakeContainerBackend`].
#[derive(Debug, Clone)]
pub struct FakeContainer {
    /// Polls answered with `Running` before the exit code is reported.
    running_polls: Option<u32>,
    exit_code: i32,
    logs: String,
    logs_fail: bool,
    state_fails: bool,
}

impl FakeContainer {
    pub fn exits_after(running_polls: u32, exit_code: i32, logs: &str) -> Self {
        Self {
            running_polls: Some(running_polls),
            exit_code,
            logs: logs.to_string(),
            logs_fail: false,
            state_fails: false,
        }
    }

    pub fn never_exits(logs: &str) -> Self {
        Self {
            running_polls: None,
            ..Self::exits_after(0, 0, logs)
        }
    }

    pub fn failing_logs(mut self) -> Self {
        self.logs_fail = true;
        self
    }

    pub fn failing_state(mut self) -> Self {
        self.state_fails = true;
        self
    }
}

/// Image build observed by the fake backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecord {
    pub tag: String,
    /// Descriptor contents present in the build context at build time.
    pub descriptor: String,
}

#[derive(Debug)]
struct LiveContainer {
    id: String,
    script: FakeContainer,
    polls: u32,
}

#[derive(Debug, Default)]
struct BackendLog {
    queue: VecDeque<FakeContainer>,
    live: Vec<LiveContainer>,
    next_id: u32,
    killed: Vec<String>,
    builds: Vec<BuildRecord>,
    removed_images: Vec<String>,
    failing_builds: u32,
}

/// In-memory [`ContainerBackend`] that tracks live containers.
#[derive(Debug, Default)]
pub struct FakeContainerBackend {
    log: Mutex<BackendLog>,
}

impl FakeContainerBackend {
    pub fn new(containers: Vec<FakeContainer>) -> Self {
        Self {
            log: Mutex::new(BackendLog {
                queue: containers.into(),
                ..BackendLog::default()
            }),
        }
    }

    /// Fail the next `count` image builds.
    pub fn failing_builds(self, count: u32) -> Self {
        lock(&self.log).failing_builds = count;
        self
    }

    pub fn killed(&self) -> Vec<String> {
        lock(&self.log).killed.clone()
    }

    pub fn builds(&self) -> Vec<BuildRecord> {
        lock(&self.log).builds.clone()
    }

    pub fn removed_images(&self) -> Vec<String> {
        lock(&self.log).removed_images.clone()
    }
}

impl ContainerBackend for FakeContainerBackend {
    fn remove_image(&self, tag: &str) -> Result<()> {
        lock(&self.log).removed_images.push(tag.to_string());
        Ok(())
    }

    fn build_image(&self, context: &Path, tag: &str) -> Result<()> {
        let descriptor = fs::read_to_string(context.join(DESCRIPTOR_NAME))
            .context("build context has no descriptor")?;
        let mut log = lock(&self.log);
        log.builds.push(BuildRecord {
            tag: tag.to_string(),
            descriptor,
        });
        if log.failing_builds > 0 {
            log.failing_builds -= 1;
            return Err(BuildError {
                tag: tag.to_string(),
                detail: "scripted build failure".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn start(&self, _image: &str, _script: &str) -> Result<String> {
        let mut log = lock(&self.log);
        let script = log
            .queue
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted container left to start"))?;
        log.next_id += 1;
        let id = format!("fake-{}", log.next_id);
        log.live.push(LiveContainer {
            id: id.clone(),
            script,
            polls: 0,
        });
        Ok(id)
    }

    fn state(&self, id: &str) -> Result<ContainerState> {
        let mut log = lock(&self.log);
        let container = log
            .live
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| anyhow!("no such container: {id}"))?;
        if container.script.state_fails {
            bail!("inspect failed for {id}");
        }
        let state = match container.script.running_polls {
            Some(limit) if container.polls >= limit => {
                ContainerState::Exited(container.script.exit_code)
            }
            _ => ContainerState::Running,
        };
        container.polls += 1;
        Ok(state)
    }

    fn logs(&self, id: &str) -> Result<String> {
        let log = lock(&self.log);
        let container = log
            .live
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| anyhow!("no such container: {id}"))?;
        if container.script.logs_fail {
            bail!("logs failed for {id}");
        }
        Ok(container.script.logs.clone())
    }

    fn kill(&self, id: &str) -> Result<()> {
        lock(&self.log).killed.push(id.to_string());
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        lock(&self.log).live.retain(|c| c.id != id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(lock(&self.log).live.iter().map(|c| c.id.clone()).collect())
    }
}

/// [`SandboxRunner`] that replays canned results in order.
#[derive(Debug, Default)]
pub struct ScriptedSandbox {
    results: Mutex<VecDeque<SandboxResult>>,
    scripts: Mutex<Vec<String>>,
    prepared: Mutex<u32>,
    build_fails: bool,
}

impl ScriptedSandbox {
    pub fn new(results: Vec<SandboxResult>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    pub fn failing_build(mut self) -> Self {
        self.build_fails = true;
        self
    }

    /// Scripts passed to `run`, in call order.
    pub fn scripts(&self) -> Vec<String> {
        lock(&self.scripts).clone()
    }

    pub fn prepared(&self) -> u32 {
        *lock(&self.prepared)
    }
}

impl SandboxRunner for ScriptedSandbox {
    fn prepare_environment(&self, _workspace: &Path) -> Result<ImageHandle> {
        *lock(&self.prepared) += 1;
        if self.build_fails {
            return Err(BuildError {
                tag: "scripted".to_string(),
                detail: "scripted build failure".to_string(),
            }
            .into());
        }
        Ok(ImageHandle {
            tag: "scripted:latest".to_string(),
        })
    }

    fn run(&self, _image: &ImageHandle, script: &str, _timeout: Duration) -> SandboxResult {
        lock(&self.scripts).push(script.to_string());
        lock(&self.results)
            .pop_front()
            .unwrap_or_else(|| SandboxResult::internal_error("no scripted sandbox result left"))
    }
}

/// One canned reply from a [`ScriptedModel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Content(String),
    RateLimited,
    Failure(String),
}

/// [`FixModel`] that replays canned replies and records requests.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<FixRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<FixRequest> {
        lock(&self.requests).clone()
    }
}

impl FixModel for ScriptedModel {
    fn suggest_fix(&self, request: &FixRequest) -> Result<String> {
        lock(&self.requests).push(request.clone());
        match lock(&self.replies).pop_front() {
            Some(ScriptedReply::Content(content)) => Ok(content),
            Some(ScriptedReply::RateLimited) => Err(RateLimitedError {
                detail: "429 Too Many Requests".to_string(),
            }
            .into()),
            Some(ScriptedReply::Failure(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted model reply left")),
        }
    }
}

#[derive(Debug, Default)]
struct ScmLog {
    branches: Vec<String>,
    commits: Vec<String>,
    pushes: Vec<String>,
}

/// [`SourceControl`] that materializes fixture files on clone and records
/// every commit and push.
#[derive(Debug, Default)]
pub struct RecordingScm {
    files: Vec<(String, String)>,
    clone_fails: bool,
    push_fails: bool,
    log: Mutex<ScmLog>,
}

impl RecordingScm {
    /// `files` are `(relative path, contents)` pairs written on clone.
    pub fn new(files: Vec<(&str, &str)>) -> Self {
        Self {
            files: files
                .into_iter()
                .map(|(path, contents)| (path.to_string(), contents.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing_clone(mut self) -> Self {
        self.clone_fails = true;
        self
    }

    pub fn failing_push(mut self) -> Self {
        self.push_fails = true;
        self
    }

    pub fn branches(&self) -> Vec<String> {
        lock(&self.log).branches.clone()
    }

    pub fn commits(&self) -> Vec<String> {
        lock(&self.log).commits.clone()
    }

    pub fn pushes(&self) -> Vec<String> {
        lock(&self.log).pushes.clone()
    }
}

impl SourceControl for RecordingScm {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        if self.clone_fails {
            bail!("git clone {url} failed: repository not found");
        }
        if dest.exists() {
            fs::remove_dir_all(dest)?;
        }
        for (path, contents) in &self.files {
            let target = dest.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, contents)?;
        }
        fs::create_dir_all(dest)?;
        Ok(())
    }

    fn create_or_reuse_branch(&self, _workspace: &Path, branch: &str) -> Result<()> {
        lock(&self.log).branches.push(branch.to_string());
        Ok(())
    }

    fn commit(&self, _workspace: &Path, message: &str) -> Result<bool> {
        lock(&self.log).commits.push(message.to_string());
        Ok(true)
    }

    fn push(&self, _workspace: &Path, branch: &str) -> Result<()> {
        lock(&self.log).pushes.push(branch.to_string());
        if self.push_fails {
            bail!("git push --set-upstream origin {branch} failed: permission denied");
        }
        Ok(())
    }
}

/// [`Diagnostics`] that replays canned analyses; `Err` entries become errors.
#[derive(Debug, Default)]
pub struct ScriptedDiagnostics {
    analyses: Mutex<VecDeque<Result<Analysis, String>>>,
    calls: Mutex<u32>,
}

impl ScriptedDiagnostics {
    pub fn new(analyses: Vec<Result<Analysis, String>>) -> Self {
        Self {
            analyses: Mutex::new(analyses.into()),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        *lock(&self.calls)
    }
}

impl Diagnostics for ScriptedDiagnostics {
    fn analyze(&self, _workspace: &Path) -> Result<Analysis> {
        *lock(&self.calls) += 1;
        match lock(&self.analyses).pop_front() {
            Some(Ok(analysis)) => Ok(analysis),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted analysis left")),
        }
    }
}
