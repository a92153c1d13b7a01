//! Isolated execution of lint/test commands in disposable containers.
//!
//! Commands are polled rather than waited on so every run can be preempted at
//! its deadline. Whatever happens, the container backing a run is removed
//! before [`Sandbox::run`] returns.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{INTERNAL_EXIT_CODE, SandboxResult};
use crate::io::docker::{ContainerBackend, ContainerState};

/// File name of the environment descriptor looked up in the workspace.
pub const DESCRIPTOR_NAME: &str = "Dockerfile";

/// A built sandbox image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    pub tag: String,
}

/// Sandbox knobs, usually derived from the `[sandbox]` config section.
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub image_tag: String,
    pub base_image: String,
    pub poll_interval: Duration,
    /// Pause before the single rebuild attempt.
    pub rebuild_delay: Duration,
}

/// What the diagnostic classifier needs from a sandbox.
pub trait SandboxRunner {
    /// Build (or rebuild) the execution image for `workspace`.
    fn prepare_environment(&self, workspace: &Path) -> Result<ImageHandle>;
    /// Run `script` in a fresh instance of `image`. Never fails: backend
    /// errors are reported as `exit_code = -1`.
    fn run(&self, image: &ImageHandle, script: &str, timeout: Duration) -> SandboxResult;
}

/// Container sandbox over a [`ContainerBackend`].
#[derive(Debug)]
pub struct Sandbox<B: ContainerBackend> {
    backend: B,
    settings: SandboxSettings,
}

impl<B: ContainerBackend> Sandbox<B> {
    pub fn new(backend: B, settings: SandboxSettings) -> Self {
        Self { backend, settings }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn build_with_retry(&self, workspace: &Path) -> Result<()> {
        match self.backend.build_image(workspace, &self.settings.image_tag) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "image build failed, retrying once");
                thread::sleep(self.settings.rebuild_delay);
                self.backend.build_image(workspace, &self.settings.image_tag)
            }
        }
    }

    fn poll(&self, id: &str, timeout: Duration) -> SandboxResult {
        let started = Instant::now();
        loop {
            match self.backend.state(id) {
                Ok(ContainerState::Exited(exit_code)) => {
                    return match self.backend.logs(id) {
                        Ok(output) => SandboxResult {
                            exit_code,
                            output,
                            timed_out: false,
                        },
                        Err(err) => SandboxResult::internal_error(format!("{err:#}")),
                    };
                }
                Ok(ContainerState::Running) => {}
                Err(err) => return SandboxResult::internal_error(format!("{err:#}")),
            }

            if started.elapsed() >= timeout {
                warn!(timeout_secs = timeout.as_secs(), "sandbox command timed out");
                return self.timed_out(id, timeout);
            }
            thread::sleep(self.settings.poll_interval);
        }
    }

    /// Best-effort kill and partial log capture; never blocks teardown.
    fn timed_out(&self, id: &str, timeout: Duration) -> SandboxResult {
        if let Err(err) = self.backend.kill(id) {
            debug!(err = %format!("{err:#}"), "kill after timeout failed");
        }
        let logs = self
            .backend
            .logs(id)
            .unwrap_or_else(|_| "Timeout (logs unavailable)".to_string());
        SandboxResult {
            exit_code: INTERNAL_EXIT_CODE,
            output: format!(
                "TIMEOUT ERROR: execution exceeded {} seconds.\nPartial Logs:\n{logs}",
                timeout.as_secs()
            ),
            timed_out: true,
        }
    }
}

impl<B: ContainerBackend> SandboxRunner for Sandbox<B> {
    #[instrument(skip_all, fields(workspace = %workspace.display(), tag = %self.settings.image_tag))]
    fn prepare_environment(&self, workspace: &Path) -> Result<ImageHandle> {
        let _descriptor = DefaultDescriptor::ensure(workspace, &self.settings.base_image)?;

        if let Err(err) = self.backend.remove_image(&self.settings.image_tag) {
            debug!(err = %format!("{err:#}"), "stale image removal failed");
        }
        self.build_with_retry(workspace)?;
        info!("sandbox image built");

        Ok(ImageHandle {
            tag: self.settings.image_tag.clone(),
        })
    }

    #[instrument(skip_all, fields(image = %image.tag, timeout_secs = timeout.as_secs()))]
    fn run(&self, image: &ImageHandle, script: &str, timeout: Duration) -> SandboxResult {
        debug!(script, "starting sandbox container");
        let id = match self.backend.start(&image.tag, script) {
            Ok(id) => id,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to start sandbox container");
                return SandboxResult::internal_error(format!("{err:#}"));
            }
        };
        let _teardown = Teardown {
            backend: &self.backend,
            id: &id,
        };
        let result = self.poll(&id, timeout);
        debug!(exit_code = result.exit_code, timed_out = result.timed_out, "sandbox command finished");
        result
    }
}

/// Removes a container when dropped, on every return path.
struct Teardown<'a, B: ContainerBackend> {
    backend: &'a B,
    id: &'a str,
}

impl<B: ContainerBackend> Drop for Teardown<'_, B> {
    fn drop(&mut self) {
        if let Err(err) = self.backend.remove(self.id) {
            warn!(id = self.id, err = %format!("{err:#}"), "failed to remove sandbox container");
        }
    }
}

/// Default descriptor written for the duration of a build only.
///
/// Dropping the guard deletes the file it created; an existing descriptor is
/// left untouched.
struct DefaultDescriptor {
    created: Option<PathBuf>,
}

impl DefaultDescriptor {
    fn ensure(workspace: &Path, base_image: &str) -> Result<Self> {
        let path = workspace.join(DESCRIPTOR_NAME);
        if path.exists() {
            debug!("using workspace environment descriptor");
            return Ok(Self { created: None });
        }
        info!(base_image, "no environment descriptor, writing default");
        fs::write(&path, default_descriptor(base_image))
            .with_context(|| format!("write {}", path.display()))?;
        Ok(Self {
            created: Some(path),
        })
    }
}

impl Drop for DefaultDescriptor {
    fn drop(&mut self) {
        if let Some(path) = &self.created
            && let Err(err) = fs::remove_file(path)
        {
            warn!(path = %path.display(), err = %err, "failed to remove default descriptor");
        }
    }
}

/// Minimal environment: language runtime plus the lint and test tools.
pub fn default_descriptor(base_image: &str) -> String {
    format!(
        "FROM {base_image}\n\
         WORKDIR /app\n\
         COPY . .\n\
         RUN if [ -f requirements.txt ]; then pip install --trusted-host pypi.org --trusted-host files.pythonhosted.org -r requirements.txt; fi\n\
         RUN pip install --trusted-host pypi.org --trusted-host files.pythonhosted.org pytest pylint\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeContainer, FakeContainerBackend};

    fn settings() -> SandboxSettings {
        SandboxSettings {
            image_tag: "fixloop-sandbox:test".to_string(),
            base_image: "python:3.11-slim".to_string(),
            poll_interval: Duration::from_millis(5),
            rebuild_delay: Duration::ZERO,
        }
    }

    fn image() -> ImageHandle {
        ImageHandle {
            tag: "fixloop-sandbox:test".to_string(),
        }
    }

    #[test]
    fn completed_command_returns_exit_code_and_logs() {
        let backend = FakeContainerBackend::new(vec![FakeContainer::exits_after(2, 1, "boom\n")]);
        let sandbox = Sandbox::new(backend, settings());
        let result = sandbox.run(&image(), "pytest", Duration::from_secs(5));
        assert_eq!(
            result,
            SandboxResult {
                exit_code: 1,
                output: "boom\n".to_string(),
                timed_out: false,
            }
        );
        assert!(sandbox.backend().list().expect("list").is_empty());
    }

    #[test]
    fn timeout_kills_and_removes_container() {
        let backend = FakeContainerBackend::new(vec![FakeContainer::never_exits("partial")]);
        let sandbox = Sandbox::new(backend, settings());
        let result = sandbox.run(&image(), "sleep 999", Duration::from_millis(30));
        assert_eq!(result.exit_code, INTERNAL_EXIT_CODE);
        assert!(result.timed_out);
        assert!(result.output.starts_with("TIMEOUT ERROR: execution exceeded 0 seconds."));
        assert!(result.output.contains("partial"));
        assert!(sandbox.backend().killed().len() == 1);
        assert!(sandbox.backend().list().expect("list").is_empty());
    }

    #[test]
    fn timeout_with_unavailable_logs_still_tears_down() {
        let backend =
            FakeContainerBackend::new(vec![FakeContainer::never_exits("x").failing_logs()]);
        let sandbox = Sandbox::new(backend, settings());
        let result = sandbox.run(&image(), "sleep 999", Duration::from_millis(20));
        assert!(result.timed_out);
        assert!(result.output.contains("Timeout (logs unavailable)"));
        assert!(sandbox.backend().list().expect("list").is_empty());
    }

    #[test]
    fn backend_errors_map_to_internal_exit_code() {
        let backend = FakeContainerBackend::new(vec![FakeContainer::exits_after(0, 0, "").failing_state()]);
        let sandbox = Sandbox::new(backend, settings());
        let result = sandbox.run(&image(), "pylint", Duration::from_secs(5));
        assert_eq!(result.exit_code, INTERNAL_EXIT_CODE);
        assert!(!result.timed_out);
        assert!(result.output.contains("inspect failed"));
        assert!(sandbox.backend().list().expect("list").is_empty());

        let sandbox = Sandbox::new(FakeContainerBackend::new(Vec::new()), settings());
        let result = sandbox.run(&image(), "pylint", Duration::from_secs(5));
        assert_eq!(result.exit_code, INTERNAL_EXIT_CODE);
    }

    #[test]
    fn prepare_writes_and_removes_default_descriptor() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backend = FakeContainerBackend::new(Vec::new());
        let sandbox = Sandbox::new(backend, settings());

        let handle = sandbox.prepare_environment(temp.path()).expect("prepare");
        assert_eq!(handle, image());
        assert!(!temp.path().join(DESCRIPTOR_NAME).exists());

        let builds = sandbox.backend().builds();
        assert_eq!(builds.len(), 1);
        assert!(builds[0].descriptor.contains("FROM python:3.11-slim"));
        assert_eq!(sandbox.backend().removed_images(), vec!["fixloop-sandbox:test"]);
    }

    #[test]
    fn prepare_keeps_existing_descriptor() {
        let temp = tempfile::tempdir().expect("tempdir");
        let descriptor = temp.path().join(DESCRIPTOR_NAME);
        fs::write(&descriptor, "FROM custom\n").expect("write");
        let sandbox = Sandbox::new(FakeContainerBackend::new(Vec::new()), settings());

        sandbox.prepare_environment(temp.path()).expect("prepare");
        assert_eq!(fs::read_to_string(&descriptor).expect("read"), "FROM custom\n");
        assert_eq!(sandbox.backend().builds()[0].descriptor, "FROM custom\n");
    }

    #[test]
    fn build_is_retried_once_then_surfaced() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = Sandbox::new(FakeContainerBackend::new(Vec::new()).failing_builds(1), settings());
        sandbox.prepare_environment(temp.path()).expect("second attempt succeeds");
        assert_eq!(sandbox.backend().builds().len(), 2);

        let sandbox = Sandbox::new(FakeContainerBackend::new(Vec::new()).failing_builds(2), settings());
        let err = sandbox.prepare_environment(temp.path()).unwrap_err();
        assert!(err.downcast_ref::<crate::io::docker::BuildError>().is_some());
        assert!(!temp.path().join(DESCRIPTOR_NAME).exists());
    }
}
