//! Fixloop configuration, read from `fixloop.toml` by default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::git::GitSettings;
use crate::io::remediation::RetryPolicy;
use crate::io::sandbox::SandboxSettings;

/// Fixloop configuration (TOML).
///
/// Missing sections and fields fall back to their defaults, so an empty file
/// (or no file at all) is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FixloopConfig {
    pub repair: RepairConfig,
    pub sandbox: SandboxConfig,
    pub generative: GenerativeConfig,
    pub git: GitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepairConfig {
    /// Fix attempts allowed per run.
    pub max_iterations: u32,
    /// Parent directory for per-run clones.
    pub workspace_root: PathBuf,
    /// Directory holding one JSON state file per run.
    pub registry_dir: PathBuf,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            workspace_root: std::env::temp_dir().join("fixloop"),
            registry_dir: PathBuf::from(".fixloop/runs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    pub docker_cli: String,
    pub image_tag: String,
    pub base_image: String,
    /// Wall-clock limit for each lint/test command.
    pub command_timeout_secs: u64,
    pub build_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub rebuild_delay_ms: u64,
    /// Cap on captured docker CLI output. Container logs are read in full.
    pub output_limit_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker_cli: "docker".to_string(),
            image_tag: "fixloop-sandbox:latest".to_string(),
            base_image: "python:3.11-slim".to_string(),
            command_timeout_secs: 60,
            build_timeout_secs: 15 * 60,
            poll_interval_ms: 1000,
            rebuild_delay_ms: 2000,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenerativeConfig {
    /// Command that reads a prompt on stdin and prints the fixed file.
    /// Empty disables the generative fallback.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub output_limit_bytes: usize,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 5 * 60,
            max_retries: 3,
            backoff_base_ms: 2000,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub remote: String,
    pub push_retries: u32,
    pub push_retry_delay_ms: u64,
    pub commit_prefix: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        let settings = GitSettings::default();
        Self {
            remote: settings.remote,
            push_retries: settings.push_attempts,
            push_retry_delay_ms: 5000,
            commit_prefix: settings.commit_prefix,
        }
    }
}

impl FixloopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.repair.max_iterations == 0 {
            return Err(anyhow!("repair.max_iterations must be > 0"));
        }
        if self.sandbox.docker_cli.trim().is_empty() {
            return Err(anyhow!("sandbox.docker_cli must not be empty"));
        }
        if self.sandbox.image_tag.trim().is_empty() {
            return Err(anyhow!("sandbox.image_tag must not be empty"));
        }
        if self.sandbox.command_timeout_secs == 0 {
            return Err(anyhow!("sandbox.command_timeout_secs must be > 0"));
        }
        if self.sandbox.build_timeout_secs == 0 {
            return Err(anyhow!("sandbox.build_timeout_secs must be > 0"));
        }
        if self.sandbox.poll_interval_ms == 0 {
            return Err(anyhow!("sandbox.poll_interval_ms must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        if self.generative.max_retries == 0 {
            return Err(anyhow!("generative.max_retries must be > 0"));
        }
        if self.generative.timeout_secs == 0 {
            return Err(anyhow!("generative.timeout_secs must be > 0"));
        }
        if self.git.push_retries == 0 {
            return Err(anyhow!("git.push_retries must be > 0"));
        }
        if self.git.remote.trim().is_empty() {
            return Err(anyhow!("git.remote must not be empty"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox.command_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox.build_timeout_secs)
    }

    /// Sandbox settings, with the image tag overridden when given.
    pub fn sandbox_settings(&self, image_tag: Option<String>) -> SandboxSettings {
        SandboxSettings {
            image_tag: image_tag.unwrap_or_else(|| self.sandbox.image_tag.clone()),
            base_image: self.sandbox.base_image.clone(),
            poll_interval: Duration::from_millis(self.sandbox.poll_interval_ms),
            rebuild_delay: Duration::from_millis(self.sandbox.rebuild_delay_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.generative.max_retries,
            backoff_base: Duration::from_millis(self.generative.backoff_base_ms),
        }
    }

    pub fn git_settings(&self) -> GitSettings {
        GitSettings {
            remote: self.git.remote.clone(),
            push_attempts: self.git.push_retries,
            push_retry_delay: Duration::from_millis(self.git.push_retry_delay_ms),
            commit_prefix: self.git.commit_prefix.clone(),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FixloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<FixloopConfig> {
    if !path.exists() {
        let cfg = FixloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FixloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
