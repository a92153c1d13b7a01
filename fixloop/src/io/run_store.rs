//! Run registry: where repair states live while and after a run executes.
//!
//! Several runs may share one store concurrently, so implementations are
//! `Send + Sync` and every `put` replaces the whole state for that id.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use rand::{Rng, distributions::Alphanumeric};
use tracing::debug;

use crate::core::state::RepairState;

/// File name of the per-workspace results artifact.
pub const RESULTS_FILE: &str = "results.json";

pub trait RunStore: Send + Sync {
    fn put(&self, state: &RepairState) -> Result<()>;
    fn get(&self, run_id: &str) -> Result<Option<RepairState>>;
}

/// In-process registry.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<String, RepairState>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn len(&self) -> usize {
        self.runs.read().map(|runs| runs.len()).unwrap_or(0)
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RunStore for MemoryRunStore {
    fn put(&self, state: &RepairState) -> Result<()> {
        let mut runs = self
            .runs
            .write()
            .map_err(|_| anyhow!("run registry lock poisoned"))?;
        runs.insert(state.run_id.clone(), state.clone());
        Ok(())
    }

    fn get(&self, run_id: &str) -> Result<Option<RepairState>> {
        let runs = self
            .runs
            .read()
            .map_err(|_| anyhow!("run registry lock poisoned"))?;
        Ok(runs.get(run_id).cloned())
    }
}

/// Registry backed by one JSON file per run, readable across processes.
#[derive(Debug, Clone)]
pub struct FsRunStore {
    dir: PathBuf,
}

impl FsRunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf> {
        validate_run_id(run_id)?;
        Ok(self.dir.join(format!("{run_id}.json")))
    }
}

impl RunStore for FsRunStore {
    fn put(&self, state: &RepairState) -> Result<()> {
        let path = self.path_for(&state.run_id)?;
        debug!(run_id = %state.run_id, status = ?state.status, "persisting run state");
        write_json(&path, state)
    }

    fn get(&self, run_id: &str) -> Result<Option<RepairState>> {
        let path = self.path_for(run_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read run {}", path.display()))?;
        let state = serde_json::from_str(&contents)
            .with_context(|| format!("parse run {}", path.display()))?;
        Ok(Some(state))
    }
}

/// Write the final results artifact into the run's workspace.
pub fn write_results(workspace: &Path, state: &RepairState) -> Result<PathBuf> {
    let path = workspace.join(RESULTS_FILE);
    write_json(&path, state)?;
    Ok(path)
}

/// New run id: `run-<utc timestamp>-<6 random alphanumerics>`.
pub fn new_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let mut rng = rand::thread_rng();
    let suffix = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("run-{timestamp}-{suffix}")
}

/// Current UTC time in RFC 3339 form.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn validate_run_id(run_id: &str) -> Result<()> {
    let valid = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(anyhow!("invalid run id '{run_id}'"));
    }
    Ok(())
}

fn write_json(path: &Path, state: &RepairState) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("run state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp run state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace run state {}", path.display()))?;
    Ok(())
}
