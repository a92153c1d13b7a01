//! Working memory of one repair run and the loop's health decision.

use serde::{Deserialize, Serialize};

use crate::core::types::{ErrorKind, ErrorRecord, FixEntry, PassReport, RunStatus};

/// Identity of a repair request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairRequest {
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
}

/// State held by the orchestrator for the lifetime of one run.
///
/// `lint_errors` and `test_failures` are replaced wholesale after every
/// analysis; `fixed_issues` is append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairState {
    pub run_id: String,
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
    pub branch: String,
    pub workspace_dir: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub lint_errors: Vec<ErrorRecord>,
    pub test_failures: Vec<ErrorRecord>,
    pub fixed_issues: Vec<FixEntry>,
    pub status: RunStatus,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub error: Option<String>,
    /// Notes from classifier passes whose output could not be parsed.
    #[serde(default)]
    pub inconclusive: Vec<String>,
}

impl RepairState {
    pub fn new(
        run_id: impl Into<String>,
        request: &RepairRequest,
        workspace_dir: impl Into<String>,
        max_iterations: u32,
        started_at: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            repo_url: request.repo_url.clone(),
            team_name: request.team_name.clone(),
            leader_name: request.leader_name.clone(),
            branch: branch_name(&request.team_name, &request.leader_name),
            workspace_dir: workspace_dir.into(),
            iteration: 0,
            max_iterations,
            lint_errors: Vec::new(),
            test_failures: Vec::new(),
            fixed_issues: Vec::new(),
            status: RunStatus::Running,
            started_at: started_at.into(),
            ended_at: None,
            error: None,
            inconclusive: Vec::new(),
        }
    }

    /// Replace the diagnostic snapshots with a fresh analysis.
    pub fn replace_diagnostics(&mut self, lint: PassReport, tests: PassReport) {
        for note in [lint.inconclusive, tests.inconclusive].into_iter().flatten() {
            self.inconclusive
                .push(format!("iteration {}: {note}", self.iteration));
        }
        self.lint_errors = lint.records;
        self.test_failures = tests.records;
    }

    pub fn is_clean(&self) -> bool {
        self.lint_errors.is_empty() && self.test_failures.is_empty()
    }

    pub fn budget_exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    /// Append a fix attempt and advance the iteration counter.
    pub fn record_fix(&mut self, entry: FixEntry) {
        self.fixed_issues.push(entry);
        self.iteration += 1;
    }

    /// Mark the run as crashed, injecting a `CRITICAL` record so the
    /// persisted state never reads as "zero issues".
    pub fn mark_crashed(&mut self, error: &str) {
        self.status = RunStatus::Failed;
        self.error = Some(error.to_string());
        self.test_failures.push(ErrorRecord::runner(
            ErrorKind::Critical,
            format!("Repair run aborted: {error}"),
        ));
    }
}

/// Decision taken after each analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Both pools are empty.
    Passed,
    /// Errors remain and the iteration budget is spent.
    Failed,
    /// Errors remain and budget is left for another fix.
    FixNeeded,
}

pub fn check_health(state: &RepairState) -> Health {
    if state.is_clean() {
        Health::Passed
    } else if state.budget_exhausted() {
        Health::Failed
    } else {
        Health::FixNeeded
    }
}

/// Branch name used for published fixes: `{TEAM}_{LEADER}_AI_Fix`.
pub fn branch_name(team: &str, leader: &str) -> String {
    format!("{}_{}_AI_Fix", normalize_name(team), normalize_name(leader))
}

fn normalize_name(name: &str) -> String {
    name.trim().to_uppercase().replace(' ', "_")
}
