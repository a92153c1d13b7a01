//! Repair loop: clone, analyze, fix one error, publish, repeat.
//!
//! ```text
//! cloned -> analyzed -> passed
//!                    -> failed      (budget spent, errors remain)
//!                    -> fix_needed -> (fix, commit, push) -> analyzed
//! ```
//!
//! Every run ends with a persisted state, including runs that crash: the
//! crash is recorded as a `CRITICAL` diagnostic instead of escaping.

use std::path::Path;

use anyhow::Result;
use tracing::{error, info, instrument, warn};

use crate::core::selector::select;
use crate::core::state::{Health, RepairRequest, RepairState, check_health};
use crate::core::types::{ErrorRecord, FixEntry, FixStatus, RunStatus};
use crate::io::analyzer::Diagnostics;
use crate::io::generative::FixModel;
use crate::io::git::SourceControl;
use crate::io::remediation::{FixOutcome, Fixer, RetryPolicy};
use crate::io::run_store::{RunStore, now_rfc3339, write_results};

/// Per-run knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairSettings {
    pub max_iterations: u32,
    pub retry: RetryPolicy,
}

/// Collaborators the loop drives.
pub struct Collaborators<'a, S: SourceControl, D: Diagnostics> {
    pub scm: &'a S,
    pub diagnostics: &'a D,
    pub model: Option<&'a dyn FixModel>,
    pub store: &'a dyn RunStore,
}

/// Execute one repair run to completion and return its final state.
///
/// This never returns an error: failures that end the run are folded into
/// the returned (and persisted) state.
#[instrument(skip_all, fields(run_id = %run_id, repo = %request.repo_url))]
pub fn run_repair<S: SourceControl, D: Diagnostics>(
    run_id: &str,
    request: &RepairRequest,
    workspace: &Path,
    collaborators: &Collaborators<'_, S, D>,
    config: &RepairSettings,
) -> RepairState {
    let mut state = RepairState::new(
        run_id,
        request,
        workspace.display().to_string(),
        config.max_iterations,
        now_rfc3339(),
    );
    persist(collaborators.store, &state);
    info!(branch = %state.branch, max_iterations = config.max_iterations, "repair run started");

    if let Err(err) = drive(&mut state, workspace, collaborators, config) {
        let message = format!("{err:#}");
        error!(err = %message, "repair run crashed");
        state.mark_crashed(&message);
    }
    state.ended_at = Some(now_rfc3339());

    match write_results(workspace, &state) {
        Ok(path) => info!(path = %path.display(), "results written"),
        Err(err) => warn!(err = %format!("{err:#}"), "failed to write results artifact"),
    }
    persist(collaborators.store, &state);
    info!(
        status = ?state.status,
        iterations = state.iteration,
        fixes = state.fixed_issues.len(),
        "repair run finished"
    );
    state
}

fn drive<S: SourceControl, D: Diagnostics>(
    state: &mut RepairState,
    workspace: &Path,
    collaborators: &Collaborators<'_, S, D>,
    config: &RepairSettings,
) -> Result<()> {
    collaborators.scm.clone_repo(&state.repo_url, workspace)?;
    collaborators
        .scm
        .create_or_reuse_branch(workspace, &state.branch)?;

    loop {
        let analysis = collaborators.diagnostics.analyze(workspace)?;
        for note in [&analysis.lint.inconclusive, &analysis.tests.inconclusive]
            .into_iter()
            .flatten()
        {
            warn!(iteration = state.iteration, note = %note, "inconclusive diagnostic pass");
        }
        state.replace_diagnostics(analysis.lint, analysis.tests);
        persist(collaborators.store, state);

        match check_health(state) {
            Health::Passed => {
                info!(iteration = state.iteration, "no errors remain");
                state.status = RunStatus::Passed;
                return Ok(());
            }
            Health::Failed => {
                warn!(
                    iteration = state.iteration,
                    remaining = state.lint_errors.len() + state.test_failures.len(),
                    "iteration budget exhausted"
                );
                state.status = RunStatus::Failed;
                return Ok(());
            }
            Health::FixNeeded => {}
        }

        let Some(target) = select(&state.lint_errors, &state.test_failures).cloned() else {
            state.status = RunStatus::Completed;
            return Ok(());
        };
        let entry = attempt_fix(state, workspace, &target, collaborators, config);
        state.record_fix(entry);
    }
}

/// Fix one error and publish the result; never aborts the run.
#[instrument(skip_all, fields(iteration = state.iteration, file = %target.file, kind = %target.kind))]
fn attempt_fix<S: SourceControl, D: Diagnostics>(
    state: &RepairState,
    workspace: &Path,
    target: &ErrorRecord,
    collaborators: &Collaborators<'_, S, D>,
    config: &RepairSettings,
) -> FixEntry {
    let fixer = Fixer::new(workspace, collaborators.model, config.retry);
    let (commit_message, status) = match fixer.fix_error(target) {
        Ok(FixOutcome::Applied { description, .. }) => {
            let status = publish(collaborators.scm, workspace, &state.branch, &description);
            (description, status)
        }
        Ok(FixOutcome::Unmatched { description }) => {
            warn!(%description, "no fix available");
            (description, FixStatus::Failed)
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "fix attempt failed");
            (
                format!("Failed to fix {}: {err:#}", target.file),
                FixStatus::Failed,
            )
        }
    };
    FixEntry {
        file: target.file.clone(),
        bug_type: target.kind,
        line: target.line,
        commit_message,
        status,
    }
}

fn publish<S: SourceControl>(scm: &S, workspace: &Path, branch: &str, message: &str) -> FixStatus {
    match scm.commit(workspace, message) {
        Ok(committed) => {
            if !committed {
                info!("fix left the tree unchanged, nothing to commit");
            }
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "commit failed");
            return FixStatus::FixedUncommitted;
        }
    }
    match scm.push(workspace, branch) {
        Ok(()) => FixStatus::Fixed,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "push failed, keeping fix local");
            FixStatus::FixedLocalOnly
        }
    }
}

fn persist(store: &dyn RunStore, state: &RepairState) {
    if let Err(err) = store.put(state) {
        warn!(run_id = %state.run_id, err = %format!("{err:#}"), "failed to persist run state");
    }
}
