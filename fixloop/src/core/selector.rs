//! Deterministic selection of the next error to fix.

use crate::core::types::ErrorRecord;

/// Merge lint and test records into one pool ordered by fix priority.
///
/// The sort is stable, so records of the same kind keep their original
/// relative order (lint records first, then test records).
pub fn prioritize<'a>(lint: &'a [ErrorRecord], tests: &'a [ErrorRecord]) -> Vec<&'a ErrorRecord> {
    let mut pool: Vec<&ErrorRecord> = lint.iter().chain(tests).collect();
    pool.sort_by_key(|record| record.kind.priority());
    pool
}

/// Pick the single record to fix this iteration.
///
/// Returns `None` when both pools are empty.
pub fn select<'a>(lint: &'a [ErrorRecord], tests: &'a [ErrorRecord]) -> Option<&'a ErrorRecord> {
    prioritize(lint, tests).into_iter().next()
}
