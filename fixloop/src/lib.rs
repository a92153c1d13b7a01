//! Autonomous repair loop for Python repositories.
//!
//! A run clones a repository, analyzes it inside a disposable container, and
//! fixes one error per iteration until nothing is left or the iteration budget
//! runs out. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (classification, prioritization,
//!   fix rules, run state). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (containers, git, subprocesses,
//!   the generative collaborator, persistence). Each sits behind a trait so
//!   tests can script it.
//!
//! [`repair`] coordinates the two into the repair state machine.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod repair;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
