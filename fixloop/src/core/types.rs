//! Shared deterministic types for the repair loop.
//!
//! These types define stable contracts between the sandbox, the diagnostic
//! classifier, the remediation engine and the orchestrator. They carry no I/O
//! and serialize to the persisted `results.json` layout.

use serde::{Deserialize, Serialize};

/// Exit code reserved for internal sandbox failures and timeouts.
pub const INTERNAL_EXIT_CODE: i32 = -1;

/// Placeholder file name for records whose location could not be recovered.
pub const UNKNOWN_FILE: &str = "unknown";

/// Closed taxonomy of diagnostic kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Syntax,
    Indentation,
    Import,
    TypeError,
    Logic,
    Linting,
    Timeout,
    Critical,
}

impl ErrorKind {
    /// Fix priority rank; lower ranks are fixed first.
    ///
    /// Kinds outside the remediation table rank last.
    pub fn priority(self) -> u32 {
        match self {
            ErrorKind::Syntax => 1,
            ErrorKind::Indentation => 2,
            ErrorKind::Import => 3,
            ErrorKind::TypeError => 4,
            ErrorKind::Logic => 5,
            ErrorKind::Linting => 6,
            ErrorKind::Timeout | ErrorKind::Critical => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SYNTAX",
            ErrorKind::Indentation => "INDENTATION",
            ErrorKind::Import => "IMPORT",
            ErrorKind::TypeError => "TYPE_ERROR",
            ErrorKind::Logic => "LOGIC",
            ErrorKind::Linting => "LINTING",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a record came from, with the fields only that origin carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "lowercase")]
pub enum Origin {
    /// Produced by the lint pass. `symbol` is the linter's rule id.
    Lint { symbol: Option<String> },
    /// Produced by the test pass.
    Test { test_name: Option<String> },
    /// Synthesized by the runner itself (timeouts, crashes).
    Runner,
}

/// A typed diagnostic with file/line provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Repository-relative path, or [`UNKNOWN_FILE`].
    pub file: String,
    /// 1-indexed line; 0 means unlocated.
    pub line: u32,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    #[serde(flatten)]
    pub origin: Origin,
}

impl ErrorRecord {
    pub fn lint(
        file: impl Into<String>,
        line: u32,
        kind: ErrorKind,
        message: impl Into<String>,
        symbol: Option<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            kind,
            message: message.into(),
            origin: Origin::Lint { symbol },
        }
    }

    pub fn test(
        file: impl Into<String>,
        line: u32,
        kind: ErrorKind,
        message: impl Into<String>,
        test_name: Option<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            kind,
            message: message.into(),
            origin: Origin::Test { test_name },
        }
    }

    pub fn runner(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            file: UNKNOWN_FILE.to_string(),
            line: 0,
            kind,
            message: message.into(),
            origin: Origin::Runner,
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match &self.origin {
            Origin::Lint { symbol } => symbol.as_deref(),
            _ => None,
        }
    }

    pub fn test_name(&self) -> Option<&str> {
        match &self.origin {
            Origin::Test { test_name } => test_name.as_deref(),
            _ => None,
        }
    }
}

/// Outcome of one command executed in the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxResult {
    /// Command exit code, or [`INTERNAL_EXIT_CODE`].
    pub exit_code: i32,
    /// Combined stdout and stderr.
    pub output: String,
    /// Set only when the wall-clock budget was exceeded.
    pub timed_out: bool,
}

impl SandboxResult {
    pub fn internal_error(output: impl Into<String>) -> Self {
        Self {
            exit_code: INTERNAL_EXIT_CODE,
            output: output.into(),
            timed_out: false,
        }
    }
}

/// Records produced by one classifier pass.
///
/// `inconclusive` is set when the tool output could not be located or parsed,
/// which otherwise looks exactly like a clean pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub records: Vec<ErrorRecord>,
    pub inconclusive: Option<String>,
}

impl PassReport {
    pub fn found(records: Vec<ErrorRecord>) -> Self {
        Self {
            records,
            inconclusive: None,
        }
    }

    pub fn inconclusive(note: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            inconclusive: Some(note.into()),
        }
    }
}

/// Recorded status of one fix attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixStatus {
    Fixed,
    Failed,
    /// The fix was committed but the push to the remote failed.
    #[serde(rename = "Fixed (Local only - Push Failed)")]
    FixedLocalOnly,
    /// The file was changed but the commit could not be created.
    #[serde(rename = "Fixed (Commit Failed)")]
    FixedUncommitted,
}

impl FixStatus {
    pub fn is_fixed(self) -> bool {
        !matches!(self, FixStatus::Failed)
    }
}

/// Append-only log entry for one iteration that attempted a fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixEntry {
    pub file: String,
    pub bug_type: ErrorKind,
    pub line: u32,
    pub commit_message: String,
    pub status: FixStatus,
}

/// Lifecycle status of a repair run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Passed,
    Failed,
    Completed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Passed | RunStatus::Failed)
    }
}
