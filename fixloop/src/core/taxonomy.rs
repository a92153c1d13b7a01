//! Ordered kind-assignment rules for lint and test diagnostics.
//!
//! Each table is evaluated top to bottom and the first matching rule wins.
//! Rules only look at lowercased text, so callers build the inputs once with
//! [`LintText::new`] / [`TestText::new`].

use crate::core::types::ErrorKind;

/// Normalized view of one lint diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintText {
    pub message: String,
    pub symbol: String,
    pub severity: String,
}

impl LintText {
    pub fn new(message: &str, symbol: Option<&str>, severity: &str) -> Self {
        Self {
            message: message.to_lowercase(),
            symbol: symbol.unwrap_or_default().to_lowercase(),
            severity: severity.to_lowercase(),
        }
    }
}

/// Normalized combined text of a failing test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestText(pub String);

impl TestText {
    pub fn new(message: &str, body: &str) -> Self {
        Self(format!("{message} {body}").to_lowercase())
    }
}

/// A named classification rule.
pub struct Rule<T> {
    pub name: &'static str,
    pub kind: ErrorKind,
    pub matches: fn(&T) -> bool,
}

impl<T> std::fmt::Debug for Rule<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Lint rules. Unused imports are pinned to `LINTING` ahead of everything
/// else so they stay low-priority cleanup.
pub const LINT_RULES: &[Rule<LintText>] = &[
    Rule {
        name: "unused-import",
        kind: ErrorKind::Linting,
        matches: |t| t.message.contains("unused import"),
    },
    Rule {
        name: "syntax",
        kind: ErrorKind::Syntax,
        matches: |t| {
            t.message.contains("syntaxerror")
                || t.message.contains("expected ':'")
                || t.message.contains("invalid syntax")
                || t.symbol.contains("syntax-error")
        },
    },
    Rule {
        name: "indentation",
        kind: ErrorKind::Indentation,
        matches: |t| {
            t.message.contains("indentationerror")
                || t.message.contains("unexpected indent")
                || t.message.contains("indentation")
        },
    },
    Rule {
        name: "import",
        kind: ErrorKind::Import,
        matches: |t| {
            t.message.contains("import")
                || t.symbol.contains("import-error")
                || t.message.contains("modulenotfounderror")
        },
    },
    Rule {
        name: "type-error",
        kind: ErrorKind::TypeError,
        matches: |t| t.message.contains("type") && t.message.contains("error"),
    },
    Rule {
        name: "error-severity",
        kind: ErrorKind::Linting,
        matches: |t| matches!(t.severity.as_str(), "error" | "fatal"),
    },
];

/// Test-failure rules; anything unmatched is a logic failure.
pub const TEST_RULES: &[Rule<TestText>] = &[
    Rule {
        name: "import",
        kind: ErrorKind::Import,
        matches: |t| t.0.contains("modulenotfounderror") || t.0.contains("importerror"),
    },
    Rule {
        name: "syntax",
        kind: ErrorKind::Syntax,
        matches: |t| t.0.contains("syntaxerror"),
    },
    Rule {
        name: "indentation",
        kind: ErrorKind::Indentation,
        matches: |t| t.0.contains("indentationerror"),
    },
];

/// Return the first rule in `rules` that matches `input`.
pub fn first_match<'r, T>(rules: &'r [Rule<T>], input: &T) -> Option<&'r Rule<T>> {
    rules.iter().find(|rule| (rule.matches)(input))
}

/// Classify a lint diagnostic, defaulting to `LINTING`.
pub fn classify_lint(input: &LintText) -> ErrorKind {
    first_match(LINT_RULES, input).map_or(ErrorKind::Linting, |rule| rule.kind)
}

/// Classify a failing test case, defaulting to `LOGIC`.
pub fn classify_test(input: &TestText) -> ErrorKind {
    first_match(TEST_RULES, input).map_or(ErrorKind::Logic, |rule| rule.kind)
}
