//! Parsing of the linter's JSON report.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::taxonomy::{LintText, classify_lint};
use crate::core::types::{ErrorRecord, PassReport};

/// One item of `pylint --output-format=json`.
#[derive(Debug, Clone, Deserialize)]
struct LintItem {
    #[serde(rename = "type", default)]
    severity: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(rename = "message-id", default)]
    message_id: Option<String>,
}

/// Slice the JSON list out of raw tool output.
///
/// The linter's output may be interleaved with unrelated log lines, so the
/// payload is taken from the first `[` to the last `]`.
pub fn locate_payload(output: &str) -> Option<&str> {
    let start = output.find('[')?;
    let end = output.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&output[start..=end])
}

/// Parse and classify a lint report.
///
/// Never fails: unparseable output yields an empty, inconclusive report.
pub fn parse_lint_output(output: &str) -> PassReport {
    let Some(payload) = locate_payload(output) else {
        if output.trim().is_empty() {
            return PassReport::inconclusive("lint output was empty");
        }
        warn!("no JSON list found in lint output");
        return PassReport::inconclusive("no JSON list found in lint output");
    };

    let items: Vec<LintItem> = match serde_json::from_str(payload) {
        Ok(items) => items,
        Err(err) => {
            warn!(err = %err, "failed to parse lint output");
            return PassReport::inconclusive(format!("failed to parse lint output: {err}"));
        }
    };

    let records: Vec<ErrorRecord> = items.into_iter().map(classify_item).collect();
    debug!(count = records.len(), "parsed lint diagnostics");
    PassReport::found(records)
}

fn classify_item(item: LintItem) -> ErrorRecord {
    let symbol = item.symbol.or(item.message_id);
    let kind = classify_lint(&LintText::new(
        &item.message,
        symbol.as_deref(),
        &item.severity,
    ));
    ErrorRecord::lint(
        normalize_path(&item.path),
        item.line.unwrap_or(0),
        kind,
        item.message,
        symbol,
    )
}

fn normalize_path(path: &str) -> String {
    path.strip_prefix("./").unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ErrorKind;

    const REPORT: &str = r#"************* Module app
[
    {
        "type": "warning",
        "module": "app",
        "obj": "",
        "line": 1,
        "column": 0,
        "path": "src/app.py",
        "symbol": "unused-import",
        "message": "Unused import os",
        "message-id": "W0611"
    },
    {
        "type": "error",
        "module": "validator",
        "obj": "",
        "line": 4,
        "column": 14,
        "path": "./src/validator.py",
        "symbol": "syntax-error",
        "message": "Parsing failed: 'expected ':' (validator, line 4)'",
        "message-id": "E0001"
    }
]
trailing noise"#;

    #[test]
    fn parses_items_between_brackets() {
        let report = parse_lint_output(REPORT);
        assert!(report.inconclusive.is_none());
        assert_eq!(report.records.len(), 2);

        let unused = &report.records[0];
        assert_eq!(unused.file, "src/app.py");
        assert_eq!(unused.line, 1);
        assert_eq!(unused.kind, ErrorKind::Linting);
        assert_eq!(unused.symbol(), Some("unused-import"));

        let syntax = &report.records[1];
        assert_eq!(syntax.file, "src/validator.py");
        assert_eq!(syntax.kind, ErrorKind::Syntax);
    }

    #[test]
    fn empty_list_is_a_clean_pass() {
        let report = parse_lint_output("[]\n");
        assert_eq!(report, PassReport::found(Vec::new()));
    }

    #[test]
    fn garbage_is_inconclusive_not_fatal() {
        let report = parse_lint_output("pylint: command not found");
        assert!(report.records.is_empty());
        assert!(report.inconclusive.is_some());

        let report = parse_lint_output("[not json]");
        assert!(report.records.is_empty());
        assert!(
            report
                .inconclusive
                .as_deref()
                .is_some_and(|note| note.contains("failed to parse"))
        );
    }

    #[test]
    fn payload_requires_ordered_brackets() {
        assert_eq!(locate_payload("] then ["), None);
        assert_eq!(locate_payload("x [1] y"), Some("[1]"));
    }
}
