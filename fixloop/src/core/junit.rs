//! Parsing of the test runner's JUnit XML report.
//!
//! The test command echoes the XML report between two sentinel lines so the
//! report survives in the captured log even when the file itself cannot be
//! copied out of the sandbox.

use std::sync::LazyLock;

use regex::Regex;
use roxmltree::{Document, Node};
use tracing::{debug, warn};

use crate::core::taxonomy::{TestText, classify_test};
use crate::core::types::{ErrorKind, ErrorRecord, PassReport, SandboxResult, UNKNOWN_FILE};

pub const XML_START: &str = "__FIXLOOP_XML_START__";
pub const XML_END: &str = "__FIXLOOP_XML_END__";

/// pytest exit status for "no tests collected".
pub const NO_TESTS_COLLECTED: i32 = 5;

/// Where the workspace is mounted inside the sandbox image.
pub const MOUNT_PREFIX: &str = "/app/";

/// Path fragments that mark interpreter or third-party frames.
const LIBRARY_MARKERS: &[&str] = &[
    "site-packages",
    "dist-packages",
    "/lib/python",
    "<frozen",
    "<string>",
];

static TRACEBACK_FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"File "([^"]+)", line (\d+)"#).expect("valid frame regex"));

static SHORT_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*([^\s:\x22]+\.py):(\d+):").expect("valid short frame regex")
});

/// Turn the sandboxed test run into failure records.
///
/// A sandbox timeout short-circuits to a single `TIMEOUT` record and "no tests
/// collected" is a clean pass. Everything else goes through the XML report.
pub fn parse_test_result(result: &SandboxResult, timeout_secs: u64) -> PassReport {
    if result.timed_out {
        warn!(timeout_secs, "test suite timed out");
        return PassReport::found(vec![ErrorRecord::test(
            UNKNOWN_FILE,
            0,
            ErrorKind::Timeout,
            format!("Test suite exceeded the global timeout of {timeout_secs} seconds"),
            None,
        )]);
    }
    if result.exit_code == NO_TESTS_COLLECTED {
        debug!("no tests collected");
        return PassReport::found(Vec::new());
    }
    match extract_report(&result.output) {
        Some(xml) => parse_junit(xml),
        None => PassReport::inconclusive("test report sentinels not found in output"),
    }
}

/// Return the text between the report sentinels, trimmed.
pub fn extract_report(output: &str) -> Option<&str> {
    let start = output.find(XML_START)? + XML_START.len();
    let end = start + output[start..].find(XML_END)?;
    Some(output[start..end].trim())
}

/// Parse a JUnit XML document into failure records.
///
/// Never fails: malformed XML yields an empty, inconclusive report.
pub fn parse_junit(xml: &str) -> PassReport {
    let Some(start) = xml.find("<testsuite") else {
        return PassReport::inconclusive("no testsuite element in test report");
    };
    let doc = match Document::parse(&xml[start..]) {
        Ok(doc) => doc,
        Err(err) => {
            warn!(err = %err, "failed to parse test report");
            return PassReport::inconclusive(format!("failed to parse test report: {err}"));
        }
    };

    let root = doc.root_element();
    let suites: Vec<Node<'_, '_>> = if root.has_tag_name("testsuites") {
        root.children()
            .filter(|n| n.has_tag_name("testsuite"))
            .collect()
    } else {
        vec![root]
    };

    let mut records = Vec::new();
    for suite in suites {
        for case in suite.descendants().filter(|n| n.has_tag_name("testcase")) {
            if let Some(record) = failure_record(case) {
                records.push(record);
            }
        }
    }
    debug!(count = records.len(), "parsed test failures");
    PassReport::found(records)
}

fn failure_record(case: Node<'_, '_>) -> Option<ErrorRecord> {
    let elem = case
        .children()
        .find(|n| n.has_tag_name("failure"))
        .or_else(|| case.children().find(|n| n.has_tag_name("error")))?;

    let message = elem.attribute("message").unwrap_or_default();
    let body = elem.text().unwrap_or_default();
    let combined = format!("{message}\n{body}");

    let (file, line) = match case.attribute("file") {
        Some(file) => (
            strip_mount_prefix(file),
            case.attribute("line")
                .and_then(|l| l.parse().ok())
                .unwrap_or(0),
        ),
        None => recover_location(&combined)
            .unwrap_or_else(|| (UNKNOWN_FILE.to_string(), 0)),
    };

    let kind = classify_test(&TestText::new(message, body));
    Some(ErrorRecord::test(
        file,
        line,
        kind,
        combined.trim().to_string(),
        case.attribute("name").map(str::to_string),
    ))
}

/// Recover the caller's own `(file, line)` from a traceback.
///
/// Citations are walked from the innermost frame outwards and the first one
/// outside interpreter/third-party paths wins.
pub fn recover_location(text: &str) -> Option<(String, u32)> {
    let mut citations: Vec<(usize, &str, &str)> = Vec::new();
    for regex in [&*TRACEBACK_FRAME, &*SHORT_FRAME] {
        for caps in regex.captures_iter(text) {
            let (Some(whole), Some(path), Some(line)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            citations.push((whole.start(), path.as_str(), line.as_str()));
        }
    }
    citations.sort_by_key(|(pos, _, _)| *pos);

    citations
        .into_iter()
        .rev()
        .find(|(_, path, _)| !is_library_path(path))
        .and_then(|(_, path, line)| {
            let line = line.parse().ok()?;
            Some((strip_mount_prefix(path), line))
        })
}

fn is_library_path(path: &str) -> bool {
    LIBRARY_MARKERS.iter().any(|marker| path.contains(marker))
}

fn strip_mount_prefix(path: &str) -> String {
    let path = path.strip_prefix(MOUNT_PREFIX).unwrap_or(path);
    path.strip_prefix("./").unwrap_or(path).to_string()
}
