//! Diagnostic classifier: runs the lint and test tools in the sandbox and
//! turns their output into typed error records.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::junit::{XML_END, XML_START, parse_test_result};
use crate::core::lint::parse_lint_output;
use crate::core::types::PassReport;
use crate::io::sandbox::{ImageHandle, SandboxRunner};

/// Lint invocation: recursive JSON output with the workspace on the module path.
pub const LINT_SCRIPT: &str =
    "export PYTHONPATH=$PYTHONPATH:. && pylint --output-format=json --recursive=y . 2>&1";

/// Fixed report file written by the test runner inside the sandbox.
pub const REPORT_FILE: &str = "report.xml";

/// Test invocation: JUnit report echoed between sentinels, runner status preserved.
pub fn test_script() -> String {
    format!(
        "export PYTHONPATH=$PYTHONPATH:. && pytest --junitxml={REPORT_FILE} 2>&1; \
         status=$?; echo {XML_START}; cat {REPORT_FILE}; echo {XML_END}; exit $status"
    )
}

/// Result of analyzing a workspace once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    pub lint: PassReport,
    pub tests: PassReport,
}

impl Analysis {
    pub fn is_clean(&self) -> bool {
        self.lint.records.is_empty() && self.tests.records.is_empty()
    }
}

/// Seam between the repair loop and the analysis backend.
pub trait Diagnostics {
    /// Build the sandbox for `workspace` and run both classifier passes.
    ///
    /// Only environment build failures are errors; tool output that cannot
    /// be parsed produces an inconclusive pass instead.
    fn analyze(&self, workspace: &Path) -> Result<Analysis>;
}

/// Classifier over any [`SandboxRunner`].
#[derive(Debug)]
pub struct Analyzer<S: SandboxRunner> {
    sandbox: S,
    command_timeout: Duration,
}

impl<S: SandboxRunner> Analyzer<S> {
    pub fn new(sandbox: S, command_timeout: Duration) -> Self {
        Self {
            sandbox,
            command_timeout,
        }
    }

    pub fn sandbox(&self) -> &S {
        &self.sandbox
    }

    /// Lint pass over the whole workspace.
    #[instrument(skip_all)]
    pub fn lint_pass(&self, image: &ImageHandle) -> PassReport {
        info!("running linter");
        let result = self.sandbox.run(image, LINT_SCRIPT, self.command_timeout);
        debug!(exit_code = result.exit_code, output = %result.output, "linter finished");
        if result.timed_out {
            warn!("linter timed out");
        }
        parse_lint_output(&result.output)
    }

    /// Test pass with the JUnit report bracketed in the log.
    #[instrument(skip_all)]
    pub fn test_pass(&self, image: &ImageHandle) -> PassReport {
        info!("running tests");
        let result = self
            .sandbox
            .run(image, &test_script(), self.command_timeout);
        debug!(exit_code = result.exit_code, output = %result.output, "tests finished");
        parse_test_result(&result, self.command_timeout.as_secs())
    }
}

impl<S: SandboxRunner> Diagnostics for Analyzer<S> {
    #[instrument(skip_all, fields(workspace = %workspace.display()))]
    fn analyze(&self, workspace: &Path) -> Result<Analysis> {
        info!("starting analysis");
        let image = self.sandbox.prepare_environment(workspace)?;
        let lint = self.lint_pass(&image);
        let tests = self.test_pass(&image);
        info!(
            lint_errors = lint.records.len(),
            test_failures = tests.records.len(),
            "analysis finished"
        );
        Ok(Analysis { lint, tests })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ErrorKind, SandboxResult};
    use crate::test_support::ScriptedSandbox;

    fn ok(exit_code: i32, output: &str) -> SandboxResult {
        SandboxResult {
            exit_code,
            output: output.to_string(),
            timed_out: false,
        }
    }

    #[test]
    fn analyze_runs_lint_then_tests() {
        let lint = r#"[{"type": "error", "path": "src/app.py", "line": 2, "symbol": "syntax-error", "message": "invalid syntax"}]"#;
        let tests = format!(
            "{XML_START}\n<testsuite><testcase name=\"t\"><failure message=\"assert False\">tests/test_app.py:3: AssertionError</failure></testcase></testsuite>\n{XML_END}"
        );
        let sandbox = ScriptedSandbox::new(vec![ok(2, lint), ok(1, &tests)]);
        let analyzer = Analyzer::new(sandbox, Duration::from_secs(60));

        let temp = tempfile::tempdir().expect("tempdir");
        let analysis = analyzer.analyze(temp.path()).expect("analyze");
        assert!(!analysis.is_clean());
        assert_eq!(analysis.lint.records[0].kind, ErrorKind::Syntax);
        assert_eq!(analysis.tests.records[0].kind, ErrorKind::Logic);
        assert_eq!(analysis.tests.records[0].file, "tests/test_app.py");

        let scripts = analyzer.sandbox().scripts();
        assert_eq!(scripts[0], LINT_SCRIPT);
        assert!(scripts[1].contains("--junitxml=report.xml"));
        assert!(scripts[1].contains(XML_START));
        assert_eq!(analyzer.sandbox().prepared(), 1);
    }

    #[test]
    fn clean_workspace_has_no_records() {
        let tests = format!("{XML_START}\n<testsuite tests=\"0\"/>\n{XML_END}");
        let sandbox = ScriptedSandbox::new(vec![ok(0, "[]"), ok(5, &tests)]);
        let analyzer = Analyzer::new(sandbox, Duration::from_secs(60));
        let temp = tempfile::tempdir().expect("tempdir");
        let analysis = analyzer.analyze(temp.path()).expect("analyze");
        assert!(analysis.is_clean());
        assert!(analysis.lint.inconclusive.is_none());
        assert!(analysis.tests.inconclusive.is_none());
    }

    #[test]
    fn build_failure_is_fatal() {
        let sandbox = ScriptedSandbox::new(Vec::new()).failing_build();
        let analyzer = Analyzer::new(sandbox, Duration::from_secs(60));
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(analyzer.analyze(temp.path()).is_err());
    }

    #[test]
    fn sandbox_timeout_yields_single_timeout_record() {
        let timed_out = SandboxResult {
            exit_code: -1,
            output: "TIMEOUT ERROR: execution exceeded 60 seconds.".to_string(),
            timed_out: true,
        };
        let sandbox = ScriptedSandbox::new(vec![ok(0, "[]"), timed_out]);
        let analyzer = Analyzer::new(sandbox, Duration::from_secs(60));
        let temp = tempfile::tempdir().expect("tempdir");
        let analysis = analyzer.analyze(temp.path()).expect("analyze");
        assert_eq!(analysis.tests.records.len(), 1);
        assert_eq!(analysis.tests.records[0].kind, ErrorKind::Timeout);
    }
}
