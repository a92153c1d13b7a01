//! Remediation engine: fixes exactly one error per call.
//!
//! Deterministic rules are tried first; the generative fallback only runs
//! when none of them applies, and only when a model is configured.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::fence::strip_code_fence;
use crate::core::rules::{SourceFile, apply_rules};
use crate::core::types::ErrorRecord;
use crate::io::generative::{FixModel, FixRequest, RateLimitedError};

/// Bounded linear backoff for rate-limited generative calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before retry `n` is `backoff_base * n`.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
        }
    }
}

/// How a fix was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixSource {
    Rule(&'static str),
    Generative,
}

/// Result of one remediation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixOutcome {
    /// The file was rewritten; `description` becomes the commit message.
    Applied {
        description: String,
        source: FixSource,
    },
    /// Nothing could be done for this error.
    Unmatched { description: String },
}

#[cfg(test)]
impl FixOutcome {
    fn description(&self) -> &str {
        match self {
            FixOutcome::Applied { description, .. } | FixOutcome::Unmatched { description } => {
                description
            }
        }
    }
}

/// Applies fixes inside one workspace.
pub struct Fixer<'a> {
    workspace: &'a Path,
    model: Option<&'a dyn FixModel>,
    retry: RetryPolicy,
}

impl<'a> Fixer<'a> {
    pub fn new(workspace: &'a Path, model: Option<&'a dyn FixModel>, retry: RetryPolicy) -> Self {
        Self {
            workspace,
            model,
            retry,
        }
    }

    /// Fix `record`, writing the changed file back in full.
    ///
    /// Errors (missing file, exhausted generative retries) are failures of
    /// this iteration only; the caller records them and carries on.
    #[instrument(skip_all, fields(file = %record.file, line = record.line, kind = %record.kind))]
    pub fn fix_error(&self, record: &ErrorRecord) -> Result<FixOutcome> {
        let path = self.resolve(&record.file)?;
        let content =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;

        let source = SourceFile::parse(&content);
        if let Some(fix) = apply_rules(&source, record) {
            info!(rule = fix.rule, "applied deterministic fix");
            write_file(&path, &fix.file.render())?;
            return Ok(FixOutcome::Applied {
                description: fix.description,
                source: FixSource::Rule(fix.rule),
            });
        }

        let Some(model) = self.model else {
            debug!("no deterministic rule matched and no generative model configured");
            return Ok(FixOutcome::Unmatched {
                description: format!("Failed to fix {}: No deterministic rule matched", record.kind),
            });
        };

        info!("falling back to generative fix");
        let request = FixRequest {
            file_path: record.file.clone(),
            error_kind: record.kind,
            error_message: record.message.clone(),
            line: record.line,
            file_content: content,
        };
        let fixed = strip_code_fence(&self.suggest_with_backoff(model, &request)?);
        if fixed.trim().is_empty() {
            bail!("generative fix returned no content");
        }
        write_file(&path, &fixed)?;
        Ok(FixOutcome::Applied {
            description: format!(
                "Fix {} (LLM): {}...",
                record.kind,
                truncate_chars(&record.message, 30)
            ),
            source: FixSource::Generative,
        })
    }

    fn suggest_with_backoff(&self, model: &dyn FixModel, request: &FixRequest) -> Result<String> {
        let attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=attempts {
            match model.suggest_fix(request) {
                Ok(content) => return Ok(content),
                Err(err) if err.downcast_ref::<RateLimitedError>().is_some() => {
                    if attempt == attempts {
                        return Err(err.context(format!(
                            "generative fix still rate limited after {attempts} attempts"
                        )));
                    }
                    let delay = self.retry.backoff_base * attempt;
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "rate limited, backing off");
                    thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
        Err(anyhow!("generative fix made no attempts"))
    }

    /// Resolve a record's repository-relative path inside the workspace.
    fn resolve(&self, file: &str) -> Result<PathBuf> {
        let relative = Path::new(file);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("refusing to edit path outside the workspace: {file}");
        }
        let path = self.workspace.join(relative);
        if !path.is_file() {
            bail!("File not found");
        }
        Ok(path)
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).with_context(|| format!("write {}", path.display()))
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ErrorKind;
    use crate::test_support::{ScriptedModel, ScriptedReply};

    fn no_backoff() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::ZERO,
        }
    }

    fn workspace_with(file: &str, content: &str) -> tempfile::TempDir {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(file);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write");
        temp
    }

    #[test]
    fn deterministic_rule_wins_over_model() {
        let temp = workspace_with("src/app.py", "def f()\n    return 1\n");
        let model = ScriptedModel::new(vec![ScriptedReply::Content("unused".to_string())]);
        let fixer = Fixer::new(temp.path(), Some(&model), no_backoff());
        let record = ErrorRecord::lint("src/app.py", 1, ErrorKind::Syntax, "expected ':'", None);

        let outcome = fixer.fix_error(&record).expect("fix");
        assert_eq!(
            outcome,
            FixOutcome::Applied {
                description: "Fix SYNTAX: Added missing colon".to_string(),
                source: FixSource::Rule("missing-colon"),
            }
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("src/app.py")).expect("read"),
            "def f():\n    return 1\n"
        );
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn model_output_is_unfenced_and_written() {
        let temp = workspace_with("src/app.py", "def total(xs):\n    return 3\n");
        let model = ScriptedModel::new(vec![ScriptedReply::Content(
            "```python\ndef total(xs):\n    return sum(xs)\n```".to_string(),
        )]);
        let fixer = Fixer::new(temp.path(), Some(&model), no_backoff());
        let record = ErrorRecord::test(
            "src/app.py",
            2,
            ErrorKind::Logic,
            "AssertionError: assert 3 == 6 where 3 = total([1, 2, 3])",
            None,
        );

        let outcome = fixer.fix_error(&record).expect("fix");
        assert_eq!(outcome.description(), "Fix LOGIC (LLM): AssertionError: assert 3 == 6 ...");
        assert_eq!(
            fs::read_to_string(temp.path().join("src/app.py")).expect("read"),
            "def total(xs):\n    return sum(xs)\n"
        );
        let seen = model.requests();
        assert_eq!(seen[0].line, 2);
        assert_eq!(seen[0].file_content, "def total(xs):\n    return 3\n");
    }

    #[test]
    fn blank_model_reply_leaves_file_untouched() {
        for reply in ["", "  \n\t\n", "```python\n```"] {
            let temp = workspace_with("src/app.py", "def total(xs):\n    return 3\n");
            let model = ScriptedModel::new(vec![ScriptedReply::Content(reply.to_string())]);
            let fixer = Fixer::new(temp.path(), Some(&model), no_backoff());
            let record = ErrorRecord::test("src/app.py", 2, ErrorKind::Logic, "assert 3 == 6", None);

            let err = fixer.fix_error(&record).unwrap_err();
            assert!(err.to_string().contains("no content"), "reply {reply:?}: {err:#}");
            assert_eq!(
                fs::read_to_string(temp.path().join("src/app.py")).expect("read"),
                "def total(xs):\n    return 3\n"
            );
        }
    }

    #[test]
    fn rate_limits_are_retried_then_succeed() {
        let temp = workspace_with("a.py", "x = 1\n");
        let model = ScriptedModel::new(vec![
            ScriptedReply::RateLimited,
            ScriptedReply::RateLimited,
            ScriptedReply::Content("x = 2\n".to_string()),
        ]);
        let fixer = Fixer::new(temp.path(), Some(&model), no_backoff());
        let record = ErrorRecord::test("a.py", 1, ErrorKind::Logic, "assert x == 2", None);

        assert!(matches!(
            fixer.fix_error(&record).expect("fix"),
            FixOutcome::Applied {
                source: FixSource::Generative,
                ..
            }
        ));
        assert_eq!(model.calls(), 3);
    }

    #[test]
    fn exhausted_rate_limit_is_an_error() {
        let temp = workspace_with("a.py", "x = 1\n");
        let model = ScriptedModel::new(vec![ScriptedReply::RateLimited; 3]);
        let fixer = Fixer::new(temp.path(), Some(&model), no_backoff());
        let record = ErrorRecord::test("a.py", 1, ErrorKind::Logic, "assert x == 2", None);

        let err = fixer.fix_error(&record).unwrap_err();
        assert!(err.downcast_ref::<RateLimitedError>().is_some());
        assert!(format!("{err:#}").contains("after 3 attempts"));
        assert_eq!(model.calls(), 3);
        assert_eq!(fs::read_to_string(temp.path().join("a.py")).expect("read"), "x = 1\n");
    }

    #[test]
    fn other_model_errors_are_not_retried() {
        let temp = workspace_with("a.py", "x = 1\n");
        let model = ScriptedModel::new(vec![
            ScriptedReply::Failure("invalid api key".to_string()),
            ScriptedReply::Content("x = 2\n".to_string()),
        ]);
        let fixer = Fixer::new(temp.path(), Some(&model), no_backoff());
        let record = ErrorRecord::test("a.py", 1, ErrorKind::Logic, "assert x == 2", None);

        assert!(fixer.fix_error(&record).is_err());
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn without_model_unmatched_errors_are_reported() {
        let temp = workspace_with("a.py", "x = 1\n");
        let fixer = Fixer::new(temp.path(), None, no_backoff());
        let record = ErrorRecord::test("a.py", 1, ErrorKind::Logic, "assert x == 2", None);

        assert_eq!(
            fixer.fix_error(&record).expect("outcome"),
            FixOutcome::Unmatched {
                description: "Failed to fix LOGIC: No deterministic rule matched".to_string()
            }
        );
    }

    #[test]
    fn missing_and_escaping_paths_fail() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fixer = Fixer::new(temp.path(), None, no_backoff());

        let record = ErrorRecord::runner(ErrorKind::Timeout, "global timeout");
        let err = fixer.fix_error(&record).unwrap_err();
        assert_eq!(err.to_string(), "File not found");

        let record = ErrorRecord::lint("../etc/passwd", 1, ErrorKind::Linting, "x", None);
        assert!(fixer.fix_error(&record).unwrap_err().to_string().contains("outside"));
    }
}
