//! Generative-model fallback for errors no deterministic rule can fix.
//!
//! The [`FixModel`] trait is the opaque capability "given a file and an error,
//! return the corrected file". [`CommandFixModel`] drives an external CLI the
//! same way the loop drives its other tools: prompt on stdin, answer on stdout.

use std::fmt;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use tracing::{debug, info, instrument, warn};

use crate::core::types::ErrorKind;
use crate::io::process::run_with_timeout;

const FIX_TEMPLATE: &str = include_str!("prompts/fix.md");

/// Phrases in collaborator output that signal rate limiting or exhausted quota.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "429",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "quota",
    "resource exhausted",
    "resource_exhausted",
    "too many requests",
];

/// Everything the collaborator gets to see about one error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixRequest {
    pub file_path: String,
    pub error_kind: ErrorKind,
    pub error_message: String,
    pub line: u32,
    pub file_content: String,
}

/// Rate-limit or quota rejection; the only collaborator error worth retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitedError {
    pub detail: String,
}

impl fmt::Display for RateLimitedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "generative model rate limited: {}", self.detail)
    }
}

impl std::error::Error for RateLimitedError {}

/// Produces the full corrected content of a file.
pub trait FixModel {
    fn suggest_fix(&self, request: &FixRequest) -> Result<String>;
}

/// Render the instruction prompt for `request`.
pub fn render_prompt(request: &FixRequest) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("fix", FIX_TEMPLATE)
        .context("load fix prompt template")?;
    let rendered = env.get_template("fix")?.render(context! {
        file_path => request.file_path,
        error_kind => request.error_kind.as_str(),
        error_message => request.error_message,
        line => request.line,
        file_content => request.file_content.trim_end(),
    })?;
    Ok(rendered)
}

/// True if collaborator output looks like a rate-limit rejection.
pub fn is_rate_limited(text: &str) -> bool {
    let lower = text.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// [`FixModel`] backed by an external command.
#[derive(Debug, Clone)]
pub struct CommandFixModel {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandFixModel {
    /// Returns `None` when no command is configured.
    pub fn from_command(
        command: &[String],
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Option<Self> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            return None;
        }
        Some(Self {
            command: command.to_vec(),
            timeout,
            output_limit_bytes,
        })
    }
}

impl FixModel for CommandFixModel {
    #[instrument(skip_all, fields(file = %request.file_path, kind = %request.error_kind))]
    fn suggest_fix(&self, request: &FixRequest) -> Result<String> {
        let prompt = render_prompt(request)?;
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("generative command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);

        info!(program = %program, "requesting generative fix");
        let output = run_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("run generative command")?;

        if output.timed_out {
            return Err(anyhow!(
                "generative command timed out after {}s",
                self.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            let detail = output.combined_text().trim().to_string();
            if is_rate_limited(&detail) {
                warn!("generative command reported rate limiting");
                return Err(RateLimitedError { detail }.into());
            }
            return Err(anyhow!(
                "generative command failed with status {:?}: {detail}",
                output.status.code()
            ));
        }

        let content = output.stdout_text();
        if content.trim().is_empty() {
            return Err(anyhow!("generative command returned no content"));
        }
        debug!(bytes = content.len(), "received generative fix");
        Ok(content)
    }
}
