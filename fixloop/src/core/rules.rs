//! Deterministic, pattern-matched textual fixes.
//!
//! Rules are tried in table order and the first one that changes the file
//! wins. A rule either mutates the file and returns a short description (used
//! verbatim as the commit message) or leaves it untouched and returns `None`.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{ErrorKind, ErrorRecord};

/// One indentation unit removed by the unexpected-indent rule.
const INDENT_UNIT: &str = "    ";

/// Modules the import rewrite knows live under `src/`.
const SRC_MODULES: &[&str] = &["validator", "app", "main"];

static FROM_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"from\s+(\w+)\s+import").expect("valid import regex"));

/// Line-oriented view of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub lines: Vec<String>,
    pub trailing_newline: bool,
}

impl SourceFile {
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_string).collect(),
            trailing_newline: content.ends_with('\n'),
        }
    }

    /// Render the file back, always ending with a single newline.
    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    fn line_mut(&mut self, line: u32) -> Option<&mut String> {
        let idx = usize::try_from(line).ok()?.checked_sub(1)?;
        self.lines.get_mut(idx)
    }

    fn line_index(&self, line: u32) -> Option<usize> {
        let idx = usize::try_from(line).ok()?.checked_sub(1)?;
        (idx < self.lines.len()).then_some(idx)
    }
}

/// A named deterministic fix.
pub struct FixRule {
    pub name: &'static str,
    pub apply: fn(&mut SourceFile, &ErrorRecord) -> Option<String>,
}

impl std::fmt::Debug for FixRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixRule").field("name", &self.name).finish()
    }
}

pub const FIX_RULES: &[FixRule] = &[
    FixRule {
        name: "missing-colon",
        apply: missing_colon,
    },
    FixRule {
        name: "unexpected-indent",
        apply: unexpected_indent,
    },
    FixRule {
        name: "unused-import",
        apply: unused_import,
    },
    FixRule {
        name: "src-module-path",
        apply: src_module_path,
    },
    FixRule {
        name: "final-newline",
        apply: final_newline,
    },
    FixRule {
        name: "module-docstring",
        apply: module_docstring,
    },
    FixRule {
        name: "function-docstring",
        apply: function_docstring,
    },
    FixRule {
        name: "trailing-whitespace",
        apply: trailing_whitespace,
    },
];

/// Result of a matched deterministic rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedFix {
    pub rule: &'static str,
    pub file: SourceFile,
    pub description: String,
}

/// Try every rule in order against a copy of `file`.
pub fn apply_rules(file: &SourceFile, record: &ErrorRecord) -> Option<AppliedFix> {
    FIX_RULES.iter().find_map(|rule| {
        let mut candidate = file.clone();
        (rule.apply)(&mut candidate, record).map(|description| AppliedFix {
            rule: rule.name,
            file: candidate,
            description,
        })
    })
}

fn missing_colon(file: &mut SourceFile, record: &ErrorRecord) -> Option<String> {
    if record.kind != ErrorKind::Syntax || !record.message.contains("expected ':'") {
        return None;
    }
    let line = file.line_mut(record.line)?;
    let trimmed = line.trim_end();
    if trimmed.ends_with(':') {
        return None;
    }
    *line = format!("{trimmed}:");
    Some("Fix SYNTAX: Added missing colon".to_string())
}

fn unexpected_indent(file: &mut SourceFile, record: &ErrorRecord) -> Option<String> {
    if !matches!(record.kind, ErrorKind::Syntax | ErrorKind::Indentation)
        || !record.message.contains("unexpected indent")
    {
        return None;
    }
    let line = file.line_mut(record.line)?;
    let stripped = line
        .strip_prefix(INDENT_UNIT)
        .or_else(|| line.strip_prefix('\t'))?
        .to_string();
    *line = stripped;
    Some(format!("Fix {}: Removed unexpected indent", record.kind))
}

fn unused_import(file: &mut SourceFile, record: &ErrorRecord) -> Option<String> {
    if !matches!(record.kind, ErrorKind::Import | ErrorKind::Linting)
        || !record.message.to_lowercase().contains("unused import")
    {
        return None;
    }
    let idx = file.line_index(record.line)?;
    if !file.lines[idx].contains("import") {
        return None;
    }
    file.lines.remove(idx);
    Some(format!("Fix {}: Removed unused import", record.kind))
}

fn src_module_path(file: &mut SourceFile, record: &ErrorRecord) -> Option<String> {
    if record.kind != ErrorKind::Import || !record.message.contains("No module named") {
        return None;
    }
    let line = file.line_mut(record.line)?;
    let module = FROM_IMPORT.captures(line)?.get(1)?.as_str().to_string();
    if !SRC_MODULES.contains(&module.as_str()) {
        return None;
    }
    *line = line.replacen(&format!("from {module}"), &format!("from src.{module}"), 1);
    Some(format!("Fix IMPORT: Updated module path to src.{module}"))
}

fn final_newline(file: &mut SourceFile, record: &ErrorRecord) -> Option<String> {
    if record.kind != ErrorKind::Linting
        || !record.message.to_lowercase().contains("final newline")
        || file.trailing_newline
    {
        return None;
    }
    file.trailing_newline = true;
    Some("Fix LINTING: Added final newline".to_string())
}

fn module_docstring(file: &mut SourceFile, record: &ErrorRecord) -> Option<String> {
    if record.kind != ErrorKind::Linting
        || !record
            .message
            .to_lowercase()
            .contains("missing module docstring")
    {
        return None;
    }
    if file
        .lines
        .first()
        .is_some_and(|first| first.trim_start().starts_with("\"\"\""))
    {
        return None;
    }
    file.lines.insert(0, "\"\"\"Module docstring.\"\"\"".to_string());
    Some("Fix LINTING: Added module docstring".to_string())
}

fn function_docstring(file: &mut SourceFile, record: &ErrorRecord) -> Option<String> {
    if record.kind != ErrorKind::Linting
        || !record
            .message
            .to_lowercase()
            .contains("missing function")
    {
        return None;
    }
    let idx = file.line_index(record.line)?;
    let def_line = &file.lines[idx];
    if !def_line.trim_start().starts_with("def ") {
        return None;
    }
    let indent_len = def_line.len() - def_line.trim_start().len();
    let indent = def_line[..indent_len].to_string();
    file.lines.insert(
        idx + 1,
        format!("{indent}{INDENT_UNIT}\"\"\"Function docstring.\"\"\""),
    );
    Some(format!(
        "Fix LINTING: Added function docstring to line {}",
        record.line
    ))
}

fn trailing_whitespace(file: &mut SourceFile, record: &ErrorRecord) -> Option<String> {
    if record.kind != ErrorKind::Linting
        || !record
            .message
            .to_lowercase()
            .contains("trailing whitespace")
    {
        return None;
    }
    let line = file.line_mut(record.line)?;
    let trimmed = line.trim_end();
    if trimmed.len() == line.len() {
        return None;
    }
    *line = trimmed.to_string();
    Some("Fix LINTING: Removed trailing whitespace".to_string())
}
