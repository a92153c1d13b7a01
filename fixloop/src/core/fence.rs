//! Cleanup of generated file content.

/// Strip a surrounding Markdown code fence from generated content.
///
/// The generative collaborator is asked for raw file content but may still
/// wrap it in a fenced block (optionally tagged with a language). Unfenced
/// content is returned unchanged apart from guaranteeing a final newline.
pub fn strip_code_fence(content: &str) -> String {
    let trimmed = content.trim();
    let body = if trimmed.starts_with("```") {
        let mut lines: Vec<&str> = trimmed.lines().collect();
        lines.remove(0);
        if lines.last().is_some_and(|l| l.trim().starts_with("```")) {
            lines.pop();
        }
        lines.join("\n")
    } else {
        content.trim_end_matches('\n').to_string()
    };

    let mut out = body;
    out.push('\n');
    out
}
