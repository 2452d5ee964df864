//! Small text helpers for code input and bounded display.

/// Normalize line endings and drop leading/trailing blank lines.
///
/// Interior blank lines and indentation are kept as-is.
pub fn format_code(code: &str) -> String {
    let normalized = code.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = normalized.split('\n').collect();
    let Some(start) = lines.iter().position(|line| !line.trim().is_empty()) else {
        return String::new();
    };
    let end = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map_or(lines.len(), |idx| idx + 1);
    lines[start..end].join("\n")
}

/// Cap `text` to `max_chars` characters, then to `max_lines` lines.
pub fn truncate_output(text: &str, max_lines: usize, max_chars: usize) -> String {
    let mut out = if text.chars().count() > max_chars {
        let kept: String = text.chars().take(max_chars).collect();
        format!("{kept}\n... (output truncated)")
    } else {
        text.to_string()
    };

    let line_count = out.lines().count();
    if line_count > max_lines {
        let kept = out.lines().take(max_lines).collect::<Vec<_>>().join("\n");
        out = format!("{kept}\n... ({} more lines)", line_count - max_lines);
    }
    out
}
