//! Compact rendering of a CP2K input deck for the dashboards.

use std::path::Path;

/// Indented, comment-free view of the input file, at most `max_lines` lines plus a
/// truncation marker.
pub fn render_input(path: &Path, max_lines: usize) -> Vec<String> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return vec!["<input file not found>".to_string()];
        }
        Err(e) => return vec![format!("<failed to read input: {e}>")],
    };
    let text = String::from_utf8_lossy(&raw);
    let mut content = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('!') && !l.starts_with('#'));

    let mut rendered = Vec::new();
    let mut depth = 0usize;
    for line in content.by_ref().take(max_lines) {
        let upper = line.to_ascii_uppercase();
        let is_end = upper.starts_with("&END");
        if is_end {
            depth = depth.saturating_sub(1);
        }
        rendered.push(format!("{}{line}", "  ".repeat(depth)));
        if upper.starts_with('&') && !is_end {
            depth += 1;
        }
    }
    if content.next().is_some() {
        rendered.push("... <truncated>".to_string());
    }
    if rendered.is_empty() {
        rendered.push("<empty input file>".to_string());
    }
    rendered
}
