//! UTF-8 safe truncation helpers shared by tool results, logs and reports.

/// Truncate to `max_chars` characters, appending `...` when anything was cut.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((byte_end, _)) => format!("{}...", &s[..byte_end]),
    }
}

/// Truncate large tool payloads so they don't blow the model's context window.
///
/// The notice names what was cut (`diff`, `file`) and the limit, so the agent
/// knows the content is partial.
pub fn truncate_with_notice(s: &str, max_chars: usize, what: &str) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((byte_end, _)) => format!(
            "{}\n\n... [{} truncated at {} chars]",
            &s[..byte_end],
            what,
            max_chars
        ),
    }
}
