//! Bounded tails of tool output.

/// Line prepended when earlier output was dropped.
pub const TRUNCATION_MARKER: &str = "... (output truncated) ...";

/// Keep the last `max_lines` lines of `text`.
///
/// When lines are dropped the result starts with [`TRUNCATION_MARKER`]. Trailing
/// blank lines are ignored so a final newline does not cost a slot.
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    if lines.len() <= max_lines {
        return lines.join("\n");
    }
    let kept = &lines[lines.len() - max_lines..];
    let mut out = String::from(TRUNCATION_MARKER);
    for line in kept {
        out.push('\n');
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_is_unchanged() {
        assert_eq!(tail_lines("a\nb\n", 5), "a\nb");
    }

    #[test]
    fn long_output_keeps_last_lines_with_marker() {
        let text = (1..=10).map(|n| n.to_string()).collect::<Vec<_>>().join("\n");
        let tail = tail_lines(&text, 3);
        assert_eq!(tail, format!("{TRUNCATION_MARKER}\n8\n9\n10"));
    }

    #[test]
    fn zero_budget_keeps_only_marker() {
        assert_eq!(tail_lines("a\nb", 0), TRUNCATION_MARKER);
    }
}
