//! Detection of leftover merge conflict markers.

/// True when `text` still contains a conflict hunk (`<<<<<<<` ... `>>>>>>>`).
pub fn has_conflict_markers(text: &str) -> bool {
    let mut open = false;
    for line in text.lines() {
        if line.starts_with("<<<<<<<") {
            open = true;
        } else if open && line.starts_with(">>>>>>>") {
            return true;
        }
    }
    false
}
