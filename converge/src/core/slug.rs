//! Task slugs used to name branches and worktree directories.

const MAX_SLUG_LEN: usize = 40;
const EMPTY_SLUG: &str = "task";

/// Normalize free text into a branch-safe identifier.
///
/// Lowercase ASCII alphanumerics are kept, every other run of characters
/// collapses to a single `-`. The result is trimmed of `-` and capped at
/// 40 characters; empty input yields `task`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len().min(MAX_SLUG_LEN));
    let mut pending_dash = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    slug.truncate(MAX_SLUG_LEN);
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        EMPTY_SLUG.to_string()
    } else {
        trimmed.to_string()
    }
}
