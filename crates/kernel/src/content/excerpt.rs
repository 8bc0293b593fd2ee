//! Excerpt derivation.

use crate::editor::markup;

/// Characters kept from the content when deriving an excerpt.
pub const EXCERPT_LEN: usize = 150;

/// Marker appended to a truncated excerpt.
pub const ELLIPSIS: &str = "...";

/// Excerpt for a post: the author's own if non-blank, otherwise derived
/// from the content's plain text.
pub fn excerpt_for(supplied: Option<&str>, content: &str) -> String {
    match supplied.map(str::trim) {
        Some(excerpt) if !excerpt.is_empty() => excerpt.to_string(),
        _ => derive_excerpt(content),
    }
}

/// First [`EXCERPT_LEN`] characters of the content's plain text, with
/// [`ELLIPSIS`] appended when anything was cut.
pub fn derive_excerpt(content: &str) -> String {
    let text = markup::plain_text(content);
    if text.chars().count() <= EXCERPT_LEN {
        return text;
    }
    let mut excerpt: String = text.chars().take(EXCERPT_LEN).collect();
    excerpt.push_str(ELLIPSIS);
    excerpt
}
