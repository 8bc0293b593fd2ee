//! Slug generation for blog posts.
//!
//! A slug is derived from the title once, when the post is created, and
//! never regenerated afterwards.

use uuid::Uuid;

/// Maximum slug length.
const MAX_SLUG_LEN: usize = 128;

/// Highest numeric suffix tried before falling back to a UUID fragment.
const MAX_SUFFIX: u32 = 99;

/// Convert a title into a URL-safe slug.
///
/// Diacritics are transliterated to ASCII (`É` → `e`), the text is
/// lowercased, runs of non-alphanumeric characters collapse to a single
/// hyphen, and leading/trailing hyphens are trimmed.
pub fn slugify(title: &str) -> String {
    let ascii = slug::slugify(title);

    // Collapse consecutive hyphens and trim
    let mut result = String::with_capacity(ascii.len());
    let mut prev_was_hyphen = true; // Start true to skip leading hyphens
    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() {
            result.push(c.to_ascii_lowercase());
            prev_was_hyphen = false;
        } else if !prev_was_hyphen {
            result.push('-');
            prev_was_hyphen = true;
        }
    }

    while result.ends_with('-') {
        result.pop();
    }

    if result.len() > MAX_SLUG_LEN {
        // Pure ASCII at this point, so any index is a char boundary.
        let truncated = &result[..MAX_SLUG_LEN];
        if let Some(last_hyphen) = truncated.rfind('-') {
            return truncated[..last_hyphen].to_string();
        }
        return truncated.to_string();
    }

    result
}

/// Pick the first free slug for `base`.
///
/// If `base` is taken, tries `base-1`, `base-2`, ... and finally appends a
/// UUID fragment. An empty base becomes `post-<fragment>`.
pub fn unique_slug<F>(base: &str, mut is_taken: F) -> String
where
    F: FnMut(&str) -> bool,
{
    if base.is_empty() {
        return format!("post-{}", uuid_fragment());
    }

    if !is_taken(base) {
        return base.to_string();
    }

    for i in 1..=MAX_SUFFIX {
        let candidate = format!("{base}-{i}");
        if !is_taken(&candidate) {
            return candidate;
        }
    }

    format!("{base}-{}", uuid_fragment())
}

/// Check that a slug only has lowercase ASCII letters, digits and single
/// inner hyphens.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn uuid_fragment() -> String {
    Uuid::now_v7().simple().to_string()[..8].to_string()
}
