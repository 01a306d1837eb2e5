//! Title normalization used as the exact-match comparison key.

/// Placeholder some submission templates leave in `normalized_title`.
pub const NORMALIZED_TITLE_PLACEHOLDER: &str = "<normalized form of title >";

/// Lower-case the title and drop every character that is not alphanumeric.
///
/// Whitespace and punctuation are removed entirely, so `"Deep Learning!"`
/// and `"deep-learning"` share the key `"deeplearning"`.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Resolve the normalized title for an incoming entry.
///
/// A caller-supplied value is kept only when it is non-empty and not the
/// template placeholder; otherwise the key is recomputed from `title`.
pub fn resolve_normalized_title(title: &str, supplied: Option<&str>) -> String {
    match supplied.map(str::trim) {
        Some(value) if !value.is_empty() && value != NORMALIZED_TITLE_PLACEHOLDER => {
            value.to_string()
        }
        _ => normalize_title(title),
    }
}
