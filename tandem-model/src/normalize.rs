//! Text normalization for fuzzy comparison.

/// Lowercases, drops bracketed qualifiers such as `(Remastered 2011)` or
/// `[Live]`, replaces punctuation with spaces and collapses whitespace.
///
/// ```
/// use tandem_model::normalize_text;
/// assert_eq!(normalize_text("  Song A (Remastered) "), "song a");
/// assert_eq!(normalize_text("AC/DC"), "ac dc");
/// ```
pub fn normalize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut depth = 0usize;

    for ch in input.chars() {
        match ch {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            c if c.is_alphanumeric() => out.extend(c.to_lowercase()),
            _ => out.push(' '),
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Similarity of two strings in `[0, 1]` after normalization.
///
/// Equal normalized forms score 1. Otherwise the score averages Jaro-Winkler
/// (rewards shared prefixes) and normalized Levenshtein (penalizes edits).
pub(crate) fn text_similarity(a: &str, b: &str) -> f64 {
    let a = comparable(a);
    let b = comparable(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let jw = strsim::jaro_winkler(&a, &b);
    let lev = strsim::normalized_levenshtein(&a, &b);
    (0.5 * jw + 0.5 * lev).clamp(0.0, 1.0)
}

/// Normalized form, or the trimmed lowercase input when normalization
/// leaves nothing (a title that is entirely bracketed, for instance).
fn comparable(input: &str) -> String {
    let normalized = normalize_text(input);
    if normalized.is_empty() {
        input.trim().to_lowercase()
    } else {
        normalized
    }
}
