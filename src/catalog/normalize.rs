//! Name normalisation for catalog matching.
//!
//! Mentions in documents and names in the datasets disagree on case,
//! diacritics, punctuation and spacing ("Glåma" vs "Glama", "Aurland I" vs
//! "aurland  i"). Both sides go through the same function before comparison.

use crate::category::EntityCategory;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalise a name for matching.
///
/// - Unicode NFKD, combining marks dropped (`å → a`, `é → e`)
/// - `ø → o`, `æ → ae` (Norwegian letters with no decomposition)
/// - lowercase
/// - non-alphanumerics become spaces
/// - whitespace collapsed
///
/// ```
/// use smartdok::catalog::normalize::normalize_name;
///
/// assert_eq!(normalize_name("  Glåma "), "glama");
/// assert_eq!(normalize_name("Ø. Æråsvatn"), "o aerasvatn");
/// assert_eq!(normalize_name("Aurland-I"), "aurland i");
/// ```
pub fn normalize_name(s: &str) -> String {
    let mut folded = String::with_capacity(s.len());
    for c in s.nfkd().filter(|c| !is_combining_mark(*c)) {
        match c {
            'ø' | 'Ø' => folded.push('o'),
            'æ' => folded.push_str("ae"),
            'Æ' => folded.push_str("ae"),
            c if c.is_alphanumeric() => folded.extend(c.to_lowercase()),
            _ => folded.push(' '),
        }
    }
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Matching key for a name within a category.
///
/// The normalised name with one trailing generic category word removed,
/// provided other words remain.
pub fn match_key(name: &str, category: EntityCategory) -> String {
    let normalized = normalize_name(name);
    if let Some((head, last)) = normalized.rsplit_once(' ') {
        if category.generic_terms().contains(&last) {
            return head.to_string();
        }
    }
    normalized
}
