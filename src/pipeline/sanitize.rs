//! Deterministic cleanup of completion output before marker parsing.
//!
//! ## Why clean before parsing?
//!
//! Models are told to return the input text unchanged apart from the
//! markers, and mostly do. The exceptions are formatting habits rather than
//! content changes: an outer ```` ```markdown ```` fence, Windows line
//! endings, zero-width characters, typographic quotes around attribute
//! values. Fixing those here keeps the parser strict and the warnings
//! meaningful.
//!
//! Rules run in order: fences first (they wrap everything), then line
//! endings, then character-level fixes.

use crate::prompts::{DOCUMENT_END, DOCUMENT_START};
use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to one completion.
///
/// 1. Strip an outer code fence
/// 2. Normalise line endings (CRLF and CR → LF)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Drop echoed document delimiter lines
/// 5. Straighten typographic quotes inside marker candidates
pub fn clean_completion(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = drop_echoed_delimiters(&s);
    straighten_marker_quotes(&s)
}

// ── Rule 1: Strip outer code fence ───────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md|text|html)?[ \t]*\r?\n(.*?)\r?\n```\s*$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    if !input.contains('\r') {
        return input.to_string();
    }
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Strip invisible Unicode ──────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'], "")
}

// ── Rule 4: Drop echoed delimiters ───────────────────────────────────────────

fn drop_echoed_delimiters(input: &str) -> String {
    if !input.contains(DOCUMENT_START) && !input.contains(DOCUMENT_END) {
        return input.to_string();
    }
    input
        .split('\n')
        .filter(|line| {
            let t = line.trim();
            t != DOCUMENT_START && t != DOCUMENT_END
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Straighten quotes in markers ─────────────────────────────────────
//
// `<elv navn=”Storelva”>` is a common slip. Only text inside a marker
// candidate is touched; quotes in running text stay as written.

static RE_MARKER_CANDIDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[\p{L}_][\p{L}\p{N}_-]*[ \t]+navn[ \t]*=[^<>\n]*>").unwrap());

fn straighten_marker_quotes(input: &str) -> String {
    RE_MARKER_CANDIDATE
        .replace_all(input, |caps: &regex::Captures| {
            caps[0].replace(['\u{201C}', '\u{201D}', '\u{201E}', '\u{00AB}', '\u{00BB}'], "\"")
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fence() {
        let input = "```markdown\nLinje <elv navn=\"Otra\">\n```\n";
        assert_eq!(clean_completion(input), "Linje <elv navn=\"Otra\">");
    }

    #[test]
    fn keeps_inner_fences() {
        let input = "Tekst\n```\nkode\n```\nmer";
        assert_eq!(clean_completion(input), input);
    }

    #[test]
    fn normalises_crlf() {
        assert_eq!(clean_completion("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn removes_invisible_chars() {
        assert_eq!(remove_invisible_chars("Glo\u{200B}mma\u{FEFF}"), "Glomma");
    }

    #[test]
    fn drops_echoed_delimiters() {
        let input = format!("{DOCUMENT_START}\nLinje\n{DOCUMENT_END}");
        assert_eq!(clean_completion(&input), "Linje");
    }

    #[test]
    fn straightens_quotes_only_in_markers() {
        let input = "«Sitat» og <elv navn=\u{201D}Storelva\u{201D}>";
        assert_eq!(clean_completion(input), "«Sitat» og <elv navn=\"Storelva\">");
    }
}
