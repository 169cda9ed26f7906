//! Parsing tagged text into markers.
//!
//! The tagger's output is an untrusted string. A marker looks like
//!
//! ```text
//! <elv navn="Storelva">  <innsjø navn="Langvatnet" kommune="Vik">
//! ```
//!
//! and is recognised by `<`, a tag name, whitespace and `navn=`. Anything
//! else in angle brackets (`<br>`, `<sup>`) is ordinary text.
//!
//! A candidate that does not validate is replaced by the mention it was
//! wrapping (or nothing, if that is empty) and recorded as a
//! [`MarkerParseWarning`]. Parsing never fails.

use crate::category::{CategorySchema, EntityCategory, NAME_ATTRIBUTE};
use crate::error::{MarkerParseWarning, MarkerWarningKind};
use crate::output::TaggingStats;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// `<tag navn=`, the start of a marker candidate.
static MARKER_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([\p{L}_][\p{L}\p{N}_-]*)[ \t]+navn[ \t]*=").unwrap());

/// One `key="value"` pair, anchored at the start of the remaining input.
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^\s*([\w:-]+)\s*=\s*"([^"]*)""#).unwrap());

/// Best-effort `navn` recovery from a broken marker.
static NAME_RECOVERY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"navn\s*=\s*(?:"([^"]*)"?|([^\s"<>]+))"#).unwrap());

const SNIPPET_MAX_CHARS: usize = 80;

/// A candidate entity mention in tagged text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    /// Position among the document's markers, from 0.
    pub index: usize,
    pub category: EntityCategory,
    /// The mention (`navn`), entity references decoded.
    pub surface: String,
    /// Any other attributes on the marker.
    pub attributes: BTreeMap<String, String>,
    /// Byte span of the marker in [`TaggedDocument::text`].
    pub start: usize,
    pub end: usize,
    /// 1-based line of `start`.
    pub line: usize,
}

/// Tagged text with its validated markers.
///
/// Invariant: `markers` are ordered by `start`, do not overlap, and each
/// span covers exactly one well-formed marker in `text`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaggedDocument {
    source: String,
    text: String,
    markers: Vec<Marker>,
    warnings: Vec<MarkerParseWarning>,
    stats: TaggingStats,
}

impl TaggedDocument {
    /// Validate tagged text against `schema`.
    pub fn parse(raw: &str, schema: &CategorySchema) -> Self {
        let mut out = Parser::new(raw.len());
        let mut pos = 0;

        while let Some(caps) = MARKER_START.captures_at(raw, pos) {
            let Some(whole) = caps.get(0) else { break };
            let tag = &caps[1];
            out.push_text(&raw[pos..whole.start()]);

            let rest = &raw[whole.end()..];
            let stop = rest.find(['>', '<', '\n']);
            match stop.map(|i| (i, rest.as_bytes()[i])) {
                Some((i, b'>')) => {
                    let region = &raw[whole.start()..whole.end() + i + 1];
                    // Everything between the tag name and `>`.
                    let name_end = caps.get(1).map_or(whole.start() + 1, |m| m.end());
                    let attrs_src = &raw[name_end..whole.end() + i];
                    out.candidate(tag, region, attrs_src, schema);
                    pos = whole.end() + i + 1;
                }
                other => {
                    let end = other.map_or(raw.len(), |(i, _)| whole.end() + i);
                    let region = &raw[whole.start()..end];
                    out.reject(MarkerWarningKind::Unbalanced, region, recover_name(region));
                    pos = end;
                }
            }
        }
        out.push_text(&raw[pos..]);

        if !out.warnings.is_empty() {
            warn!("{} malformed markers left untagged", out.warnings.len());
        }
        debug!("Parsed {} markers", out.markers.len());

        Self {
            source: raw.to_string(),
            text: out.text,
            markers: out.markers,
            warnings: out.warnings,
            stats: TaggingStats::default(),
        }
    }

    /// The document with no text and no markers.
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn with_stats(mut self, stats: TaggingStats) -> Self {
        self.stats = stats;
        self
    }

    /// The text as given to [`TaggedDocument::parse`], malformed markers
    /// included. This is what gets persisted as `.sd`.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Tagged text; malformed markers already replaced by plain text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn warnings(&self) -> &[MarkerParseWarning] {
        &self.warnings
    }

    pub fn stats(&self) -> &TaggingStats {
        &self.stats
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// The text with every marker replaced by its mention.
    pub fn plain_text(&self) -> String {
        let mut plain = String::with_capacity(self.text.len());
        let mut pos = 0;
        for m in &self.markers {
            plain.push_str(&self.text[pos..m.start]);
            plain.push_str(&m.surface);
            pos = m.end;
        }
        plain.push_str(&self.text[pos..]);
        plain
    }
}

/// Output accumulator for [`TaggedDocument::parse`].
struct Parser {
    text: String,
    markers: Vec<Marker>,
    warnings: Vec<MarkerParseWarning>,
    /// 1-based line at the end of `text`.
    line: usize,
}

impl Parser {
    fn new(capacity: usize) -> Self {
        Self {
            text: String::with_capacity(capacity),
            markers: Vec::new(),
            warnings: Vec::new(),
            line: 1,
        }
    }

    fn push_text(&mut self, s: &str) {
        self.line += s.bytes().filter(|&b| b == b'\n').count();
        self.text.push_str(s);
    }

    /// Validate a marker candidate closed by `>`.
    fn candidate(&mut self, tag: &str, region: &str, attrs_src: &str, schema: &CategorySchema) {
        let Some(attributes) = parse_attributes(attrs_src) else {
            self.reject(MarkerWarningKind::MalformedAttributes, region, recover_name(region));
            return;
        };
        let surface = attributes
            .get(NAME_ATTRIBUTE)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        let Some(category) = schema.accept(tag) else {
            self.reject(
                MarkerWarningKind::UnknownCategory { tag: tag.to_string() },
                region,
                surface,
            );
            return;
        };
        if surface.is_empty() {
            self.reject(MarkerWarningKind::EmptyName, region, String::new());
            return;
        }

        let start = self.text.len();
        let line = self.line;
        self.push_text(region);
        let mut attributes = attributes;
        attributes.remove(NAME_ATTRIBUTE);
        self.markers.push(Marker {
            index: self.markers.len(),
            category,
            surface,
            attributes,
            start,
            end: self.text.len(),
            line,
        });
    }

    /// Leave a region untagged: emit `replacement` and record why.
    fn reject(&mut self, kind: MarkerWarningKind, region: &str, replacement: String) {
        debug!("Rejected marker ({kind}): {region:?}");
        self.warnings.push(MarkerParseWarning {
            kind,
            offset: self.text.len(),
            line: self.line,
            snippet: snippet(region),
        });
        self.push_text(&replacement);
    }
}

/// Parse `navn="x" key="y"`; `None` unless the whole input is consumed
/// (a trailing `/` is tolerated) and every key is unique.
fn parse_attributes(src: &str) -> Option<BTreeMap<String, String>> {
    let mut attributes = BTreeMap::new();
    let mut rest = src;
    while let Some(caps) = ATTRIBUTE.captures(rest) {
        let key = caps[1].to_string();
        let value = unescape(&caps[2]);
        if attributes.insert(key, value).is_some() {
            return None;
        }
        rest = &rest[caps[0].len()..];
    }
    let rest = rest.trim();
    (rest.is_empty() || rest == "/").then_some(attributes)
}

/// The mention a broken marker was wrapping, if any can be found.
fn recover_name(region: &str) -> String {
    NAME_RECOVERY
        .captures(region)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| unescape(m.as_str()).trim().to_string())
        .unwrap_or_default()
}

/// Decode the entity references the renderer produces.
pub(crate) fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn snippet(region: &str) -> String {
    match region.char_indices().nth(SNIPPET_MAX_CHARS) {
        Some((i, _)) => format!("{}…", &region[..i]),
        None => region.to_string(),
    }
}
