//! Result types: resolved tags, the smart document, the resolution report
//! and the per-document output bundle.
//!
//! Everything here is plain data with serde derives so the CLI can write it
//! as JSON and library users can inspect it directly.

use crate::category::EntityCategory;
use crate::error::MarkerParseWarning;
use crate::pipeline::context::DocumentContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Attribute keys written by the resolver. Dataset fields with these names
/// are renamed to `data_<key>` when the catalog is loaded.
pub const RESERVED_ATTRIBUTES: &[&str] = &["navn", "resolution", "ref_id", "ref_navn", "score", "candidates", "hints"];

/// Lists which attributes on a matched tag came from the marker.
pub const HINTS_ATTRIBUTE: &str = "hints";

/// Outcome of resolving one marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStatus {
    MatchedExact,
    MatchedFuzzy,
    Ambiguous,
    Unresolved,
}

impl ResolutionStatus {
    /// Value of the `resolution` attribute in resolved tags.
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionStatus::MatchedExact => "matched-exact",
            ResolutionStatus::MatchedFuzzy => "matched-fuzzy",
            ResolutionStatus::Ambiguous => "ambiguous",
            ResolutionStatus::Unresolved => "unresolved",
        }
    }

    pub fn is_match(self) -> bool {
        matches!(self, ResolutionStatus::MatchedExact | ResolutionStatus::MatchedFuzzy)
    }
}

impl fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A marker after resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTag {
    /// Index of the marker this tag replaced.
    pub marker_index: usize,
    /// The mention as written in the document.
    pub surface: String,
    pub category: EntityCategory,
    pub status: ResolutionStatus,
    /// Identifier of the matched record (matches only).
    pub record_id: Option<String>,
    /// Canonical name of the matched record (matches only).
    pub matched_name: Option<String>,
    pub score: Option<f64>,
    /// Tied identifiers (ambiguous only).
    pub candidate_ids: Vec<String>,
    /// Copied from the matched record; empty unless matched.
    pub attributes: BTreeMap<String, String>,
    /// Extra attributes the tagger emitted on the marker.
    pub hints: BTreeMap<String, String>,
    /// Byte span of the rendered tag in [`SmartDocument::text`].
    pub start: usize,
    pub end: usize,
}

/// The final product: text with every marker replaced by a resolved tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmartDocument {
    pub text: String,
    /// One tag per marker, in document order.
    pub tags: Vec<ResolvedTag>,
}

/// Tag counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub matched_exact: usize,
    pub matched_fuzzy: usize,
    pub ambiguous: usize,
    pub unresolved: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: ResolutionStatus) {
        match status {
            ResolutionStatus::MatchedExact => self.matched_exact += 1,
            ResolutionStatus::MatchedFuzzy => self.matched_fuzzy += 1,
            ResolutionStatus::Ambiguous => self.ambiguous += 1,
            ResolutionStatus::Unresolved => self.unresolved += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.matched_exact + self.matched_fuzzy + self.ambiguous + self.unresolved
    }

    pub fn matched(&self) -> usize {
        self.matched_exact + self.matched_fuzzy
    }
}

/// A marker that needs human attention: ambiguous or unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemMarker {
    pub index: usize,
    pub surface: String,
    pub category: EntityCategory,
    pub status: ResolutionStatus,
    pub candidate_ids: Vec<String>,
    /// 1-based line in the tagged text.
    pub line: usize,
}

/// Per-document summary of resolution outcomes and tagging problems.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub total_markers: usize,
    pub counts: StatusCounts,
    pub problems: Vec<ProblemMarker>,
    pub warnings: Vec<MarkerParseWarning>,
    /// Municipality and owner read from the document header.
    #[serde(default)]
    pub context: DocumentContext,
}

impl ResolutionReport {
    /// True when every marker matched and the tagger emitted no warnings.
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty() && self.warnings.is_empty()
    }
}

/// Statistics from one tagging run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggingStats {
    /// Chunks sent to the completion service (0 for empty input or a
    /// re-parsed intermediate file).
    pub chunks: usize,
    /// Total completion calls, retries included.
    pub attempts: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
}

/// Everything produced for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutput {
    pub smart_document: SmartDocument,
    pub report: ResolutionReport,
    pub tagging: TaggingStats,
    /// Whether the tagged text came from an existing intermediate file.
    pub reused_tagging: bool,
}

/// What [`crate::process::Pipeline::process_file`] did for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub input: PathBuf,
    /// Tagged intermediate, when one was written or reused.
    pub tagged: Option<PathBuf>,
    pub smart_document: PathBuf,
    pub report_path: PathBuf,
    pub report: ResolutionReport,
    pub tagging: TaggingStats,
    pub reused_tagging: bool,
}

/// Files written for one document by [`crate::process::Pipeline::process_file`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPaths {
    /// Tagged intermediate text (`.sd`).
    pub tagged: PathBuf,
    /// Smart document text (`.nsd`).
    pub smart_document: PathBuf,
    /// Resolution report (`.report.json`).
    pub report: PathBuf,
}

impl OutputPaths {
    /// Paths derived from the input path: `x.md` → `x.sd`, `x.nsd`,
    /// `x.report.json`, placed in `output_dir` when given.
    pub fn for_input(input: &std::path::Path, output_dir: Option<&std::path::Path>) -> Self {
        let dir = output_dir
            .map(|d| d.to_path_buf())
            .or_else(|| input.parent().map(|p| p.to_path_buf()))
            .unwrap_or_default();
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        Self {
            tagged: dir.join(format!("{stem}.sd")),
            smart_document: dir.join(format!("{stem}.nsd")),
            report: dir.join(format!("{stem}.report.json")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn status_serialises_kebab_case() {
        let json = serde_json::to_string(&ResolutionStatus::MatchedFuzzy).unwrap();
        assert_eq!(json, "\"matched-fuzzy\"");
        assert_eq!(ResolutionStatus::Ambiguous.to_string(), "ambiguous");
    }

    #[test]
    fn counts_tally() {
        let mut c = StatusCounts::default();
        c.record(ResolutionStatus::MatchedExact);
        c.record(ResolutionStatus::MatchedFuzzy);
        c.record(ResolutionStatus::Unresolved);
        assert_eq!(c.total(), 3);
        assert_eq!(c.matched(), 2);
    }

    #[test]
    fn output_paths_follow_input_stem() {
        let paths = OutputPaths::for_input(Path::new("/data/konsesjon_12.md"), None);
        assert_eq!(paths.tagged, Path::new("/data/konsesjon_12.sd"));
        assert_eq!(paths.smart_document, Path::new("/data/konsesjon_12.nsd"));
        assert_eq!(paths.report, Path::new("/data/konsesjon_12.report.json"));

        let paths = OutputPaths::for_input(Path::new("a/b.md"), Some(Path::new("out")));
        assert_eq!(paths.smart_document, Path::new("out/b.nsd"));
    }

    #[test]
    fn report_json_shape() {
        let report = ResolutionReport {
            total_markers: 1,
            counts: StatusCounts {
                unresolved: 1,
                ..Default::default()
            },
            problems: vec![ProblemMarker {
                index: 0,
                surface: "Fjellbekken".into(),
                category: EntityCategory::River,
                status: ResolutionStatus::Unresolved,
                candidate_ids: vec![],
                line: 3,
            }],
            warnings: vec![],
            context: DocumentContext {
                kommune: Some("Froland".into()),
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["counts"]["unresolved"], 1);
        assert_eq!(json["context"], serde_json::json!({ "kommune": "Froland" }));
        assert_eq!(json["problems"][0]["status"], "unresolved");
        assert_eq!(json["problems"][0]["category"], "river");
        assert!(!report.is_clean());
    }

    #[test]
    fn reports_without_context_still_parse() {
        let json = r#"{"total_markers": 0, "counts": {"matched_exact": 0, "matched_fuzzy": 0, "ambiguous": 0, "unresolved": 0}, "problems": [], "warnings": []}"#;
        let report: ResolutionReport = serde_json::from_str(json).unwrap();
        assert!(report.context.is_empty());
    }
}
