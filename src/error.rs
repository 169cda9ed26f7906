//! Error types for the smartdok library.
//!
//! Failures fall into three groups:
//!
//! * [`SmartDocError`]: **Fatal for one document.** input missing, output
//!   not writable, or a pipeline stage that could not run at all. The
//!   [`SmartDocError::Stage`] variant names the stage that failed.
//!
//! * [`CatalogLoadError`] and [`ServiceError`]: stage-specific fatal errors.
//!   A broken catalog stops the whole run; a completion-service failure
//!   stops only the document being tagged.
//!
//! * [`MarkerParseWarning`]: **Non-fatal.** one malformed marker in the
//!   tagger's output. The region is left untagged, the warning is stored in
//!   the [`crate::output::ResolutionReport`], and everything else proceeds.
//!
//! Ambiguous and unresolved mentions are not errors at all; they are
//! resolution statuses (see [`crate::output::ResolutionStatus`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors for a single document run.
#[derive(Debug, Error)]
pub enum SmartDocError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// The input exists but could not be read as UTF-8 text.
    #[error("Failed to read input '{path}': {source}")]
    InputRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Stage errors ──────────────────────────────────────────────────────
    /// The reference catalog could not be loaded.
    #[error(transparent)]
    Catalog(#[from] CatalogLoadError),

    /// A pipeline stage failed for this document.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: ServiceError,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Pipeline stage named in [`SmartDocError::Stage`].
///
/// Only stages that call out to a service can fail; resolution always
/// produces a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Tagging,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Tagging => f.write_str("tagging"),
        }
    }
}

/// Failures of the remote text-completion call used by the tagger.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// Network error, 5xx or rate limit: worth retrying.
    #[error("Completion service '{service}' unavailable: {detail}")]
    Unavailable { service: String, detail: String },

    /// A single call exceeded the configured timeout.
    #[error("Completion call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Authentication or request error: retrying will not help.
    #[error("Completion service '{service}' rejected the request: {detail}")]
    Rejected { service: String, detail: String },

    /// The service answered, but the answer is not a tagged document.
    #[error("Completion output could not be parsed: {detail}")]
    Unparsable { detail: String },

    /// No provider could be constructed from config or environment.
    #[error("Completion provider '{provider}' is not configured.\n{hint}")]
    NotConfigured { provider: String, hint: String },

    /// Every attempt allowed by the retry policy failed.
    #[error("Gave up after {attempts} attempts; last error: {last}")]
    RetriesExhausted { attempts: u32, last: Box<ServiceError> },
}

impl ServiceError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Unavailable { .. }
                | ServiceError::Timeout { .. }
                | ServiceError::Unparsable { .. }
        )
    }
}

/// Reference data is missing or corrupt. Fatal for the whole run.
#[derive(Debug, Error)]
pub enum CatalogLoadError {
    #[error("Dataset file not found: '{path}'")]
    MissingFile { path: PathBuf },

    #[error("Failed to read dataset '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed row in '{path}' at line {line}: {detail}")]
    MalformedRow {
        path: PathBuf,
        line: u64,
        detail: String,
    },

    #[error("Row in '{path}' at line {line} has no '{field}' field")]
    MissingField {
        path: PathBuf,
        line: u64,
        field: String,
    },

    #[error("Invalid catalog manifest '{path}': {detail}")]
    InvalidManifest { path: PathBuf, detail: String },
}

/// A malformed marker in the tagger's output.
///
/// The region is emitted as plain text and processing continues.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("line {line}: {kind} in {snippet:?}")]
pub struct MarkerParseWarning {
    pub kind: MarkerWarningKind,
    /// Byte offset in the tagged text where the untagged region now starts.
    pub offset: usize,
    /// 1-based line of `offset`.
    pub line: usize,
    /// The raw text the model produced for this region.
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkerWarningKind {
    /// No closing `>` before the next `<`, newline or end of text.
    Unbalanced,
    /// Tag name is not one of the schema's categories.
    UnknownCategory { tag: String },
    /// Attribute list is not a sequence of `key="value"` pairs.
    MalformedAttributes,
    /// The `navn` attribute is empty.
    EmptyName,
}

impl fmt::Display for MarkerWarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerWarningKind::Unbalanced => f.write_str("unbalanced marker"),
            MarkerWarningKind::UnknownCategory { tag } => write!(f, "unknown category '{tag}'"),
            MarkerWarningKind::MalformedAttributes => f.write_str("malformed attributes"),
            MarkerWarningKind::EmptyName => f.write_str("empty entity name"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_names_the_stage() {
        let e = SmartDocError::Stage {
            stage: Stage::Tagging,
            source: ServiceError::Timeout { elapsed_ms: 1500 },
        };
        let msg = e.to_string();
        assert!(msg.starts_with("tagging stage failed"), "got: {msg}");
        assert!(msg.contains("1500ms"));
    }

    #[test]
    fn retryable_classification() {
        assert!(ServiceError::Timeout { elapsed_ms: 1 }.is_retryable());
        assert!(ServiceError::Unavailable {
            service: "openai".into(),
            detail: "503".into()
        }
        .is_retryable());
        assert!(!ServiceError::Rejected {
            service: "openai".into(),
            detail: "401".into()
        }
        .is_retryable());
        assert!(!ServiceError::RetriesExhausted {
            attempts: 4,
            last: Box::new(ServiceError::Timeout { elapsed_ms: 1 }),
        }
        .is_retryable());
    }

    #[test]
    fn retries_exhausted_display_includes_last_error() {
        let e = ServiceError::RetriesExhausted {
            attempts: 3,
            last: Box::new(ServiceError::Unparsable {
                detail: "empty completion".into(),
            }),
        };
        let msg = e.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("empty completion"));
    }

    #[test]
    fn catalog_error_names_file_and_line() {
        let e = CatalogLoadError::MalformedRow {
            path: PathBuf::from("innsjoe_full.jsonl"),
            line: 17,
            detail: "expected value".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("innsjoe_full.jsonl"));
        assert!(msg.contains("line 17"));
    }

    #[test]
    fn warning_serialises_kind_inline() {
        let w = MarkerParseWarning {
            kind: MarkerWarningKind::UnknownCategory { tag: "fjell".into() },
            offset: 10,
            line: 2,
            snippet: "<fjell navn=\"Galdhøpiggen\">".into(),
        };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["kind"]["kind"], "unknown_category");
        assert_eq!(json["kind"]["tag"], "fjell");
        assert!(w.to_string().contains("unknown category 'fjell'"));
    }
}
