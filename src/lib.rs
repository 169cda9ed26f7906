//! # smartdok
//!
//! Tag named hydropower entities in NVE concession documents and resolve
//! them against reference datasets.
//!
//! ## Why this crate?
//!
//! Concession documents name rivers, lakes, power plants, dams and
//! waterways in free text, with local spellings and inconsistent suffixes
//! ("Glomma", "Glåma", "Luster kraftverk"). Finding the names needs a
//! language model; deciding *which* river is meant must not. This crate
//! splits the two: an LLM inserts inline markers, and a deterministic
//! resolver matches each marker against NVE's catalog and records how sure
//! it is.
//!
//! ## Pipeline Overview
//!
//! ```text
//! text
//!  │
//!  ├─ 1. Tag      chunked LLM calls with retry, markers inserted inline
//!  ├─ 2. Clean    deterministic fixes for model formatting quirks
//!  ├─ 3. Parse    markers validated; bad ones become warnings
//!  ├─ 4. Resolve  exact then fuzzy catalog lookup per marker
//!  └─ 5. Output   smart document (.nsd) + resolution report (.report.json)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use smartdok::{load_catalog, CatalogManifest, Pipeline, PipelineConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::default();
//!     let manifest = CatalogManifest::nve_defaults("data");
//!     let catalog = load_catalog(manifest, config.match_options()).await?;
//!     let pipeline = Pipeline::from_config(config, Arc::new(catalog))?;
//!     let summary = pipeline.process_file("konsesjon.md").await?;
//!     eprintln!(
//!         "{} markers, {} unresolved",
//!         summary.report.total_markers, summary.report.counts.unresolved
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `smartdok` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! smartdok = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod catalog;
pub mod category;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod retry;
pub mod service;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{process_batch, process_batch_stream, DocumentOutcome};
pub use catalog::{Catalog, CatalogManifest, DatasetFormat, DatasetSpec, MatchKind, MatchOptions, ReferenceRecord};
pub use category::{CategorySchema, EntityCategory};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{CatalogLoadError, MarkerParseWarning, MarkerWarningKind, ServiceError, SmartDocError, Stage};
pub use output::{
    DocumentOutput, DocumentSummary, OutputPaths, ProblemMarker, ResolutionReport, ResolutionStatus, ResolvedTag,
    SmartDocument, StatusCounts, TaggingStats,
};
pub use pipeline::context::DocumentContext;
pub use pipeline::markers::{Marker, TaggedDocument};
pub use pipeline::resolver::{Resolution, Resolver};
pub use pipeline::tagger::Tagger;
pub use process::{load_catalog, process_file_sync, resolve_file, Pipeline};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use retry::RetryPolicy;
pub use service::{Completion, CompletionRequest, CompletionService, LlmCompletionService};
