//! Single-document entry points: text in, smart document and report out.
//!
//! ## Why the intermediate file?
//!
//! Tagging is the slow, paid step; resolution is cheap and deterministic.
//! Writing the tagged text (`.sd`) lets a later run with a better catalog or
//! threshold resolve again without another completion call. It is reused
//! unless [`PipelineConfig::force`] is set.
//!
//! ## Write order
//!
//! Nothing is written until both stages have finished. The smart document
//! (`.nsd`) is written last, so its presence means the run for that document
//! completed. Every file goes through a temp file and a rename.

use crate::catalog::{Catalog, CatalogManifest, MatchOptions};
use crate::config::PipelineConfig;
use crate::error::{SmartDocError, Stage};
use crate::output::{DocumentOutput, DocumentSummary, OutputPaths};
use crate::pipeline::markers::TaggedDocument;
use crate::pipeline::resolver::{Resolution, Resolver};
use crate::pipeline::tagger::Tagger;
use crate::service::{CompletionService, LlmCompletionService};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Tagger plus catalog, ready to process documents.
///
/// Cheap to clone; clones share the service and the catalog.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    service: Arc<dyn CompletionService>,
    catalog: Arc<Catalog>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, service: Arc<dyn CompletionService>, catalog: Arc<Catalog>) -> Self {
        Self {
            config,
            service,
            catalog,
        }
    }

    /// Build with the LLM provider resolved from `config` and the environment.
    pub fn from_config(config: PipelineConfig, catalog: Arc<Catalog>) -> Result<Self, SmartDocError> {
        let service = LlmCompletionService::from_config(&config).map_err(|e| SmartDocError::Stage {
            stage: Stage::Tagging,
            source: e,
        })?;
        Ok(Self::new(config, Arc::new(service), catalog))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn tagger(&self) -> Tagger {
        Tagger::from_config(Arc::clone(&self.service), &self.config)
    }

    /// Tag `raw`; fails with [`SmartDocError::Stage`] naming the tagging stage.
    pub async fn tag_text(&self, raw: &str) -> Result<TaggedDocument, SmartDocError> {
        self.tagger().tag(raw).await.map_err(|e| SmartDocError::Stage {
            stage: Stage::Tagging,
            source: e,
        })
    }

    /// Tag and resolve text in memory. Nothing is written.
    pub async fn process_text(&self, raw: &str) -> Result<DocumentOutput, SmartDocError> {
        let tagged = self.tag_text(raw).await?;
        let resolution = Resolver::new(&self.catalog).resolve(&tagged);
        Ok(DocumentOutput {
            smart_document: resolution.document,
            report: resolution.report,
            tagging: tagged.stats().clone(),
            reused_tagging: false,
        })
    }

    /// Tag and resolve one file, writing `.sd`, `.report.json` and `.nsd`.
    pub async fn process_file(&self, input: impl AsRef<Path>) -> Result<DocumentSummary, SmartDocError> {
        let input = input.as_ref();
        info!("Processing {}", input.display());

        // ── Step 1: Read input ───────────────────────────────────────────
        let raw = read_input(input).await?;
        let paths = OutputPaths::for_input(input, self.config.output_dir.as_deref());

        // ── Step 2: Tag, or reuse an earlier tagging ─────────────────────
        let reuse = !self.config.force && tokio::fs::try_exists(&paths.tagged).await.unwrap_or(false);
        let tagged = if reuse {
            info!("Reusing tagged text {}", paths.tagged.display());
            let text = read_input(&paths.tagged).await?;
            TaggedDocument::parse(&text, &self.config.schema())
        } else {
            self.tag_text(&raw).await?
        };

        // ── Step 3: Resolve ──────────────────────────────────────────────
        let resolution = Resolver::new(&self.catalog).resolve(&tagged);

        // ── Step 4: Write outputs ────────────────────────────────────────
        if !reuse && self.config.write_intermediate {
            write_atomic(&paths.tagged, tagged.source().as_bytes()).await?;
        }
        write_resolution(&paths, &resolution).await?;

        Ok(DocumentSummary {
            input: input.to_path_buf(),
            tagged: (reuse || self.config.write_intermediate).then(|| paths.tagged.clone()),
            smart_document: paths.smart_document,
            report_path: paths.report,
            report: resolution.report,
            tagging: tagged.stats().clone(),
            reused_tagging: reuse,
        })
    }

    /// Tag one file and write only the `.sd` intermediate.
    pub async fn tag_file(&self, input: impl AsRef<Path>) -> Result<(PathBuf, TaggedDocument), SmartDocError> {
        let input = input.as_ref();
        let raw = read_input(input).await?;
        let tagged = self.tag_text(&raw).await?;
        let paths = OutputPaths::for_input(input, self.config.output_dir.as_deref());
        write_atomic(&paths.tagged, tagged.source().as_bytes()).await?;
        Ok((paths.tagged, tagged))
    }
}

/// Resolve an already tagged file (`.sd`) without calling any service.
pub async fn resolve_file(
    input: impl AsRef<Path>,
    catalog: &Catalog,
    config: &PipelineConfig,
) -> Result<DocumentSummary, SmartDocError> {
    let input = input.as_ref();
    let text = read_input(input).await?;
    let tagged = TaggedDocument::parse(&text, &config.schema());
    let resolution = Resolver::new(catalog).resolve(&tagged);
    let paths = OutputPaths::for_input(input, config.output_dir.as_deref());
    write_resolution(&paths, &resolution).await?;
    Ok(DocumentSummary {
        input: input.to_path_buf(),
        tagged: Some(input.to_path_buf()),
        smart_document: paths.smart_document,
        report_path: paths.report,
        report: resolution.report,
        tagging: Default::default(),
        reused_tagging: true,
    })
}

/// Synchronous wrapper around [`Pipeline::process_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_file_sync(pipeline: &Pipeline, input: impl AsRef<Path>) -> Result<DocumentSummary, SmartDocError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| SmartDocError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(pipeline.process_file(input))
}

/// Load the catalog on the blocking pool; dataset parsing is CPU- and
/// disk-bound.
pub async fn load_catalog(manifest: CatalogManifest, options: MatchOptions) -> Result<Catalog, SmartDocError> {
    let catalog = tokio::task::spawn_blocking(move || Catalog::load(&manifest, options))
        .await
        .map_err(|e| SmartDocError::Internal(format!("Catalog load task panicked: {}", e)))??;
    Ok(catalog)
}

async fn read_input(path: &Path) -> Result<String, SmartDocError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(SmartDocError::InputNotFound {
            path: path.to_path_buf(),
        });
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SmartDocError::InputRead {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Report first, smart document last.
async fn write_resolution(paths: &OutputPaths, resolution: &Resolution) -> Result<(), SmartDocError> {
    let report = serde_json::to_vec_pretty(&resolution.report)
        .map_err(|e| SmartDocError::Internal(format!("Failed to serialise report: {}", e)))?;
    write_atomic(&paths.report, &report).await?;
    write_atomic(&paths.smart_document, resolution.document.text.as_bytes()).await?;
    debug!("Wrote {}", paths.smart_document.display());
    Ok(())
}

/// Write via `<path>.tmp` and rename, creating parent directories.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), SmartDocError> {
    let write_err = |e: std::io::Error| SmartDocError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);
    tokio::fs::write(&tmp_path, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_atomic_creates_parents_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ut/dok.nsd");
        write_atomic(&path, b"innhold").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "innhold");
        assert!(!dir.path().join("ut/dok.nsd.tmp").exists());
    }

    #[tokio::test]
    async fn missing_input_is_reported() {
        let err = read_input(Path::new("/nonexistent/dok.md")).await.unwrap_err();
        assert!(matches!(err, SmartDocError::InputNotFound { .. }));
    }

    #[tokio::test]
    async fn load_catalog_surfaces_missing_dataset() {
        let manifest = CatalogManifest::nve_defaults("/nonexistent/data");
        let err = load_catalog(manifest, MatchOptions::default()).await.unwrap_err();
        assert!(matches!(err, SmartDocError::Catalog(_)), "got {err}");
    }
}
