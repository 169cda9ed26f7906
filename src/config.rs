//! Configuration for the tagging and resolution pipeline.
//!
//! All behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it easy
//! to share a config across batch workers and to log exactly what a run used.
//!
//! # Design choice: builder over constructor
//! Most callers change two or three settings. The builder lets them set only
//! those and rely on documented defaults for the rest, and `build()` is the
//! single place where combinations are validated.

use crate::catalog::{MatchOptions, DEFAULT_FUZZY_THRESHOLD, DEFAULT_MAX_CANDIDATES};
use crate::category::{CategorySchema, EntityCategory};
use crate::error::SmartDocError;
use crate::progress::BatchProgressCallback;
use crate::prompts::build_system_prompt;
use crate::retry::RetryPolicy;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for tagging and resolving documents.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use smartdok::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .concurrency(2)
///     .fuzzy_threshold(0.9)
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 2);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    // ── Completion service ────────────────────────────────────────────────
    /// Model identifier, e.g. "gpt-4.1-nano". If None, uses the provider default.
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "anthropic", "gemini", "ollama").
    /// If None along with `provider`, the environment decides.
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// The model must copy the document back verbatim; low temperature keeps
    /// it from paraphrasing.
    pub temperature: f32,

    /// Maximum tokens per completion. Default: 8192.
    ///
    /// The answer is the whole chunk plus markers, so this must exceed the
    /// chunk's token count with some headroom.
    pub max_tokens: usize,

    /// Retries after a failed completion call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Upper bound on a single retry delay in milliseconds. Default: 30 000.
    pub max_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Custom system prompt. If None, one is built from `categories`.
    pub system_prompt: Option<String>,

    // ── Tagging ───────────────────────────────────────────────────────────
    /// Categories to tag and accept. Default: all.
    pub categories: Vec<EntityCategory>,

    /// Largest chunk sent in one completion call, in characters. Default: 12 000.
    ///
    /// Chunks end at paragraph breaks; a single paragraph longer than this
    /// is sent whole.
    pub max_chunk_chars: usize,

    /// Minimum share of a chunk's characters that must survive tagging.
    /// Default: 0.5.
    ///
    /// A completion that drops more than half the text has summarised or
    /// truncated instead of tagging; it is treated as unparsable and retried.
    pub min_retained_ratio: f64,

    // ── Resolution ────────────────────────────────────────────────────────
    /// Minimum Jaro-Winkler similarity for a fuzzy match. Default: 0.82.
    pub fuzzy_threshold: f64,

    /// Candidates kept per lookup; top-score ties are always kept. Default: 10.
    pub max_candidates: usize,

    // ── Files and batches ─────────────────────────────────────────────────
    /// Documents processed at once in a batch. Default: 4.
    pub concurrency: usize,

    /// Write the tagged intermediate (`.sd`) next to the outputs. Default: true.
    pub write_intermediate: bool,

    /// Re-tag even when an intermediate file exists. Default: false.
    pub force: bool,

    /// Directory for outputs. If None, outputs go next to each input.
    pub output_dir: Option<PathBuf>,

    /// Receives batch progress events.
    pub progress_callback: Option<Arc<dyn BatchProgressCallback>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 8192,
            max_retries: 3,
            retry_backoff_ms: 500,
            max_backoff_ms: 30_000,
            api_timeout_secs: 120,
            system_prompt: None,
            categories: EntityCategory::ALL.to_vec(),
            max_chunk_chars: 12_000,
            min_retained_ratio: 0.5,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            concurrency: 4,
            write_intermediate: true,
            force: false,
            output_dir: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("categories", &self.categories)
            .field("max_chunk_chars", &self.max_chunk_chars)
            .field("fuzzy_threshold", &self.fuzzy_threshold)
            .field("max_candidates", &self.max_candidates)
            .field("concurrency", &self.concurrency)
            .field("write_intermediate", &self.write_intermediate)
            .field("force", &self.force)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn schema(&self) -> CategorySchema {
        CategorySchema::new(self.categories.iter().copied())
    }

    /// The configured system prompt, or the default for the schema.
    pub fn effective_system_prompt(&self) -> String {
        match self.system_prompt {
            Some(ref p) => p.clone(),
            None => build_system_prompt(&self.schema()),
        }
    }

    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            fuzzy_threshold: self.fuzzy_threshold,
            max_candidates: self.max_candidates,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.retry_backoff_ms)),
            attempt_timeout: Duration::from_secs(self.api_timeout_secs),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn categories(mut self, categories: impl IntoIterator<Item = EntityCategory>) -> Self {
        self.config.categories = categories.into_iter().collect();
        self
    }

    pub fn max_chunk_chars(mut self, n: usize) -> Self {
        self.config.max_chunk_chars = n.max(256);
        self
    }

    pub fn min_retained_ratio(mut self, r: f64) -> Self {
        self.config.min_retained_ratio = r.clamp(0.0, 1.0);
        self
    }

    pub fn fuzzy_threshold(mut self, t: f64) -> Self {
        self.config.fuzzy_threshold = t;
        self
    }

    pub fn max_candidates(mut self, n: usize) -> Self {
        self.config.max_candidates = n.max(1);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn write_intermediate(mut self, v: bool) -> Self {
        self.config.write_intermediate = v;
        self
    }

    pub fn force(mut self, v: bool) -> Self {
        self.config.force = v;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn BatchProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, SmartDocError> {
        let c = &self.config;
        if !(0.0..=1.0).contains(&c.fuzzy_threshold) || c.fuzzy_threshold.is_nan() {
            return Err(SmartDocError::InvalidConfig(format!(
                "Fuzzy threshold must be 0.0–1.0, got {}",
                c.fuzzy_threshold
            )));
        }
        if c.categories.is_empty() {
            return Err(SmartDocError::InvalidConfig(
                "At least one entity category must be enabled".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(SmartDocError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.max_tokens == 0 {
            return Err(SmartDocError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}
