//! Entity tagging: ask the completion service to mark entity mentions.
//!
//! ## Flow per document
//!
//! ```text
//! raw text ──▶ chunks ──▶ complete ──▶ clean ──▶ check ──▶ join ──▶ parse
//!              (paragraphs) (service)  (sanitize) (retry)
//! ```
//!
//! Chunks are tagged one after another in document order, each under the
//! [`RetryPolicy`]. A completion that comes back empty, or that has lost a
//! large part of the chunk's text, is [`ServiceError::Unparsable`] and is
//! retried like a network failure. Individual bad markers are not errors:
//! they become warnings when the joined text is parsed.

use crate::category::CategorySchema;
use crate::config::PipelineConfig;
use crate::error::ServiceError;
use crate::output::TaggingStats;
use crate::pipeline::markers::TaggedDocument;
use crate::pipeline::sanitize::clean_completion;
use crate::prompts::build_system_prompt;
use crate::retry::RetryPolicy;
use crate::service::{Completion, CompletionRequest, CompletionService};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Calls a [`CompletionService`] and validates its output into a
/// [`TaggedDocument`].
pub struct Tagger {
    service: Arc<dyn CompletionService>,
    schema: CategorySchema,
    system_prompt: String,
    retry: RetryPolicy,
    max_chunk_chars: usize,
    min_retained_ratio: f64,
}

impl Tagger {
    /// Tagger with the default prompt for `schema` and default limits.
    pub fn new(service: Arc<dyn CompletionService>, schema: CategorySchema) -> Self {
        let defaults = PipelineConfig::default();
        Self {
            service,
            system_prompt: build_system_prompt(&schema),
            schema,
            retry: defaults.retry_policy(),
            max_chunk_chars: defaults.max_chunk_chars,
            min_retained_ratio: defaults.min_retained_ratio,
        }
    }

    pub fn from_config(service: Arc<dyn CompletionService>, config: &PipelineConfig) -> Self {
        Self {
            service,
            schema: config.schema(),
            system_prompt: config.effective_system_prompt(),
            retry: config.retry_policy(),
            max_chunk_chars: config.max_chunk_chars,
            min_retained_ratio: config.min_retained_ratio,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_chunk_chars(mut self, n: usize) -> Self {
        self.max_chunk_chars = n.max(1);
        self
    }

    pub fn schema(&self) -> &CategorySchema {
        &self.schema
    }

    /// Tag `raw` and parse the result.
    ///
    /// Empty or whitespace-only input gives an empty document without a
    /// service call. Fails only when a chunk cannot be tagged within the
    /// retry policy.
    pub async fn tag(&self, raw: &str) -> Result<TaggedDocument, ServiceError> {
        if raw.trim().is_empty() {
            debug!("Empty input, nothing to tag");
            return Ok(TaggedDocument::empty());
        }

        let started = Instant::now();
        let chunks = split_chunks(raw, self.max_chunk_chars);
        info!(
            "Tagging {} chars in {} chunk(s) via '{}'",
            raw.chars().count(),
            chunks.len(),
            self.service.name()
        );

        let mut stats = TaggingStats::default();
        let mut tagged = String::with_capacity(raw.len() + raw.len() / 8);
        for (i, chunk) in chunks.iter().enumerate() {
            let body = chunk.trim();
            let leading = &chunk[..chunk.len() - chunk.trim_start().len()];
            let trailing = &chunk[chunk.trim_end().len()..];
            tagged.push_str(leading);
            if !body.is_empty() {
                let label = format!("chunk {}/{}", i + 1, chunks.len());
                let (text, completion, attempts) = self.tag_chunk(&label, body).await?;
                stats.chunks += 1;
                stats.attempts += attempts;
                stats.input_tokens += completion.input_tokens;
                stats.output_tokens += completion.output_tokens;
                tagged.push_str(text.trim());
            }
            tagged.push_str(trailing);
        }
        stats.duration_ms = started.elapsed().as_millis() as u64;

        let doc = TaggedDocument::parse(&tagged, &self.schema).with_stats(stats);
        info!(
            "Tagged {} markers ({} warnings) in {}ms",
            doc.markers().len(),
            doc.warnings().len(),
            doc.stats().duration_ms
        );
        Ok(doc)
    }

    /// Complete and validate one chunk under the retry policy.
    async fn tag_chunk(&self, label: &str, body: &str) -> Result<(String, Completion, u32), ServiceError> {
        let request = CompletionRequest {
            system_prompt: self.system_prompt.clone(),
            document: body.to_string(),
        };
        let request = &request;
        let service = &self.service;
        let schema = &self.schema;
        let min_ratio = self.min_retained_ratio;

        let ((text, completion), attempts) = self
            .retry
            .run(label, move |attempt| async move {
                debug!("{label}: attempt {attempt}");
                let completion = service.complete(request).await?;
                let text = clean_completion(&completion.text);
                check_retained(&request.document, &text, schema, min_ratio)?;
                Ok((text, completion))
            })
            .await?;
        Ok((text, completion, attempts))
    }
}

/// Reject completions that are empty or have dropped too much text.
fn check_retained(original: &str, tagged: &str, schema: &CategorySchema, min_ratio: f64) -> Result<(), ServiceError> {
    if tagged.trim().is_empty() {
        return Err(ServiceError::Unparsable {
            detail: "empty completion".into(),
        });
    }
    let before = original.chars().count().max(1) as f64;
    let after = TaggedDocument::parse(tagged, schema).plain_text().chars().count() as f64;
    let ratio = after / before;
    if ratio < min_ratio {
        return Err(ServiceError::Unparsable {
            detail: format!(
                "completion kept {:.0}% of the text (minimum {:.0}%)",
                ratio * 100.0,
                min_ratio * 100.0
            ),
        });
    }
    Ok(())
}

/// Split at paragraph breaks into chunks of at most `max_chars` characters.
///
/// Concatenating the chunks gives back `text` exactly. A paragraph longer
/// than `max_chars` forms a chunk of its own.
fn split_chunks(text: &str, max_chars: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut end = 0;
    let mut chars = 0;
    for para in text.split_inclusive("\n\n") {
        let n = para.chars().count();
        if chars > 0 && chars + n > max_chars {
            chunks.push(&text[start..end]);
            start = end;
            chars = 0;
        }
        end += para.len();
        chars += n;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}
