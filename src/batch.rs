//! Batch processing: many documents, bounded concurrency.
//!
//! ## Why a stream?
//!
//! A directory of concession documents can take a long time to tag. The
//! streaming entry point yields each [`DocumentOutcome`] as it finishes so
//! callers can drive a progress bar or log as they go. Documents complete in
//! any order; [`process_batch`] collects and sorts them back by input index.
//!
//! One failing document never stops the batch. Its error is reported through
//! [`crate::progress::BatchProgressCallback::on_document_error`] and returned
//! in its outcome.

use crate::error::SmartDocError;
use crate::output::DocumentSummary;
use crate::process::Pipeline;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::{info, warn};

/// Result for one document of a batch.
#[derive(Debug)]
pub struct DocumentOutcome {
    /// 0-based position in the input list.
    pub index: usize,
    pub input: PathBuf,
    pub result: Result<DocumentSummary, SmartDocError>,
}

impl DocumentOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// A boxed stream of document outcomes in completion order.
pub type OutcomeStream = Pin<Box<dyn Stream<Item = DocumentOutcome> + Send>>;

/// Process `inputs` with at most `config.concurrency` documents in flight,
/// yielding outcomes as they complete.
pub fn process_batch_stream(pipeline: &Pipeline, inputs: Vec<PathBuf>) -> OutcomeStream {
    let total = inputs.len();
    let concurrency = pipeline.config().concurrency.max(1);
    let callback = pipeline.config().progress_callback.clone();
    if let Some(cb) = &callback {
        cb.on_batch_start(total);
    }

    let pipeline = pipeline.clone();
    let s = stream::iter(inputs.into_iter().enumerate().map(move |(index, input)| {
        let pipeline = pipeline.clone();
        let callback = callback.clone();
        async move {
            let label = input.display().to_string();
            if let Some(cb) = &callback {
                cb.on_document_start(index, total, &label);
            }

            let result = pipeline.process_file(&input).await;
            match &result {
                Ok(summary) => {
                    if let Some(cb) = &callback {
                        cb.on_document_complete(index, total, &label, summary.report.total_markers);
                    }
                }
                Err(e) => {
                    warn!("{}: {}", label, e);
                    if let Some(cb) = &callback {
                        cb.on_document_error(index, total, &label, &e.to_string());
                    }
                }
            }

            DocumentOutcome { index, input, result }
        }
    }))
    .buffer_unordered(concurrency);

    Box::pin(s)
}

/// Process every input and return outcomes in input order.
pub async fn process_batch(pipeline: &Pipeline, inputs: Vec<PathBuf>) -> Vec<DocumentOutcome> {
    let total = inputs.len();
    info!("Processing {} document(s), concurrency {}", total, pipeline.config().concurrency);

    let mut outcomes: Vec<DocumentOutcome> = process_batch_stream(pipeline, inputs).collect().await;
    outcomes.sort_by_key(|o| o.index);

    let success = outcomes.iter().filter(|o| o.is_ok()).count();
    if let Some(cb) = &pipeline.config().progress_callback {
        cb.on_batch_complete(total, success);
    }
    info!("Batch complete: {}/{} succeeded", success, total);
    outcomes
}
