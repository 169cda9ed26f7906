//! Progress-callback trait for batch processing events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to hear about
//! each document as a batch runs. The CLI uses it to drive its progress bar.
//!
//! # Example
//!
//! ```rust
//! use smartdok::{BatchProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, _index: usize, _total: usize, _path: &str, markers: usize) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{markers} markers");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by [`crate::batch`] as documents are processed.
///
/// Documents run concurrently, so the per-document methods may be called
/// from several tasks at once. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any document starts.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when work on a document begins.
    ///
    /// `index` is the document's 0-based position in the input list.
    fn on_document_start(&self, index: usize, total: usize, path: &str) {
        let _ = (index, total, path);
    }

    /// Called when a document's outputs have been written.
    fn on_document_complete(&self, index: usize, total: usize, path: &str, markers: usize) {
        let _ = (index, total, path, markers);
    }

    /// Called when a document fails; the batch continues.
    fn on_document_error(&self, index: usize, total: usize, path: &str, error: &str) {
        let _ = (index, total, path, error);
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let _ = (total_documents, success_count);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
