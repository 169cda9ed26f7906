//! Pipeline stages for turning converted text into a smart document.
//!
//! Each submodule implements one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//! text ──▶ tagger ──▶ sanitize ──▶ markers ──▶ resolver ──▶ render
//!          (LLM)      (cleanup)    (validate)  (catalog)    (tags)
//! ```
//!
//! 1. [`tagger`]: chunk the text and drive the completion service with
//!    retry; the only stage with network I/O
//! 2. [`sanitize`]: deterministic fixes for model formatting quirks
//! 3. [`markers`]: parse untrusted tagged text into markers, turning bad
//!    ones into warnings
//! 4. [`resolver`]: look every marker up in the catalog and decide a status,
//!    with [`context`] supplying the document's municipality and owner
//! 5. [`render`]: write resolved tags back into the text

pub mod context;
pub mod markers;
pub mod render;
pub mod resolver;
pub mod sanitize;
pub mod tagger;
