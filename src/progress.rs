//! Progress-callback trait for batch and per-document extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through each document.
//!
//! # Example
//!
//! ```rust
//! use invoice2xlsx::{ExtractionConfig, ExtractionProgressCallback, Stage};
//! use std::sync::Arc;
//!
//! struct StageLogger;
//!
//! impl ExtractionProgressCallback for StageLogger {
//!     fn on_stage(&self, input: &str, stage: Stage) {
//!         eprintln!("{input}: {}", stage.label());
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(StageLogger) as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Pipeline stage a document has entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    TextLayer,
    Ocr,
    Llm,
    Patterns,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::TextLayer => "reading text layer",
            Stage::Ocr => "running OCR",
            Stage::Llm => "structuring with LLM",
            Stage::Patterns => "matching field patterns",
        }
    }
}

/// Called by the extraction pipeline as it processes documents.
///
/// Implementations must be `Send + Sync`: with `concurrency > 1` the
/// per-document methods may be called from different tasks at once. All
/// methods have default no-op implementations.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before the first document of a batch.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    fn on_document_start(&self, input: &str) {
        let _ = input;
    }

    fn on_stage(&self, input: &str, stage: Stage) {
        let _ = (input, stage);
    }

    /// # Arguments
    /// * `line_items`: number of line items found
    fn on_document_complete(&self, input: &str, line_items: usize) {
        let _ = (input, line_items);
    }

    fn on_document_error(&self, input: &str, error: &str) {
        let _ = (input, error);
    }

    /// Called once after every document of a batch was attempted.
    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let _ = (total_documents, success_count);
    }
}

/// A callback that ignores every event, for callers that need a value.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        completes: AtomicUsize,
        errors: AtomicUsize,
        stages: Mutex<Vec<Stage>>,
        batch_success: AtomicUsize,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_stage(&self, _input: &str, stage: Stage) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_document_complete(&self, _input: &str, _line_items: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_error(&self, _input: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total: usize, success_count: usize) {
            self.batch_success.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_document_start("a.pdf");
        cb.on_stage("a.pdf", Stage::Ocr);
        cb.on_document_complete("a.pdf", 3);
        cb.on_document_error("b.pdf", "not a PDF");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_stage("a.pdf", Stage::TextLayer);
        tracker.on_stage("a.pdf", Stage::Patterns);
        tracker.on_document_complete("a.pdf", 4);
        tracker.on_document_error("b.pdf", "no text");
        tracker.on_batch_complete(2, 1);

        assert_eq!(
            *tracker.stages.lock().unwrap(),
            vec![Stage::TextLayer, Stage::Patterns]
        );
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.batch_success.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_document_start("x.pdf");
        assert_eq!(Stage::Llm.label(), "structuring with LLM");
    }
}
