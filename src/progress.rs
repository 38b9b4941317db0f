//! Progress-callback trait for job, stage and per-page events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves through its stages and recognises each page.
//!
//! The trait is `Send + Sync` because pages may be recognised concurrently
//! when `concurrency > 1`.
//!
//! # Example
//!
//! ```rust
//! use edgequake_doc2speech::{JobProgressCallback, PipelineConfig, ProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl JobProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, chars: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done ({} chars)", page_num, total_pages, chars);
//!     }
//! }
//!
//! let cb: ProgressCallback = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder().progress_callback(cb).build().unwrap();
//! ```

use crate::output::JobState;
use std::sync::Arc;

/// Called by the orchestrator as a job advances.
///
/// All methods have default no-op implementations so callers only
/// override what they care about.
pub trait JobProgressCallback: Send + Sync {
    /// Called whenever the job enters a new state.
    fn on_stage(&self, state: JobState) {
        let _ = state;
    }

    /// Called once the input has been normalised into pages.
    fn on_pages_ready(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page is sent to the recognition engine.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page yields text.
    ///
    /// * `chars`: character count of the page's joined text
    fn on_page_complete(&self, page_num: usize, total_pages: usize, chars: usize) {
        let _ = (page_num, total_pages, chars);
    }

    /// Called when a page fails or yields no text.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called exactly once per job, after cleanup, on every exit path.
    fn on_job_complete(&self, succeeded: bool, total_pages: usize, successful_pages: usize) {
        let _ = (succeeded, total_pages, successful_pages);
    }
}

/// A no-op implementation for callers that don't need progress events.
#[derive(Debug)]
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;
