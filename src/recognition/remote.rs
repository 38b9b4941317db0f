//! Remote recognition: one service call per page, one markdown block back.
//!
//! ## Retry Strategy
//!
//! Rate limits (429) and server errors (5xx) are frequent under load and
//! usually clear on their own. Transient failures are retried with
//! exponential backoff (`retry_backoff_ms * 2^(attempt-1)`): with a 500 ms
//! base and 2 retries the waits are 500 ms → 1 s. Client errors and
//! malformed responses fail immediately.

use crate::error::RecognitionError;
use crate::output::TextFragment;
use crate::pipeline::encode::PageImage;
use crate::pipeline::postprocess::clean_for_speech;
use crate::recognition::RecognitionEngine;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, instrument, warn};

/// A service that transcribes a page image into markdown.
#[async_trait]
pub trait MarkdownOcrService: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// Transcribe one page; returns one markdown block per page submitted.
    async fn transcribe(&self, page: &PageImage) -> Result<Vec<String>, RecognitionError>;
}

/// The remote [`RecognitionEngine`] variant.
///
/// Every returned block becomes one fragment with unknown confidence and no
/// bounding box, after spoken-text cleanup.
pub struct RemoteRecognizer {
    service: Arc<dyn MarkdownOcrService>,
    language: String,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl RemoteRecognizer {
    pub fn new(service: Arc<dyn MarkdownOcrService>, language: impl Into<String>) -> Self {
        Self {
            service,
            language: language.into(),
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }

    pub fn with_retries(mut self, max_retries: u32, retry_backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_ms = retry_backoff_ms;
        self
    }

    async fn transcribe_with_retry(&self, page: &PageImage) -> Result<Vec<String>, RecognitionError> {
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    page.page_num, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.service.transcribe(page).await {
                Ok(blocks) => return Ok(blocks),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    warn!(
                        "Page {}: {} attempt {} failed: {}",
                        page.page_num,
                        self.service.name(),
                        attempt + 1,
                        e
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Exponential backoff for retry `attempt` (1-based), saturating at `u64::MAX`.
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    let factor = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    base.saturating_mul(factor)
}

#[async_trait]
impl RecognitionEngine for RemoteRecognizer {
    fn name(&self) -> &str {
        "remote"
    }

    #[instrument(skip_all, fields(page = page.page_num, service = self.service.name()))]
    async fn recognize(&self, page: &PageImage) -> Result<Vec<TextFragment>, RecognitionError> {
        let blocks = self.transcribe_with_retry(page).await?;
        debug!("Page {}: {} block(s) returned", page.page_num, blocks.len());

        Ok(blocks
            .iter()
            .map(|block| clean_for_speech(block))
            .filter(|text| !text.is_empty())
            .map(|text| TextFragment::new(text, self.language.clone()))
            .collect())
    }
}
