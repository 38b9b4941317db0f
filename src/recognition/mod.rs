//! Text recognition behind one capability: `recognize(page) -> fragments`.
//!
//! Two materially different variants implement [`RecognitionEngine`]:
//!
//! | Variant | Unit of work | Confidence | Position |
//! |---------|--------------|------------|----------|
//! | [`local::LocalRecognizer`]   | regions on one page | per region | collapsed quad |
//! | [`remote::RemoteRecognizer`] | one page → one markdown block | unknown (0) | none |
//!
//! The variant is chosen once per job by [`build_engine`]; the orchestrator
//! only ever sees `Arc<dyn RecognitionEngine>`.

pub mod local;
pub mod mistral;
pub mod remote;
pub mod vision;

use crate::config::{PipelineConfig, RecognitionBackend, RemoteService};
use crate::error::{PipelineError, RecognitionError};
use crate::output::TextFragment;
use crate::pipeline::encode::PageImage;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Extracts text from one page image.
///
/// An empty `Vec` means the call succeeded but found no text. Errors are
/// per call; deciding what a failure costs is the orchestrator's job.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Identifier persisted in the result record.
    fn name(&self) -> &str;

    async fn recognize(&self, page: &PageImage) -> Result<Vec<TextFragment>, RecognitionError>;
}

/// Construct the configured recognition engine.
///
/// Fails when the variant cannot be brought up (missing models, missing API
/// key, no LLM provider). No job may run with a broken engine.
pub fn build_engine(config: &PipelineConfig) -> Result<Arc<dyn RecognitionEngine>, PipelineError> {
    let engine: Arc<dyn RecognitionEngine> = match config.recognition {
        RecognitionBackend::Local => Arc::new(local::LocalRecognizer::from_config(config)?),
        RecognitionBackend::Remote => {
            let service: Arc<dyn remote::MarkdownOcrService> = match config.remote_service {
                RemoteService::Mistral => {
                    let key = config.resolved_mistral_key().ok_or_else(|| {
                        PipelineError::EngineInit {
                            engine: "mistral".into(),
                            detail: "no API key; set MISTRAL_API_KEY or mistral_api_key".into(),
                        }
                    })?;
                    Arc::new(mistral::MistralOcrClient::new(
                        config.mistral_base_url.clone(),
                        key,
                        config.mistral_model.clone(),
                    )?)
                }
                RemoteService::Vision => Arc::new(vision::VisionLlmOcr::from_config(config)?),
            };
            info!("Remote recognition via {}", service.name());
            Arc::new(
                remote::RemoteRecognizer::new(service, config.language.clone())
                    .with_retries(config.max_retries, config.retry_backoff_ms),
            )
        }
    };
    Ok(engine)
}
