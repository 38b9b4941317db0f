//! Vision-LLM transcription: a multimodal model reads the page image and
//! answers with Markdown.
//!
//! The model runs through `edgequake-llm`, so any provider it supports
//! (OpenAI, Anthropic, Gemini, Mistral, Ollama, …) can stand in for a
//! dedicated OCR service.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, RecognitionError};
use crate::pipeline::encode::PageImage;
use crate::recognition::remote::MarkdownOcrService;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::{debug, instrument};

/// System prompt for transcribing a page so that it can be read aloud.
pub const TRANSCRIPTION_PROMPT: &str = r#"You transcribe scanned document pages so they can be read aloud to a listener who cannot see them.

Follow these rules precisely:

1. TEXT
   - Transcribe ALL text on the page exactly, in the language it is written in
   - Follow the natural reading order of the script (right-to-left scripts stay right-to-left)
   - Do not translate, summarise or correct the text

2. HEADINGS
   - Mark titles and section headings with # (one # per heading level)
   - Put every heading on its own line

3. BODY
   - One paragraph per line; keep list items on separate lines
   - Write table rows as plain lines, cells separated by commas

4. WHAT TO IGNORE
   - Page numbers, running headers and footers
   - Decorative borders, logos and images without text

5. OUTPUT FORMAT
   - Output ONLY the transcription
   - Do NOT wrap it in code fences
   - Do NOT add commentary"#;

const TEMPERATURE: f32 = 0.1;
const MAX_TOKENS: usize = 4096;

/// [`MarkdownOcrService`] backed by a vision LLM.
pub struct VisionLlmOcr {
    provider: Arc<dyn LLMProvider>,
}

impl VisionLlmOcr {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Resolve the provider from the config, then the environment.
    ///
    /// 1. `vision_provider` + `vision_model` from the config
    /// 2. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`
    /// 3. OpenAI when `OPENAI_API_KEY` is set
    /// 4. whatever `ProviderFactory::from_env` detects
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        if let Some(ref name) = config.vision_provider {
            return create_vision_provider(name, &config.vision_model).map(Self::new);
        }

        if let (Ok(prov), Ok(model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !model.is_empty() {
                return create_vision_provider(&prov, &model).map(Self::new);
            }
        }

        if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
            return create_vision_provider("openai", &config.vision_model).map(Self::new);
        }

        let (llm, _embedding) = ProviderFactory::from_env().map_err(|e| PipelineError::EngineInit {
            engine: "vision".into(),
            detail: format!(
                "no LLM provider could be auto-detected; set OPENAI_API_KEY, \
                 ANTHROPIC_API_KEY or vision_provider ({e})"
            ),
        })?;
        Ok(Self::new(llm))
    }
}

fn create_vision_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| PipelineError::EngineInit {
        engine: format!("vision/{name}"),
        detail: e.to_string(),
    })
}

/// System prompt followed by the page as a high-detail image attachment.
fn build_messages(page: &PageImage) -> Vec<ChatMessage> {
    let image = ImageData::new(page.to_base64(), page.format.mime_type()).with_detail("high");
    vec![
        ChatMessage::system(TRANSCRIPTION_PROMPT),
        ChatMessage::user_with_images("", vec![image]),
    ]
}

fn build_options() -> CompletionOptions {
    CompletionOptions {
        temperature: Some(TEMPERATURE),
        max_tokens: Some(MAX_TOKENS),
        ..Default::default()
    }
}

#[async_trait]
impl MarkdownOcrService for VisionLlmOcr {
    fn name(&self) -> &str {
        "vision"
    }

    #[instrument(skip_all, fields(page = page.page_num))]
    async fn transcribe(&self, page: &PageImage) -> Result<Vec<String>, RecognitionError> {
        let messages = build_messages(page);
        let response = self
            .provider
            .chat(&messages, Some(&build_options()))
            .await
            .map_err(|e| RecognitionError::Transport(e.to_string()))?;

        debug!(
            "Page {}: {} input tokens, {} output tokens",
            page.page_num, response.prompt_tokens, response.completion_tokens
        );
        Ok(vec![response.content])
    }
}
