//! Mistral document OCR client.
//!
//! `POST {base_url}/v1/ocr` with the page as a `data:image/png;base64,` URI;
//! the response carries one `markdown` string per page.

use crate::error::{PipelineError, RecognitionError};
use crate::pipeline::encode::PageImage;
use crate::recognition::remote::MarkdownOcrService;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

#[derive(Debug, Serialize)]
struct OcrRequest<'a> {
    model: &'a str,
    document: OcrDocument,
    include_image_base64: bool,
}

#[derive(Debug, Serialize)]
struct OcrDocument {
    #[serde(rename = "type")]
    kind: &'static str,
    image_url: String,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    pages: Vec<OcrPage>,
}

#[derive(Debug, Deserialize)]
struct OcrPage {
    #[serde(default)]
    index: usize,
    markdown: String,
}

/// [`MarkdownOcrService`] backed by Mistral's OCR endpoint.
pub struct MistralOcrClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for MistralOcrClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MistralOcrClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl MistralOcrClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::EngineInit {
                engine: "mistral".into(),
                detail: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl MarkdownOcrService for MistralOcrClient {
    fn name(&self) -> &str {
        "mistral"
    }

    #[instrument(skip_all, fields(page = page.page_num, model = %self.model))]
    async fn transcribe(&self, page: &PageImage) -> Result<Vec<String>, RecognitionError> {
        let url = format!("{}/v1/ocr", self.base_url);
        let body = OcrRequest {
            model: &self.model,
            document: OcrDocument {
                kind: "image_url",
                image_url: page.data_uri(),
            },
            include_image_base64: false,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecognitionError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let mut parsed: OcrResponse = response
            .json()
            .await
            .map_err(|e| RecognitionError::InvalidResponse(e.to_string()))?;
        parsed.pages.sort_by_key(|p| p.index);
        debug!("Mistral returned {} page(s)", parsed.pages.len());

        Ok(parsed.pages.into_iter().map(|p| p.markdown).collect())
    }
}
