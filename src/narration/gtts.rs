//! Speech synthesis via the Google Translate TTS endpoint.
//!
//! The endpoint caps each request at roughly 100 characters, so a line is
//! split on whitespace into chunks and each chunk is fetched separately.
//! The chunks come back as independent MP3 streams and are kept as separate
//! parts of one [`EncodedClip`].

use crate::error::{PipelineError, SynthesisError};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Longest text sent in one request.
pub const MAX_CHUNK_CHARS: usize = 100;

/// Audio returned for one line: one or more independently encoded parts,
/// played back to back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedClip {
    pub parts: Vec<Vec<u8>>,
}

/// Turns `(text, language, slow)` into encoded audio.
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Identifier persisted in the result record.
    fn name(&self) -> &str;

    async fn speak(&self, text: &str, language: &str, slow: bool) -> Result<EncodedClip, SynthesisError>;
}

/// [`SpeechService`] backed by `translate_tts`.
#[derive(Debug, Clone)]
pub struct GoogleTranslateTts {
    http: reqwest::Client,
    base_url: String,
}

impl GoogleTranslateTts {
    pub fn new(base_url: impl Into<String>) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (X11; Linux x86_64)")
            .build()
            .map_err(|e| PipelineError::EngineInit {
                engine: "gtts".into(),
                detail: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_chunk(
        &self,
        chunk: &str,
        idx: usize,
        total: usize,
        language: &str,
        slow: bool,
    ) -> Result<Vec<u8>, SynthesisError> {
        let url = format!("{}/translate_tts", self.base_url);
        let speed = if slow { "0.3" } else { "1" };
        let total = total.to_string();
        let idx = idx.to_string();
        let textlen = chunk.chars().count().to_string();
        let response = self
            .http
            .get(&url)
            .query(&[
                ("ie", "UTF-8"),
                ("q", chunk),
                ("tl", language),
                ("client", "tw-ob"),
                ("ttsspeed", speed),
                ("total", total.as_str()),
                ("idx", idx.as_str()),
                ("textlen", textlen.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Service {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(SynthesisError::AudioDecode("speech service returned no audio".into()));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SpeechService for GoogleTranslateTts {
    fn name(&self) -> &str {
        "gtts"
    }

    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn speak(&self, text: &str, language: &str, slow: bool) -> Result<EncodedClip, SynthesisError> {
        let chunks = split_text(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(SynthesisError::EmptyInput);
        }

        let mut parts = Vec::with_capacity(chunks.len());
        for (idx, chunk) in chunks.iter().enumerate() {
            parts.push(self.fetch_chunk(chunk, idx, chunks.len(), language, slow).await?);
        }
        debug!("Fetched {} audio part(s)", parts.len());
        Ok(EncodedClip { parts })
    }
}

/// Split `text` into chunks of at most `max_chars` characters, breaking on
/// whitespace. A single word longer than `max_chars` is cut hard.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let mut word_chars: Vec<char> = word.chars().collect();

        while word_chars.len() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word_chars.split_off(max_chars);
            chunks.push(word_chars.into_iter().collect());
            word_chars = rest;
        }

        let len = word_chars.len();
        if len == 0 {
            continue;
        }
        let needed = if current.is_empty() { len } else { current_len + 1 + len };
        if needed > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word_chars);
        current_len += len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
