//! Narration: full text → one stitched audio track with heading-aware pacing.
//!
//! ## Segmentation
//!
//! The text is split on newlines and blank lines are dropped. A line whose
//! first non-space character is `#` is a heading: its leading `#`/space run
//! is stripped, the rest is upper-cased and spoken slowly. Every other line
//! is spoken as trimmed, case preserved, at the configured default pace.
//!
//! ## Assembly
//!
//! Each line is synthesised on its own, decoded to mono PCM at the
//! configured sample rate, and the clips are joined in line order with
//! [`audio::GAP_MS`] of silence between neighbours. Duration is measured on
//! the stitched samples, never estimated from the text.

pub mod audio;
pub mod gtts;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, SynthesisError};
use async_trait::async_trait;
use audio::{decode_clip, stitch, PcmAudio};
use gtts::{GoogleTranslateTts, SpeechService};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// How a line is spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pacing {
    Normal,
    /// Headings: upper-cased, always slow.
    EmphasizedSlow,
}

/// One non-blank source line prepared for synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLine {
    pub text: String,
    pub pacing: Pacing,
}

/// One spoken line and where it sits in the stitched track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationSegment {
    pub text: String,
    pub pacing: Pacing,
    pub start_secs: f64,
    pub duration_secs: f64,
}

/// The narrated track for one job, not yet written anywhere.
#[derive(Debug, Clone)]
pub struct Narration {
    pub audio: PcmAudio,
    pub segments: Vec<NarrationSegment>,
    pub language: String,
    /// Character length of the original, unsegmented input.
    pub source_text_length: usize,
}

impl Narration {
    pub fn duration_secs(&self) -> f64 {
        self.audio.duration_secs()
    }
}

/// Split narration input into spoken lines.
pub fn plan_lines(text: &str) -> Vec<PlannedLine> {
    text.split('\n')
        .filter_map(|raw| {
            let line = raw.trim();
            if line.is_empty() {
                return None;
            }
            if line.starts_with('#') {
                let title = line
                    .trim_start_matches(|c: char| c == '#' || c.is_whitespace())
                    .trim_end();
                // A bare "###" has nothing to say.
                if title.is_empty() {
                    return None;
                }
                Some(PlannedLine {
                    text: title.to_uppercase(),
                    pacing: Pacing::EmphasizedSlow,
                })
            } else {
                Some(PlannedLine {
                    text: line.to_string(),
                    pacing: Pacing::Normal,
                })
            }
        })
        .collect()
}

/// Converts a full text into a single narrated track.
#[async_trait]
pub trait NarrationEngine: Send + Sync {
    /// Identifier persisted in the result record.
    fn name(&self) -> &str;

    /// Fails with [`SynthesisError::EmptyInput`] when no line survives segmentation.
    async fn synthesize(&self, text: &str) -> Result<Narration, SynthesisError>;
}

/// [`NarrationEngine`] that speaks line by line through a [`SpeechService`].
pub struct Narrator {
    speech: Arc<dyn SpeechService>,
    language: String,
    slow_speech: bool,
    sample_rate: u32,
    call_timeout: Duration,
}

impl Narrator {
    pub fn new(speech: Arc<dyn SpeechService>, language: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            speech,
            language: language.into(),
            slow_speech: false,
            sample_rate,
            call_timeout: Duration::from_secs(30),
        }
    }

    /// Slow flag for non-heading lines.
    pub fn with_slow_speech(mut self, slow: bool) -> Self {
        self.slow_speech = slow;
        self
    }

    /// Upper bound on each speech call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn from_config(config: &PipelineConfig, speech: Arc<dyn SpeechService>) -> Self {
        Self::new(speech, config.language.clone(), config.sample_rate)
            .with_slow_speech(config.slow_speech)
            .with_timeout(Duration::from_secs(config.synthesis_timeout_secs))
    }

    async fn render_line(&self, line_no: usize, line: &PlannedLine) -> Result<Vec<f32>, SynthesisError> {
        let slow = match line.pacing {
            Pacing::EmphasizedSlow => true,
            Pacing::Normal => self.slow_speech,
        };

        let clip = tokio::time::timeout(
            self.call_timeout,
            self.speech.speak(&line.text, &self.language, slow),
        )
        .await
        .map_err(|_| SynthesisError::Timeout {
            line: line_no,
            secs: self.call_timeout.as_secs(),
        })??;

        let rate = self.sample_rate;
        tokio::task::spawn_blocking(move || {
            let mut samples = Vec::new();
            for part in &clip.parts {
                samples.extend(decode_clip(part, rate)?);
            }
            Ok::<_, SynthesisError>(samples)
        })
        .await
        .map_err(|e| SynthesisError::Internal(format!("decode task panicked: {e}")))?
    }
}

#[async_trait]
impl NarrationEngine for Narrator {
    fn name(&self) -> &str {
        self.speech.name()
    }

    #[instrument(skip_all, fields(chars = text.chars().count()))]
    async fn synthesize(&self, text: &str) -> Result<Narration, SynthesisError> {
        let lines = plan_lines(text);
        if lines.is_empty() {
            return Err(SynthesisError::EmptyInput);
        }
        info!("Narrating {} line(s) in '{}'", lines.len(), self.language);

        let mut clips = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            debug!("Line {}/{} ({:?})", i + 1, lines.len(), line.pacing);
            clips.push(self.render_line(i + 1, line).await?);
        }

        let (audio, spans) = stitch(&clips, self.sample_rate);
        let segments = lines
            .into_iter()
            .zip(spans)
            .map(|(line, span)| NarrationSegment {
                text: line.text,
                pacing: line.pacing,
                start_secs: span.start_secs,
                duration_secs: span.duration_secs,
            })
            .collect();

        Ok(Narration {
            audio,
            segments,
            language: self.language.clone(),
            source_text_length: text.chars().count(),
        })
    }
}

/// Construct the configured narration engine.
pub fn build_narrator(config: &PipelineConfig) -> Result<Arc<dyn NarrationEngine>, PipelineError> {
    let speech = Arc::new(GoogleTranslateTts::new(config.tts_base_url.clone())?);
    Ok(Arc::new(Narrator::from_config(config, speech)))
}
