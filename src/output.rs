//! Output types: recognised fragments, the narrated audio artifact, the
//! job's terminal [`PipelineResult`] and the persisted JSON record.

use crate::error::PageError;
use crate::narration::{NarrationSegment, Pacing};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Axis-aligned box `(x1, y1)`–`(x2, y2)` in page pixel coordinates.
///
/// Serialised as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Collapse a detector quadrilateral (clockwise from top-left) to its
    /// top-left and bottom-right corners.
    ///
    /// Corners 1 and 3 are discarded, so any rotation of the region is lost.
    /// This is only sound because every page is deskewed before recognition;
    /// if the enhancer stops deskewing, this must switch to a min/max hull.
    pub fn from_quad(quad: &[(f32, f32); 4]) -> Self {
        Self {
            x1: quad[0].0,
            y1: quad[0].1,
            x2: quad[2].0,
            y2: quad[2].1,
        }
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self {
            x1: v[0],
            y1: v[1],
            x2: v[2],
            y2: v[3],
        }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One unit of recognised text, scoped to one page.
///
/// `confidence` is 0.0 when the engine does not report one, and `bbox` is
/// `None` when the engine cannot localise text. Both mean "unknown", never
/// "zero" or "zero-area".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFragment {
    pub text: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    pub language: String,
}

impl TextFragment {
    /// A fragment with unknown confidence and position.
    pub fn new(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: 0.0,
            bbox: None,
            language: language.into(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }
}

/// The narrated audio file written for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioArtifact {
    pub path: PathBuf,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub language: String,
    /// Character length of the original, unsegmented narration input.
    pub source_text_length: usize,
}

/// States a job moves through. `Failed` is reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Init,
    Loading,
    Extracting,
    Synthesizing,
    Persisting,
    Done,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Loading => "loading",
            Self::Extracting => "extracting",
            Self::Synthesizing => "synthesizing",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Terminal record of one job, returned on success and on failure.
///
/// On failure `extracted_text` is empty, `output_audio`/`audio` are `None`,
/// `confidence` is 0 and `errors` explains why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub input_path: String,
    pub output_audio: Option<PathBuf>,
    pub result_record: Option<PathBuf>,
    pub extracted_text: String,
    /// Mean confidence over every retained fragment, 0 when there are none.
    pub confidence: f64,
    pub processing_time_secs: f64,
    /// Per-page errors followed by the fatal cause, if any.
    pub errors: Vec<String>,
    pub page_errors: Vec<PageError>,
    pub fragments: Vec<TextFragment>,
    pub segments: Vec<NarrationSegment>,
    pub pages_processed: usize,
    pub successful_pages: usize,
    pub audio: Option<AudioArtifact>,
    pub recognition_engine: String,
    pub narration_engine: String,
    /// `Done`, or `Failed`.
    pub state: JobState,
    /// The state the job was in when it failed.
    pub failed_during: Option<JobState>,
}

impl PipelineResult {
    pub fn succeeded(&self) -> bool {
        self.state == JobState::Done
    }
}

/// Audio metadata block of the persisted record.
#[derive(Debug, Serialize)]
pub struct AudioMetadata<'a> {
    pub duration: f64,
    pub sample_rate: u32,
    pub language: &'a str,
    pub text_length: usize,
}

/// One narration segment in the persisted record.
#[derive(Debug, Serialize)]
pub struct SegmentRecord<'a> {
    pub text: &'a str,
    pub pacing: Pacing,
    pub start: f64,
    pub duration: f64,
}

/// The `<base>_results.json` companion file.
#[derive(Debug, Serialize)]
pub struct ResultRecord<'a> {
    pub input_path: &'a str,
    pub output_audio: String,
    pub extracted_text: &'a str,
    pub confidence: f64,
    pub processing_time: f64,
    pub pages_processed: usize,
    pub successful_pages: usize,
    pub errors: &'a [String],
    pub ocr_engine: &'a str,
    pub tts_engine: &'a str,
    pub audio_metadata: AudioMetadata<'a>,
    pub segments: Vec<SegmentRecord<'a>>,
    pub text_details: &'a [TextFragment],
}

/// Round `v` to `places` decimal places.
pub fn round_to(v: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (v * f).round() / f
}

/// Arithmetic mean of fragment confidences; 0 when `fragments` is empty.
pub fn mean_confidence(fragments: &[TextFragment]) -> f64 {
    if fragments.is_empty() {
        return 0.0;
    }
    let sum: f64 = fragments.iter().map(|f| f64::from(f.confidence)).sum();
    sum / fragments.len() as f64
}
