//! Error types for the edgequake-doc2speech library.
//!
//! Three error families mirror the three ways a job can go wrong:
//!
//! * [`PipelineError`] is **fatal**: the job cannot produce audio at all
//!   (unsupported input, render failure, nothing recognised, narration
//!   failure, output not writable). The orchestrator converts it into a
//!   failed [`crate::output::PipelineResult`]; it only escapes as `Err`
//!   from engine construction.
//!
//! * [`RecognitionError`]: one page's recognition call failed. Recorded
//!   as a [`PageError`] and the job moves on to the next page.
//!
//! * [`SynthesisError`]: the narration call failed. There is exactly one
//!   narration call per job, so it is always wrapped into
//!   [`PipelineError::Synthesis`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors of a document-to-speech job.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The file extension does not map to any supported document kind.
    #[error("Unsupported file format '{extension}' for '{name}'\nSupported: pdf, docx, doc, odt, rtf, png, jpg, jpeg")]
    UnsupportedFormat { name: String, extension: String },

    /// Office → PDF transcoding failed.
    #[error("Failed to convert '{path}' to PDF: {detail}")]
    Conversion { path: PathBuf, detail: String },

    /// The paged document could not be opened or rasterised.
    #[error("Rendering failed for '{path}': {detail}")]
    Render { path: PathBuf, detail: String },

    /// A raster image could not be decoded, enhanced or encoded.
    #[error("Image processing failed for page {page}: {detail}")]
    Image { page: usize, detail: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// Every page failed or returned no text.
    #[error("No text was extracted from the document ({failed}/{total} pages failed)")]
    NoTextExtracted { total: usize, failed: usize },

    // ── Narration errors ──────────────────────────────────────────────────
    /// The narration engine could not produce audio.
    #[error("Speech synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    // ── Output errors ─────────────────────────────────────────────────────
    /// Writing the audio file or the result record failed.
    #[error("Failed to write '{path}': {detail}")]
    Persist { path: PathBuf, detail: String },

    // ── Setup errors ──────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A recognition or narration engine could not be constructed.
    #[error("Engine '{engine}' could not be initialised: {detail}")]
    EngineInit { engine: String, detail: String },

    /// Job-scoped working storage could not be prepared.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (e.g. a blocking task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single recognition call.
///
/// Wraps the underlying transport or library fault. The orchestrator,
/// not the engine, decides that this only costs one page.
#[derive(Debug, Clone, Error)]
pub enum RecognitionError {
    /// Network-level failure talking to a remote service.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote service answered with a non-success status.
    #[error("service returned HTTP {status}: {body}")]
    Service { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The page image could not be decoded for inference.
    #[error("cannot decode page image: {0}")]
    Decode(String),

    /// The local recognition library reported an error.
    #[error("recognition library error: {0}")]
    Library(String),

    /// The call did not complete within the configured timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl RecognitionError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Rate limits and server errors are transient; client errors and
    /// malformed responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } => true,
            Self::Service { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) | Self::Decode(_) | Self::Library(_) => false,
        }
    }
}

impl From<reqwest::Error> for RecognitionError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Failure of the narration stage.
#[derive(Debug, Clone, Error)]
pub enum SynthesisError {
    /// After segmentation no non-blank line remained.
    #[error("no audio generated: input has no non-blank lines")]
    EmptyInput,

    /// Network-level failure talking to the speech service.
    #[error("transport error: {0}")]
    Transport(String),

    /// The speech service answered with a non-success status.
    #[error("speech service returned HTTP {status}: {body}")]
    Service { status: u16, body: String },

    /// A returned clip could not be decoded or resampled.
    #[error("audio decode failed: {0}")]
    AudioDecode(String),

    /// One speech call did not complete within the configured timeout.
    #[error("speech call timed out after {secs}s on line {line}")]
    Timeout { line: usize, secs: u64 },

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for SynthesisError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// A non-fatal error for a single page.
///
/// Stored in the job's error list; the job continues with the next page.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The recognition call failed.
    #[error("Recognition failed for page {page}: {detail}")]
    Failed { page: usize, detail: String },

    /// Recognition succeeded but found no text.
    #[error("No text recognised on page {page}")]
    NoText { page: usize },

    /// The recognition call exceeded its timeout.
    #[error("Recognition timed out for page {page} after {secs}s")]
    TimedOut { page: usize, secs: u64 },
}

impl PageError {
    /// Build the page-level record for a failed recognition call.
    pub fn from_recognition(page: usize, err: &RecognitionError) -> Self {
        match err {
            RecognitionError::Timeout { secs } => Self::TimedOut { page, secs: *secs },
            other => Self::Failed {
                page,
                detail: other.to_string(),
            },
        }
    }

    /// 1-indexed page number this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            Self::Failed { page, .. } | Self::NoText { page } | Self::TimedOut { page, .. } => {
                *page
            }
        }
    }
}
