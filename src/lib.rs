//! # edgequake-doc2speech
//!
//! Turn scanned images, PDFs and office documents into narrated audio plus a
//! structured transcript.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document bytes
//!  │
//!  ├─ 1. Normalise  office → PDF (soffice), PDF → pages (pdfium), or one raster
//!  ├─ 2. Enhance    bilateral · unsharp · CLAHE · deskew → grayscale PNG
//!  ├─ 3. Recognise  local ONNX detector/recogniser, or a remote markdown OCR
//!  │                service (Mistral OCR / vision LLM), page by page
//!  ├─ 4. Narrate    line-by-line speech, headings emphasised, 600 ms gaps
//!  └─ 5. Persist    <base>_audio.wav + <base>_results.json
//! ```
//!
//! A page that fails recognition costs that page only. Every other failure
//! ends the job, and [`AccessibilityPipeline::process_document`] reports it
//! as a failed [`PipelineResult`] rather than an `Err`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doc2speech::{AccessibilityPipeline, PipelineConfig, RecognitionBackend};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Remote recognition via Mistral OCR reads MISTRAL_API_KEY.
//!     let config = PipelineConfig::builder()
//!         .recognition(RecognitionBackend::Remote)
//!         .language("en")
//!         .build()?;
//!     let pipeline = AccessibilityPipeline::new(config)?;
//!
//!     let result = pipeline.process_file("scan.pdf", Path::new("out")).await;
//!     if result.succeeded() {
//!         println!("{}", result.extracted_text);
//!     } else {
//!         eprintln!("failed: {:?}", result.errors);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2speech` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `local` | off     | On-device recognition with `pure-onnx-ocr` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod narration;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod recognition;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, RecognitionBackend, RemoteService};
pub use error::{PageError, PipelineError, RecognitionError, SynthesisError};
pub use narration::{Narration, NarrationEngine, NarrationSegment, Pacing};
pub use output::{AudioArtifact, BoundingBox, JobState, PipelineResult, TextFragment};
pub use pipeline::input::DocumentInput;
pub use process::AccessibilityPipeline;
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use recognition::RecognitionEngine;
