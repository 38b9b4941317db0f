//! Job orchestration: normalise → recognise → narrate → persist.
//!
//! ## Failure model
//!
//! A job never returns `Err`. Every stage either succeeds, produces a
//! recoverable per-page outcome, or fails the whole job; the fatal cause is
//! folded into a failed [`PipelineResult`] together with the page errors
//! collected so far.
//!
//! ```text
//! INIT ─▶ LOADING ─▶ EXTRACTING ─▶ SYNTHESIZING ─▶ PERSISTING ─▶ DONE
//!   └────────┴───────────┴──────────────┴──────────────┴──────▶ FAILED
//! ```
//!
//! The job workspace is removed exactly once on every path before the
//! result is returned.

use crate::config::PipelineConfig;
use crate::error::{PageError, PipelineError, RecognitionError};
use crate::narration::{build_narrator, Narration, NarrationEngine, NarrationSegment};
use crate::output::{
    mean_confidence, round_to, AudioArtifact, AudioMetadata, JobState, PipelineResult,
    ResultRecord, SegmentRecord, TextFragment,
};
use crate::pipeline::encode::PageImage;
use crate::pipeline::input::{DocumentInput, JobWorkspace};
use crate::pipeline::normalize::{PageNormalizer, PageSource};
use crate::pipeline::office::{DocumentConverter, SofficeConverter};
use crate::recognition::{build_engine, RecognitionEngine};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// What one page contributed.
#[derive(Debug)]
enum PageOutcome {
    Recognized {
        page: usize,
        text: String,
        fragments: Vec<TextFragment>,
    },
    /// The engine answered, but with no text.
    Empty { page: usize },
    Failed(PageError),
}

impl PageOutcome {
    fn from_fragments(page: usize, fragments: Vec<TextFragment>) -> Self {
        let text = fragments
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        if text.trim().is_empty() {
            Self::Empty { page }
        } else {
            Self::Recognized {
                page,
                text,
                fragments,
            }
        }
    }

    fn page(&self) -> usize {
        match self {
            Self::Recognized { page, .. } | Self::Empty { page } => *page,
            Self::Failed(e) => e.page(),
        }
    }
}

/// Everything a job has accumulated, finalised once into a [`PipelineResult`].
struct JobAccumulator {
    input_path: String,
    started: Instant,
    state: JobState,
    pages_processed: usize,
    successful_pages: usize,
    page_texts: Vec<String>,
    fragments: Vec<TextFragment>,
    page_errors: Vec<PageError>,
    segments: Vec<NarrationSegment>,
    audio: Option<AudioArtifact>,
    result_record: Option<PathBuf>,
}

impl JobAccumulator {
    fn new(input_path: impl Into<String>) -> Self {
        Self {
            input_path: input_path.into(),
            started: Instant::now(),
            state: JobState::Init,
            pages_processed: 0,
            successful_pages: 0,
            page_texts: Vec::new(),
            fragments: Vec::new(),
            page_errors: Vec::new(),
            segments: Vec::new(),
            audio: None,
            result_record: None,
        }
    }

    fn record_page(&mut self, outcome: PageOutcome) {
        self.pages_processed += 1;
        match outcome {
            PageOutcome::Recognized {
                text, fragments, ..
            } => {
                self.successful_pages += 1;
                self.page_texts.push(text);
                self.fragments.extend(fragments);
            }
            PageOutcome::Empty { page } => self.page_errors.push(PageError::NoText { page }),
            PageOutcome::Failed(e) => self.page_errors.push(e),
        }
    }

    /// Page texts in page order, space-joined.
    fn full_text(&self) -> String {
        self.page_texts.join(" ")
    }

    fn error_strings(&self) -> Vec<String> {
        self.page_errors.iter().map(ToString::to_string).collect()
    }

    fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// The document-to-speech pipeline.
///
/// Engines are constructed once, in [`AccessibilityPipeline::new`]; a
/// pipeline that exists can run jobs.
pub struct AccessibilityPipeline {
    config: PipelineConfig,
    pages: Arc<dyn PageSource>,
    recognizer: Arc<dyn RecognitionEngine>,
    narrator: Arc<dyn NarrationEngine>,
}

impl AccessibilityPipeline {
    /// Build the configured engines. Fails if any cannot be initialised.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let recognizer = build_engine(&config)?;
        let narrator = build_narrator(&config)?;
        let converter = Arc::new(SofficeConverter::new(config.soffice_path.clone()));
        info!(
            "Pipeline ready: recognition={}, narration={}",
            recognizer.name(),
            narrator.name()
        );
        Ok(Self::with_engines(config, recognizer, narrator, converter))
    }

    /// Assemble a pipeline from already-constructed engines.
    pub fn with_engines(
        config: PipelineConfig,
        recognizer: Arc<dyn RecognitionEngine>,
        narrator: Arc<dyn NarrationEngine>,
        converter: Arc<dyn DocumentConverter>,
    ) -> Self {
        let pages = Arc::new(PageNormalizer::from_config(&config, converter));
        Self {
            config,
            pages,
            recognizer,
            narrator,
        }
    }

    /// Replace the page source, e.g. with pre-rendered pages.
    pub fn with_page_source(mut self, pages: Arc<dyn PageSource>) -> Self {
        self.pages = pages;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Read `path` and process it. An unreadable file yields a failed result.
    pub async fn process_file(&self, path: impl AsRef<Path>, output_dir: &Path) -> PipelineResult {
        let path = path.as_ref();
        match DocumentInput::from_path(path).await {
            Ok(document) => self.process_document(document, output_dir).await,
            Err(e) => {
                let mut job = JobAccumulator::new(path.to_string_lossy());
                self.enter(&mut job, JobState::Loading);
                self.conclude(job, Err(PipelineError::Io(e)))
            }
        }
    }

    /// Run one job to completion. Always returns a result, never panics on
    /// stage failure, and always removes the job workspace first.
    pub async fn process_document(&self, document: DocumentInput, output_dir: &Path) -> PipelineResult {
        let mut job = JobAccumulator::new(document.name.clone());
        info!("Starting job: {}", document.name);

        let workspace = match JobWorkspace::create(self.config.work_dir.as_deref()) {
            Ok(ws) => ws,
            Err(e) => return self.conclude(job, Err(e)),
        };

        let outcome = self.run(&mut job, &document, &workspace, output_dir).await;
        workspace.cleanup();
        self.conclude(job, outcome)
    }

    async fn run(
        &self,
        job: &mut JobAccumulator,
        document: &DocumentInput,
        workspace: &JobWorkspace,
        output_dir: &Path,
    ) -> Result<(), PipelineError> {
        // ── LOADING ──────────────────────────────────────────────────────
        self.enter(job, JobState::Loading);
        let pages = self.pages.pages(document, workspace).await?;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_pages_ready(pages.len());
        }

        // ── EXTRACTING ───────────────────────────────────────────────────
        self.enter(job, JobState::Extracting);
        let extract_start = Instant::now();
        for outcome in self.extract(pages).await {
            job.record_page(outcome);
        }
        info!(
            "Extraction: {}/{} pages in {:?}",
            job.successful_pages,
            job.pages_processed,
            extract_start.elapsed()
        );

        let full_text = job.full_text();
        if full_text.trim().is_empty() {
            return Err(PipelineError::NoTextExtracted {
                total: job.pages_processed,
                failed: job.page_errors.len(),
            });
        }

        // ── SYNTHESIZING ─────────────────────────────────────────────────
        self.enter(job, JobState::Synthesizing);
        let narration = self.narrator.synthesize(&full_text).await?;
        info!(
            "Narration: {} segments, {:.2}s",
            narration.segments.len(),
            narration.duration_secs()
        );

        // ── PERSISTING ───────────────────────────────────────────────────
        self.enter(job, JobState::Persisting);
        self.persist(job, narration, &full_text, &document.base_name(), output_dir)
            .await
    }

    /// Recognise every page, bounded by `concurrency`, and return the
    /// outcomes in page order.
    async fn extract(&self, pages: Vec<PageImage>) -> Vec<PageOutcome> {
        let total = pages.len();
        let timeout_secs = self.config.recognition_timeout_secs;
        let timeout = Duration::from_secs(timeout_secs);

        let mut outcomes: Vec<PageOutcome> = stream::iter(pages.into_iter().map(|page| {
            let engine = Arc::clone(&self.recognizer);
            let progress = self.config.progress_callback.clone();
            async move {
                let page_num = page.page_num;
                if let Some(ref cb) = progress {
                    cb.on_page_start(page_num, total);
                }

                let outcome = match tokio::time::timeout(timeout, engine.recognize(&page)).await {
                    Ok(Ok(fragments)) => PageOutcome::from_fragments(page_num, fragments),
                    Ok(Err(e)) => PageOutcome::Failed(PageError::from_recognition(page_num, &e)),
                    Err(_) => PageOutcome::Failed(PageError::from_recognition(
                        page_num,
                        &RecognitionError::Timeout { secs: timeout_secs },
                    )),
                };

                match &outcome {
                    PageOutcome::Recognized { text, .. } => {
                        if let Some(ref cb) = progress {
                            cb.on_page_complete(page_num, total, text.chars().count());
                        }
                    }
                    PageOutcome::Empty { .. } => {
                        warn!("Page {}: no text recognised", page_num);
                        if let Some(ref cb) = progress {
                            cb.on_page_error(page_num, total, "no text recognised");
                        }
                    }
                    PageOutcome::Failed(e) => {
                        warn!("{}", e);
                        if let Some(ref cb) = progress {
                            cb.on_page_error(page_num, total, &e.to_string());
                        }
                    }
                }
                outcome
            }
        }))
        .buffer_unordered(self.config.concurrency.max(1))
        .collect()
        .await;

        outcomes.sort_by_key(PageOutcome::page);
        outcomes
    }

    /// Write the WAV and the JSON record. Audio written before a record
    /// failure stays on disk.
    async fn persist(
        &self,
        job: &mut JobAccumulator,
        narration: Narration,
        full_text: &str,
        base_name: &str,
        output_dir: &Path,
    ) -> Result<(), PipelineError> {
        let persist_err = |path: &Path, detail: String| PipelineError::Persist {
            path: path.to_path_buf(),
            detail,
        };

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| persist_err(output_dir, e.to_string()))?;

        let audio_path = output_dir.join(format!("{base_name}_audio.wav"));
        let duration = narration.duration_secs();
        let sample_rate = narration.audio.sample_rate;
        {
            let path = audio_path.clone();
            let pcm = narration.audio;
            tokio::task::spawn_blocking(move || crate::narration::audio::write_wav(&path, &pcm))
                .await
                .map_err(|e| PipelineError::Internal(format!("audio writer panicked: {e}")))?
                .map_err(|e| persist_err(&audio_path, e.to_string()))?;
        }
        info!("Audio written: {}", audio_path.display());

        job.segments = narration.segments;
        job.audio = Some(AudioArtifact {
            path: audio_path.clone(),
            duration_seconds: duration,
            sample_rate,
            language: narration.language,
            source_text_length: narration.source_text_length,
        });

        let record_path = output_dir.join(format!("{base_name}_results.json"));
        let json = {
            let errors = job.error_strings();
            let audio = job.audio.as_ref().ok_or_else(|| {
                PipelineError::Internal("audio artifact missing after write".into())
            })?;
            let record = ResultRecord {
                input_path: &job.input_path,
                output_audio: audio.path.display().to_string(),
                extracted_text: full_text,
                confidence: round_to(mean_confidence(&job.fragments), 3),
                processing_time: round_to(job.elapsed_secs(), 2),
                pages_processed: job.pages_processed,
                successful_pages: job.successful_pages,
                errors: &errors,
                ocr_engine: self.recognizer.name(),
                tts_engine: self.narrator.name(),
                audio_metadata: AudioMetadata {
                    duration: round_to(audio.duration_seconds, 3),
                    sample_rate: audio.sample_rate,
                    language: &audio.language,
                    text_length: audio.source_text_length,
                },
                segments: job
                    .segments
                    .iter()
                    .map(|s| SegmentRecord {
                        text: &s.text,
                        pacing: s.pacing,
                        start: round_to(s.start_secs, 3),
                        duration: round_to(s.duration_secs, 3),
                    })
                    .collect(),
                text_details: &job.fragments,
            };
            serde_json::to_string_pretty(&record)
                .map_err(|e| persist_err(&record_path, e.to_string()))?
        };
        tokio::fs::write(&record_path, json)
            .await
            .map_err(|e| persist_err(&record_path, e.to_string()))?;
        info!("Result record written: {}", record_path.display());

        job.result_record = Some(record_path);
        Ok(())
    }

    fn enter(&self, job: &mut JobAccumulator, state: JobState) {
        job.state = state;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage(state);
        }
    }

    /// Finalise the job. Called exactly once per job, after cleanup.
    fn conclude(&self, mut job: JobAccumulator, outcome: Result<(), PipelineError>) -> PipelineResult {
        let mut errors = job.error_strings();
        let processing_time_secs = job.elapsed_secs();

        let result = match outcome {
            Ok(()) => {
                self.enter(&mut job, JobState::Done);
                info!(
                    "Job done: {} ({}/{} pages, {:.2}s)",
                    job.input_path, job.successful_pages, job.pages_processed, processing_time_secs
                );
                PipelineResult {
                    extracted_text: job.full_text(),
                    confidence: mean_confidence(&job.fragments),
                    output_audio: job.audio.as_ref().map(|a| a.path.clone()),
                    input_path: job.input_path,
                    result_record: job.result_record,
                    processing_time_secs,
                    errors,
                    page_errors: job.page_errors,
                    fragments: job.fragments,
                    segments: job.segments,
                    pages_processed: job.pages_processed,
                    successful_pages: job.successful_pages,
                    audio: job.audio,
                    recognition_engine: self.recognizer.name().to_string(),
                    narration_engine: self.narrator.name().to_string(),
                    state: JobState::Done,
                    failed_during: None,
                }
            }
            Err(e) => {
                let failed_during = job.state;
                error!("Job failed during {}: {}", failed_during, e);
                errors.push(e.to_string());
                self.enter(&mut job, JobState::Failed);
                PipelineResult {
                    input_path: job.input_path,
                    output_audio: None,
                    result_record: None,
                    extracted_text: String::new(),
                    confidence: 0.0,
                    processing_time_secs,
                    errors,
                    page_errors: job.page_errors,
                    fragments: Vec::new(),
                    segments: Vec::new(),
                    pages_processed: job.pages_processed,
                    successful_pages: job.successful_pages,
                    audio: None,
                    recognition_engine: self.recognizer.name().to_string(),
                    narration_engine: self.narrator.name().to_string(),
                    state: JobState::Failed,
                    failed_during: Some(failed_during),
                }
            }
        };

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_job_complete(result.succeeded(), result.pages_processed, result.successful_pages);
        }
        result
    }
}
