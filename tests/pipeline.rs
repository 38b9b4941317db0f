//! End-to-end orchestrator tests with in-process engines.
//!
//! Pages come from a fake page source (or the real normaliser for raster
//! inputs), recognition is scripted per page, and narration runs through the
//! real `Narrator` over a speech service that answers with short WAV clips.

use async_trait::async_trait;
use edgequake_doc2speech::narration::audio::{wav_bytes, PcmAudio};
use edgequake_doc2speech::narration::gtts::{EncodedClip, SpeechService};
use edgequake_doc2speech::narration::Narrator;
use edgequake_doc2speech::pipeline::encode::{encode_page, PageImage};
use edgequake_doc2speech::pipeline::input::JobWorkspace;
use edgequake_doc2speech::pipeline::normalize::PageSource;
use edgequake_doc2speech::pipeline::office::DocumentConverter;
use edgequake_doc2speech::{
    AccessibilityPipeline, DocumentInput, JobProgressCallback, JobState, Pacing, PipelineConfig,
    PipelineError, RecognitionEngine, RecognitionError, SynthesisError, TextFragment,
};
use image::{GrayImage, Luma, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const RATE: u32 = 16_000;

// ── Fakes ────────────────────────────────────────────────────────────────────

type PageScript = Result<Vec<TextFragment>, RecognitionError>;

/// Answers each page from a script; pages missing from it fail.
#[derive(Default)]
struct ScriptedRecognizer {
    script: HashMap<usize, PageScript>,
    delays_ms: HashMap<usize, u64>,
    calls: AtomicUsize,
}

impl ScriptedRecognizer {
    fn page(mut self, page: usize, texts: &[(&str, f32)]) -> Self {
        let fragments = texts
            .iter()
            .map(|(t, c)| TextFragment::new(*t, "en").with_confidence(*c))
            .collect();
        self.script.insert(page, Ok(fragments));
        self
    }

    fn failing(mut self, page: usize) -> Self {
        self.script.insert(
            page,
            Err(RecognitionError::Service {
                status: 500,
                body: "model overloaded".into(),
            }),
        );
        self
    }

    fn delayed(mut self, page: usize, ms: u64) -> Self {
        self.delays_ms.insert(page, ms);
        self
    }
}

#[async_trait]
impl RecognitionEngine for ScriptedRecognizer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn recognize(&self, page: &PageImage) -> Result<Vec<TextFragment>, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ms) = self.delays_ms.get(&page.page_num) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        self.script
            .get(&page.page_num)
            .cloned()
            .unwrap_or_else(|| Err(RecognitionError::InvalidResponse("unscripted page".into())))
    }
}

/// Returns 0.2 s of WAV for every line.
#[derive(Default)]
struct ToneSpeech {
    lines: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl SpeechService for ToneSpeech {
    fn name(&self) -> &str {
        "tone"
    }

    async fn speak(&self, text: &str, _language: &str, _slow: bool) -> Result<EncodedClip, SynthesisError> {
        if self.fail {
            return Err(SynthesisError::Service {
                status: 503,
                body: "unavailable".into(),
            });
        }
        self.lines.lock().unwrap().push(text.to_string());
        let pcm = PcmAudio {
            samples: vec![0.1; RATE as usize / 5],
            sample_rate: RATE,
        };
        Ok(EncodedClip {
            parts: vec![wav_bytes(&pcm).unwrap()],
        })
    }
}

/// Hands out `count` blank pages.
struct BlankPages {
    count: usize,
}

#[async_trait]
impl PageSource for BlankPages {
    async fn pages(
        &self,
        _document: &DocumentInput,
        _workspace: &JobWorkspace,
    ) -> Result<Vec<PageImage>, PipelineError> {
        (1..=self.count)
            .map(|n| {
                encode_page(n, &GrayImage::from_pixel(8, 8, Luma([255]))).map_err(|e| {
                    PipelineError::Image {
                        page: n,
                        detail: e.to_string(),
                    }
                })
            })
            .collect()
    }
}

struct NoConverter;

#[async_trait]
impl DocumentConverter for NoConverter {
    async fn convert(&self, input: &Path, _out_dir: &Path) -> Result<PathBuf, PipelineError> {
        Err(PipelineError::Conversion {
            path: input.to_path_buf(),
            detail: "no converter in tests".into(),
        })
    }
}

#[derive(Default)]
struct RecordingProgress {
    stages: Mutex<Vec<JobState>>,
    page_errors: AtomicUsize,
    completions: Mutex<Vec<(bool, usize, usize)>>,
}

impl JobProgressCallback for RecordingProgress {
    fn on_stage(&self, state: JobState) {
        self.stages.lock().unwrap().push(state);
    }

    fn on_page_error(&self, _page: usize, _total: usize, _error: &str) {
        self.page_errors.fetch_add(1, Ordering::SeqCst);
    }

    fn on_job_complete(&self, succeeded: bool, total: usize, successful: usize) {
        self.completions.lock().unwrap().push((succeeded, total, successful));
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    work: TempDir,
    out: TempDir,
    speech: Arc<ToneSpeech>,
}

impl Harness {
    fn new() -> Self {
        Self {
            work: tempfile::tempdir().unwrap(),
            out: tempfile::tempdir().unwrap(),
            speech: Arc::new(ToneSpeech::default()),
        }
    }

    fn config(&self) -> edgequake_doc2speech::PipelineConfigBuilder {
        PipelineConfig::builder()
            .language("en")
            .sample_rate(RATE)
            .work_dir(self.work.path())
    }

    fn pipeline(&self, config: PipelineConfig, recognizer: ScriptedRecognizer) -> AccessibilityPipeline {
        let narrator = Narrator::from_config(&config, self.speech.clone());
        AccessibilityPipeline::with_engines(
            config,
            Arc::new(recognizer),
            Arc::new(narrator),
            Arc::new(NoConverter),
        )
    }

    fn paged(&self, config: PipelineConfig, recognizer: ScriptedRecognizer, pages: usize) -> AccessibilityPipeline {
        self.pipeline(config, recognizer)
            .with_page_source(Arc::new(BlankPages { count: pages }))
    }

    fn work_dir_is_empty(&self) -> bool {
        std::fs::read_dir(self.work.path()).unwrap().next().is_none()
    }
}

fn pdf(name: &str) -> DocumentInput {
    DocumentInput::new(name, b"%PDF-1.7 fake".to_vec())
}

fn png_bytes() -> Vec<u8> {
    let img = RgbImage::from_pixel(32, 24, Rgb([245, 245, 245]));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn one_failed_page_does_not_fail_the_job() {
    let h = Harness::new();
    let recognizer = ScriptedRecognizer::default()
        .page(1, &[("page one", 0.9)])
        .failing(2)
        .page(3, &[("page three", 0.8)]);
    let pipeline = h.paged(h.config().build().unwrap(), recognizer, 3);

    let result = pipeline.process_document(pdf("report.pdf"), h.out.path()).await;

    assert!(result.succeeded(), "errors: {:?}", result.errors);
    assert_eq!(result.extracted_text, "page one page three");
    assert_eq!(result.pages_processed, 3);
    assert_eq!(result.successful_pages, 2);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("page 2"), "{}", result.errors[0]);
    assert!(h.work_dir_is_empty());

    let audio = result.output_audio.as_ref().expect("audio path");
    assert_eq!(audio, &h.out.path().join("report_audio.wav"));
    assert!(audio.exists());

    let record_path = h.out.path().join("report_results.json");
    assert_eq!(result.result_record.as_ref(), Some(&record_path));
    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&record_path).unwrap()).unwrap();
    assert_eq!(record["extracted_text"], "page one page three");
    assert_eq!(record["pages_processed"], 3);
    assert_eq!(record["successful_pages"], 2);
    assert_eq!(record["errors"].as_array().unwrap().len(), 1);
    assert_eq!(record["ocr_engine"], "scripted");
    assert_eq!(record["tts_engine"], "tone");
    assert_eq!(record["audio_metadata"]["sample_rate"], RATE);
    assert_eq!(record["text_details"].as_array().unwrap().len(), 2);
    assert_eq!(record["confidence"], 0.85);
}

#[tokio::test]
async fn all_pages_failing_is_no_text_extracted() {
    let h = Harness::new();
    let recognizer = ScriptedRecognizer::default().failing(1).failing(2);
    let pipeline = h.paged(h.config().build().unwrap(), recognizer, 2);

    let result = pipeline.process_document(pdf("blank.pdf"), h.out.path()).await;

    assert!(!result.succeeded());
    assert_eq!(result.state, JobState::Failed);
    assert_eq!(result.failed_during, Some(JobState::Extracting));
    assert!(result.extracted_text.is_empty());
    assert_eq!(result.confidence, 0.0);
    assert!(result.output_audio.is_none());
    assert!(result.fragments.is_empty());
    assert_eq!(result.errors.len(), 3);
    assert!(result.errors[2].contains("No text was extracted"), "{:?}", result.errors);
    assert!(h.work_dir_is_empty());
    assert!(!h.out.path().join("blank_audio.wav").exists());
}

#[tokio::test]
async fn empty_page_is_recorded_and_not_counted() {
    let h = Harness::new();
    let recognizer = ScriptedRecognizer::default()
        .page(1, &[("first", 0.9)])
        .page(2, &[]);
    let pipeline = h.paged(h.config().build().unwrap(), recognizer, 2);

    let result = pipeline.process_document(pdf("doc.pdf"), h.out.path()).await;

    assert!(result.succeeded());
    assert_eq!(result.successful_pages, 1);
    assert_eq!(result.errors, vec!["No text recognised on page 2".to_string()]);
}

#[tokio::test]
async fn confidence_is_mean_over_all_fragments() {
    let h = Harness::new();
    let recognizer = ScriptedRecognizer::default()
        .page(1, &[("a", 0.5), ("b", 1.0)])
        .page(2, &[("c", 0.75)]);
    let pipeline = h.paged(h.config().build().unwrap(), recognizer, 2);

    let result = pipeline.process_document(pdf("doc.pdf"), h.out.path()).await;

    assert!((result.confidence - 0.75).abs() < 1e-9);
    assert_eq!(result.extracted_text, "a b c");
    assert_eq!(result.fragments.len(), 3);
}

#[tokio::test]
async fn concurrent_pages_keep_document_order() {
    let h = Harness::new();
    let recognizer = ScriptedRecognizer::default()
        .page(1, &[("one", 1.0)])
        .page(2, &[("two", 1.0)])
        .page(3, &[("three", 1.0)])
        .delayed(1, 150)
        .delayed(2, 75);
    let config = h.config().concurrency(3).build().unwrap();
    let pipeline = h.paged(config, recognizer, 3);

    let result = pipeline.process_document(pdf("doc.pdf"), h.out.path()).await;

    assert_eq!(result.extracted_text, "one two three");
}

#[tokio::test]
async fn slow_page_times_out_and_is_skipped() {
    let h = Harness::new();
    let recognizer = ScriptedRecognizer::default()
        .page(1, &[("kept", 1.0)])
        .page(2, &[("never seen", 1.0)])
        .delayed(2, 3_000);
    let config = h.config().recognition_timeout_secs(1).build().unwrap();
    let pipeline = h.paged(config, recognizer, 2);

    let result = pipeline.process_document(pdf("doc.pdf"), h.out.path()).await;

    assert!(result.succeeded());
    assert_eq!(result.extracted_text, "kept");
    assert!(result.errors[0].contains("timed out"), "{:?}", result.errors);
}

#[tokio::test]
async fn headings_become_emphasised_segments() {
    let h = Harness::new();
    let recognizer = ScriptedRecognizer::default().page(1, &[("# Chapter One\nIt begins.", 0.0)]);
    let pipeline = h.paged(h.config().build().unwrap(), recognizer, 1);

    let result = pipeline.process_document(pdf("book.pdf"), h.out.path()).await;

    assert!(result.succeeded());
    assert_eq!(result.segments.len(), 2);
    assert_eq!(result.segments[0].text, "CHAPTER ONE");
    assert_eq!(result.segments[0].pacing, Pacing::EmphasizedSlow);
    assert_eq!(result.segments[1].pacing, Pacing::Normal);
    // 2 × 0.2 s + one 0.6 s gap
    let audio = result.audio.as_ref().unwrap();
    assert!((audio.duration_seconds - 1.0).abs() < 1e-3, "{}", audio.duration_seconds);
    assert_eq!(*h.speech.lines.lock().unwrap(), vec!["CHAPTER ONE", "It begins."]);
}

#[tokio::test]
async fn raster_input_is_a_single_page_job() {
    let h = Harness::new();
    let recognizer = ScriptedRecognizer::default().page(1, &[("scanned words", 0.95)]);
    let pipeline = h.pipeline(h.config().build().unwrap(), recognizer);

    let result = pipeline
        .process_document(DocumentInput::new("scan.png", png_bytes()), h.out.path())
        .await;

    assert!(result.succeeded(), "errors: {:?}", result.errors);
    assert_eq!(result.pages_processed, 1);
    assert_eq!(result.extracted_text, "scanned words");
    assert!(h.out.path().join("scan_audio.wav").exists());
    assert!(h.work_dir_is_empty());
}

#[tokio::test]
async fn unsupported_format_fails_while_loading() {
    let h = Harness::new();
    let recognizer = ScriptedRecognizer::default();
    let pipeline = h.pipeline(h.config().build().unwrap(), recognizer);

    let result = pipeline
        .process_document(DocumentInput::new("notes.xyz", b"hello".to_vec()), h.out.path())
        .await;

    assert!(!result.succeeded());
    assert_eq!(result.failed_during, Some(JobState::Loading));
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("xyz"));
    assert!(h.work_dir_is_empty());
}

#[tokio::test]
async fn narration_failure_fails_the_job_and_cleans_up() {
    let h = Harness {
        speech: Arc::new(ToneSpeech {
            fail: true,
            ..Default::default()
        }),
        ..Harness::new()
    };
    let recognizer = ScriptedRecognizer::default().page(1, &[("text", 1.0)]);
    let pipeline = h.paged(h.config().build().unwrap(), recognizer, 1);

    let result = pipeline.process_document(pdf("doc.pdf"), h.out.path()).await;

    assert!(!result.succeeded());
    assert_eq!(result.failed_during, Some(JobState::Synthesizing));
    assert!(result.errors[0].contains("Speech synthesis failed"));
    assert_eq!(result.pages_processed, 1);
    assert!(h.work_dir_is_empty());
}

#[tokio::test]
async fn record_write_failure_keeps_audio_and_fails() {
    let h = Harness::new();
    // A directory squatting on the record path makes the final write fail.
    std::fs::create_dir(h.out.path().join("doc_results.json")).unwrap();
    let recognizer = ScriptedRecognizer::default().page(1, &[("text", 1.0)]);
    let pipeline = h.paged(h.config().build().unwrap(), recognizer, 1);

    let result = pipeline.process_document(pdf("doc.pdf"), h.out.path()).await;

    assert!(!result.succeeded());
    assert_eq!(result.state, JobState::Failed);
    assert_eq!(result.failed_during, Some(JobState::Persisting));
    assert!(result.errors[0].contains("doc_results.json"), "{:?}", result.errors);
    assert!(result.output_audio.is_none());
    assert!(result.result_record.is_none());
    assert!(h.out.path().join("doc_audio.wav").exists());
    assert!(h.work_dir_is_empty());
}

#[tokio::test]
async fn progress_reports_each_stage_and_one_completion() {
    let h = Harness::new();
    let progress = Arc::new(RecordingProgress::default());
    let config = h
        .config()
        .progress_callback(progress.clone())
        .build()
        .unwrap();
    let recognizer = ScriptedRecognizer::default()
        .page(1, &[("hello", 1.0)])
        .failing(2);
    let pipeline = h.paged(config, recognizer, 2);

    let result = pipeline.process_document(pdf("doc.pdf"), h.out.path()).await;

    assert!(result.succeeded());
    assert_eq!(
        *progress.stages.lock().unwrap(),
        vec![
            JobState::Loading,
            JobState::Extracting,
            JobState::Synthesizing,
            JobState::Persisting,
            JobState::Done,
        ]
    );
    assert_eq!(progress.page_errors.load(Ordering::SeqCst), 1);
    assert_eq!(*progress.completions.lock().unwrap(), vec![(true, 2, 1)]);
}

#[tokio::test]
async fn unreadable_file_is_a_failed_result() {
    let h = Harness::new();
    let pipeline = h.pipeline(h.config().build().unwrap(), ScriptedRecognizer::default());

    let result = pipeline
        .process_file(h.work.path().join("missing.pdf"), h.out.path())
        .await;

    assert!(!result.succeeded());
    assert_eq!(result.failed_during, Some(JobState::Loading));
    assert!(result.errors[0].starts_with("I/O error"));
}
