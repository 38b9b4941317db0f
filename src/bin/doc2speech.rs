//! CLI binary for edgequake-doc2speech.
//!
//! A thin shim over the library crate that layers CLI flags over an optional
//! TOML config, runs one job and prints the outcome.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_doc2speech::{
    AccessibilityPipeline, JobProgressCallback, JobState, PipelineConfig, PipelineResult,
    ProgressCallback, RecognitionBackend, RemoteService,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while the document is normalised, then a page bar during
/// recognition, then a spinner again for narration and persistence.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(Self::spinner_style());
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER)
    }

    fn page_elapsed(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_stage(&self, state: JobState) {
        let (prefix, msg) = match state {
            JobState::Loading => ("Loading", "normalising document…"),
            JobState::Extracting => ("Recognising", ""),
            JobState::Synthesizing => ("Narrating", "synthesising speech…"),
            JobState::Persisting => ("Writing", "audio and result record…"),
            _ => return,
        };
        if state == JobState::Synthesizing {
            self.bar.set_style(Self::spinner_style());
        }
        self.bar.set_prefix(prefix);
        self.bar.set_message(msg);
    }

    fn on_pages_ready(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_pages} page(s) ready for recognition"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
    }

    fn on_page_complete(&self, page_num: usize, total: usize, chars: usize) {
        let secs = self.page_elapsed(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{chars:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.page_elapsed(page_num);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_job_complete(&self, _succeeded: bool, _total: usize, _successful: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Arabic scan, remote OCR via Mistral (default)
  doc2speech scan.pdf -o out/

  # English office document, slower speech
  doc2speech --language en --slow report.docx -o out/

  # On-device recognition (build with --features local)
  doc2speech --ocr local --confidence-threshold 0.8 page.png -o out/

  # Vision LLM instead of Mistral OCR
  doc2speech --remote-service vision notes.jpg -o out/

  # Settings from a file, JSON result on stdout
  doc2speech --config doc2speech.toml --json scan.pdf -o out/

OUTPUTS:
  <out>/<name>_audio.wav      mono 16-bit PCM narration
  <out>/<name>_results.json   transcript, confidence, segments, errors

ENVIRONMENT VARIABLES:
  MISTRAL_API_KEY         Mistral OCR API key
  OPENAI_API_KEY          Used by the vision service when no provider is set
  EDGEQUAKE_LLM_PROVIDER  Vision LLM provider override
  EDGEQUAKE_MODEL         Vision LLM model override
  RUST_LOG                Log filter (overrides --verbose/--quiet)
"#;

/// Turn documents into narrated audio plus a structured transcript.
#[derive(Parser, Debug)]
#[command(
    name = "doc2speech",
    version,
    about = "Turn scanned images, PDFs and office documents into narrated audio",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input document: pdf, docx, doc, odt, rtf, png, jpg, jpeg.
    input: PathBuf,

    /// Directory for the audio file and the result record.
    #[arg(short, long, env = "DOC2SPEECH_OUTPUT", default_value = ".")]
    output: PathBuf,

    /// TOML configuration file; flags override its values.
    #[arg(long, env = "DOC2SPEECH_CONFIG")]
    config: Option<PathBuf>,

    /// Recognition engine: local or remote.
    #[arg(long, env = "DOC2SPEECH_OCR", value_enum)]
    ocr: Option<OcrArg>,

    /// Remote recognition service: mistral or vision.
    #[arg(long, env = "DOC2SPEECH_REMOTE_SERVICE", value_enum)]
    remote_service: Option<RemoteArg>,

    /// Language tag for recognition and speech (e.g. ar, en, fa).
    #[arg(short, long, env = "DOC2SPEECH_LANGUAGE")]
    language: Option<String>,

    /// Minimum confidence for locally recognised fragments (0.0–1.0).
    #[arg(long, env = "DOC2SPEECH_CONFIDENCE_THRESHOLD")]
    confidence_threshold: Option<f32>,

    /// Speak body text slowly (headings are always slow).
    #[arg(long, env = "DOC2SPEECH_SLOW")]
    slow: bool,

    /// Output sample rate in Hz.
    #[arg(long, env = "DOC2SPEECH_SAMPLE_RATE")]
    sample_rate: Option<u32>,

    /// Pages recognised concurrently.
    #[arg(short, long, env = "DOC2SPEECH_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Print the full result as JSON on stdout.
    #[arg(long, env = "DOC2SPEECH_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOC2SPEECH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOC2SPEECH_QUIET", conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OcrArg {
    Local,
    Remote,
}

impl From<OcrArg> for RecognitionBackend {
    fn from(v: OcrArg) -> Self {
        match v {
            OcrArg::Local => RecognitionBackend::Local,
            OcrArg::Remote => RecognitionBackend::Remote,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RemoteArg {
    Mistral,
    Vision,
}

impl From<RemoteArg> for RemoteService {
    fn from(v: RemoteArg) -> Self {
        match v {
            RemoteArg::Mistral => RemoteService::Mistral,
            RemoteArg::Vision => RemoteService::Vision,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress && !cli.verbose {
        Some(CliProgressCallback::new() as Arc<dyn JobProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;
    let pipeline = AccessibilityPipeline::new(config).context("Failed to initialise engines")?;

    let result = pipeline.process_file(&cli.input, &cli.output).await;

    if cli.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&result);
    }

    Ok(if result.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Layer CLI flags over the TOML file (or the defaults).
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let base = match cli.config {
        Some(ref path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let mut builder = base.into_builder();
    if let Some(ocr) = cli.ocr {
        builder = builder.recognition(ocr.into());
    }
    if let Some(service) = cli.remote_service {
        builder = builder.remote_service(service.into());
    }
    if let Some(ref lang) = cli.language {
        builder = builder.language(lang.clone());
    }
    if let Some(t) = cli.confidence_threshold {
        builder = builder.confidence_threshold(t);
    }
    if cli.slow {
        builder = builder.slow_speech(true);
    }
    if let Some(hz) = cli.sample_rate {
        builder = builder.sample_rate(hz);
    }
    if let Some(n) = cli.concurrency {
        builder = builder.concurrency(n);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(result: &PipelineResult) {
    if result.succeeded() {
        eprintln!(
            "{}  {}/{} pages  confidence {:.3}  {:.2}s",
            if result.page_errors.is_empty() {
                green("✔")
            } else {
                cyan("⚠")
            },
            result.successful_pages,
            result.pages_processed,
            result.confidence,
            result.processing_time_secs,
        );
        if let Some(ref audio) = result.audio {
            eprintln!(
                "   {}  {}",
                bold(&audio.path.display().to_string()),
                dim(&format!(
                    "{:.1}s @ {} Hz, {} segment(s)",
                    audio.duration_seconds,
                    audio.sample_rate,
                    result.segments.len()
                )),
            );
        }
        if let Some(ref record) = result.result_record {
            eprintln!("   {}", bold(&record.display().to_string()));
        }
    } else {
        let stage = result
            .failed_during
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".into());
        eprintln!("{}  job failed during {}", red("✘"), bold(&stage));
    }
    for e in &result.errors {
        eprintln!("   {} {}", red("•"), e);
    }
}
