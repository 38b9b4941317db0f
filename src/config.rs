//! Configuration types for document-to-speech jobs.
//!
//! All job behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`] or loaded from a TOML file. Keeping every knob in
//! one struct makes it trivial to share configs across jobs, log them, and
//! diff two runs to understand why their outputs differ.
//!
//! The configuration is read once at process start. The core only consumes
//! the derived values (engine variant, language, threshold, pacing, sample
//! rate, timeouts); it never re-reads the source.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Upper bound on transient-error retries per page.
pub const MAX_RETRIES: u32 = 10;

/// Which recognition engine variant a job uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionBackend {
    /// On-device detection + recognition with per-region confidence.
    Local,
    /// One remote call per page returning a markdown block. (default)
    #[default]
    Remote,
}

impl RecognitionBackend {
    /// Identifier persisted in the result record.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Which remote service backs the [`RecognitionBackend::Remote`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteService {
    /// Mistral's document OCR endpoint. (default)
    #[default]
    Mistral,
    /// A vision LLM prompted to transcribe the page as Markdown.
    Vision,
}

/// Configuration for a document-to-speech job.
///
/// # Example
/// ```rust
/// use edgequake_doc2speech::{PipelineConfig, RecognitionBackend};
///
/// let config = PipelineConfig::builder()
///     .recognition(RecognitionBackend::Remote)
///     .language("en")
///     .confidence_threshold(0.8)
///     .build()
///     .unwrap();
/// assert_eq!(config.language, "en");
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Recognition engine variant. Default: remote.
    pub recognition: RecognitionBackend,

    /// Service used by the remote variant. Default: mistral.
    pub remote_service: RemoteService,

    /// Language tag for recognition and speech (e.g. "ar", "en"). Default: "ar".
    pub language: String,

    /// Minimum detector confidence a local fragment needs to be kept.
    /// Inclusive: a fragment exactly at the threshold is retained. Default: 0.7.
    pub confidence_threshold: f32,

    /// Slow flag used for non-heading lines. Headings are always slow. Default: false.
    pub slow_speech: bool,

    /// Sample rate of the narrated audio in Hz. Default: 22050.
    pub sample_rate: u32,

    /// Scale factor applied when rasterising paged documents. Default: 2.0.
    pub render_scale: f32,

    /// Pages recognised concurrently. 1 means strictly sequential. Default: 1.
    pub concurrency: usize,

    /// Per-page recognition timeout in seconds. Default: 120.
    pub recognition_timeout_secs: u64,

    /// Per-line speech call timeout in seconds. Default: 30.
    pub synthesis_timeout_secs: u64,

    /// Retries for transient remote failures. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Root under which each job creates its own temporary namespace.
    /// Default: the OS temp dir.
    pub work_dir: Option<PathBuf>,

    /// Directory containing the pdfium shared library. Default: system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// LibreOffice executable used for office documents. Default: "soffice".
    pub soffice_path: PathBuf,

    /// Directory with `det.onnx`, `rec.onnx` and `dict.txt` for the local variant.
    pub local_model_dir: Option<PathBuf>,

    /// Mistral API key. Falls back to `MISTRAL_API_KEY`.
    pub mistral_api_key: Option<String>,

    /// Mistral OCR model. Default: "mistral-ocr-latest".
    pub mistral_model: String,

    /// Mistral API base URL. Default: "https://api.mistral.ai".
    pub mistral_base_url: String,

    /// LLM provider name for the vision service (e.g. "openai"). None = auto-detect.
    pub vision_provider: Option<String>,

    /// LLM model for the vision service. Default: "gpt-4.1-nano".
    pub vision_model: String,

    /// Base URL of the Google Translate TTS endpoint.
    /// Default: "https://translate.google.com".
    pub tts_base_url: String,

    /// Progress events sink. Not part of the file format.
    #[serde(skip)]
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recognition: RecognitionBackend::default(),
            remote_service: RemoteService::default(),
            language: "ar".to_string(),
            confidence_threshold: 0.7,
            slow_speech: false,
            sample_rate: 22_050,
            render_scale: 2.0,
            concurrency: 1,
            recognition_timeout_secs: 120,
            synthesis_timeout_secs: 30,
            max_retries: 2,
            retry_backoff_ms: 500,
            work_dir: None,
            pdfium_lib_path: None,
            soffice_path: PathBuf::from("soffice"),
            local_model_dir: None,
            mistral_api_key: None,
            mistral_model: "mistral-ocr-latest".to_string(),
            mistral_base_url: "https://api.mistral.ai".to_string(),
            vision_provider: None,
            vision_model: "gpt-4.1-nano".to_string(),
            tts_base_url: "https://translate.google.com".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("recognition", &self.recognition)
            .field("remote_service", &self.remote_service)
            .field("language", &self.language)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("slow_speech", &self.slow_speech)
            .field("sample_rate", &self.sample_rate)
            .field("render_scale", &self.render_scale)
            .field("concurrency", &self.concurrency)
            .field("recognition_timeout_secs", &self.recognition_timeout_secs)
            .field("synthesis_timeout_secs", &self.synthesis_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("work_dir", &self.work_dir)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("soffice_path", &self.soffice_path)
            .field("local_model_dir", &self.local_model_dir)
            .field(
                "mistral_api_key",
                &self.mistral_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("mistral_model", &self.mistral_model)
            .field("mistral_base_url", &self.mistral_base_url)
            .field("vision_provider", &self.vision_provider)
            .field("vision_model", &self.vision_model)
            .field("tts_base_url", &self.tts_base_url)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, PipelineError> {
        let config: Self =
            toml::from_str(s).map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidConfig(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Continue building from this configuration, e.g. to layer CLI flags
    /// over a loaded TOML file.
    pub fn into_builder(self) -> PipelineConfigBuilder {
        PipelineConfigBuilder { config: self }
    }

    /// Mistral API key from the config, else from `MISTRAL_API_KEY`.
    pub fn resolved_mistral_key(&self) -> Option<String> {
        self.mistral_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("MISTRAL_API_KEY").ok().filter(|k| !k.is_empty()))
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(PipelineError::InvalidConfig(format!(
                "confidence threshold must be within 0–1, got {}",
                self.confidence_threshold
            )));
        }
        if self.sample_rate < 8_000 || self.sample_rate > 192_000 {
            return Err(PipelineError::InvalidConfig(format!(
                "sample rate must be 8000–192000 Hz, got {}",
                self.sample_rate
            )));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if !(self.render_scale > 0.0 && self.render_scale <= 8.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "render scale must be within (0, 8], got {}",
                self.render_scale
            )));
        }
        if self.language.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("language must not be empty".into()));
        }
        if self.max_retries > MAX_RETRIES {
            return Err(PipelineError::InvalidConfig(format!(
                "max retries must be at most {MAX_RETRIES}, got {}",
                self.max_retries
            )));
        }
        Ok(())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn recognition(mut self, backend: RecognitionBackend) -> Self {
        self.config.recognition = backend;
        self
    }

    pub fn remote_service(mut self, service: RemoteService) -> Self {
        self.config.remote_service = service;
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    pub fn confidence_threshold(mut self, t: f32) -> Self {
        self.config.confidence_threshold = t;
        self
    }

    pub fn slow_speech(mut self, v: bool) -> Self {
        self.config.slow_speech = v;
        self
    }

    pub fn sample_rate(mut self, hz: u32) -> Self {
        self.config.sample_rate = hz;
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn recognition_timeout_secs(mut self, secs: u64) -> Self {
        self.config.recognition_timeout_secs = secs;
        self
    }

    pub fn synthesis_timeout_secs(mut self, secs: u64) -> Self {
        self.config.synthesis_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }

    pub fn pdfium_lib_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(dir.into());
        self
    }

    pub fn soffice_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.soffice_path = path.into();
        self
    }

    pub fn local_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.local_model_dir = Some(dir.into());
        self
    }

    pub fn mistral_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.mistral_api_key = Some(key.into());
        self
    }

    pub fn mistral_model(mut self, model: impl Into<String>) -> Self {
        self.config.mistral_model = model.into();
        self
    }

    pub fn mistral_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.mistral_base_url = url.into();
        self
    }

    pub fn vision_provider(mut self, name: impl Into<String>) -> Self {
        self.config.vision_provider = Some(name.into());
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_model = model.into();
        self
    }

    pub fn tts_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.tts_base_url = url.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.language, "ar");
        assert_eq!(c.confidence_threshold, 0.7);
        assert_eq!(c.sample_rate, 22_050);
        assert_eq!(c.render_scale, 2.0);
        assert_eq!(c.concurrency, 1);
        assert!(!c.slow_speech);
        assert_eq!(c.recognition, RecognitionBackend::Remote);
    }

    #[test]
    fn builder_rejects_out_of_range_threshold() {
        let err = PipelineConfig::builder()
            .confidence_threshold(1.5)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("confidence threshold"));
    }

    #[test]
    fn builder_rejects_excessive_retries() {
        let err = PipelineConfig::builder().max_retries(100).build().unwrap_err();
        assert!(err.to_string().contains("max retries"));
        assert!(PipelineConfig::builder().max_retries(10).build().is_ok());
    }

    #[test]
    fn builder_clamps_concurrency() {
        let c = PipelineConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn toml_overrides_only_given_keys() {
        let c = PipelineConfig::from_toml_str(
            r#"
recognition = "local"
language = "en"
confidence_threshold = 0.5
local_model_dir = "/models"
"#,
        )
        .unwrap();
        assert_eq!(c.recognition, RecognitionBackend::Local);
        assert_eq!(c.language, "en");
        assert_eq!(c.confidence_threshold, 0.5);
        assert_eq!(c.local_model_dir, Some(PathBuf::from("/models")));
        assert_eq!(c.sample_rate, 22_050);
        assert_eq!(c.remote_service, RemoteService::Mistral);
    }

    #[test]
    fn builder_layers_over_loaded_config() {
        let base = PipelineConfig::from_toml_str("language = \"fa\"\nsample_rate = 16000").unwrap();
        let c = base.into_builder().slow_speech(true).build().unwrap();
        assert_eq!(c.language, "fa");
        assert_eq!(c.sample_rate, 16_000);
        assert!(c.slow_speech);
    }

    #[test]
    fn toml_with_bad_sample_rate_is_rejected() {
        let err = PipelineConfig::from_toml_str("sample_rate = 100").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = PipelineConfig::builder()
            .mistral_api_key("secret-key")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret-key"));
        assert!(dbg.contains("<redacted>"));
    }
}
