//! On-device recognition: detection + recognition per page, with per-region
//! confidence and position.
//!
//! The inference library sits behind [`TextRegionReader`]. Everything the
//! pipeline decides on top of it (confidence filtering, box collapse, the
//! right-to-left compensation) lives in [`LocalRecognizer`] and is tested
//! without model files.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, RecognitionError};
use crate::output::{BoundingBox, TextFragment};
use crate::pipeline::encode::PageImage;
use crate::recognition::RecognitionEngine;
use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, instrument};

/// One detected text region as reported by the inference library.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRegion {
    pub text: String,
    pub confidence: f32,
    /// Four corners, clockwise from top-left.
    pub quad: [(f32, f32); 4],
}

/// Detection + recognition over a decoded page. Blocking.
pub trait TextRegionReader: Send + Sync {
    fn read_regions(&self, image: &DynamicImage) -> Result<Vec<RawRegion>, RecognitionError>;
}

/// Language tags whose local recogniser output comes out in reverse order.
const RTL_LANGUAGES: &[&str] = &["ar", "fa", "ur"];

/// Whether `language` (e.g. `ar`, `ar-EG`) is a right-to-left script tag.
pub fn is_rtl(language: &str) -> bool {
    let primary = language
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    RTL_LANGUAGES.contains(&primary.as_str())
}

/// The local [`RecognitionEngine`] variant.
pub struct LocalRecognizer {
    reader: Arc<dyn TextRegionReader>,
    language: String,
    threshold: f32,
}

impl LocalRecognizer {
    pub fn new(reader: Arc<dyn TextRegionReader>, language: impl Into<String>, threshold: f32) -> Self {
        Self {
            reader,
            language: language.into(),
            threshold,
        }
    }

    /// Load the on-device models from `config.local_model_dir`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let reader = load_reader(config)?;
        Ok(Self::new(
            reader,
            config.language.clone(),
            config.confidence_threshold,
        ))
    }

    /// Filter, collapse and orient raw regions into fragments.
    ///
    /// The threshold is inclusive: a region scoring exactly the threshold
    /// is kept.
    fn to_fragments(&self, regions: Vec<RawRegion>) -> Vec<TextFragment> {
        let reverse = is_rtl(&self.language);
        let total = regions.len();

        let fragments: Vec<TextFragment> = regions
            .into_iter()
            .filter(|r| r.confidence >= self.threshold)
            .map(|r| {
                // The recogniser emits RTL scripts in visual (left-to-right) order.
                let text = if reverse {
                    r.text.chars().rev().collect()
                } else {
                    r.text
                };
                TextFragment::new(text, self.language.clone())
                    .with_confidence(r.confidence)
                    .with_bbox(BoundingBox::from_quad(&r.quad))
            })
            .collect();

        debug!(
            "Kept {}/{} regions at threshold {}",
            fragments.len(),
            total,
            self.threshold
        );
        fragments
    }
}

#[async_trait]
impl RecognitionEngine for LocalRecognizer {
    fn name(&self) -> &str {
        "local"
    }

    #[instrument(skip_all, fields(page = page.page_num))]
    async fn recognize(&self, page: &PageImage) -> Result<Vec<TextFragment>, RecognitionError> {
        let reader = Arc::clone(&self.reader);
        let page = page.clone();

        let regions = tokio::task::spawn_blocking(move || {
            let image = page
                .decode()
                .map_err(|e| RecognitionError::Decode(e.to_string()))?;
            reader.read_regions(&image)
        })
        .await
        .map_err(|e| RecognitionError::Library(format!("inference task panicked: {e}")))??;

        Ok(self.to_fragments(regions))
    }
}

#[cfg(feature = "local")]
fn load_reader(config: &PipelineConfig) -> Result<Arc<dyn TextRegionReader>, PipelineError> {
    let dir = config
        .local_model_dir
        .as_deref()
        .ok_or_else(|| PipelineError::EngineInit {
            engine: "local".into(),
            detail: "local_model_dir is not set".into(),
        })?;
    Ok(Arc::new(onnx::PureOnnxReader::from_dir(dir)?))
}

#[cfg(not(feature = "local"))]
fn load_reader(_config: &PipelineConfig) -> Result<Arc<dyn TextRegionReader>, PipelineError> {
    Err(PipelineError::EngineInit {
        engine: "local".into(),
        detail: "built without the `local` feature; rebuild with `--features local`".into(),
    })
}

#[cfg(feature = "local")]
mod onnx {
    use super::{RawRegion, TextRegionReader};
    use crate::error::{PipelineError, RecognitionError};
    use image::DynamicImage;
    use pure_onnx_ocr::engine::{OcrEngine, OcrEngineBuilder};
    use std::path::Path;
    use std::sync::Mutex;
    use tracing::info;

    /// [`TextRegionReader`] backed by `pure-onnx-ocr`.
    ///
    /// Expects `det.onnx`, `rec.onnx` and `dict.txt` in the model directory.
    pub struct PureOnnxReader {
        engine: Mutex<OcrEngine>,
    }

    impl PureOnnxReader {
        pub fn from_dir(dir: &Path) -> Result<Self, PipelineError> {
            let det_path = dir.join("det.onnx");
            let rec_path = dir.join("rec.onnx");
            let dict_path = dir.join("dict.txt");

            let engine = OcrEngineBuilder::new()
                .det_model_path(&det_path)
                .rec_model_path(&rec_path)
                .dictionary_path(&dict_path)
                .build()
                .map_err(|e| PipelineError::EngineInit {
                    engine: "local".into(),
                    detail: format!("pure-onnx-ocr: {e}"),
                })?;
            info!("Loaded local recognition models from {}", dir.display());
            Ok(Self {
                engine: Mutex::new(engine),
            })
        }
    }

    impl TextRegionReader for PureOnnxReader {
        fn read_regions(&self, image: &DynamicImage) -> Result<Vec<RawRegion>, RecognitionError> {
            let engine = self
                .engine
                .lock()
                .map_err(|_| RecognitionError::Library("engine lock poisoned".into()))?;
            let results = engine
                .run_from_image(image)
                .map_err(|e| RecognitionError::Library(format!("pure-onnx-ocr: {e}")))?;

            Ok(results
                .iter()
                .map(|r| {
                    let mut quad = [(0.0f32, 0.0f32); 4];
                    for (i, c) in r.bounding_box.exterior().coords().take(4).enumerate() {
                        quad[i] = (c.x as f32, c.y as f32);
                    }
                    RawRegion {
                        text: r.text.replace("[UNK]", " "),
                        confidence: r.confidence,
                        quad,
                    }
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::encode_page;
    use image::{GrayImage, Luma};

    struct FixedReader(Vec<RawRegion>);

    impl TextRegionReader for FixedReader {
        fn read_regions(&self, _image: &DynamicImage) -> Result<Vec<RawRegion>, RecognitionError> {
            Ok(self.0.clone())
        }
    }

    fn region(text: &str, confidence: f32) -> RawRegion {
        RawRegion {
            text: text.into(),
            confidence,
            quad: [(1.0, 2.0), (9.0, 2.5), (9.5, 8.0), (1.5, 7.0)],
        }
    }

    fn page() -> PageImage {
        encode_page(1, &GrayImage::from_pixel(8, 8, Luma([255]))).unwrap()
    }

    fn recognizer(regions: Vec<RawRegion>, lang: &str) -> LocalRecognizer {
        LocalRecognizer::new(Arc::new(FixedReader(regions)), lang, 0.7)
    }

    #[tokio::test]
    async fn threshold_is_inclusive() {
        let r = recognizer(
            vec![region("low", 0.69), region("edge", 0.7), region("high", 0.95)],
            "en",
        );
        let frags = r.recognize(&page()).await.unwrap();
        let texts: Vec<_> = frags.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(texts, vec!["edge", "high"]);
    }

    #[tokio::test]
    async fn rtl_language_reverses_characters() {
        let r = recognizer(vec![region("مرحبا", 0.9)], "ar");
        let frags = r.recognize(&page()).await.unwrap();
        assert_eq!(frags[0].text, "ابحرم");
        assert_eq!(frags[0].language, "ar");
    }

    #[tokio::test]
    async fn ltr_language_is_untouched() {
        let r = recognizer(vec![region("hello", 0.9)], "en");
        let frags = r.recognize(&page()).await.unwrap();
        assert_eq!(frags[0].text, "hello");
    }

    #[tokio::test]
    async fn fragments_carry_collapsed_box_and_confidence() {
        let r = recognizer(vec![region("x", 0.8)], "en");
        let frag = &r.recognize(&page()).await.unwrap()[0];
        assert_eq!(frag.bbox, Some(BoundingBox::from([1.0, 2.0, 9.5, 8.0])));
        assert!((frag.confidence - 0.8).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn reader_errors_surface_as_recognition_errors() {
        struct Broken;
        impl TextRegionReader for Broken {
            fn read_regions(&self, _: &DynamicImage) -> Result<Vec<RawRegion>, RecognitionError> {
                Err(RecognitionError::Library("model exploded".into()))
            }
        }
        let r = LocalRecognizer::new(Arc::new(Broken), "en", 0.7);
        let err = r.recognize(&page()).await.unwrap_err();
        assert!(err.to_string().contains("model exploded"));
    }

    #[test]
    fn rtl_detection_uses_primary_subtag() {
        assert!(is_rtl("ar"));
        assert!(is_rtl("AR-eg"));
        assert!(is_rtl("fa_IR"));
        assert!(!is_rtl("en"));
        assert!(!is_rtl("arn"));
    }
}
