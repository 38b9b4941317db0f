//! Page normalisation: any supported document → ordered, enhanced, encoded
//! page images.
//!
//! ```text
//! raster  ──decode──────────────────────────────┐
//! paged   ──────────────────pdfium @ scale──────┼──▶ enhance ──▶ PNG ──▶ Vec<PageImage>
//! office  ──soffice──▶ pdf ──pdfium @ scale─────┘
//! ```
//!
//! Output order equals the document's page order. Every page is also
//! spilled into the job workspace as `pages/page_NNNN.png`, so the workspace
//! is the single place intermediate artefacts live until cleanup.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::encode::{encode_page, PageImage};
use crate::pipeline::enhance::enhance;
use crate::pipeline::input::{DocumentInput, DocumentKind, JobWorkspace};
use crate::pipeline::office::DocumentConverter;
use crate::pipeline::render::{dynamic_to_rgb, render_each_page};
use async_trait::async_trait;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Produces the ordered page images of one document.
///
/// [`PageNormalizer`] is the production source; the orchestrator only sees
/// this trait.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn pages(
        &self,
        document: &DocumentInput,
        workspace: &JobWorkspace,
    ) -> Result<Vec<PageImage>, PipelineError>;
}

/// Turns a [`DocumentInput`] into its page images.
pub struct PageNormalizer {
    converter: Arc<dyn DocumentConverter>,
    render_scale: f32,
    pdfium_lib_path: Option<PathBuf>,
}

impl PageNormalizer {
    pub fn new(
        converter: Arc<dyn DocumentConverter>,
        render_scale: f32,
        pdfium_lib_path: Option<PathBuf>,
    ) -> Self {
        Self {
            converter,
            render_scale,
            pdfium_lib_path,
        }
    }

    pub fn from_config(config: &PipelineConfig, converter: Arc<dyn DocumentConverter>) -> Self {
        Self::new(
            converter,
            config.render_scale,
            config.pdfium_lib_path.clone(),
        )
    }

    /// Normalise `document` into page images, in page order.
    #[instrument(skip_all, fields(document = %document.name))]
    pub async fn normalize(
        &self,
        document: &DocumentInput,
        workspace: &JobWorkspace,
    ) -> Result<Vec<PageImage>, PipelineError> {
        let pages = match DocumentKind::detect(document)? {
            DocumentKind::Raster => {
                let bytes = document.bytes.clone();
                let pages_dir = workspace.pages_dir();
                let page = tokio::task::spawn_blocking(move || raster_page(&bytes, &pages_dir))
                    .await
                    .map_err(|e| PipelineError::Internal(format!("decode task panicked: {e}")))??;
                vec![page]
            }
            DocumentKind::Paged => {
                let path = workspace.write_input(document).await?;
                if !document.bytes.starts_with(b"%PDF") {
                    return Err(PipelineError::Render {
                        path,
                        detail: "not a PDF file (missing %PDF header)".into(),
                    });
                }
                self.render_paged(&path, workspace).await?
            }
            DocumentKind::Office => {
                let source = workspace.write_input(document).await?;
                let pdf = self
                    .converter
                    .convert(&source, &workspace.path().join("converted"))
                    .await?;
                self.render_paged(&pdf, workspace).await?
            }
        };

        info!("Normalised {} into {} page(s)", document.name, pages.len());
        Ok(pages)
    }

    async fn render_paged(
        &self,
        pdf: &Path,
        workspace: &JobWorkspace,
    ) -> Result<Vec<PageImage>, PipelineError> {
        let pdf = pdf.to_path_buf();
        let pages_dir = workspace.pages_dir();
        let scale = self.render_scale;
        let lib = self.pdfium_lib_path.clone();

        tokio::task::spawn_blocking(move || {
            let mut pages = Vec::new();
            render_each_page(&pdf, scale, lib.as_deref(), |idx, rgb| {
                pages.push(finish_page(idx + 1, &rgb, &pages_dir)?);
                Ok(())
            })?;
            Ok::<_, PipelineError>(pages)
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("render task panicked: {e}")))?
    }
}

#[async_trait]
impl PageSource for PageNormalizer {
    async fn pages(
        &self,
        document: &DocumentInput,
        workspace: &JobWorkspace,
    ) -> Result<Vec<PageImage>, PipelineError> {
        self.normalize(document, workspace).await
    }
}

fn raster_page(bytes: &[u8], pages_dir: &Path) -> Result<PageImage, PipelineError> {
    let image_err = |detail: String| PipelineError::Image { page: 1, detail };
    let decoded = image::load_from_memory(bytes).map_err(|e| image_err(e.to_string()))?;
    let rgb = dynamic_to_rgb(decoded).map_err(image_err)?;
    finish_page(1, &rgb, pages_dir)
}

/// Enhance, encode and spill one page.
fn finish_page(page_num: usize, rgb: &RgbImage, pages_dir: &Path) -> Result<PageImage, PipelineError> {
    let enhanced = enhance(rgb);
    let mut page = encode_page(page_num, &enhanced).map_err(|e| PipelineError::Image {
        page: page_num,
        detail: e.to_string(),
    })?;

    let path = pages_dir.join(format!("page_{page_num:04}.png"));
    std::fs::write(&path, &page.data).map_err(|e| PipelineError::Persist {
        path: path.clone(),
        detail: e.to_string(),
    })?;
    debug!("Page {} spilled to {}", page_num, path.display());
    page.path = Some(path);
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    struct FailingConverter;

    #[async_trait]
    impl DocumentConverter for FailingConverter {
        async fn convert(&self, input: &Path, _out_dir: &Path) -> Result<PathBuf, PipelineError> {
            Err(PipelineError::Conversion {
                path: input.to_path_buf(),
                detail: "converter offline".into(),
            })
        }
    }

    fn normalizer() -> PageNormalizer {
        PageNormalizer::new(Arc::new(FailingConverter), 2.0, None)
    }

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, Rgb([250, 250, 250]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn raster_input_yields_exactly_one_page() {
        let ws = JobWorkspace::create(None).unwrap();
        let doc = DocumentInput::new("scan.PNG", png_bytes(40, 30));

        let pages = normalizer().normalize(&doc, &ws).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_num, 1);
        assert_eq!((pages[0].width, pages[0].height), (40, 30));
        assert!(pages[0].path.as_ref().unwrap().exists());
        ws.cleanup();
    }

    #[tokio::test]
    async fn undecodable_raster_is_an_image_error() {
        let ws = JobWorkspace::create(None).unwrap();
        let doc = DocumentInput::new("scan.jpg", b"definitely not a jpeg".to_vec());
        let err = normalizer().normalize(&doc, &ws).await.unwrap_err();
        assert!(matches!(err, PipelineError::Image { page: 1, .. }), "got {err:?}");
        ws.cleanup();
    }

    #[tokio::test]
    async fn pdf_without_header_is_a_render_error() {
        let ws = JobWorkspace::create(None).unwrap();
        let doc = DocumentInput::new("report.pdf", b"hello".to_vec());
        let err = normalizer().normalize(&doc, &ws).await.unwrap_err();
        assert!(matches!(err, PipelineError::Render { .. }), "got {err:?}");
        ws.cleanup();
    }

    #[tokio::test]
    async fn office_conversion_failure_propagates() {
        let ws = JobWorkspace::create(None).unwrap();
        let doc = DocumentInput::new("letter.docx", b"PK..".to_vec());
        let err = normalizer().normalize(&doc, &ws).await.unwrap_err();
        assert!(matches!(err, PipelineError::Conversion { .. }), "got {err:?}");
        ws.cleanup();
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected_before_any_work() {
        let ws = JobWorkspace::create(None).unwrap();
        let doc = DocumentInput::new("notes.txt", b"plain".to_vec());
        let err = normalizer().normalize(&doc, &ws).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat { .. }));
        assert_eq!(std::fs::read_dir(ws.path()).unwrap().count(), 1); // only pages/
        ws.cleanup();
    }
}
