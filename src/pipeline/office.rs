//! Office-document transcoding to PDF.
//!
//! Office formats are not rendered directly: they are converted to PDF and
//! then rasterised exactly like any other paged document. The conversion is
//! behind [`DocumentConverter`] so tests and hosts without LibreOffice can
//! substitute their own implementation.

use crate::error::PipelineError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info, instrument};

/// Converts an office document into a paged (PDF) document.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert `input` and write the PDF into `out_dir`, returning its path.
    async fn convert(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, PipelineError>;
}

/// [`DocumentConverter`] that shells out to headless LibreOffice.
#[derive(Debug, Clone)]
pub struct SofficeConverter {
    executable: PathBuf,
}

impl SofficeConverter {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl Default for SofficeConverter {
    fn default() -> Self {
        Self::new("soffice")
    }
}

#[async_trait]
impl DocumentConverter for SofficeConverter {
    #[instrument(skip(self, input, out_dir), fields(input = %input.display()))]
    async fn convert(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, PipelineError> {
        let conversion_err = |detail: String| PipelineError::Conversion {
            path: input.to_path_buf(),
            detail,
        };

        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| conversion_err(format!("cannot create output dir: {e}")))?;

        let mut cmd = Command::new(&self.executable);
        cmd.arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(out_dir)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Running soffice: {:?}", cmd);

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                conversion_err(format!(
                    "LibreOffice not found at '{}'. Install it or set soffice_path.",
                    self.executable.display()
                ))
            } else {
                conversion_err(format!("failed to run soffice: {e}"))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("soffice failed: {}", stderr);
            return Err(conversion_err(format!(
                "soffice exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let pdf_path = converted_path(input, out_dir);
        if !pdf_path.exists() {
            return Err(conversion_err(format!(
                "soffice reported success but '{}' was not produced",
                pdf_path.display()
            )));
        }

        info!("Converted to PDF: {}", pdf_path.display());
        Ok(pdf_path)
    }
}

/// Where LibreOffice writes the PDF for `input`.
fn converted_path(input: &Path, out_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    out_dir.join(format!("{stem}.pdf"))
}
