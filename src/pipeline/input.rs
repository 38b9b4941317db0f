//! Input resolution: classify the uploaded document and give the job an
//! isolated working directory.
//!
//! pdfium and LibreOffice both need file-system paths, so the uploaded bytes
//! are written into a per-job [`TempDir`]. Each job gets its own namespace
//! under the configured work root, which keeps concurrent jobs from deleting
//! each other's files. The directory is removed by [`JobWorkspace::cleanup`],
//! and by `Drop` if the job unwinds before reaching it.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Raw document bytes plus the file name used for extension detection.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl DocumentInput {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Read a document from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::new(path.to_string_lossy(), bytes))
    }

    /// File name without directories, safe to join onto the workspace.
    pub fn file_name(&self) -> String {
        Path::new(&self.name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "document".to_string())
    }

    /// File stem used to name the job's output files.
    pub fn base_name(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "document".to_string())
    }

    /// Lower-cased extension, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }
}

/// How a document is turned into page images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Multi-page paged document (PDF), rasterised page by page.
    Paged,
    /// Office document, transcoded to PDF first.
    Office,
    /// A single raster image.
    Raster,
}

const OFFICE_EXTENSIONS: &[&str] = &["docx", "doc", "odt", "rtf"];
const RASTER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

impl DocumentKind {
    /// Classify a document by its (case-insensitive) extension.
    pub fn detect(input: &DocumentInput) -> Result<Self, PipelineError> {
        let ext = input.extension().unwrap_or_default();
        let kind = match ext.as_str() {
            "pdf" => Self::Paged,
            e if OFFICE_EXTENSIONS.contains(&e) => Self::Office,
            e if RASTER_EXTENSIONS.contains(&e) => Self::Raster,
            _ => {
                return Err(PipelineError::UnsupportedFormat {
                    name: input.name.clone(),
                    extension: ext,
                })
            }
        };
        debug!("Detected {:?} document: {}", kind, input.name);
        Ok(kind)
    }
}

/// Job-scoped temporary working storage.
#[derive(Debug)]
pub struct JobWorkspace {
    dir: TempDir,
}

impl JobWorkspace {
    /// Create a fresh, uniquely named directory under `root` (or the OS temp dir).
    pub fn create(root: Option<&Path>) -> Result<Self, PipelineError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("doc2speech-");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        std::fs::create_dir_all(dir.path().join("pages"))?;
        debug!("Job workspace: {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory where normalised page images are spilled.
    pub fn pages_dir(&self) -> PathBuf {
        self.dir.path().join("pages")
    }

    /// Write the uploaded bytes into the workspace and return their path.
    pub async fn write_input(&self, input: &DocumentInput) -> Result<PathBuf, PipelineError> {
        let path = self.dir.path().join(input.file_name());
        tokio::fs::write(&path, &input.bytes).await?;
        Ok(path)
    }

    /// Remove the workspace and everything in it.
    pub fn cleanup(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => info!("Cleaned up job workspace {}", path.display()),
            Err(e) => warn!("Failed to clean up {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str) -> DocumentInput {
        DocumentInput::new(name, vec![1, 2, 3])
    }

    #[test]
    fn detects_kinds_case_insensitively() {
        assert_eq!(DocumentKind::detect(&doc("a.pdf")).unwrap(), DocumentKind::Paged);
        assert_eq!(DocumentKind::detect(&doc("a.PDF")).unwrap(), DocumentKind::Paged);
        assert_eq!(DocumentKind::detect(&doc("a.docx")).unwrap(), DocumentKind::Office);
        assert_eq!(DocumentKind::detect(&doc("scan.JPG")).unwrap(), DocumentKind::Raster);
        assert_eq!(DocumentKind::detect(&doc("scan.jpeg")).unwrap(), DocumentKind::Raster);
        assert_eq!(DocumentKind::detect(&doc("scan.png")).unwrap(), DocumentKind::Raster);
    }

    #[test]
    fn rejects_unknown_and_missing_extensions() {
        let err = DocumentKind::detect(&doc("archive.zip")).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat { ref extension, .. } if extension == "zip"));
        assert!(DocumentKind::detect(&doc("README")).is_err());
    }

    #[test]
    fn names_strip_directories() {
        let d = doc("../../etc/report.final.pdf");
        assert_eq!(d.file_name(), "report.final.pdf");
        assert_eq!(d.base_name(), "report.final");
        assert_eq!(d.extension().as_deref(), Some("pdf"));
    }

    #[tokio::test]
    async fn workspace_is_removed_on_cleanup() {
        let root = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::create(Some(root.path())).unwrap();
        let written = ws.write_input(&doc("in.png")).await.unwrap();
        assert!(written.exists());
        assert!(ws.pages_dir().is_dir());

        ws.cleanup();
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn workspaces_are_isolated() {
        let root = tempfile::tempdir().unwrap();
        let a = JobWorkspace::create(Some(root.path())).unwrap();
        let b = JobWorkspace::create(Some(root.path())).unwrap();
        assert_ne!(a.path(), b.path());
        a.cleanup();
        assert!(b.path().exists());
    }

    #[tokio::test]
    async fn from_path_keeps_path_as_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        std::fs::write(&path, [7u8, 8, 9]).unwrap();

        let d = DocumentInput::from_path(&path).await.unwrap();
        assert_eq!(d.bytes, vec![7, 8, 9]);
        assert_eq!(d.file_name(), "scan.png");
        assert_eq!(d.name, path.to_string_lossy());

        assert!(DocumentInput::from_path(dir.path().join("missing.pdf")).await.is_err());
    }
}
