//! Ingestion stages: from uploaded bytes to recognisable page images.
//!
//! Each submodule implements exactly one transformation step, so each is
//! independently testable and swappable.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ office ──▶ render ──▶ enhance ──▶ encode
//! (kind,    (soffice)  (pdfium)   (deskew,    (PNG)
//!  workspace)                      CLAHE)
//! ```
//!
//! 1. [`input`]: classify the document and create the job workspace
//! 2. [`office`]: transcode office formats to PDF
//! 3. [`render`]: rasterise PDF pages and normalise channel order; blocking
//! 4. [`enhance`]: denoise, sharpen, equalise and deskew each page
//! 5. [`encode`]: PNG-encode the enhanced page into a [`encode::PageImage`]
//!
//! [`normalize`] sequences these for one document. [`postprocess`] is used
//! later, on the markdown remote recognition returns.

pub mod encode;
pub mod enhance;
pub mod input;
pub mod normalize;
pub mod office;
pub mod postprocess;
pub mod render;
