//! Page encoding: enhanced intensity image → lossless PNG [`PageImage`].
//!
//! PNG over JPEG: compression artefacts around glyph edges cost far more
//! recognition accuracy than the extra bytes cost bandwidth.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, GrayImage, ImageFormat};
use std::io::Cursor;
use std::path::PathBuf;
use tracing::debug;

/// Encoding of a [`PageImage`]'s bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFormat {
    Png,
}

impl PageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
        }
    }
}

/// One normalised page, ready for recognition.
///
/// Immutable once produced and consumed by the recognition stage.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-indexed page number.
    pub page_num: usize,
    pub format: PageFormat,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Copy spilled into the job workspace, if any.
    pub path: Option<PathBuf>,
}

impl PageImage {
    /// Base64 payload of the encoded bytes.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// `data:` URI accepted by remote recognition services.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.format.mime_type(), self.to_base64())
    }

    /// Decode the bytes back into pixels for on-device inference.
    pub fn decode(&self) -> Result<DynamicImage, image::ImageError> {
        image::load_from_memory_with_format(&self.data, ImageFormat::Png)
    }
}

/// Encode an enhanced page as PNG.
pub fn encode_page(page_num: usize, img: &GrayImage) -> Result<PageImage, image::ImageError> {
    let mut data = Vec::new();
    img.write_to(&mut Cursor::new(&mut data), ImageFormat::Png)?;
    debug!("Encoded page {} → {} bytes PNG", page_num, data.len());

    Ok(PageImage {
        page_num,
        format: PageFormat::Png,
        data,
        width: img.width(),
        height: img.height(),
        path: None,
    })
}
