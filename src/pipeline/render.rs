//! Paged-document rasterisation via pdfium, and channel-order normalisation
//! of every raster that enters the pipeline.
//!
//! ## Channel order
//!
//! Rasters arrive with different layouts: pdfium bitmaps are 4-channel with
//! alpha, decoded JPEGs are 3-channel, PNGs may be either. The enhancer
//! expects one canonical 3-channel order. 4-channel buffers are read as
//! RGBA (alpha dropped) and 3-channel buffers as RGB. Getting this wrong
//! raises no error; it silently shifts the grey levels recognition sees, so
//! the conversion lives in one function with its own tests.
//!
//! ## Blocking
//!
//! pdfium keeps thread-local state and is CPU-bound. Everything here is
//! synchronous; callers run it inside `spawn_blocking`.

use crate::error::PipelineError;
use image::{DynamicImage, RgbImage};
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Convert an interleaved sample buffer into the canonical RGB layout.
///
/// * 4 channels: RGBA, alpha dropped
/// * 3 channels: RGB, copied as-is
///
/// Any other channel count is rejected.
pub fn to_canonical_rgb(
    width: u32,
    height: u32,
    channels: usize,
    samples: &[u8],
) -> Result<RgbImage, String> {
    let expected = width as usize * height as usize * channels;
    if samples.len() != expected {
        return Err(format!(
            "buffer has {} bytes, expected {} for {}x{}x{}",
            samples.len(),
            expected,
            width,
            height,
            channels
        ));
    }

    let rgb: Vec<u8> = match channels {
        4 => samples
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        3 => samples.to_vec(),
        n => return Err(format!("unsupported channel count {n}")),
    };

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| format!("cannot build {width}x{height} RGB image"))
}

/// Normalise any decoded image to canonical RGB.
pub fn dynamic_to_rgb(img: DynamicImage) -> Result<RgbImage, String> {
    let (w, h) = (img.width(), img.height());
    match img {
        DynamicImage::ImageRgba8(buf) => to_canonical_rgb(w, h, 4, buf.as_raw()),
        DynamicImage::ImageRgb8(buf) => to_canonical_rgb(w, h, 3, buf.as_raw()),
        // Grey, 16-bit and float layouts: let `image` widen them to RGBA8 first.
        other => {
            let buf = other.to_rgba8();
            to_canonical_rgb(w, h, 4, buf.as_raw())
        }
    }
}

/// Bind to pdfium: a library in `lib_dir` when given, the system one otherwise.
pub fn bind_pdfium(lib_dir: Option<&Path>) -> Result<Pdfium, String> {
    let bindings = match lib_dir {
        Some(dir) => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| format!("cannot bind to pdfium: {:?}", e))?;
    Ok(Pdfium::new(bindings))
}

/// Rasterise every page of `pdf_path` at `scale`, in page order.
///
/// Each page is handed to `on_page` (0-based index, canonical RGB) as soon
/// as it is rendered, so only one full-resolution page is alive at a time.
pub fn render_each_page<F>(
    pdf_path: &Path,
    scale: f32,
    lib_dir: Option<&Path>,
    mut on_page: F,
) -> Result<usize, PipelineError>
where
    F: FnMut(usize, RgbImage) -> Result<(), PipelineError>,
{
    let render_err = |detail: String| PipelineError::Render {
        path: pdf_path.to_path_buf(),
        detail,
    };

    let pdfium = bind_pdfium(lib_dir).map_err(render_err)?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| render_err(format!("cannot open document: {:?}", e)))?;

    let pages = document.pages();
    let total = pages.len() as usize;
    info!("Document loaded: {} pages", total);

    let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);

    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| render_err(format!("page {}: {:?}", idx + 1, e)))?;

        let rgb = dynamic_to_rgb(bitmap.as_image())
            .map_err(|e| render_err(format!("page {}: {}", idx + 1, e)))?;
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            rgb.width(),
            rgb.height()
        );

        on_page(idx, rgb)?;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbaImage, Rgba};

    #[test]
    fn four_channels_drop_alpha_and_keep_order() {
        let samples = [10, 20, 30, 255, 40, 50, 60, 0];
        let rgb = to_canonical_rgb(2, 1, 4, &samples).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([10, 20, 30]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([40, 50, 60]));
    }

    #[test]
    fn three_channels_are_copied() {
        let samples = [1, 2, 3, 4, 5, 6];
        let rgb = to_canonical_rgb(1, 2, 3, &samples).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([1, 2, 3]));
        assert_eq!(rgb.get_pixel(0, 1), &Rgb([4, 5, 6]));
    }

    #[test]
    fn rejects_other_channel_counts_and_bad_lengths() {
        assert!(to_canonical_rgb(1, 1, 2, &[1, 2]).is_err());
        assert!(to_canonical_rgb(2, 2, 3, &[0; 5]).is_err());
    }

    #[test]
    fn rgba_and_rgb_sources_agree() {
        let rgba = RgbaImage::from_pixel(3, 3, Rgba([200, 100, 50, 255]));
        let rgb = RgbImage::from_pixel(3, 3, Rgb([200, 100, 50]));
        let a = dynamic_to_rgb(DynamicImage::ImageRgba8(rgba)).unwrap();
        let b = dynamic_to_rgb(DynamicImage::ImageRgb8(rgb)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn grey_sources_are_widened() {
        let grey = GrayImage::from_pixel(2, 2, Luma([77]));
        let rgb = dynamic_to_rgb(DynamicImage::ImageLuma8(grey)).unwrap();
        assert_eq!(rgb.get_pixel(1, 1), &Rgb([77, 77, 77]));
    }
}
