//! Per-page image enhancement ahead of recognition.
//!
//! A fixed, deterministic chain:
//!
//! 1. edge-preserving bilateral smoothing (9 px window, σ colour 75, σ space 75)
//! 2. unsharp mask: `1.5 × original − 0.5 × gaussian(9×9, σ 10)`
//! 3. conversion to intensity, then CLAHE (clip limit 2.0, 8×8 tiles)
//! 4. deskew: Canny edges → Hough lines → median skew of the near-horizontal
//!    lines → bicubic rotation about the centre
//!
//! A page without any detectable line is returned un-rotated.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::edges::canny;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::hough::{detect_lines, LineDetectionOptions};
use tracing::debug;

const BILATERAL_DIAMETER: i64 = 9;
const BILATERAL_SIGMA_COLOR: f32 = 75.0;
const BILATERAL_SIGMA_SPACE: f32 = 75.0;

const BLUR_TAPS: usize = 9;
const BLUR_SIGMA: f32 = 10.0;
const SHARPEN_ORIGINAL_WEIGHT: f32 = 1.5;
const SHARPEN_BLUR_WEIGHT: f32 = -0.5;

const CLAHE_CLIP_LIMIT: f32 = 2.0;
const CLAHE_TILES: u32 = 8;

const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
const HOUGH_VOTES: u32 = 200;
const HOUGH_SUPPRESSION: u32 = 8;

/// Lines tilted further than this from horizontal are not skew candidates
/// (table borders, margins).
pub const MAX_SKEW_DEGREES: f32 = 45.0;

/// Run the full enhancement chain on a canonical RGB page.
pub fn enhance(img: &RgbImage) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return GrayImage::new(w, h);
    }

    let smoothed = bilateral_filter(img);
    let sharpened = unsharp_mask(&smoothed);
    let gray = to_luma(&sharpened);
    let equalized = clahe(&gray);
    deskew(equalized)
}

// ── Smoothing & sharpening ────────────────────────────────────────────────

/// Index into `0..n` with reflect-101 borders.
fn reflect(i: i64, n: u32) -> u32 {
    let n = n as i64;
    if n == 1 {
        return 0;
    }
    let mut i = i;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as u32;
        }
    }
}

fn bilateral_filter(img: &RgbImage) -> RgbImage {
    let (w, h) = img.dimensions();
    let radius = BILATERAL_DIAMETER / 2;
    let space_coeff = -0.5 / (BILATERAL_SIGMA_SPACE * BILATERAL_SIGMA_SPACE);
    let color_coeff = -0.5 / (BILATERAL_SIGMA_COLOR * BILATERAL_SIGMA_COLOR);

    let mut window = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = (dx * dx + dy * dy) as f32;
            if r2.sqrt() > radius as f32 {
                continue;
            }
            window.push((dx, dy, (r2 * space_coeff).exp()));
        }
    }
    // Colour distance is the L1 norm over the three channels.
    let color_weight: Vec<f32> = (0..=255 * 3)
        .map(|d| {
            let d = d as f32;
            (d * d * color_coeff).exp()
        })
        .collect();

    let mut out = RgbImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let centre = img.get_pixel(x, y).0;
            let mut acc = [0f32; 3];
            let mut weight_sum = 0f32;

            for &(dx, dy, space_w) in &window {
                let sx = reflect(x as i64 + dx, w);
                let sy = reflect(y as i64 + dy, h);
                let p = img.get_pixel(sx, sy).0;
                let dist = (0..3)
                    .map(|c| (i32::from(centre[c]) - i32::from(p[c])).unsigned_abs())
                    .sum::<u32>() as usize;
                let wgt = space_w * color_weight[dist];
                for c in 0..3 {
                    acc[c] += f32::from(p[c]) * wgt;
                }
                weight_sum += wgt;
            }

            out.put_pixel(
                x,
                y,
                Rgb([
                    clamp_u8(acc[0] / weight_sum),
                    clamp_u8(acc[1] / weight_sum),
                    clamp_u8(acc[2] / weight_sum),
                ]),
            );
        }
    }
    out
}

fn gaussian_kernel(taps: usize, sigma: f32) -> Vec<f32> {
    let centre = (taps / 2) as f32;
    let mut k: Vec<f32> = (0..taps)
        .map(|i| {
            let d = i as f32 - centre;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = k.iter().sum();
    k.iter_mut().for_each(|v| *v /= sum);
    k
}

/// Separable gaussian blur of one interleaved RGB plane set, as floats.
fn gaussian_blur(img: &RgbImage) -> Vec<f32> {
    let (w, h) = img.dimensions();
    let kernel = gaussian_kernel(BLUR_TAPS, BLUR_SIGMA);
    let half = (BLUR_TAPS / 2) as i64;
    let idx = |x: u32, y: u32, c: usize| (y as usize * w as usize + x as usize) * 3 + c;

    let mut horizontal = vec![0f32; w as usize * h as usize * 3];
    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                let mut acc = 0f32;
                for (k, kv) in kernel.iter().enumerate() {
                    let sx = reflect(x as i64 + k as i64 - half, w);
                    acc += f32::from(img.get_pixel(sx, y).0[c]) * kv;
                }
                horizontal[idx(x, y, c)] = acc;
            }
        }
    }

    let mut blurred = vec![0f32; horizontal.len()];
    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                let mut acc = 0f32;
                for (k, kv) in kernel.iter().enumerate() {
                    let sy = reflect(y as i64 + k as i64 - half, h);
                    acc += horizontal[idx(x, sy, c)] * kv;
                }
                blurred[idx(x, y, c)] = acc;
            }
        }
    }
    blurred
}

fn unsharp_mask(img: &RgbImage) -> RgbImage {
    let blurred = gaussian_blur(img);
    let mut out = img.clone();
    for (i, v) in out.iter_mut().enumerate() {
        *v = clamp_u8(SHARPEN_ORIGINAL_WEIGHT * f32::from(*v) + SHARPEN_BLUR_WEIGHT * blurred[i]);
    }
    out
}

/// ITU-R BT.601 luma, the weighting the recognisers are trained on.
fn to_luma(img: &RgbImage) -> GrayImage {
    let (w, h) = img.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let [r, g, b] = img.get_pixel(x, y).0;
        Luma([clamp_u8(
            0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b),
        )])
    })
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

// ── Local contrast ────────────────────────────────────────────────────────

/// Contrast-limited adaptive histogram equalisation over an 8×8 tile grid,
/// bilinearly interpolated between neighbouring tile mappings.
pub fn clahe(img: &GrayImage) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let tiles_x = CLAHE_TILES.min(w);
    let tiles_y = CLAHE_TILES.min(h);
    let tile_w = w.div_ceil(tiles_x);
    let tile_h = h.div_ceil(tiles_y);

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            luts[(ty * tiles_x + tx) as usize] = tile_lut(img, x0, y0, x1, y1);
        }
    }

    let lut = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];
    GrayImage::from_fn(w, h, |x, y| {
        let v = img.get_pixel(x, y).0[0] as usize;

        let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let tx1 = fx.floor();
        let ty1 = fy.floor();
        let ax = fx - tx1;
        let ay = fy - ty1;

        let clamp_tile = |t: f32, n: u32| t.max(0.0).min((n - 1) as f32) as u32;
        let (x_lo, x_hi) = (clamp_tile(tx1, tiles_x), clamp_tile(tx1 + 1.0, tiles_x));
        let (y_lo, y_hi) = (clamp_tile(ty1, tiles_y), clamp_tile(ty1 + 1.0, tiles_y));

        let top = f32::from(lut(x_lo, y_lo)[v]) * (1.0 - ax) + f32::from(lut(x_hi, y_lo)[v]) * ax;
        let bottom =
            f32::from(lut(x_lo, y_hi)[v]) * (1.0 - ax) + f32::from(lut(x_hi, y_hi)[v]) * ax;
        Luma([clamp_u8(top * (1.0 - ay) + bottom * ay)])
    })
}

fn tile_lut(img: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[img.get_pixel(x, y).0[0] as usize] += 1;
        }
    }
    let area = (x1 - x0) * (y1 - y0);
    let mut lut = [0u8; 256];
    if area == 0 {
        for (i, v) in lut.iter_mut().enumerate() {
            *v = i as u8;
        }
        return lut;
    }

    let clip = ((CLAHE_CLIP_LIMIT * area as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let per_bin = excess / 256;
    let residual = excess % 256;
    for bin in hist.iter_mut() {
        *bin += per_bin;
    }
    if residual > 0 {
        let step = (256 / residual).max(1) as usize;
        for bin in hist.iter_mut().step_by(step).take(residual as usize) {
            *bin += 1;
        }
    }

    let scale = 255.0 / area as f32;
    let mut cdf = 0u32;
    for (i, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[i] = clamp_u8(cdf as f32 * scale);
    }
    lut
}

// ── Deskew ────────────────────────────────────────────────────────────────

/// Median skew in degrees of the page's near-horizontal lines.
///
/// Positive means the text descends to the right. `None` when no candidate
/// line is found.
pub fn estimate_skew(img: &GrayImage) -> Option<f32> {
    let edges = canny(img, CANNY_LOW, CANNY_HIGH);
    let lines = detect_lines(
        &edges,
        LineDetectionOptions {
            vote_threshold: HOUGH_VOTES,
            suppression_radius: HOUGH_SUPPRESSION,
        },
    );

    // Hough angles describe the line's normal; a level line has a 90° normal.
    let mut angles: Vec<f32> = lines
        .iter()
        .map(|l| l.angle_in_degrees as f32 - 90.0)
        .filter(|a| a.abs() <= MAX_SKEW_DEGREES)
        .collect();
    debug!(
        "Deskew: {} lines detected, {} candidates",
        lines.len(),
        angles.len()
    );
    median(&mut angles)
}

fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f32::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Rotate the page so its dominant text lines are horizontal.
///
/// Pages with no candidate lines, or already level, are returned as-is.
pub fn deskew(img: GrayImage) -> GrayImage {
    match estimate_skew(&img) {
        None => {
            debug!("Deskew skipped: no lines detected");
            img
        }
        Some(angle) if angle == 0.0 => img,
        Some(angle) => {
            debug!("Deskew: rotating by {:.2}°", angle);
            // imageproc rotates clockwise; leveling a line that descends by
            // `angle` needs the opposite direction.
            rotate_about_center(
                &img,
                -angle.to_radians(),
                Interpolation::Bicubic,
                Luma([255]),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// White page with thick black rules descending at `degrees`.
    fn ruled_page(degrees: f32) -> GrayImage {
        let (w, h) = (600u32, 400u32);
        let mut img = GrayImage::from_pixel(w, h, Luma([255]));
        let slope = degrees.to_radians().tan();
        for row in 0..7 {
            let y0 = 40.0 + row as f32 * 40.0;
            for x in 20..580u32 {
                let y = (y0 + x as f32 * slope).round() as i64;
                for t in 0..3 {
                    let yy = y + t;
                    if (0..h as i64).contains(&yy) {
                        img.put_pixel(x, yy as u32, Luma([0]));
                    }
                }
            }
        }
        img
    }

    #[test]
    fn reflect_stays_in_bounds() {
        assert_eq!(reflect(-1, 5), 1);
        assert_eq!(reflect(5, 5), 3);
        assert_eq!(reflect(2, 5), 2);
        assert_eq!(reflect(-3, 1), 0);
    }

    #[test]
    fn median_of_odd_and_even() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn luma_uses_bt601_weights() {
        let img = RgbImage::from_pixel(1, 1, Rgb([255, 0, 0]));
        assert_eq!(to_luma(&img).get_pixel(0, 0).0[0], 76);
    }

    #[test]
    fn unsharp_mask_keeps_flat_areas_and_steepens_edges() {
        let flat = RgbImage::from_pixel(16, 8, Rgb([90, 140, 200]));
        assert_eq!(unsharp_mask(&flat), flat);

        let step = RgbImage::from_fn(40, 8, |x, _| {
            let v = if x < 20 { 100 } else { 200 };
            Rgb([v, v, v])
        });
        let out = unsharp_mask(&step);
        assert!(out.get_pixel(19, 4).0[0] < 100, "{:?}", out.get_pixel(19, 4));
        assert!(out.get_pixel(20, 4).0[0] > 200, "{:?}", out.get_pixel(20, 4));
        assert_eq!(out.get_pixel(0, 4).0[0], 100);
    }

    #[test]
    fn blank_page_stays_white_and_keeps_size() {
        let img = RgbImage::from_pixel(64, 48, Rgb([255, 255, 255]));
        let out = enhance(&img);
        assert_eq!(out.dimensions(), (64, 48));
        assert!(out.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn no_lines_means_no_rotation() {
        let img = GrayImage::from_pixel(120, 80, Luma([200]));
        assert_eq!(estimate_skew(&img), None);
        assert_eq!(deskew(img.clone()), img);
    }

    #[test]
    fn level_page_is_left_alone() {
        let img = ruled_page(0.0);
        let skew = estimate_skew(&img).expect("rules should be detected");
        assert!(skew.abs() < 0.5, "skew {skew}");
    }

    #[test]
    fn slanted_rules_are_measured_and_corrected() {
        let img = ruled_page(5.0);
        let skew = estimate_skew(&img).expect("rules should be detected");
        assert!((4.0..=6.0).contains(&skew), "skew {skew}");

        let corrected = deskew(img);
        let residual = estimate_skew(&corrected).unwrap_or(0.0);
        assert!(residual.abs() <= 1.5, "residual {residual}");
    }

    #[test]
    fn clahe_keeps_white_and_preserves_ordering() {
        let flat = GrayImage::from_pixel(32, 32, Luma([255]));
        assert!(clahe(&flat).pixels().all(|p| p.0[0] == 255));

        let split = GrayImage::from_fn(256, 256, |x, _| Luma([if x < 128 { 120 } else { 130 }]));
        let out = clahe(&split);
        let left_max = (0..256)
            .flat_map(|y| (0..128).map(move |x| (x, y)))
            .map(|(x, y)| out.get_pixel(x, y).0[0])
            .max()
            .unwrap();
        let right_min = (0..256)
            .flat_map(|y| (128..256).map(move |x| (x, y)))
            .map(|(x, y)| out.get_pixel(x, y).0[0])
            .min()
            .unwrap();
        assert!(left_max < right_min, "{left_max} !< {right_min}");
    }

    #[test]
    fn clahe_handles_images_smaller_than_the_grid() {
        let tiny = GrayImage::from_fn(3, 2, |x, y| Luma([(x * 40 + y * 10) as u8]));
        assert_eq!(clahe(&tiny).dimensions(), (3, 2));
    }
}
