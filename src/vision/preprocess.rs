//! Region preprocessing for OCR legibility
//!
//! Scanned drawings fight OCR in two ways: washed-out microfilm contrast
//! and long grid/wall strokes that cut straight through label text. The
//! two operations here address those without corrupting genuine glyphs,
//! and both hand back the input unchanged if their preconditions fail -
//! preprocessing must never cost the caller an image.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use imageproc::contrast::otsu_level;
use tracing::debug;

/// CLAHE clip limit, as a multiple of the uniform histogram level.
const CLAHE_CLIP_LIMIT: f32 = 2.0;
/// CLAHE tile grid: 8x8 tiles over the image.
const CLAHE_GRID: u32 = 8;
/// Minimum foreground run treated as a grid/wall line rather than a glyph.
const LINE_MIN_RUN: u32 = 40;
/// Brush half-width when painting detected lines out.
const LINE_BRUSH: i64 = 2;
/// Upscale factor for circle crops before OCR.
const CROP_UPSCALE: u32 = 3;

/// Local adaptive contrast enhancement, returned as a 3-channel image
/// (the OCR engine contract requires 3 channels).
pub fn normalize_contrast(image: &RgbImage) -> RgbImage {
    let gray = imageops::grayscale(image);
    match clahe(&gray, CLAHE_CLIP_LIMIT, CLAHE_GRID) {
        Some(enhanced) => gray_to_rgb(&enhanced),
        None => {
            debug!("image too small for contrast tiles, leaving unmodified");
            image.clone()
        }
    }
}

/// Erase long horizontal/vertical ink runs (grid lines, wall strokes) by
/// painting them background-white. Glyph strokes are far shorter than
/// `LINE_MIN_RUN` and survive.
pub fn suppress_lines(image: &RgbImage) -> RgbImage {
    let gray = imageops::grayscale(image);
    let (w, h) = gray.dimensions();
    if w < LINE_MIN_RUN || h < LINE_MIN_RUN {
        debug!("image smaller than line-run floor, leaving unmodified");
        return image.clone();
    }

    let threshold = otsu_level(&gray);
    let is_ink = |x: u32, y: u32| gray.get_pixel(x, y).0[0] <= threshold;

    let mut out = gray.clone();

    // Horizontal runs
    for y in 0..h {
        let mut run_start = 0u32;
        let mut run_len = 0u32;
        for x in 0..=w {
            if x < w && is_ink(x, y) {
                if run_len == 0 {
                    run_start = x;
                }
                run_len += 1;
            } else {
                if run_len >= LINE_MIN_RUN {
                    paint_white(
                        &mut out,
                        run_start as i64,
                        y as i64 - LINE_BRUSH,
                        x as i64 - 1,
                        y as i64 + LINE_BRUSH,
                    );
                }
                run_len = 0;
            }
        }
    }

    // Vertical runs
    for x in 0..w {
        let mut run_start = 0u32;
        let mut run_len = 0u32;
        for y in 0..=h {
            if y < h && is_ink(x, y) {
                if run_len == 0 {
                    run_start = y;
                }
                run_len += 1;
            } else {
                if run_len >= LINE_MIN_RUN {
                    paint_white(
                        &mut out,
                        x as i64 - LINE_BRUSH,
                        run_start as i64,
                        x as i64 + LINE_BRUSH,
                        y as i64 - 1,
                    );
                }
                run_len = 0;
            }
        }
    }

    gray_to_rgb(&out)
}

/// Cubic 3x upscale for circle crops; callout glyphs sit below the OCR
/// engine's effective resolution floor at native scale.
pub fn upscale_for_ocr(image: &RgbImage) -> RgbImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }
    imageops::resize(image, w * CROP_UPSCALE, h * CROP_UPSCALE, FilterType::CatmullRom)
}

/// Contrast-limited adaptive histogram equalization over a tile grid with
/// bilinear blending between neighboring tile lookup tables. `None` when
/// the image cannot host the grid.
fn clahe(gray: &GrayImage, clip_limit: f32, grid: u32) -> Option<GrayImage> {
    let (w, h) = gray.dimensions();
    if w < grid || h < grid {
        return None;
    }

    let grid = grid as usize;
    let mut luts = vec![[0u8; 256]; grid * grid];

    for ty in 0..grid {
        for tx in 0..grid {
            let x0 = (tx as u32 * w) / grid as u32;
            let x1 = ((tx as u32 + 1) * w) / grid as u32;
            let y0 = (ty as u32 * h) / grid as u32;
            let y1 = ((ty as u32 + 1) * h) / grid as u32;

            let mut hist = [0f32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y).0[0] as usize] += 1.0;
                }
            }

            let area = ((x1 - x0) * (y1 - y0)) as f32;
            let clip = clip_limit * area / 256.0;

            // Clip and redistribute the excess uniformly.
            let mut excess = 0.0f32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let bonus = excess / 256.0;
            for bin in hist.iter_mut() {
                *bin += bonus;
            }

            let lut = &mut luts[ty * grid + tx];
            let mut cdf = 0.0f32;
            for (v, bin) in hist.iter().enumerate() {
                cdf += *bin;
                lut[v] = ((cdf / area) * 255.0).clamp(0.0, 255.0) as u8;
            }
        }
    }

    let tile_w = w as f32 / grid as f32;
    let tile_h = h as f32 / grid as f32;
    let max_tile = (grid - 1) as f32;

    let out = GrayImage::from_fn(w, h, |x, y| {
        let fx = (x as f32 / tile_w - 0.5).clamp(0.0, max_tile);
        let fy = (y as f32 / tile_h - 0.5).clamp(0.0, max_tile);
        let tx0 = fx.floor() as usize;
        let ty0 = fy.floor() as usize;
        let tx1 = (tx0 + 1).min(grid - 1);
        let ty1 = (ty0 + 1).min(grid - 1);
        let wx = fx - tx0 as f32;
        let wy = fy - ty0 as f32;

        let v = gray.get_pixel(x, y).0[0] as usize;
        let p00 = luts[ty0 * grid + tx0][v] as f32;
        let p10 = luts[ty0 * grid + tx1][v] as f32;
        let p01 = luts[ty1 * grid + tx0][v] as f32;
        let p11 = luts[ty1 * grid + tx1][v] as f32;

        let top = p00 * (1.0 - wx) + p10 * wx;
        let bottom = p01 * (1.0 - wx) + p11 * wx;
        image::Luma([(top * (1.0 - wy) + bottom * wy).clamp(0.0, 255.0) as u8])
    });

    Some(out)
}

fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        image::Rgb([v, v, v])
    })
}

fn paint_white(gray: &mut GrayImage, x0: i64, y0: i64, x1: i64, y1: i64) {
    let (w, h) = gray.dimensions();
    let x0 = x0.clamp(0, w as i64 - 1) as u32;
    let y0 = y0.clamp(0, h as i64 - 1) as u32;
    let x1 = x1.clamp(0, w as i64 - 1) as u32;
    let y1 = y1.clamp(0, h as i64 - 1) as u32;
    for y in y0..=y1 {
        for x in x0..=x1 {
            gray.put_pixel(x, y, image::Luma([255]));
        }
    }
}
