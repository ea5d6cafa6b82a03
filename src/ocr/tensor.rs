//! Image-to-tensor conversion for the ONNX OCR models
//!
//! Handles resizing, normalization, and NCHW tensor layout for the
//! detection and recognition models.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array3, Array4};

/// Convert an RGB image to an HWC f32 array normalized to 0-1.
pub fn rgb_to_f32(image: &RgbImage) -> Array3<f32> {
    let (w, h) = image.dimensions();
    let mut out = Array3::<f32>::zeros((h as usize, w as usize, 3));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            out[[y as usize, x as usize, c]] = pixel.0[c] as f32 / 255.0;
        }
    }
    out
}

/// Normalize an HWC image with per-channel mean and std.
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let mut out = Array3::<f32>::zeros((h, w, 3));
    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                out[[y, x, c]] = (image[[y, x, c]] - mean[c]) / std[c];
            }
        }
    }
    out
}

/// Convert an HWC image to an NCHW tensor (batch size 1).
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));
    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }
    tensor
}

/// Resize for the detection model: fit the longest side to `target_size`
/// keeping aspect ratio, then pad to dimensions divisible by 32 (model
/// requirement). Returns the padded image and the applied scale factor.
pub fn resize_for_detection(image: &RgbImage, target_size: u32) -> (RgbImage, f32) {
    let (w, h) = image.dimensions();
    let longest = w.max(h).max(1);
    let scale = (target_size as f32 / longest as f32).min(1.0);
    let new_w = ((w as f32 * scale) as u32).max(1);
    let new_h = ((h as f32 * scale) as u32).max(1);

    let resized = if scale < 1.0 {
        imageops::resize(image, new_w, new_h, FilterType::Triangle)
    } else {
        image.clone()
    };

    let padded_w = new_w.div_ceil(32) * 32;
    let padded_h = new_h.div_ceil(32) * 32;
    if padded_w == new_w && padded_h == new_h {
        return (resized, scale);
    }

    let mut padded = RgbImage::new(padded_w, padded_h);
    imageops::overlay(&mut padded, &resized, 0, 0);
    (padded, scale)
}

/// Resize a text crop for the recognition model: fixed height, width
/// scaled proportionally and clamped to `max_width`.
pub fn resize_for_recognition(crop: &RgbImage, target_height: u32, max_width: u32) -> RgbImage {
    let (w, h) = crop.dimensions();
    if w == 0 || h == 0 {
        return RgbImage::new(1, target_height);
    }
    let scale = target_height as f32 / h as f32;
    let new_w = ((w as f32 * scale) as u32).clamp(1, max_width);
    imageops::resize(crop, new_w, target_height, FilterType::Triangle)
}
