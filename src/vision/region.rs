//! Region-scoped detection
//!
//! Runs the circle and text extractors on a caller-supplied sub-rectangle
//! and remaps every output coordinate into the original image's space.
//! Also returns the crop as an encoded preview for the caller to render.

use crate::config::DetectorConfig;
use crate::ocr::TextRecognizer;
use crate::vision::callout::extract_callouts;
use crate::vision::circles::locate_circles;
use crate::vision::text_extract::extract_text_boxes;
use crate::vision::{DetectedCircle, DetectedTextBox, Region};
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops;
use image::RgbImage;
use std::sync::Arc;
use tracing::warn;

/// Detect circles and text inside `region`, coordinates remapped to the
/// source image. The returned string is the crop as a
/// `data:image/jpeg;base64,` URI, or empty when encoding fails.
pub fn detect_in_region(
    image: &RgbImage,
    region: Region,
    recognizer: Option<&Arc<dyn TextRecognizer>>,
    config: &DetectorConfig,
) -> (Vec<DetectedCircle>, Vec<DetectedTextBox>, String) {
    let (img_w, img_h) = image.dimensions();
    let x = region.x.min(img_w);
    let y = region.y.min(img_h);
    let w = region.w.min(img_w - x);
    let h = region.h.min(img_h - y);
    if w == 0 || h == 0 {
        warn!("degenerate region {region:?} on {img_w}x{img_h} image");
        return (Vec::new(), Vec::new(), String::new());
    }

    let crop = imageops::crop_imm(image, x, y, w, h).to_image();

    let gray = imageops::grayscale(&crop);
    let local_circles = locate_circles(&gray, &config.circle);
    let mut circles = extract_callouts(&crop, &local_circles, recognizer, config);
    for circle in &mut circles {
        circle.x += x as i32;
        circle.y += y as i32;
    }

    let mut texts = match recognizer {
        Some(recognizer) => extract_text_boxes(&crop, recognizer.as_ref(), config),
        None => Vec::new(),
    };
    for text_box in &mut texts {
        text_box.x1 += x as i32;
        text_box.y1 += y as i32;
        text_box.x2 += x as i32;
        text_box.y2 += y as i32;
    }

    (circles, texts, encode_preview(&crop))
}

/// JPEG-encode the crop as a data URI. Failure degrades to an empty
/// string; preview loss must not cost the caller the detections.
fn encode_preview(crop: &RgbImage) -> String {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new(&mut buffer);
    if let Err(e) = crop.write_with_encoder(encoder) {
        warn!("preview encoding failed: {e}");
        return String::new();
    }
    let encoded = base64::engine::general_purpose::STANDARD.encode(&buffer);
    format!("data:image/jpeg;base64,{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{OcrParams, OcrToken};
    use anyhow::Result;

    struct FixedRecognizer(Vec<OcrToken>);

    impl TextRecognizer for FixedRecognizer {
        fn detect(&self, _image: &RgbImage, _params: &OcrParams) -> Result<Vec<OcrToken>> {
            Ok(self.0.clone())
        }
    }

    fn white(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, image::Rgb([255, 255, 255]))
    }

    #[test]
    fn test_coordinates_offset_to_source_image() {
        let image = white(800, 600);
        let recognizer: Arc<dyn TextRecognizer> = Arc::new(FixedRecognizer(vec![OcrToken {
            polygon: vec![(10.0, 10.0), (60.0, 10.0), (60.0, 30.0), (10.0, 30.0)],
            text: "LOBBY".to_string(),
            confidence: Some(0.9),
        }]));
        let config = DetectorConfig::default();
        let region = Region {
            x: 100,
            y: 200,
            w: 300,
            h: 200,
        };

        let (_, texts, preview) = detect_in_region(&image, region, Some(&recognizer), &config);
        assert_eq!(texts.len(), 1);
        let b = &texts[0];
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (110, 210, 160, 230));
        assert!(preview.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_degenerate_region_is_empty() {
        let image = white(100, 100);
        let config = DetectorConfig::default();
        let region = Region {
            x: 100,
            y: 0,
            w: 50,
            h: 50,
        };
        let (circles, texts, preview) = detect_in_region(&image, region, None, &config);
        assert!(circles.is_empty());
        assert!(texts.is_empty());
        assert!(preview.is_empty());
    }

    #[test]
    fn test_region_clamped_to_image() {
        let image = white(200, 150);
        let config = DetectorConfig::default();
        let region = Region {
            x: 150,
            y: 100,
            w: 500,
            h: 500,
        };
        let (_, texts, preview) = detect_in_region(&image, region, None, &config);
        assert!(texts.is_empty());
        assert!(preview.starts_with("data:image/jpeg;base64,"));
    }
}
