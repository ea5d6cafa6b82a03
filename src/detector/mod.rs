//! Detection Facade
//!
//! The surface consumed by the hosting service: decode uploaded bytes, run
//! the circle and text extractors, and package results into the response
//! envelopes. No failure escapes this boundary as an error value except
//! through the envelope's `error` field, and that field is reserved for
//! the genuinely unexpected; bad input degrades to empty result lists.

use crate::config::DetectorConfig;
use crate::ocr::EngineHandle;
use crate::vision::callout::extract_callouts;
use crate::vision::circles::locate_circles;
use crate::vision::region::detect_in_region;
use crate::vision::text_extract::extract_text_boxes;
use crate::vision::{DetectedCircle, DetectedTextBox, Region};
use anyhow::Result;
use image::imageops;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Full-page detection response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageDetection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub circles: Vec<DetectedCircle>,
    pub texts: Vec<DetectedTextBox>,
}

impl PageDetection {
    fn empty() -> Self {
        Self {
            error: None,
            circles: Vec::new(),
            texts: Vec::new(),
        }
    }

    fn failed(message: String) -> Self {
        Self {
            error: Some(message),
            circles: Vec::new(),
            texts: Vec::new(),
        }
    }
}

/// Region-scoped detection response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionDetection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub circles: Vec<DetectedCircle>,
    pub detections: Vec<DetectedTextBox>,
    pub cropped_image: String,
}

impl RegionDetection {
    fn empty() -> Self {
        Self {
            error: None,
            circles: Vec::new(),
            detections: Vec::new(),
            cropped_image: String::new(),
        }
    }

    fn failed(message: String) -> Self {
        Self {
            error: Some(message),
            circles: Vec::new(),
            detections: Vec::new(),
            cropped_image: String::new(),
        }
    }
}

/// Annotation detector over one OCR engine handle.
///
/// Stateless per call; a single instance is safe to share across threads
/// once constructed.
pub struct PlanDetector {
    engine: Arc<EngineHandle>,
    config: DetectorConfig,
}

impl PlanDetector {
    pub fn new(engine: Arc<EngineHandle>, config: DetectorConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Detect callout circles and text labels across a whole sheet image.
    pub fn detect_page(&self, image_bytes: &[u8]) -> PageDetection {
        match self.run_page(image_bytes) {
            Ok(detection) => detection,
            Err(e) => {
                warn!("page detection failed unexpectedly: {e:#}");
                PageDetection::failed(format!("{e:#}"))
            }
        }
    }

    /// Detect inside a caller-supplied rectangle, coordinates expressed in
    /// the source image's space, with a JPEG preview of the crop.
    pub fn detect_region(&self, image_bytes: &[u8], region: Region) -> RegionDetection {
        match self.run_region(image_bytes, region) {
            Ok(detection) => detection,
            Err(e) => {
                warn!("region detection failed unexpectedly: {e:#}");
                RegionDetection::failed(format!("{e:#}"))
            }
        }
    }

    fn run_page(&self, image_bytes: &[u8]) -> Result<PageDetection> {
        let Some(image) = decode_image(image_bytes) else {
            return Ok(PageDetection::empty());
        };

        let gray = imageops::grayscale(&image);
        let located = locate_circles(&gray, &self.config.circle);

        let recognizer = self.engine.get();
        if recognizer.is_none() {
            warn!("OCR engine unavailable, returning geometry-only results");
        }

        let circles = extract_callouts(&image, &located, recognizer.as_ref(), &self.config);
        let texts = match &recognizer {
            Some(recognizer) => extract_text_boxes(&image, recognizer.as_ref(), &self.config),
            None => Vec::new(),
        };

        info!(
            "page detection: {} circles, {} text boxes",
            circles.len(),
            texts.len()
        );
        Ok(PageDetection {
            error: None,
            circles,
            texts,
        })
    }

    fn run_region(&self, image_bytes: &[u8], region: Region) -> Result<RegionDetection> {
        let Some(image) = decode_image(image_bytes) else {
            return Ok(RegionDetection::empty());
        };

        let recognizer = self.engine.get();
        if recognizer.is_none() {
            warn!("OCR engine unavailable, returning geometry-only results");
        }

        let (circles, detections, cropped_image) =
            detect_in_region(&image, region, recognizer.as_ref(), &self.config);

        info!(
            "region detection: {} circles, {} text boxes",
            circles.len(),
            detections.len()
        );
        Ok(RegionDetection {
            error: None,
            circles,
            detections,
            cropped_image,
        })
    }
}

/// Decode uploaded bytes into an RGB raster. Malformed input is routine
/// (truncated uploads, wrong content type) and yields `None`, not an error.
fn decode_image(image_bytes: &[u8]) -> Option<RgbImage> {
    match image::load_from_memory(image_bytes) {
        Ok(decoded) => Some(decoded.to_rgb8()),
        Err(e) => {
            debug!("failed to decode image bytes: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{OcrParams, OcrToken, TextRecognizer};
    use image::codecs::png::PngEncoder;

    struct ScriptedRecognizer {
        passes: parking_lot::Mutex<Vec<Vec<OcrToken>>>,
    }

    impl ScriptedRecognizer {
        fn new(mut passes: Vec<Vec<OcrToken>>) -> Self {
            passes.reverse();
            Self {
                passes: parking_lot::Mutex::new(passes),
            }
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        fn detect(&self, _image: &RgbImage, _params: &OcrParams) -> Result<Vec<OcrToken>> {
            Ok(self.passes.lock().pop().unwrap_or_default())
        }
    }

    fn png_bytes(image: &RgbImage) -> Vec<u8> {
        let mut buffer = Vec::new();
        image
            .write_with_encoder(PngEncoder::new(&mut buffer))
            .unwrap();
        buffer
    }

    fn token(text: &str, x0: f32, y0: f32, x1: f32, y1: f32) -> OcrToken {
        OcrToken {
            polygon: vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1)],
            text: text.to_string(),
            confidence: Some(0.9),
        }
    }

    #[test]
    fn test_empty_bytes_yield_empty_envelope() {
        let detector = PlanDetector::new(
            Arc::new(EngineHandle::disabled()),
            DetectorConfig::default(),
        );
        let result = detector.detect_page(&[]);
        assert!(result.error.is_none());
        assert!(result.circles.is_empty());
        assert!(result.texts.is_empty());
    }

    #[test]
    fn test_corrupt_bytes_yield_empty_envelope() {
        let detector = PlanDetector::new(
            Arc::new(EngineHandle::disabled()),
            DetectorConfig::default(),
        );
        let result = detector.detect_page(&[0xde, 0xad, 0xbe, 0xef]);
        assert!(result.error.is_none());
        assert!(result.circles.is_empty());
        assert!(result.texts.is_empty());
    }

    #[test]
    fn test_geometry_only_without_engine() {
        // One drawn disc, no OCR engine: the circle still comes back.
        let mut image = RgbImage::from_pixel(400, 400, image::Rgb([255, 255, 255]));
        imageproc::drawing::draw_filled_circle_mut(&mut image, (200, 200), 60, image::Rgb([0, 0, 0]));

        let detector = PlanDetector::new(
            Arc::new(EngineHandle::disabled()),
            DetectorConfig::default(),
        );
        let result = detector.detect_page(&png_bytes(&image));
        assert!(result.error.is_none());
        assert_eq!(result.circles.len(), 1);
        assert!(result.circles[0].page_number.is_empty());
        assert!(result.texts.is_empty());
    }

    #[test]
    fn test_end_to_end_circle_annotation() {
        // One disc; scripted OCR serves the circle crop first ("3" above
        // "A5.1" in the 480px upscaled crop), then two page passes with a
        // room label.
        let mut image = RgbImage::from_pixel(400, 400, image::Rgb([255, 255, 255]));
        imageproc::drawing::draw_filled_circle_mut(&mut image, (200, 200), 60, image::Rgb([0, 0, 0]));

        let recognizer = ScriptedRecognizer::new(vec![
            vec![
                token("3", 220.0, 100.0, 260.0, 140.0),
                token("A5.1", 200.0, 430.0, 280.0, 470.0),
            ],
            vec![token("CORRIDOR", 20.0, 20.0, 120.0, 44.0)],
            vec![token("CORRIDOR", 20.0, 20.0, 120.0, 44.0)],
        ]);
        let handle = EngineHandle::with_recognizer(Arc::new(recognizer));
        let detector = PlanDetector::new(Arc::new(handle), DetectorConfig::default());

        let result = detector.detect_page(&png_bytes(&image));
        assert!(result.error.is_none());
        assert_eq!(result.circles.len(), 1);
        let circle = &result.circles[0];
        assert_eq!(circle.circle_text, "3");
        assert_eq!(circle.page_number, "A5.1");

        assert_eq!(result.texts.len(), 1);
        assert_eq!(result.texts[0].text, "CORRIDOR");
        assert_eq!(result.texts[0].id, 1);
    }

    #[test]
    fn test_region_detection_offsets_match_full_image() {
        // The same label detected full-image and region-scoped must land
        // on identical source coordinates once the region is offset.
        let image = RgbImage::from_pixel(600, 400, image::Rgb([255, 255, 255]));
        let region = Region {
            x: 120,
            y: 80,
            w: 300,
            h: 200,
        };

        // Full-image pass: label at absolute (150, 100)-(250, 130).
        let full = ScriptedRecognizer::new(vec![
            vec![token("LOBBY", 150.0, 100.0, 250.0, 130.0)],
            vec![],
        ]);
        let full_detector = PlanDetector::new(
            Arc::new(EngineHandle::with_recognizer(Arc::new(full))),
            DetectorConfig::default(),
        );
        let full_result = full_detector.detect_page(&png_bytes(&image));

        // Region pass: same label, crop-relative (30, 20)-(130, 50).
        let scoped = ScriptedRecognizer::new(vec![
            vec![token("LOBBY", 30.0, 20.0, 130.0, 50.0)],
            vec![],
        ]);
        let region_detector = PlanDetector::new(
            Arc::new(EngineHandle::with_recognizer(Arc::new(scoped))),
            DetectorConfig::default(),
        );
        let region_result = region_detector.detect_region(&png_bytes(&image), region);

        assert_eq!(full_result.texts.len(), 1);
        assert_eq!(region_result.detections.len(), 1);
        let a = &full_result.texts[0];
        let b = &region_result.detections[0];
        assert_eq!((a.x1, a.y1, a.x2, a.y2), (b.x1, b.y1, b.x2, b.y2));
        assert!(region_result
            .cropped_image
            .starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_page_envelope_serialization_shape() {
        let result = PageDetection::empty();
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("error").is_none());
        assert!(json["circles"].as_array().unwrap().is_empty());
        assert!(json["texts"].as_array().unwrap().is_empty());

        let failed = PageDetection::failed("boom".to_string());
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["error"], "boom");
    }
}
