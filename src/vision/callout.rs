//! Callout annotation extraction
//!
//! Reads the text inside localized callout circles. Bubble convention on
//! construction sheets: detail number in the top half, sheet reference in
//! the bottom half. Each circle is cropped with padding, enhanced,
//! upscaled and OCR'd; tokens are split by vertical position and the two
//! fields are derived through an ordered chain of recovery strategies.

use crate::config::DetectorConfig;
use crate::ocr::{OcrToken, TextRecognizer};
use crate::text::{clean_text, normalize_page_reference};
use crate::vision::preprocess::{normalize_contrast, upscale_for_ocr};
use crate::vision::{polygon_center_y, DetectedCircle};
use image::imageops;
use image::RgbImage;
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Loose sheet-reference shape: a letter, digits, optionally a separator
/// and more digits, anywhere in the joined bottom text.
static FLEX_PAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]\s*\d+\s*[.\-]?\s*\d*").expect("valid regex"));

/// Bare decimal like `9.1`, recoverable with the default series letter.
static BARE_DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+$").expect("valid regex"));

/// Detail numbers are 1-4 digit numerals.
static DETAIL_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,4}$").expect("valid regex"));

/// OCR each localized circle and derive its annotation fields.
///
/// `recognizer` may be absent (engine unavailable); circles then carry
/// geometry only. A failed OCR call skips that one circle's text, never
/// the batch.
pub fn extract_callouts(
    image: &RgbImage,
    circles: &[(i32, i32, i32)],
    recognizer: Option<&Arc<dyn TextRecognizer>>,
    config: &DetectorConfig,
) -> Vec<DetectedCircle> {
    let (img_w, img_h) = image.dimensions();
    let pad = config.circle.crop_padding as i64;

    let mut results = Vec::with_capacity(circles.len());
    for (i, &(x, y, r)) in circles.iter().enumerate() {
        let (x64, y64, r64) = (x as i64, y as i64, r as i64);
        let left = (x64 - r64 - pad).max(0) as u32;
        let top = (y64 - r64 - pad).max(0) as u32;
        let right = ((x64 + r64 + pad).max(0) as u32).min(img_w);
        let bottom = ((y64 + r64 + pad).max(0) as u32).min(img_h);

        let mut top_texts: Vec<String> = Vec::new();
        let mut bottom_texts: Vec<String> = Vec::new();

        if right > left && bottom > top {
            if let Some(recognizer) = recognizer {
                let crop = imageops::crop_imm(image, left, top, right - left, bottom - top)
                    .to_image();
                let prepared = upscale_for_ocr(&normalize_contrast(&crop));
                let mid_y = prepared.height() as f32 / 2.0;

                match recognizer.detect(&prepared, &config.ocr.params) {
                    Ok(tokens) => {
                        split_tokens(
                            &tokens,
                            mid_y,
                            config.ocr.min_confidence,
                            &mut top_texts,
                            &mut bottom_texts,
                        );
                    }
                    Err(e) => {
                        warn!("OCR failed for circle {}: {e:#}", i + 1);
                    }
                }
            } else {
                debug!("no OCR engine, circle {} kept geometry-only", i + 1);
            }
        }

        let page_number = derive_page_number(&bottom_texts, &config.sheet.default_series_letter);
        let circle_text = derive_circle_text(&top_texts);

        results.push(DetectedCircle {
            id: (i + 1) as i32,
            x,
            y,
            r,
            page_number,
            circle_text,
            raw_texts_top: top_texts,
            raw_texts_bottom: bottom_texts,
        });
    }

    results
}

/// Partition confident tokens by vertical centroid against the crop's
/// mid-height. Tokens with malformed geometry land in the bottom half,
/// the page-reference pool, which is the safer guess.
fn split_tokens(
    tokens: &[OcrToken],
    mid_y: f32,
    min_confidence: f32,
    top_texts: &mut Vec<String>,
    bottom_texts: &mut Vec<String>,
) {
    for token in tokens {
        if token.confidence.is_some_and(|c| c < min_confidence) {
            continue;
        }
        let text = clean_text(&token.text);
        if text.is_empty() {
            continue;
        }
        match polygon_center_y(&token.polygon) {
            Some(center_y) if center_y < mid_y => top_texts.push(text),
            Some(_) => bottom_texts.push(text),
            None => bottom_texts.push(text),
        }
    }
}

/// Recover the sheet reference from the bottom-half tokens. Ordered
/// strategies, first success wins.
fn derive_page_number(bottom_texts: &[String], default_letter: &str) -> String {
    // 1) flexible pattern over the joined string
    let joined = bottom_texts.join(" ");
    if let Some(m) = FLEX_PAGE.find(&joined) {
        if let Some(canonical) = normalize_page_reference(m.as_str()) {
            return canonical;
        }
    }

    // 2) each token on its own
    for text in bottom_texts {
        if let Some(canonical) = normalize_page_reference(text) {
            return canonical;
        }
    }

    // 3) last resort: bare digits.digits, assume the dominant sheet series
    for text in bottom_texts {
        let trimmed = text.trim();
        if BARE_DECIMAL.is_match(trimmed) {
            return format!("{default_letter}{trimmed}");
        }
    }

    String::new()
}

/// First top-half token that is a plain 1-4 digit numeral.
fn derive_circle_text(top_texts: &[String]) -> String {
    top_texts
        .iter()
        .map(|t| t.trim())
        .find(|t| DETAIL_NUMBER.is_match(t))
        .map(str::to_string)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use crate::ocr::OcrParams;

    fn token(text: &str, y0: f32, y1: f32, confidence: Option<f32>) -> OcrToken {
        OcrToken {
            polygon: vec![(10.0, y0), (60.0, y0), (60.0, y1), (10.0, y1)],
            text: text.to_string(),
            confidence,
        }
    }

    struct FixedRecognizer(Vec<OcrToken>);

    impl TextRecognizer for FixedRecognizer {
        fn detect(&self, _image: &RgbImage, _params: &OcrParams) -> Result<Vec<OcrToken>> {
            Ok(self.0.clone())
        }
    }

    struct FailingRecognizer;

    impl TextRecognizer for FailingRecognizer {
        fn detect(&self, _image: &RgbImage, _params: &OcrParams) -> Result<Vec<OcrToken>> {
            anyhow::bail!("engine exploded")
        }
    }

    #[test]
    fn test_derive_page_number_from_joined_tokens() {
        let bottom = vec!["A5".to_string(), ".1".to_string()];
        assert_eq!(derive_page_number(&bottom, "A"), "A5.1");
    }

    #[test]
    fn test_derive_page_number_merged_token() {
        let bottom = vec!["??".to_string(), "a91".to_string()];
        assert_eq!(derive_page_number(&bottom, "A"), "A9.1");
    }

    #[test]
    fn test_derive_page_number_per_token_fallback() {
        // The joined-string match ("A5.") fails normalization; the
        // token-level pass then recovers the real reference.
        let bottom = vec!["A5.".to_string(), "B22".to_string()];
        assert_eq!(derive_page_number(&bottom, "A"), "B2.2");
    }

    #[test]
    fn test_derive_page_number_bare_decimal_gets_series_letter() {
        let bottom = vec!["9.1".to_string()];
        assert_eq!(derive_page_number(&bottom, "A"), "A9.1");
        assert_eq!(derive_page_number(&bottom, "M"), "M9.1");
    }

    #[test]
    fn test_derive_page_number_empty_when_nothing_matches() {
        let bottom = vec!["????".to_string()];
        assert_eq!(derive_page_number(&bottom, "A"), "");
        assert_eq!(derive_page_number(&[], "A"), "");
    }

    #[test]
    fn test_derive_circle_text_picks_first_numeral() {
        let top = vec!["DETAIL".to_string(), "3".to_string(), "12".to_string()];
        assert_eq!(derive_circle_text(&top), "3");
        assert_eq!(derive_circle_text(&[]), "");
        assert_eq!(derive_circle_text(&["12345".to_string()]), "");
    }

    #[test]
    fn test_split_tokens_by_mid_height() {
        let tokens = vec![
            token("3", 10.0, 30.0, Some(0.9)),
            token("A5.1", 70.0, 90.0, Some(0.9)),
        ];
        let mut top = Vec::new();
        let mut bottom = Vec::new();
        split_tokens(&tokens, 50.0, 0.3, &mut top, &mut bottom);
        assert_eq!(top, vec!["3"]);
        assert_eq!(bottom, vec!["A5.1"]);
    }

    #[test]
    fn test_split_tokens_drops_low_confidence() {
        let tokens = vec![
            token("GOOD", 10.0, 30.0, Some(0.9)),
            token("BAD", 10.0, 30.0, Some(0.1)),
            token("UNSCORED", 10.0, 30.0, None),
        ];
        let mut top = Vec::new();
        let mut bottom = Vec::new();
        split_tokens(&tokens, 50.0, 0.3, &mut top, &mut bottom);
        assert_eq!(top, vec!["GOOD", "UNSCORED"]);
        assert!(bottom.is_empty());
    }

    #[test]
    fn test_split_tokens_malformed_geometry_goes_bottom() {
        let tokens = vec![OcrToken {
            polygon: vec![],
            text: "a5.1".to_string(),
            confidence: Some(0.8),
        }];
        let mut top = Vec::new();
        let mut bottom = Vec::new();
        split_tokens(&tokens, 50.0, 0.3, &mut top, &mut bottom);
        assert!(top.is_empty());
        assert_eq!(bottom, vec!["A5.1"]);
    }

    #[test]
    fn test_extract_callouts_end_to_end() {
        // 160px crop upscales 3x to 480; token y-centers at 120 (top) and
        // 450 (bottom) straddle the 240px midline.
        let image = RgbImage::from_pixel(400, 400, image::Rgb([255, 255, 255]));
        let recognizer: Arc<dyn TextRecognizer> = Arc::new(FixedRecognizer(vec![
            token("3", 100.0, 140.0, Some(0.9)),
            token("A5.1", 430.0, 470.0, Some(0.9)),
        ]));
        let config = DetectorConfig::default();

        let circles = extract_callouts(&image, &[(200, 200, 60)], Some(&recognizer), &config);
        assert_eq!(circles.len(), 1);
        let c = &circles[0];
        assert_eq!(c.id, 1);
        assert_eq!((c.x, c.y, c.r), (200, 200, 60));
        assert_eq!(c.circle_text, "3");
        assert_eq!(c.page_number, "A5.1");
    }

    #[test]
    fn test_extract_callouts_without_engine_keeps_geometry() {
        let image = RgbImage::from_pixel(300, 300, image::Rgb([255, 255, 255]));
        let config = DetectorConfig::default();
        let circles = extract_callouts(&image, &[(150, 150, 55)], None, &config);
        assert_eq!(circles.len(), 1);
        assert!(circles[0].page_number.is_empty());
        assert!(circles[0].raw_texts_top.is_empty());
    }

    #[test]
    fn test_extract_callouts_survives_ocr_failure() {
        let image = RgbImage::from_pixel(300, 300, image::Rgb([255, 255, 255]));
        let recognizer: Arc<dyn TextRecognizer> = Arc::new(FailingRecognizer);
        let config = DetectorConfig::default();
        let circles = extract_callouts(&image, &[(150, 150, 55)], Some(&recognizer), &config);
        assert_eq!(circles.len(), 1);
        assert!(circles[0].circle_text.is_empty());
    }
}
