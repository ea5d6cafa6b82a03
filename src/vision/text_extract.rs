//! Full-page text extraction
//!
//! Two-pass OCR over the whole sheet, then token filtering, box-level
//! deduplication and a fixpoint vertical merge that reassembles stacked
//! multi-line labels ("OPEN" over "SHELL") into single boxes.

use crate::config::DetectorConfig;
use crate::ocr::{OcrToken, TextRecognizer};
use crate::text::{clean_text, is_construction_text};
use crate::vision::preprocess::normalize_contrast;
use crate::vision::{polygon_bounds, DetectedTextBox};
use image::RgbImage;
use tracing::{debug, warn};

/// Extract filtered, deduplicated, merged text boxes from a sheet image.
///
/// Pass 1 runs on the contrast-normalized image. Pass 2 runs on the raw
/// image only when pass 1 came back sparse; clean scans need not pay for
/// a second OCR round.
pub fn extract_text_boxes(
    image: &RgbImage,
    recognizer: &dyn TextRecognizer,
    config: &DetectorConfig,
) -> Vec<DetectedTextBox> {
    let mut boxes: Vec<DetectedTextBox> = Vec::new();

    let enhanced = normalize_contrast(image);
    match recognizer.detect(&enhanced, &config.ocr.params) {
        Ok(tokens) => collect_boxes(&tokens, config, &mut boxes),
        Err(e) => warn!("first OCR pass failed: {e:#}"),
    }

    if boxes.len() < config.text.second_pass_box_floor {
        debug!(
            "sparse first pass ({} boxes), running raw-image pass",
            boxes.len()
        );
        match recognizer.detect(image, &config.ocr.params) {
            Ok(tokens) => collect_boxes(&tokens, config, &mut boxes),
            Err(e) => warn!("second OCR pass failed: {e:#}"),
        }
    }

    let deduped = dedup_boxes(boxes, config.merge.duplicate_distance);
    let merged = merge_vertical(deduped, config);
    renumber(merged)
}

/// Filter tokens down to plausible label boxes and append them.
fn collect_boxes(tokens: &[OcrToken], config: &DetectorConfig, sink: &mut Vec<DetectedTextBox>) {
    for token in tokens {
        if token.confidence.is_some_and(|c| c < config.ocr.min_confidence) {
            continue;
        }
        let text = clean_text(&token.text);
        if text.len() < 2 {
            continue;
        }
        if !is_construction_text(&text) {
            continue;
        }
        let Some((min_x, min_y, max_x, max_y)) = polygon_bounds(&token.polygon) else {
            // Malformed geometry on one token skips that token only.
            continue;
        };
        let width = max_x - min_x;
        let height = max_y - min_y;
        if width < config.text.min_box_width as f32 || height < config.text.min_box_height as f32 {
            continue;
        }
        sink.push(DetectedTextBox {
            id: sink.len() as i32 + 1,
            x1: min_x as i32,
            y1: min_y as i32,
            x2: max_x as i32,
            y2: max_y as i32,
            text,
        });
    }
}

/// Drop later boxes that repeat an earlier box's text close by; the
/// two-pass OCR reads most labels twice.
fn dedup_boxes(boxes: Vec<DetectedTextBox>, max_distance: f32) -> Vec<DetectedTextBox> {
    let mut unique: Vec<DetectedTextBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let duplicate = unique.iter().any(|kept| {
            if kept.text != candidate.text {
                return false;
            }
            let (cx1, cy1) = candidate.center();
            let (cx2, cy2) = kept.center();
            ((cx1 - cx2).powi(2) + (cy1 - cy2).powi(2)).sqrt() < max_distance
        });
        if !duplicate {
            unique.push(candidate);
        }
    }
    unique
}

/// Merge vertically stacked label lines until a pass produces no merges.
///
/// A box merges with the first unmerged box below it whose vertical gap
/// sits between a small overlap tolerance and `gap_factor` times the upper
/// box's height, with horizontal overlap above `min_overlap_ratio` of the
/// narrower box. Three-plus line labels need multiple passes, hence the
/// fixpoint loop; `max_passes` caps it on pathological inputs.
fn merge_vertical(mut boxes: Vec<DetectedTextBox>, config: &DetectorConfig) -> Vec<DetectedTextBox> {
    let merge = &config.merge;
    for _pass in 0..merge.max_passes {
        boxes.sort_by_key(|b| (b.y1, b.x1));

        let mut merged: Vec<DetectedTextBox> = Vec::with_capacity(boxes.len());
        let mut used = vec![false; boxes.len()];
        let mut merged_any = false;

        for i in 0..boxes.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            let base = boxes[i].clone();
            let mut combined: Option<DetectedTextBox> = None;

            for (j, candidate) in boxes.iter().enumerate().skip(i + 1) {
                if used[j] {
                    continue;
                }
                let v_gap = candidate.y1 - base.y2;
                if v_gap < -merge.overlap_slack
                    || v_gap as f32 > base.height() as f32 * merge.gap_factor
                {
                    continue;
                }
                let overlap = base.x2.min(candidate.x2) - base.x1.max(candidate.x1);
                let narrower = base.width().min(candidate.width()).max(1);
                if overlap <= 0 || (overlap as f32 / narrower as f32) <= merge.min_overlap_ratio {
                    continue;
                }
                combined = Some(DetectedTextBox {
                    id: base.id,
                    x1: base.x1.min(candidate.x1),
                    y1: base.y1.min(candidate.y1),
                    x2: base.x2.max(candidate.x2),
                    y2: base.y2.max(candidate.y2),
                    text: format!("{} {}", base.text, candidate.text),
                });
                used[j] = true;
                merged_any = true;
                break;
            }

            merged.push(combined.unwrap_or(base));
        }

        boxes = merged;
        if !merged_any {
            break;
        }
    }
    boxes
}

/// Ids carry final ordering only; reassign 1..N.
fn renumber(mut boxes: Vec<DetectedTextBox>) -> Vec<DetectedTextBox> {
    for (i, b) in boxes.iter_mut().enumerate() {
        b.id = i as i32 + 1;
    }
    boxes
}
