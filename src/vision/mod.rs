//! Vision Layer
//!
//! Circle localization, region preprocessing and text extraction on decoded
//! drawing images. All coordinates are pixels in the source image's space
//! with y growing downward.

pub mod callout;
pub mod circles;
pub mod preprocess;
pub mod region;
pub mod text_extract;

use serde::{Deserialize, Serialize};

/// A callout circle with the annotation text recovered from inside it.
///
/// `id` follows detection order and is stable within a single run only.
/// `page_number` is either empty or canonical (`A9.1` style); `circle_text`
/// is either empty or a 1-4 digit detail number. The raw token lists are
/// kept for debugging what OCR actually saw inside the bubble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedCircle {
    pub id: i32,
    /// Center x in source-image pixels.
    pub x: i32,
    /// Center y in source-image pixels.
    pub y: i32,
    /// Radius in pixels, within the configured detection band.
    pub r: i32,
    pub page_number: String,
    pub circle_text: String,
    pub raw_texts_top: Vec<String>,
    pub raw_texts_bottom: Vec<String>,
}

/// An axis-aligned text label box. Ids are renumbered 1..N after
/// deduplication and merging; they carry ordering only, no identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedTextBox {
    pub id: i32,
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub text: String,
}

impl DetectedTextBox {
    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.x1 + self.x2) as f32 / 2.0,
            (self.y1 + self.y2) as f32 / 2.0,
        )
    }
}

/// Caller-supplied sub-rectangle of the source image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Axis-aligned bounds of a token polygon as (min_x, min_y, max_x, max_y).
/// Returns `None` for an empty or degenerate polygon.
pub fn polygon_bounds(polygon: &[(f32, f32)]) -> Option<(f32, f32, f32, f32)> {
    if polygon.is_empty() {
        return None;
    }
    let min_x = polygon.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
    let min_y = polygon.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
    let max_x = polygon.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
    let max_y = polygon.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);
    if !min_x.is_finite() || !min_y.is_finite() || !max_x.is_finite() || !max_y.is_finite() {
        return None;
    }
    Some((min_x, min_y, max_x, max_y))
}

/// Vertical centroid of a token polygon, or `None` when the geometry is
/// missing or malformed.
pub fn polygon_center_y(polygon: &[(f32, f32)]) -> Option<f32> {
    if polygon.is_empty() {
        return None;
    }
    let sum: f32 = polygon.iter().map(|p| p.1).sum();
    let center = sum / polygon.len() as f32;
    center.is_finite().then_some(center)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polygon_bounds() {
        let poly = vec![(10.0, 5.0), (30.0, 5.0), (30.0, 15.0), (10.0, 15.0)];
        assert_eq!(polygon_bounds(&poly), Some((10.0, 5.0, 30.0, 15.0)));
        assert_eq!(polygon_bounds(&[]), None);
    }

    #[test]
    fn test_polygon_center_y() {
        let poly = vec![(0.0, 10.0), (0.0, 30.0)];
        assert_eq!(polygon_center_y(&poly), Some(20.0));
        assert_eq!(polygon_center_y(&[]), None);
    }

    #[test]
    fn test_polygon_center_y_rejects_nan() {
        let poly = vec![(0.0, f32::NAN)];
        assert_eq!(polygon_center_y(&poly), None);
    }

    #[test]
    fn test_box_center() {
        let b = DetectedTextBox {
            id: 1,
            x1: 0,
            y1: 0,
            x2: 100,
            y2: 20,
            text: "OPEN".into(),
        };
        assert_eq!(b.center(), (50.0, 10.0));
        assert_eq!(b.width(), 100);
        assert_eq!(b.height(), 20);
    }
}
