//! Pipeline Configuration
//!
//! Every tuned constant in the extraction pipeline lives here, stored in
//! TOML format. Defaults are the values calibrated against the reference
//! drawing set; they are fixed per deployment, not adaptive.

use crate::ocr::OcrParams;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level pipeline settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Circle localization settings
    pub circle: CircleConfig,
    /// OCR invocation settings
    pub ocr: OcrConfig,
    /// Text box filtering settings
    pub text: TextFilterConfig,
    /// Deduplication and vertical-merge settings
    pub merge: MergeConfig,
    /// Drawing-set conventions
    pub sheet: SheetConfig,
}

/// Hough circle detector parameters, tuned for callout bubbles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircleConfig {
    /// Inverse accumulator resolution; 1.2 trades precision for vote density.
    pub accumulator_resolution: f32,
    /// Minimum distance between accepted circle centers (pixels).
    pub min_center_distance: u32,
    /// Canny high threshold for the edge map (low threshold is half).
    pub edge_threshold: f32,
    /// Minimum accumulator votes for a center candidate.
    pub accumulator_threshold: u32,
    /// Radius band for callout bubbles (pixels).
    pub min_radius: u32,
    pub max_radius: u32,
    /// Padding around a circle's bounding square when cropping for OCR.
    pub crop_padding: u32,
}

impl Default for CircleConfig {
    fn default() -> Self {
        Self {
            accumulator_resolution: 1.2,
            min_center_distance: 20,
            edge_threshold: 50.0,
            accumulator_threshold: 100,
            min_radius: 50,
            max_radius: 100,
            crop_padding: 20,
        }
    }
}

/// OCR invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Tokens below this confidence are discarded before classification.
    pub min_confidence: f32,
    /// Parameters forwarded to the engine on every call.
    pub params: OcrParams,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            params: OcrParams::default(),
        }
    }
}

/// Raw text box filters applied at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextFilterConfig {
    /// Boxes narrower/shorter than this are noise (pixels).
    pub min_box_width: u32,
    pub min_box_height: u32,
    /// Run the raw-image second OCR pass only below this box count.
    pub second_pass_box_floor: usize,
}

impl Default for TextFilterConfig {
    fn default() -> Self {
        Self {
            min_box_width: 10,
            min_box_height: 10,
            second_pass_box_floor: 10,
        }
    }
}

/// Deduplication and multi-line merge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Same-text boxes with centers closer than this are duplicates (pixels).
    pub duplicate_distance: f32,
    /// Allowed overlap between stacked lines (pixels of negative gap).
    pub overlap_slack: i32,
    /// Maximum vertical gap as a multiple of the upper box's height.
    pub gap_factor: f32,
    /// Required horizontal overlap as a fraction of the narrower box.
    pub min_overlap_ratio: f32,
    /// Hard bound on merge passes; each pass strictly shrinks the box list.
    pub max_passes: u32,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            duplicate_distance: 50.0,
            overlap_slack: 5,
            gap_factor: 1.2,
            min_overlap_ratio: 0.3,
            max_passes: 32,
        }
    }
}

/// Conventions of the drawing set being processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetConfig {
    /// Letter prefixed to a bare `digits.digits` page reference when no
    /// series letter was recovered from the bubble. Drawing sets dominated
    /// by architectural sheets use "A".
    pub default_series_letter: String,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            default_series_letter: "A".to_string(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<DetectorConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: DetectorConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &DetectorConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
