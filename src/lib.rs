//! blueprint-vision - Annotation extraction for scanned construction drawings
//!
//! Localizes circular callout markers (detail number over sheet reference)
//! and free-floating text labels on sheet images, returning clean,
//! deduplicated, semantically-typed records for a drawing-review overlay.
//!
//! The pipeline is synchronous per call and shares only the lazily
//! initialized OCR engine handle across calls; see [`ocr::EngineHandle`].

pub mod config;
pub mod detector;
pub mod ocr;
pub mod text;
pub mod vision;

pub use config::DetectorConfig;
pub use detector::{PageDetection, PlanDetector, RegionDetection};
pub use ocr::{EngineHandle, ModelPaths, OcrParams, OcrToken, TextRecognizer};
pub use vision::{DetectedCircle, DetectedTextBox, Region};
