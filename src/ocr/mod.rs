//! OCR Adapter Layer
//!
//! Contract between the extraction pipeline and the OCR engine: the token
//! shape the engine returns, the fixed tuning parameters the pipeline
//! applies, and the process-wide engine handle. The pipeline never talks to
//! an engine directly; it goes through [`TextRecognizer`] so the engine can
//! be swapped for a test double.

pub mod engine;
pub mod tensor;

pub use engine::{ModelPaths, OnnxRecognizer};

use anyhow::Result;
use image::RgbImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Named tuning parameters passed to the OCR engine on every call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrParams {
    /// Paragraph grouping; always off for drawings, where spatially close
    /// labels are unrelated.
    pub paragraph: bool,
    /// Binarization threshold on the detector's text probability map.
    pub text_threshold: f32,
    /// Minimum mean score for a detected text region to survive.
    pub low_text: f32,
    /// Gap tolerance when linking adjacent detected fragments.
    pub link_threshold: f32,
    /// Pre-detection magnification; small drawing text needs > 1.
    pub mag_ratio: f32,
}

impl Default for OcrParams {
    fn default() -> Self {
        Self {
            paragraph: false,
            text_threshold: 0.5,
            low_text: 0.35,
            link_threshold: 0.4,
            mag_ratio: 1.5,
        }
    }
}

/// One recognized text fragment. Read-only input to the pipeline.
#[derive(Debug, Clone)]
pub struct OcrToken {
    /// Bounding polygon in the coordinates of the image passed to `detect`.
    pub polygon: Vec<(f32, f32)>,
    /// Recognized text, unnormalized.
    pub text: String,
    /// Recognition confidence (0.0 - 1.0); engines without a usable score
    /// report `None`.
    pub confidence: Option<f32>,
}

/// Text detection + recognition over a 3-channel raster.
pub trait TextRecognizer: Send + Sync {
    fn detect(&self, image: &RgbImage, params: &OcrParams) -> Result<Vec<OcrToken>>;
}

enum EngineState {
    Uninitialized,
    Ready(Arc<dyn TextRecognizer>),
    Failed,
}

/// Process-wide handle to the OCR engine.
///
/// Initialization runs at most once, on first use; a failed initialization
/// is remembered so later calls degrade to geometry-only results instead of
/// retrying a broken setup. The handle is passed explicitly to the detector
/// rather than living in global state, so tests can hand in a double.
pub struct EngineHandle {
    state: Mutex<EngineState>,
    loader: Box<dyn Fn() -> Result<Arc<dyn TextRecognizer>> + Send + Sync>,
}

impl EngineHandle {
    /// Handle backed by the ONNX engine, loaded lazily from `models`.
    pub fn onnx(models: ModelPaths) -> Self {
        Self::from_loader(move || {
            let recognizer = OnnxRecognizer::load(&models)?;
            Ok(Arc::new(recognizer) as Arc<dyn TextRecognizer>)
        })
    }

    /// Handle that initializes via an arbitrary loader on first use.
    pub fn from_loader<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn TextRecognizer>> + Send + Sync + 'static,
    {
        Self {
            state: Mutex::new(EngineState::Uninitialized),
            loader: Box::new(loader),
        }
    }

    /// Handle wrapping an already-built recognizer (or a test double).
    pub fn with_recognizer(recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self {
            state: Mutex::new(EngineState::Ready(recognizer)),
            loader: Box::new(|| anyhow::bail!("recognizer was supplied pre-built")),
        }
    }

    /// Handle with no engine at all; every `get` returns `None`.
    pub fn disabled() -> Self {
        Self {
            state: Mutex::new(EngineState::Failed),
            loader: Box::new(|| anyhow::bail!("OCR engine disabled")),
        }
    }

    /// The shared recognizer, initializing it on first call. Returns `None`
    /// when the engine is unavailable; callers skip OCR-dependent steps.
    pub fn get(&self) -> Option<Arc<dyn TextRecognizer>> {
        let mut state = self.state.lock();
        match &*state {
            EngineState::Ready(r) => Some(Arc::clone(r)),
            EngineState::Failed => None,
            EngineState::Uninitialized => match (self.loader)() {
                Ok(r) => {
                    info!("OCR engine initialized");
                    *state = EngineState::Ready(Arc::clone(&r));
                    Some(r)
                }
                Err(e) => {
                    warn!("OCR engine initialization failed, continuing without OCR: {e:#}");
                    *state = EngineState::Failed;
                    None
                }
            },
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.state.lock(), EngineState::Ready(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullRecognizer;

    impl TextRecognizer for NullRecognizer {
        fn detect(&self, _image: &RgbImage, _params: &OcrParams) -> Result<Vec<OcrToken>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_default_params_match_tuning() {
        let p = OcrParams::default();
        assert!(!p.paragraph);
        assert_eq!(p.text_threshold, 0.5);
        assert_eq!(p.low_text, 0.35);
        assert_eq!(p.link_threshold, 0.4);
        assert_eq!(p.mag_ratio, 1.5);
    }

    #[test]
    fn test_handle_initializes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = EngineHandle::from_loader(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullRecognizer) as Arc<dyn TextRecognizer>)
        });

        assert!(!handle.is_ready());
        assert!(handle.get().is_some());
        assert!(handle.get().is_some());
        assert!(handle.is_ready());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_remembers_failed_init() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = EngineHandle::from_loader(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("models missing")
        });

        assert!(handle.get().is_none());
        assert!(handle.get().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!handle.is_ready());
    }

    #[test]
    fn test_disabled_handle() {
        let handle = EngineHandle::disabled();
        assert!(handle.get().is_none());
    }

    #[test]
    fn test_with_recognizer_is_ready_immediately() {
        let handle = EngineHandle::with_recognizer(Arc::new(NullRecognizer));
        assert!(handle.is_ready());
        assert!(handle.get().is_some());
    }
}
