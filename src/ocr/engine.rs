//! ONNX-backed text recognizer
//!
//! PaddleOCR-style two-model pipeline via ONNX Runtime: a DB detection
//! model produces a text probability map, connected regions of which are
//! cropped and fed to a CTC recognition model. Session initialization
//! attempts CUDA acceleration first and falls back to CPU.

use crate::ocr::{tensor, OcrParams, OcrToken, TextRecognizer};
use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use ndarray::{Array2, Axis, Ix3, Ix4};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Longest side fed to the detection model.
const DET_TARGET_SIZE: u32 = 960;
/// Input height of the recognition model.
const REC_HEIGHT: u32 = 48;
/// Maximum input width of the recognition model.
const REC_MAX_WIDTH: u32 = 640;
/// PaddleOCR normalization: maps [0, 255] to [-1, 1].
const MEAN: [f32; 3] = [0.5, 0.5, 0.5];
const STD: [f32; 3] = [0.5, 0.5, 0.5];
/// Box expansion ratio applied to tight detection regions before cropping.
const UNCLIP_RATIO: f32 = 1.5;
/// Components smaller than this many pixels are specks, not text.
const MIN_COMPONENT_AREA: u32 = 6;
/// Bound on component-linking passes.
const MAX_LINK_PASSES: usize = 16;

/// Model and dictionary locations for the ONNX engine.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    detection_model: PathBuf,
    recognition_model: PathBuf,
    dictionary: PathBuf,
}

impl ModelPaths {
    pub fn new(
        detection_model: impl AsRef<Path>,
        recognition_model: impl AsRef<Path>,
        dictionary: impl AsRef<Path>,
    ) -> Self {
        Self {
            detection_model: detection_model.as_ref().to_path_buf(),
            recognition_model: recognition_model.as_ref().to_path_buf(),
            dictionary: dictionary.as_ref().to_path_buf(),
        }
    }
}

/// Engine initialization failures that are worth matching on.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    MissingModel(PathBuf),
    #[error("character dictionary has no entries: {0}")]
    EmptyDictionary(PathBuf),
}

/// Text detection + recognition over ONNX Runtime sessions.
///
/// Sessions sit behind mutexes so a single engine handle can serve
/// concurrent callers; each inference locks only the session it runs.
pub struct OnnxRecognizer {
    det: Mutex<Session>,
    det_input: String,
    rec: Mutex<Session>,
    rec_input: String,
    charset: Vec<String>,
}

impl OnnxRecognizer {
    /// Load both models and the character dictionary.
    pub fn load(paths: &ModelPaths) -> Result<Self> {
        for path in [&paths.detection_model, &paths.recognition_model, &paths.dictionary] {
            if !path.exists() {
                return Err(ModelError::MissingModel(path.clone()).into());
            }
        }

        let det = build_session(&paths.detection_model)?;
        let rec = build_session(&paths.recognition_model)?;
        let charset = load_charset(&paths.dictionary)?;

        let det_input = first_input_name(&det)?;
        let rec_input = first_input_name(&rec)?;

        info!(
            "OCR models loaded: det {:?} rec {:?}, {} dictionary entries",
            paths.detection_model,
            paths.recognition_model,
            charset.len()
        );

        Ok(Self {
            det: Mutex::new(det),
            det_input,
            rec: Mutex::new(rec),
            rec_input,
            charset,
        })
    }

    /// Run the detection model and return its text probability map.
    fn probability_map(&self, det_input: &RgbImage) -> Result<Array2<f32>> {
        let tensor_in =
            tensor::hwc_to_nchw(&tensor::normalize(&tensor::rgb_to_f32(det_input), &MEAN, &STD));
        let input_value = Value::from_array(tensor_in).context("failed to build input tensor")?;
        let mut session = self.det.lock();
        let outputs = session
            .run(ort::inputs![&self.det_input => input_value])
            .context("detection inference failed")?;
        let view = outputs[0]
            .try_extract_array::<f32>()
            .context("detection output is not an f32 tensor")?;
        let view = view
            .into_dimensionality::<Ix4>()
            .context("unexpected detection output shape")?;
        Ok(view.index_axis(Axis(0), 0).index_axis(Axis(0), 0).to_owned())
    }

    /// Recognize one text crop. Returns the decoded string and its mean
    /// per-character probability.
    fn recognize_crop(&self, crop: &RgbImage) -> Result<(String, f32)> {
        let rec_input = tensor::resize_for_recognition(crop, REC_HEIGHT, REC_MAX_WIDTH);
        let tensor_in =
            tensor::hwc_to_nchw(&tensor::normalize(&tensor::rgb_to_f32(&rec_input), &MEAN, &STD));
        let input_value = Value::from_array(tensor_in).context("failed to build input tensor")?;
        let mut session = self.rec.lock();
        let outputs = session
            .run(ort::inputs![&self.rec_input => input_value])
            .context("recognition inference failed")?;
        let view = outputs[0]
            .try_extract_array::<f32>()
            .context("recognition output is not an f32 tensor")?;
        let view = view
            .into_dimensionality::<Ix3>()
            .context("unexpected recognition output shape")?;
        let steps = view.index_axis(Axis(0), 0).to_owned();
        Ok(ctc_greedy_decode(&steps, &self.charset))
    }
}

impl TextRecognizer for OnnxRecognizer {
    fn detect(&self, image: &RgbImage, params: &OcrParams) -> Result<Vec<OcrToken>> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Ok(Vec::new());
        }

        // Magnify before detection; small drawing text is unreadable at
        // native scale.
        let mag = params.mag_ratio.max(1.0);
        let magnified = if mag > 1.0 {
            imageops::resize(
                image,
                ((w as f32 * mag) as u32).max(1),
                ((h as f32 * mag) as u32).max(1),
                FilterType::CatmullRom,
            )
        } else {
            image.clone()
        };

        let (det_input, scale) = tensor::resize_for_detection(&magnified, DET_TARGET_SIZE);
        let prob = self.probability_map(&det_input)?;
        let regions = score_regions(&prob, params);
        debug!("detector found {} text regions", regions.len());

        let (mw, mh) = magnified.dimensions();
        let inv_scale = 1.0 / scale;
        let mut tokens = Vec::with_capacity(regions.len());
        for region in regions {
            // Region coords are in detection-input space; map back to the
            // magnified image for cropping.
            let x0 = ((region.x0 as f32 * inv_scale) as u32).min(mw.saturating_sub(1));
            let y0 = ((region.y0 as f32 * inv_scale) as u32).min(mh.saturating_sub(1));
            let x1 = ((region.x1 as f32 * inv_scale).ceil() as u32).clamp(x0 + 1, mw);
            let y1 = ((region.y1 as f32 * inv_scale).ceil() as u32).clamp(y0 + 1, mh);

            let crop = imageops::crop_imm(&magnified, x0, y0, x1 - x0, y1 - y0).to_image();
            let (text, confidence) = match self.recognize_crop(&crop) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("recognition failed for region, skipping: {e:#}");
                    continue;
                }
            };
            if text.is_empty() {
                continue;
            }

            // Token polygon in the caller's original coordinates.
            let fx0 = x0 as f32 / mag;
            let fy0 = y0 as f32 / mag;
            let fx1 = x1 as f32 / mag;
            let fy1 = y1 as f32 / mag;
            tokens.push(OcrToken {
                polygon: vec![(fx0, fy0), (fx1, fy0), (fx1, fy1), (fx0, fy1)],
                text,
                confidence: Some(confidence),
            });
        }

        Ok(tokens)
    }
}

/// Axis-aligned text region in detection-input pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RegionBox {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
    score: f32,
}

impl RegionBox {
    fn height(&self) -> u32 {
        self.y1 - self.y0
    }
}

/// Turn the probability map into scored, linked, expanded text regions.
fn score_regions(prob: &Array2<f32>, params: &OcrParams) -> Vec<RegionBox> {
    let (h, w) = prob.dim();
    if h == 0 || w == 0 {
        return Vec::new();
    }

    // Segment at the permissive low_text level so full glyph extents are
    // captured; confidence gating happens per region below.
    let binary = GrayImage::from_fn(w as u32, h as u32, |x, y| {
        if prob[[y as usize, x as usize]] >= params.low_text {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });

    let labels = imageproc::region_labelling::connected_components(
        &binary,
        imageproc::region_labelling::Connectivity::Eight,
        Luma([0u8]),
    );

    // Gather per-component extents and peak confidence.
    use std::collections::HashMap;
    let mut extents: HashMap<u32, (u32, u32, u32, u32, f32, u32)> = HashMap::new();
    for (x, y, label) in labels.enumerate_pixels().map(|(x, y, l)| (x, y, l.0[0])) {
        if label == 0 {
            continue;
        }
        let p = prob[[y as usize, x as usize]];
        let entry = extents.entry(label).or_insert((x, y, x, y, 0.0, 0));
        entry.0 = entry.0.min(x);
        entry.1 = entry.1.min(y);
        entry.2 = entry.2.max(x);
        entry.3 = entry.3.max(y);
        entry.4 = entry.4.max(p);
        entry.5 += 1;
    }

    let mut regions: Vec<RegionBox> = extents
        .into_values()
        .filter(|(_, _, _, _, _, count)| *count >= MIN_COMPONENT_AREA)
        .map(|(x0, y0, x1, y1, peak, _)| RegionBox {
            x0,
            y0,
            x1: x1 + 1,
            y1: y1 + 1,
            score: peak,
        })
        .filter(|r| r.score >= params.text_threshold)
        .collect();

    link_regions(&mut regions, params.link_threshold);

    // Expand tight regions before cropping so ascenders/descenders and
    // edge glyph halves survive.
    let mut expanded: Vec<RegionBox> = regions
        .into_iter()
        .map(|r| {
            let bw = (r.x1 - r.x0) as f32;
            let bh = (r.y1 - r.y0) as f32;
            let pad = (bw * bh * UNCLIP_RATIO / (2.0 * (bw + bh))).max(1.0);
            RegionBox {
                x0: (r.x0 as f32 - pad).max(0.0) as u32,
                y0: (r.y0 as f32 - pad).max(0.0) as u32,
                x1: ((r.x1 as f32 + pad) as u32).min(w as u32),
                y1: ((r.y1 as f32 + pad) as u32).min(h as u32),
                score: r.score,
            }
        })
        .collect();

    // Reading order: top-to-bottom, then left-to-right.
    expanded.sort_by_key(|r| (r.y0, r.x0));
    expanded
}

/// Fuse horizontally adjacent fragments of one text line. The allowed gap
/// scales with line height through `link_threshold`.
fn link_regions(regions: &mut Vec<RegionBox>, link_threshold: f32) {
    for _ in 0..MAX_LINK_PASSES {
        let mut merged_any = false;
        'outer: for i in 0..regions.len() {
            for j in (i + 1)..regions.len() {
                let (a, b) = (regions[i], regions[j]);
                let overlap =
                    (a.y1.min(b.y1) as i64 - a.y0.max(b.y0) as i64).max(0) as f32;
                let min_h = a.height().min(b.height()).max(1) as f32;
                if overlap / min_h < 0.5 {
                    continue;
                }
                let gap = if a.x1 <= b.x0 {
                    (b.x0 - a.x1) as f32
                } else if b.x1 <= a.x0 {
                    (a.x0 - b.x1) as f32
                } else {
                    0.0
                };
                let max_gap = link_threshold * a.height().max(b.height()) as f32;
                if gap > max_gap {
                    continue;
                }
                regions[i] = RegionBox {
                    x0: a.x0.min(b.x0),
                    y0: a.y0.min(b.y0),
                    x1: a.x1.max(b.x1),
                    y1: a.y1.max(b.y1),
                    score: a.score.max(b.score),
                };
                regions.swap_remove(j);
                merged_any = true;
                break 'outer;
            }
        }
        if !merged_any {
            break;
        }
    }
}

/// Collapse a per-step probability matrix (T x C, blank at class 0) into
/// text and a mean per-character confidence.
fn ctc_greedy_decode(steps: &Array2<f32>, charset: &[String]) -> (String, f32) {
    let mut text = String::new();
    let mut probs: Vec<f32> = Vec::new();
    let mut last = 0usize;

    for row in steps.axis_iter(Axis(0)) {
        let (idx, p) = row
            .iter()
            .enumerate()
            .fold((0usize, f32::MIN), |best, (i, &v)| {
                if v > best.1 {
                    (i, v)
                } else {
                    best
                }
            });
        if idx != 0 && idx != last {
            if let Some(entry) = charset.get(idx) {
                text.push_str(entry);
                probs.push(p.clamp(0.0, 1.0));
            }
        }
        last = idx;
    }

    let confidence = if probs.is_empty() {
        0.0
    } else {
        probs.iter().sum::<f32>() / probs.len() as f32
    };
    (text, confidence)
}

fn build_session(path: &Path) -> Result<Session> {
    let builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?;

    // Prefer CUDA, fall back to CPU.
    let builder = match builder.with_execution_providers([CUDAExecutionProvider::default().build()])
    {
        Ok(builder) => {
            info!("CUDA execution provider enabled");
            builder
        }
        Err(e) => {
            warn!("CUDA not available, using CPU: {e}");
            Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(4)?
        }
    };

    builder
        .commit_from_file(path)
        .with_context(|| format!("failed to load ONNX model from {path:?}"))
}

fn first_input_name(session: &Session) -> Result<String> {
    session
        .inputs
        .first()
        .map(|i| i.name.clone())
        .context("model declares no inputs")
}

/// Load the recognition dictionary: one entry per line, CTC blank at
/// index 0, space appended last (PaddleOCR convention).
fn load_charset(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dictionary {path:?}"))?;
    let mut charset = vec![String::new()];
    charset.extend(content.lines().map(|line| line.to_string()));
    charset.push(" ".to_string());
    if charset.len() <= 2 {
        return Err(ModelError::EmptyDictionary(path.to_path_buf()).into());
    }
    Ok(charset)
}
