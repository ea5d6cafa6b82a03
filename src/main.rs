//! blueprint-vision CLI
//!
//! Runs annotation detection on a drawing image and prints the JSON
//! response envelope, full-page or region-scoped.

use anyhow::{Context, Result};
use blueprint_vision::{
    config, DetectorConfig, EngineHandle, ModelPaths, PlanDetector, Region,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Extract callout circles and text labels from a construction drawing
#[derive(Parser, Debug)]
#[command(name = "blueprint-vision")]
#[command(about = "Annotation extraction for scanned construction drawings")]
struct Args {
    /// Drawing image to analyze
    image: PathBuf,

    /// Restrict detection to a region, as x,y,w,h
    #[arg(long)]
    region: Option<String>,

    /// Pipeline configuration file (TOML); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// ONNX text detection model
    #[arg(long)]
    det_model: Option<PathBuf>,

    /// ONNX text recognition model
    #[arg(long)]
    rec_model: Option<PathBuf>,

    /// Recognition character dictionary
    #[arg(long)]
    dictionary: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let config = load_or_default_config(args.config.as_deref());

    let engine = match (&args.det_model, &args.rec_model, &args.dictionary) {
        (Some(det), Some(rec), Some(dict)) => {
            EngineHandle::onnx(ModelPaths::new(det, rec, dict))
        }
        _ => {
            warn!("OCR models not provided, running geometry-only");
            EngineHandle::disabled()
        }
    };

    let image_bytes = std::fs::read(&args.image)
        .with_context(|| format!("failed to read image {:?}", args.image))?;
    info!("analyzing {:?} ({} bytes)", args.image, image_bytes.len());

    let detector = PlanDetector::new(Arc::new(engine), config);

    let json = match args.region.as_deref() {
        Some(spec) => {
            let region = parse_region(spec)?;
            let result = detector.detect_region(&image_bytes, region);
            to_json(&result, args.pretty)?
        }
        None => {
            let result = detector.detect_page(&image_bytes);
            to_json(&result, args.pretty)?
        }
    };
    println!("{json}");

    Ok(())
}

fn load_or_default_config(path: Option<&std::path::Path>) -> DetectorConfig {
    if let Some(path) = path {
        match config::load_config(path) {
            Ok(config) => {
                info!("loaded configuration from {path:?}");
                return config;
            }
            Err(e) => warn!("failed to load {path:?}, using defaults: {e:#}"),
        }
    }
    DetectorConfig::default()
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(json)
}

fn parse_region(spec: &str) -> Result<Region> {
    let parts: Vec<&str> = spec.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        anyhow::bail!("region must be x,y,w,h (got {spec:?})");
    }
    let values: Vec<u32> = parts
        .iter()
        .map(|p| p.parse::<u32>().with_context(|| format!("bad region value {p:?}")))
        .collect::<Result<_>>()?;
    Ok(Region {
        x: values[0],
        y: values[1],
        w: values[2],
        h: values[3],
    })
}
