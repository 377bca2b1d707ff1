//! count_per_class - per-image detection counts for every known class
//!
//! Writes one CSV row per image (`image, <label>...`) in discovery order.
//! No overlays, heatmaps or risk metrics are produced.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use frame_analytics::detect::{
    detect_shared, filter_by_confidence, DetectorKind, DetectorSelection,
    DEFAULT_MODEL_INPUT_SIZE,
};
use frame_analytics::metrics::count_classes;
use frame_analytics::pipeline::{collect_images, DEFAULT_CONFIDENCE_THRESHOLD};
use frame_analytics::{AnalyticsConfig, CountReport, Frame};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "count_per_class", about = "Per-image detection counts by class")]
struct Args {
    /// Folder of images or a single image path
    #[arg(long, value_name = "PATH")]
    source: PathBuf,

    /// Output CSV path
    #[arg(long, default_value = "outputs/counts.csv", value_name = "PATH")]
    out: PathBuf,

    /// Minimum detection confidence
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    conf: f32,

    /// Detector backend (labels|stub|tract)
    #[arg(long, default_value = "labels")]
    detector: String,

    /// Directory of YOLO-format prediction files for the labels detector
    #[arg(long, value_name = "DIR")]
    labels: Option<PathBuf>,

    /// ONNX model for the tract detector
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Model input size for the tract detector
    #[arg(long, default_value_t = DEFAULT_MODEL_INPUT_SIZE)]
    imgsz: u32,

    /// Analytics config file (JSON, or TOML with a .toml extension)
    #[arg(long, env = "FRAME_ANALYTICS_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    if !(0.0..=1.0).contains(&args.conf) {
        return Err(anyhow!("confidence threshold must be within 0..=1, got {}", args.conf));
    }

    let config = {
        let _stage = ui.stage("Load configuration");
        AnalyticsConfig::load_from(args.config.as_deref())?
    };
    let backend = {
        let _stage = ui.stage("Prepare detector");
        let selection = DetectorSelection {
            kind: args.detector.parse::<DetectorKind>()?,
            labels_dir: args.labels.clone(),
            model_path: args.model.clone(),
            input_size: args.imgsz,
        };
        selection
            .build_registry(&config.catalog)?
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend available"))?
    };

    let images = collect_images(&args.source)?;
    let mut rows = Vec::with_capacity(images.len());
    {
        let _stage = ui.stage("Count detections");
        let progress = ui.progress(images.len() as u64);
        for path in &images {
            progress.inc(1);
            let counted = Frame::open(path).and_then(|frame| {
                let detections = detect_shared(&backend, &frame)
                    .with_context(|| format!("detection failed for {}", frame.image_id()))?;
                let detections = filter_by_confidence(detections, args.conf);
                Ok((frame.image_id().to_string(), count_classes(&detections)))
            });
            match counted {
                Ok(row) => rows.push(row),
                Err(e) => log::warn!("skipping {}: {:#}", path.display(), e),
            }
        }
        progress.finish_and_clear();
    }

    let report = CountReport::new(&config.catalog, rows);
    {
        let _stage = ui.stage("Write counts");
        report.write(&args.out)?;
    }
    println!("wrote counts: {}", args.out.display());
    Ok(())
}
