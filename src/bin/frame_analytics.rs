//! frame_analytics - per-image traffic metrics, overlays and heatmaps
//!
//! For every image in a folder (or a single image) this tool:
//! 1. Obtains detections from the selected detector backend
//! 2. Drops detections below the confidence threshold
//! 3. Computes class counts, Congestion Index, Proximity Risk Index and occupancy
//! 4. Writes a labelled overlay and a density heatmap
//! 5. Writes `metrics.csv` and `summary.json` for the whole batch

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use frame_analytics::detect::{DetectorKind, DetectorSelection, DEFAULT_MODEL_INPUT_SIZE};
use frame_analytics::pipeline::{collect_images, DEFAULT_CONFIDENCE_THRESHOLD};
use frame_analytics::{
    run_batch, AnalyticsConfig, BatchOptions, FrameAnalyticsEngine, HeatmapMode,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "frame_analytics",
    about = "Per-image traffic metrics, overlays and density heatmaps"
)]
struct Args {
    /// Folder of images or a single image path
    #[arg(long, value_name = "PATH")]
    source: PathBuf,

    /// Output directory
    #[arg(long, default_value = "outputs/analytics", value_name = "DIR")]
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

    /// Skip heatmap rendering
    #[arg(long)]
    no_heatmap: bool,

    /// When to render heatmaps (always|non-empty|off)
    #[arg(long, default_value = "always", value_name = "MODE")]
    heatmap_mode: String,

    /// Worker threads for image analysis
    #[arg(long, default_value_t = 1)]
    threads: usize,

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

    let heatmap_mode = if args.no_heatmap {
        HeatmapMode::Off
    } else {
        args.heatmap_mode.parse::<HeatmapMode>()?
    };
    let options = BatchOptions {
        source: args.source.clone(),
        out_dir: args.out.clone(),
        confidence_threshold: args.conf,
        heatmap_mode,
        threads: args.threads,
    };
    options.validate()?;

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

    let engine = {
        let _stage = ui.stage("Load overlay style");
        FrameAnalyticsEngine::new(config)
    };

    let total = collect_images(&options.source)?.len();
    let outcome = {
        let _stage = ui.stage("Analyze images");
        let progress = ui.progress(total as u64);
        let outcome = run_batch(&options, &engine, &backend, |path| {
            progress.inc(1);
            if let Some(name) = path.file_name() {
                progress.set_message(name.to_string_lossy().into_owned());
            }
        })?;
        progress.finish_and_clear();
        outcome
    };

    println!("wrote metrics: {}", outcome.layout.metrics_path().display());
    println!("wrote summary: {}", outcome.layout.summary_path().display());
    println!("overlays: {}", outcome.layout.overlays_dir().display());
    if heatmap_mode != HeatmapMode::Off {
        println!("heatmaps: {}", outcome.layout.heatmaps_dir().display());
    }
    println!(
        "processed {} image(s), skipped {}",
        outcome.summary.images_processed, outcome.summary.images_skipped
    );
    for skipped in &outcome.skipped {
        println!("  skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    Ok(())
}
