//! Batch driver: discover images, detect, analyze, write artifacts and the
//! batch report.
//!
//! Each image is all-or-nothing: if any step fails, files already written
//! for that image are removed and it contributes no report row. Artifacts a
//! previous run left for the same image are cleared before it is analyzed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use rayon::prelude::*;

use crate::detect::{detect_shared, filter_by_confidence, SharedBackend};
use crate::engine::{FrameAnalyticsEngine, HeatmapMode};
use crate::frame::Frame;
use crate::metrics::FrameMetrics;
use crate::report::{BatchSummary, MetricsReport, METRICS_FILE_NAME, SUMMARY_FILE_NAME};

pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;

const OVERLAYS_DIR: &str = "overlays";
const HEATMAPS_DIR: &str = "heatmaps";

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// A single file is returned as-is; a directory yields its image files
/// (non-recursive), sorted by path.
pub fn collect_images(source: &Path) -> Result<Vec<PathBuf>> {
    if source.is_file() {
        return Ok(vec![source.to_path_buf()]);
    }
    if !source.is_dir() {
        return Err(anyhow!("source {} does not exist", source.display()));
    }
    let mut images = Vec::new();
    let entries = std::fs::read_dir(source)
        .with_context(|| format!("failed to list {}", source.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list {}", source.display()))?
            .path();
        if path.is_file() && is_image_file(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// Where a batch writes its artifacts.
#[derive(Clone, Debug)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn create(&self) -> Result<()> {
        for dir in [self.overlays_dir(), self.heatmaps_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn overlays_dir(&self) -> PathBuf {
        self.root.join(OVERLAYS_DIR)
    }

    pub fn heatmaps_dir(&self) -> PathBuf {
        self.root.join(HEATMAPS_DIR)
    }

    /// Overlay keeps the source file name and format.
    pub fn overlay_path(&self, image_id: &str) -> PathBuf {
        self.overlays_dir().join(image_id)
    }

    pub fn heatmap_path(&self, stem: &str) -> PathBuf {
        self.heatmaps_dir().join(format!("{stem}_heatmap.png"))
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.root.join(METRICS_FILE_NAME)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join(SUMMARY_FILE_NAME)
    }

    /// Remove the overlay and heatmap an earlier run wrote for `path`.
    pub fn clear_image(&self, path: &Path) -> Result<()> {
        let Some((name, stem)) = artifact_names(path) else {
            return Ok(());
        };
        remove_stale(&self.overlay_path(&name))?;
        remove_stale(&self.heatmap_path(&stem))
    }
}

/// File name and stem an image's artifacts are named after.
fn artifact_names(path: &Path) -> Option<(String, String)> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    let stem = path.file_stem()?.to_string_lossy().into_owned();
    Some((name, stem))
}

fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            log::debug!("removed stale artifact {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e)
            .with_context(|| format!("failed to remove stale artifact {}", path.display())),
    }
}

/// Heatmaps are named by stem, so of several images sharing one only the
/// first (in sorted order) is analyzed; the rest come back as skipped.
pub fn split_duplicate_stems(images: Vec<PathBuf>) -> (Vec<PathBuf>, Vec<SkippedImage>) {
    let mut first_by_stem: HashMap<String, PathBuf> = HashMap::new();
    let mut unique = Vec::with_capacity(images.len());
    let mut duplicates = Vec::new();
    for path in images {
        let Some((_, stem)) = artifact_names(&path) else {
            unique.push(path);
            continue;
        };
        match first_by_stem.get(&stem) {
            Some(first) => duplicates.push(SkippedImage {
                reason: format!(
                    "heatmap name {stem}_heatmap.png collides with {}",
                    first.display()
                ),
                path,
            }),
            None => {
                first_by_stem.insert(stem, path.clone());
                unique.push(path);
            }
        }
    }
    (unique, duplicates)
}

#[derive(Clone, Debug)]
pub struct BatchOptions {
    pub source: PathBuf,
    pub out_dir: PathBuf,
    pub confidence_threshold: f32,
    pub heatmap_mode: HeatmapMode,
    /// Worker threads; 0 or 1 runs images sequentially.
    pub threads: usize,
}

impl BatchOptions {
    pub fn new(source: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            out_dir: out_dir.into(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            heatmap_mode: HeatmapMode::Always,
            threads: 1,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence threshold must be within 0..=1, got {}",
                self.confidence_threshold
            ));
        }
        Ok(())
    }
}

/// An image that produced no report row.
#[derive(Clone, Debug)]
pub struct SkippedImage {
    pub path: PathBuf,
    pub reason: String,
}

pub struct BatchOutcome {
    pub report: MetricsReport,
    pub summary: BatchSummary,
    pub skipped: Vec<SkippedImage>,
    pub layout: OutputLayout,
}

/// Removes the files it tracks on drop unless committed.
struct ArtifactGuard {
    written: Vec<PathBuf>,
    committed: bool,
}

impl ArtifactGuard {
    fn new() -> Self {
        Self {
            written: Vec::new(),
            committed: false,
        }
    }

    fn track(&mut self, path: PathBuf) {
        self.written.push(path);
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.written {
            match std::fs::remove_file(path) {
                Ok(()) => log::debug!("removed partial artifact {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    log::warn!("failed to remove partial artifact {}: {}", path.display(), e)
                }
            }
        }
    }
}

/// Analyze one image and write its artifacts.
pub fn process_image(
    path: &Path,
    layout: &OutputLayout,
    options: &BatchOptions,
    engine: &FrameAnalyticsEngine,
    backend: &SharedBackend,
) -> Result<FrameMetrics> {
    layout.clear_image(path)?;
    let frame = Frame::open(path)?;
    let detections = detect_shared(backend, &frame)
        .with_context(|| format!("detection failed for {}", frame.image_id()))?;
    let detections = filter_by_confidence(detections, options.confidence_threshold);
    let analysis = engine.analyze(&frame, &detections, options.heatmap_mode)?;

    let mut guard = ArtifactGuard::new();
    if let Some(heatmap) = &analysis.heatmap {
        let heatmap_path = layout.heatmap_path(frame.stem());
        guard.track(heatmap_path.clone());
        heatmap
            .save(&heatmap_path)
            .with_context(|| format!("failed to write heatmap {}", heatmap_path.display()))?;
    }
    let overlay_path = layout.overlay_path(frame.image_id());
    guard.track(overlay_path.clone());
    analysis
        .overlay
        .save(&overlay_path)
        .with_context(|| format!("failed to write overlay {}", overlay_path.display()))?;
    guard.commit();

    Ok(analysis.metrics)
}

/// Run a whole batch. Per-image failures are logged and skipped; failing to
/// write the report or summary fails the batch.
pub fn run_batch<F>(
    options: &BatchOptions,
    engine: &FrameAnalyticsEngine,
    backend: &SharedBackend,
    on_progress: F,
) -> Result<BatchOutcome>
where
    F: Fn(&Path) + Sync,
{
    options.validate()?;
    let images = collect_images(&options.source)?;
    if images.is_empty() {
        log::warn!("no images found in {}", options.source.display());
    }
    let layout = OutputLayout::new(&options.out_dir);
    layout.create()?;
    let (images, mut skipped) = split_duplicate_stems(images);
    for duplicate in &skipped {
        log::warn!("skipping {}: {}", duplicate.path.display(), duplicate.reason);
        if let Some((name, _)) = artifact_names(&duplicate.path) {
            if let Err(e) = remove_stale(&layout.overlay_path(&name)) {
                log::warn!("{:#}", e);
            }
        }
        on_progress(&duplicate.path);
    }
    log::info!(
        "analyzing {} image(s) from {} into {}",
        images.len(),
        options.source.display(),
        layout.root().display()
    );

    let run_one = |path: &PathBuf| {
        let result = process_image(path, &layout, options, engine, backend);
        on_progress(path);
        (path.clone(), result)
    };
    let results: Vec<(PathBuf, Result<FrameMetrics>)> = if options.threads > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.threads)
            .build()
            .context("failed to build worker pool")?;
        pool.install(|| images.par_iter().map(run_one).collect())
    } else {
        images.iter().map(run_one).collect()
    };

    let mut rows = Vec::with_capacity(results.len());
    for (path, result) in results {
        match result {
            Ok(metrics) => rows.push(metrics),
            Err(e) => {
                log::warn!("skipping {}: {:#}", path.display(), e);
                skipped.push(SkippedImage {
                    path,
                    reason: format!("{e:#}"),
                });
            }
        }
    }
    skipped.sort_by(|a, b| a.path.cmp(&b.path));

    let report = MetricsReport::new(&engine.config().catalog, rows);
    report.write(&layout.metrics_path())?;
    let summary = BatchSummary::from_report(&report, skipped.len());
    summary.write(&layout.summary_path())?;

    log::info!(
        "wrote {} ({} processed, {} skipped)",
        layout.metrics_path().display(),
        summary.images_processed,
        summary.images_skipped
    );
    log::info!(
        "mean ci={:.3} mean pri={:.3} mean occupancy={:.4} detections={}",
        summary.mean_congestion_index,
        summary.mean_proximity_risk_index,
        summary.mean_occupancy_fraction,
        summary.total_detections
    );
    if let Some(image) = &summary.highest_risk_image {
        log::info!("highest proximity risk: {}", image);
    }

    Ok(BatchOutcome {
        report,
        summary,
        skipped,
        layout,
    })
}
