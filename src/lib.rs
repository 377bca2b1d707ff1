//! Frame Analytics Engine
//!
//! Turns object detections on still images (aerial/drone traffic imagery,
//! VisDrone-style classes) into per-image traffic metrics and visual
//! artifacts.
//!
//! # Architecture
//!
//! Every image is analyzed independently:
//!
//! 1. **Detect**: a `DetectorBackend` produces `Detection`s for a `Frame`.
//! 2. **Analyze**: the `FrameAnalyticsEngine` derives class counts, the
//!    Congestion Index, the Proximity Risk Index and occupancy, and renders a
//!    labelled overlay plus a density heatmap.
//! 3. **Report**: the batch `pipeline` writes artifacts per image and one
//!    `metrics.csv` and `summary.json` per batch.
//!
//! # Module Structure
//!
//! - `catalog`: known class labels and their pedestrian/vehicle roles
//! - `config`: tunables (weights, thresholds, heatmap and overlay settings)
//! - `detect`: detector backends and the detection contract
//! - `metrics`: pure per-frame scalar metrics
//! - `heatmap`, `overlay`: visual artifacts
//! - `engine`: one-frame analysis
//! - `pipeline`, `report`: batch driver and tabular output

pub mod catalog;
pub mod config;
pub mod detect;
pub mod engine;
pub mod frame;
pub mod heatmap;
pub mod metrics;
pub mod overlay;
pub mod pipeline;
pub mod report;

pub use catalog::{ClassCatalog, ClassRole};
pub use config::{AnalyticsConfig, HeatmapSettings, OverlaySettings};
pub use detect::{
    BackendRegistry, BoundingBox, Detection, DetectorBackend, LabelFileBackend, RawDetections,
    SharedBackend, StubBackend,
};
pub use engine::{FrameAnalysis, FrameAnalyticsEngine, HeatmapMode};
pub use frame::Frame;
pub use metrics::{compute_metrics, FrameMetrics};
pub use pipeline::{run_batch, BatchOptions, BatchOutcome, OutputLayout};
pub use report::{BatchSummary, CountReport, MetricsReport};
