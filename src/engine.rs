//! Frame analytics engine: metrics, heatmap and overlay for one frame.

use anyhow::{Context, Result};
use image::{RgbImage, RgbaImage};

use crate::config::AnalyticsConfig;
use crate::detect::{validate_detections, Detection};
use crate::frame::Frame;
use crate::heatmap::render_heatmap;
use crate::metrics::{compute_metrics, FrameMetrics};
use crate::overlay::{draw_overlay, OverlayStyle};

/// When to render the density heatmap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HeatmapMode {
    /// Every frame, including frames without detections.
    #[default]
    Always,
    /// Only frames with at least one detection.
    NonEmpty,
    Off,
}

impl HeatmapMode {
    pub fn wants_heatmap(self, detection_count: usize) -> bool {
        match self {
            HeatmapMode::Always => true,
            HeatmapMode::NonEmpty => detection_count > 0,
            HeatmapMode::Off => false,
        }
    }
}

impl std::str::FromStr for HeatmapMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(HeatmapMode::Always),
            "non-empty" | "nonempty" => Ok(HeatmapMode::NonEmpty),
            "off" | "never" => Ok(HeatmapMode::Off),
            other => Err(anyhow::anyhow!("unknown heatmap mode '{}'", other)),
        }
    }
}

/// Everything produced for one frame.
pub struct FrameAnalysis {
    pub metrics: FrameMetrics,
    pub overlay: RgbImage,
    pub heatmap: Option<RgbaImage>,
}

/// Holds the configuration and drawing resources for a batch. Analysis of
/// one frame never depends on any other frame.
pub struct FrameAnalyticsEngine {
    config: AnalyticsConfig,
    style: OverlayStyle,
}

impl FrameAnalyticsEngine {
    pub fn new(config: AnalyticsConfig) -> Self {
        let style = OverlayStyle::from_settings(&config.overlay);
        Self { config, style }
    }

    /// Engine with an explicit overlay style.
    pub fn with_style(config: AnalyticsConfig, style: OverlayStyle) -> Self {
        Self { config, style }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Analyze one frame. Detections are validated first; a malformed
    /// detection fails the whole frame.
    pub fn analyze(
        &self,
        frame: &Frame,
        detections: &[Detection],
        heatmap_mode: HeatmapMode,
    ) -> Result<FrameAnalysis> {
        analyze_frame(frame, detections, heatmap_mode, &self.config, &self.style)
            .with_context(|| format!("analysis failed for {}", frame.image_id()))
    }
}

pub fn analyze_frame(
    frame: &Frame,
    detections: &[Detection],
    heatmap_mode: HeatmapMode,
    config: &AnalyticsConfig,
    style: &OverlayStyle,
) -> Result<FrameAnalysis> {
    validate_detections(detections)?;
    let metrics = compute_metrics(
        frame.image_id(),
        detections,
        frame.width(),
        frame.height(),
        config,
    )?;
    let heatmap = heatmap_mode
        .wants_heatmap(detections.len())
        .then(|| render_heatmap(frame.image(), detections, &config.heatmap));
    let overlay = draw_overlay(frame.image(), detections, style);
    log::debug!(
        "{}: {} detections, ci={:.3} pri={:.3}",
        frame.image_id(),
        metrics.total_detections,
        metrics.congestion_index,
        metrics.proximity_risk_index
    );
    Ok(FrameAnalysis {
        metrics,
        overlay,
        heatmap,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use image::Rgb;

    fn engine() -> FrameAnalyticsEngine {
        let config = AnalyticsConfig::default();
        let style = OverlayStyle::without_font(&config.overlay);
        FrameAnalyticsEngine::with_style(config, style)
    }

    fn frame() -> Frame {
        Frame::from_image("street.jpg", RgbImage::from_pixel(100, 100, Rgb([40, 40, 40]))).unwrap()
    }

    #[test]
    fn zero_detections_give_zero_record_and_unchanged_overlay() {
        let frame = frame();
        let analysis = engine().analyze(&frame, &[], HeatmapMode::Always).unwrap();
        assert_eq!(analysis.metrics.total_detections, 0);
        assert_eq!(analysis.metrics.congestion_index, 0.0);
        assert_eq!(&analysis.overlay, frame.image());
        let heatmap = analysis.heatmap.unwrap();
        assert_eq!(heatmap.dimensions(), (100, 100));
    }

    #[test]
    fn heatmap_mode_controls_rendering() {
        let frame = frame();
        let engine = engine();
        assert!(engine
            .analyze(&frame, &[], HeatmapMode::NonEmpty)
            .unwrap()
            .heatmap
            .is_none());
        let det = Detection::new(BoundingBox::new(10.0, 10.0, 30.0, 30.0), "car", 0.8);
        assert!(engine
            .analyze(&frame, &[det.clone()], HeatmapMode::NonEmpty)
            .unwrap()
            .heatmap
            .is_some());
        assert!(engine
            .analyze(&frame, &[det], HeatmapMode::Off)
            .unwrap()
            .heatmap
            .is_none());
    }

    #[test]
    fn analysis_is_deterministic() {
        let frame = frame();
        let dets = vec![
            Detection::new(BoundingBox::new(10.0, 10.0, 20.0, 20.0), "pedestrian", 0.9),
            Detection::new(BoundingBox::new(30.0, 10.0, 50.0, 30.0), "bus", 0.7),
        ];
        let engine = engine();
        let a = engine.analyze(&frame, &dets, HeatmapMode::Always).unwrap();
        let b = engine.analyze(&frame, &dets, HeatmapMode::Always).unwrap();
        assert_eq!(a.metrics, b.metrics);
        assert_eq!(a.overlay, b.overlay);
        assert_eq!(a.heatmap, b.heatmap);
    }

    #[test]
    fn malformed_detection_fails_frame() {
        let frame = frame();
        let bad = Detection::new(BoundingBox::new(10.0, 10.0, 20.0, 20.0), "car", 1.5);
        assert!(engine().analyze(&frame, &[bad], HeatmapMode::Always).is_err());
    }

    #[test]
    fn heatmap_mode_parses() {
        assert_eq!("always".parse::<HeatmapMode>().unwrap(), HeatmapMode::Always);
        assert_eq!("Non-Empty".parse::<HeatmapMode>().unwrap(), HeatmapMode::NonEmpty);
        assert_eq!("off".parse::<HeatmapMode>().unwrap(), HeatmapMode::Off);
        assert!("sometimes".parse::<HeatmapMode>().is_err());
    }
}
