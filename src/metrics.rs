//! Per-frame scalar metrics.
//!
//! Everything here is a pure function of one frame's detections and size.
//! Nothing is carried between frames.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::catalog::ClassRole;
use crate::config::AnalyticsConfig;
use crate::detect::Detection;

/// Keeps the occupancy denominator away from zero.
const AREA_EPSILON: f64 = 1e-6;

/// Aggregate record for one image.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameMetrics {
    pub image_id: String,
    pub class_counts: BTreeMap<String, u32>,
    pub congestion_index: f64,
    pub proximity_risk_index: f64,
    pub occupancy_fraction: f64,
    pub total_detections: usize,
    pub avg_min_pedestrian_vehicle_distance_px: f64,
}

impl FrameMetrics {
    /// Count for a label, zero when the label was not detected.
    pub fn count(&self, label: &str) -> u32 {
        self.class_counts.get(label).copied().unwrap_or(0)
    }
}

/// Result of the pedestrian/vehicle proximity analysis.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProximityRisk {
    /// Sum of per-pedestrian risk contributions.
    pub index: f64,
    /// Mean nearest-vehicle distance over pedestrians that had a vehicle to
    /// compare against; 0 when there were none.
    pub avg_min_distance_px: f64,
    /// Number of pedestrians that contributed a distance.
    pub pedestrians_measured: usize,
    /// Distance below which a pedestrian contributes risk.
    pub threshold_px: f64,
}

pub fn count_classes(detections: &[Detection]) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for detection in detections {
        *counts.entry(detection.class_label.clone()).or_insert(0) += 1;
    }
    counts
}

/// Sum of per-class weights over all detections. Confidence is ignored.
pub fn congestion_index(detections: &[Detection], config: &AnalyticsConfig) -> f64 {
    detections
        .iter()
        .map(|detection| config.weight(&detection.class_label))
        .sum()
}

/// Proximity threshold in pixels for a frame size.
pub fn proximity_threshold(width: u32, height: u32, fraction: f64) -> f64 {
    (width as f64).hypot(height as f64) * fraction
}

/// Risk contribution of one pedestrian at distance `d` from its nearest
/// vehicle: 1.0 at distance 0, falling linearly to 0 at the threshold.
pub fn risk_contribution(distance: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return 0.0;
    }
    ((threshold - distance) / threshold).max(0.0)
}

pub fn proximity_risk(
    detections: &[Detection],
    width: u32,
    height: u32,
    config: &AnalyticsConfig,
) -> ProximityRisk {
    let threshold_px = proximity_threshold(width, height, config.proximity_fraction);
    let mut pedestrians = Vec::new();
    let mut vehicles = Vec::new();
    for detection in detections {
        match config.catalog.role(&detection.class_label) {
            ClassRole::Pedestrian => pedestrians.push(detection.bbox.center()),
            ClassRole::Vehicle => vehicles.push(detection.bbox.center()),
            ClassRole::Other => {}
        }
    }

    if pedestrians.is_empty() || vehicles.is_empty() {
        return ProximityRisk {
            threshold_px,
            ..ProximityRisk::default()
        };
    }

    let mut index = 0.0;
    let mut distance_sum = 0.0;
    for (px, py) in &pedestrians {
        let nearest = vehicles
            .iter()
            .map(|(vx, vy)| (px - vx).hypot(py - vy))
            .fold(f64::INFINITY, f64::min);
        distance_sum += nearest;
        index += risk_contribution(nearest, threshold_px);
    }

    ProximityRisk {
        index,
        avg_min_distance_px: distance_sum / pedestrians.len() as f64,
        pedestrians_measured: pedestrians.len(),
        threshold_px,
    }
}

/// Summed box area over image area. Overlapping boxes are not merged, so
/// heavy overlap can push this above 1.0.
pub fn occupancy_fraction(detections: &[Detection], width: u32, height: u32) -> f64 {
    let covered: f64 = detections.iter().map(|d| d.bbox.area()).sum();
    covered / (width as f64 * height as f64 + AREA_EPSILON)
}

/// All scalar metrics for one frame.
pub fn compute_metrics(
    image_id: &str,
    detections: &[Detection],
    width: u32,
    height: u32,
    config: &AnalyticsConfig,
) -> Result<FrameMetrics> {
    if width == 0 || height == 0 {
        return Err(anyhow!(
            "cannot compute metrics for {}: zero-sized image {}x{}",
            image_id,
            width,
            height
        ));
    }
    let proximity = proximity_risk(detections, width, height, config);
    log::debug!(
        "{}: proximity threshold {:.1}px, {} pedestrian(s) measured",
        image_id,
        proximity.threshold_px,
        proximity.pedestrians_measured
    );
    Ok(FrameMetrics {
        image_id: image_id.to_string(),
        class_counts: count_classes(detections),
        congestion_index: congestion_index(detections, config),
        proximity_risk_index: proximity.index,
        occupancy_fraction: occupancy_fraction(detections, width, height),
        total_detections: detections.len(),
        avg_min_pedestrian_vehicle_distance_px: proximity.avg_min_distance_px,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn det(label: &str, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection::new(BoundingBox::new(x1, y1, x2, y2), label, 0.9)
    }

    fn metrics(detections: &[Detection]) -> FrameMetrics {
        compute_metrics("frame.jpg", detections, 100, 100, &AnalyticsConfig::default()).unwrap()
    }

    #[test]
    fn empty_frame_is_all_zero() {
        let m = metrics(&[]);
        assert!(m.class_counts.is_empty());
        assert_eq!(m.congestion_index, 0.0);
        assert_eq!(m.proximity_risk_index, 0.0);
        assert_eq!(m.occupancy_fraction, 0.0);
        assert_eq!(m.total_detections, 0);
        assert_eq!(m.avg_min_pedestrian_vehicle_distance_px, 0.0);
    }

    #[test]
    fn proximity_reports_threshold_and_measured_pedestrians() {
        let cfg = AnalyticsConfig::default();
        let dets = [
            det("pedestrian", 10.0, 10.0, 20.0, 20.0),
            det("people", 30.0, 10.0, 40.0, 20.0),
            det("bus", 60.0, 10.0, 80.0, 20.0),
        ];
        let risk = proximity_risk(&dets, 300, 400, &cfg);
        assert_eq!(risk.pedestrians_measured, 2);
        assert!((risk.threshold_px - 40.0).abs() < 1e-9);

        let alone = proximity_risk(&dets[..2], 300, 400, &cfg);
        assert_eq!(alone.pedestrians_measured, 0);
        assert!((alone.threshold_px - 40.0).abs() < 1e-9);
    }

    #[test]
    fn pair_outside_threshold() {
        let m = metrics(&[
            det("pedestrian", 40.0, 40.0, 60.0, 60.0),
            det("car", 52.0, 40.0, 72.0, 60.0),
        ]);
        assert_eq!(m.proximity_risk_index, 0.0);
        assert!((m.avg_min_pedestrian_vehicle_distance_px - 12.0).abs() < 1e-9);
        assert!((m.occupancy_fraction - 0.08).abs() < 1e-9);
        assert_eq!(m.total_detections, 2);
        assert_eq!(m.count("pedestrian"), 1);
        assert_eq!(m.count("car"), 1);
        assert!((m.congestion_index - 1.8).abs() < 1e-12);
    }

    #[test]
    fn pair_inside_threshold() {
        let m = metrics(&[
            det("pedestrian", 40.0, 40.0, 60.0, 60.0),
            det("car", 46.0, 40.0, 66.0, 60.0),
        ]);
        let threshold = 0.08 * 20000f64.sqrt();
        let expected = (threshold - 6.0) / threshold;
        assert!((m.proximity_risk_index - expected).abs() < 1e-9);
        assert!((m.proximity_risk_index - 0.469).abs() < 1e-3);
        assert!((m.avg_min_pedestrian_vehicle_distance_px - 6.0).abs() < 1e-9);
    }

    #[test]
    fn congestion_is_additive() {
        let a = vec![det("bus", 0.0, 0.0, 10.0, 10.0), det("people", 5.0, 5.0, 8.0, 8.0)];
        let b = vec![det("truck", 20.0, 20.0, 30.0, 30.0), det("mystery", 1.0, 1.0, 2.0, 2.0)];
        let cfg = AnalyticsConfig::default();
        let union: Vec<Detection> = a.iter().chain(b.iter()).cloned().collect();
        let sum = congestion_index(&a, &cfg) + congestion_index(&b, &cfg);
        assert!((congestion_index(&union, &cfg) - sum).abs() < 1e-12);
        assert!((congestion_index(&b, &cfg) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn congestion_ignores_confidence() {
        let cfg = AnalyticsConfig::default();
        let mut low = det("van", 0.0, 0.0, 1.0, 1.0);
        low.confidence = 0.01;
        assert_eq!(congestion_index(&[low], &cfg), 1.2);
    }

    #[test]
    fn closer_vehicle_raises_risk() {
        let pedestrian = det("pedestrian", 40.0, 40.0, 60.0, 60.0);
        let mut last = -1.0;
        for offset in [10.0f32, 8.0, 5.0, 2.0, 0.0] {
            let vehicle = det("motor", 40.0 + offset, 40.0, 60.0 + offset, 60.0);
            let pri = metrics(&[pedestrian.clone(), vehicle]).proximity_risk_index;
            assert!(pri > last, "offset {} gave {} after {}", offset, pri, last);
            last = pri;
        }
        assert!((last - 1.0).abs() < 1e-12);

        let far = det("motor", 40.0, 80.0, 60.0, 100.0);
        assert_eq!(metrics(&[pedestrian, far]).proximity_risk_index, 0.0);
    }

    #[test]
    fn risk_is_summed_over_pedestrians() {
        let m = metrics(&[
            det("pedestrian", 40.0, 40.0, 60.0, 60.0),
            det("people", 40.0, 40.0, 60.0, 60.0),
            det("bus", 40.0, 40.0, 60.0, 60.0),
        ]);
        assert!((m.proximity_risk_index - 2.0).abs() < 1e-12);
    }

    #[test]
    fn nearest_vehicle_wins() {
        let m = metrics(&[
            det("pedestrian", 0.0, 0.0, 10.0, 10.0),
            det("car", 80.0, 80.0, 90.0, 90.0),
            det("van", 3.0, 0.0, 13.0, 10.0),
        ]);
        assert!((m.avg_min_pedestrian_vehicle_distance_px - 3.0).abs() < 1e-9);
    }

    #[test]
    fn single_sided_frames_have_zero_risk() {
        let only_people = metrics(&[
            det("pedestrian", 0.0, 0.0, 10.0, 10.0),
            det("people", 5.0, 5.0, 15.0, 15.0),
            det("others", 5.0, 5.0, 15.0, 15.0),
        ]);
        assert_eq!(only_people.proximity_risk_index, 0.0);
        assert_eq!(only_people.avg_min_pedestrian_vehicle_distance_px, 0.0);

        let only_vehicles = metrics(&[det("car", 0.0, 0.0, 10.0, 10.0)]);
        assert_eq!(only_vehicles.proximity_risk_index, 0.0);
        assert_eq!(only_vehicles.avg_min_pedestrian_vehicle_distance_px, 0.0);
    }

    #[test]
    fn occupancy_is_bounded_for_disjoint_boxes() {
        let tiles: Vec<Detection> = (0..4)
            .flat_map(|row| {
                (0..4).map(move |col| {
                    let (x, y) = (col as f32 * 25.0, row as f32 * 25.0);
                    det("car", x, y, x + 25.0, y + 25.0)
                })
            })
            .collect();
        let occupancy = metrics(&tiles).occupancy_fraction;
        assert!((0.0..=1.0).contains(&occupancy));
        assert!((occupancy - 1.0).abs() < 1e-6);
    }

    #[test]
    fn overlapping_boxes_may_exceed_one() {
        let full = det("bus", 0.0, 0.0, 100.0, 100.0);
        let occupancy = metrics(&[full.clone(), full]).occupancy_fraction;
        assert!(occupancy > 1.9);
    }

    #[test]
    fn metrics_are_deterministic() {
        let detections = vec![
            det("pedestrian", 12.5, 30.25, 20.0, 44.0),
            det("people", 70.0, 10.0, 75.5, 19.0),
            det("car", 15.0, 35.0, 35.0, 50.0),
            det("awning-tricycle", 60.0, 5.0, 80.0, 20.0),
        ];
        let first = metrics(&detections);
        for _ in 0..5 {
            let again = metrics(&detections);
            assert_eq!(again, first);
            assert_eq!(
                again.proximity_risk_index.to_bits(),
                first.proximity_risk_index.to_bits()
            );
        }
    }

    #[test]
    fn zero_sized_frame_is_an_error() {
        assert!(compute_metrics("x.png", &[], 0, 10, &AnalyticsConfig::default()).is_err());
    }
}
