use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::ClassCatalog;

/// Axis-aligned box in pixel coordinates of the source image.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box from a center point and a size.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Area with negative extents clamped to zero.
    pub fn area(&self) -> f64 {
        let w = (self.x2 as f64 - self.x1 as f64).max(0.0);
        let h = (self.y2 as f64 - self.y1 as f64).max(0.0);
        w * h
    }

    /// Midpoint of the four coordinates.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.x1 as f64 + self.x2 as f64) / 2.0,
            (self.y1 as f64 + self.y2 as f64) / 2.0,
        )
    }

    /// Clip the box to `[0, width] x [0, height]`.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f64 {
        let left = self.x1.max(other.x1);
        let right = self.x2.min(other.x2);
        let top = self.y1.max(other.y1);
        let bottom = self.y2.min(other.y2);
        ((right - left).max(0.0) as f64) * ((bottom - top).max(0.0) as f64)
    }

    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }
}

/// One object instance found in one image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, class_label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            class_label: class_label.into(),
            confidence,
        }
    }

    /// Check the detector contract: finite ordered coordinates, a label, and
    /// a confidence in `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if !self.bbox.is_finite() {
            return Err(anyhow!("detection has non-finite box {:?}", self.bbox));
        }
        if self.bbox.x1 > self.bbox.x2 || self.bbox.y1 > self.bbox.y2 {
            return Err(anyhow!("detection box is inverted: {:?}", self.bbox));
        }
        if self.class_label.is_empty() {
            return Err(anyhow!("detection has an empty class label"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!(
                "detection confidence {} is outside [0, 1]",
                self.confidence
            ));
        }
        Ok(())
    }
}

/// Validate every detection of a frame. The first violation fails the frame.
pub fn validate_detections(detections: &[Detection]) -> Result<()> {
    for (idx, detection) in detections.iter().enumerate() {
        detection
            .validate()
            .map_err(|e| anyhow!("detector contract violation at index {}: {}", idx, e))?;
    }
    Ok(())
}

/// Keep detections at or above the confidence threshold.
pub fn filter_by_confidence(detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|detection| detection.confidence >= threshold)
        .collect()
}

/// Detector output as parallel arrays, the shape most model runtimes hand back.
#[derive(Clone, Debug, Default)]
pub struct RawDetections {
    /// `[x1, y1, x2, y2]` per detection.
    pub boxes: Vec<[f32; 4]>,
    pub class_ids: Vec<usize>,
    pub scores: Vec<f32>,
}

impl RawDetections {
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Zip the arrays into detections, naming classes through the catalog.
    ///
    /// Mismatched array lengths are a detector contract violation.
    pub fn into_detections(self, catalog: &ClassCatalog) -> Result<Vec<Detection>> {
        if self.boxes.len() != self.class_ids.len() || self.boxes.len() != self.scores.len() {
            return Err(anyhow!(
                "detector output length mismatch: {} boxes, {} classes, {} scores",
                self.boxes.len(),
                self.class_ids.len(),
                self.scores.len()
            ));
        }
        let detections: Vec<Detection> = self
            .boxes
            .into_iter()
            .zip(self.class_ids)
            .zip(self.scores)
            .map(|(([x1, y1, x2, y2], class_id), score)| {
                Detection::new(
                    BoundingBox::new(x1, y1, x2, y2),
                    catalog.resolve_id(class_id),
                    score,
                )
            })
            .collect();
        validate_detections(&detections)?;
        Ok(detections)
    }
}
