#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::catalog::ClassCatalog;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection, RawDetections};
use crate::frame::Frame;

const DEFAULT_SCORE_FLOOR: f32 = 0.001;
const DEFAULT_IOU_THRESHOLD: f64 = 0.45;

/// Tract-based backend for YOLOv8-style ONNX detection models.
///
/// The model must take a `[1, 3, size, size]` float input and produce a
/// `[1, 4 + classes, anchors]` output of center-format boxes followed by
/// per-class scores. Frames are stretched to the model input and boxes are
/// scaled back to frame pixels.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    catalog: ClassCatalog,
    score_floor: f32,
    iou_threshold: f64,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32, catalog: ClassCatalog) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            catalog,
            score_floor: DEFAULT_SCORE_FLOOR,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = image::imageops::resize(
            frame.image(),
            self.input_size,
            self.input_size,
            FilterType::Triangle,
        );
        let size = self.input_size as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<RawDetections> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = preds.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let preds = preds
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not three-dimensional")?;
        let (rows, anchors) = (shape[1], shape[2]);
        let scale_x = frame.width() as f32 / self.input_size as f32;
        let scale_y = frame.height() as f32 / self.input_size as f32;

        let mut candidates: Vec<(BoundingBox, usize, f32)> = Vec::new();
        for anchor in 0..anchors {
            let (class_id, score) = (4..rows)
                .map(|row| (row - 4, preds[[0, row, anchor]]))
                .fold((0, f32::NEG_INFINITY), |best, item| {
                    if item.1 > best.1 {
                        item
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < self.score_floor {
                continue;
            }
            let bbox = BoundingBox::from_center(
                preds[[0, 0, anchor]] * scale_x,
                preds[[0, 1, anchor]] * scale_y,
                preds[[0, 2, anchor]] * scale_x,
                preds[[0, 3, anchor]] * scale_y,
            )
            .clamp_to(frame.width(), frame.height());
            candidates.push((bbox, class_id, score.min(1.0)));
        }

        let kept = non_max_suppression(candidates, self.iou_threshold);
        let mut raw = RawDetections::default();
        for (bbox, class_id, score) in kept {
            raw.boxes.push([bbox.x1, bbox.y1, bbox.x2, bbox.y2]);
            raw.class_ids.push(class_id);
            raw.scores.push(score);
        }
        Ok(raw)
    }
}

/// Greedy per-class NMS, highest score first.
fn non_max_suppression(
    mut candidates: Vec<(BoundingBox, usize, f32)>,
    iou_threshold: f64,
) -> Vec<(BoundingBox, usize, f32)> {
    candidates.sort_by(|a, b| b.2.total_cmp(&a.2));
    let mut kept: Vec<(BoundingBox, usize, f32)> = Vec::new();
    for candidate in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.1 == candidate.1 && k.0.iou(&candidate.0) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let raw = self.decode(outputs, frame)?;
        raw.into_detections(&self.catalog)
    }
}
