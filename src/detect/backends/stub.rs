use std::collections::HashMap;

use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Stub backend for testing and dry runs.
///
/// Returns per-image detections when registered for the frame's id, and the
/// fallback list otherwise. An empty stub yields zero detections for every
/// frame.
#[derive(Default)]
pub struct StubBackend {
    fallback: Vec<Detection>,
    per_image: HashMap<String, Vec<Detection>>,
}

impl StubBackend {
    pub fn new(fallback: Vec<Detection>) -> Self {
        Self {
            fallback,
            per_image: HashMap::new(),
        }
    }

    /// Detections to return for one image id (file name).
    pub fn with_image(mut self, image_id: impl Into<String>, detections: Vec<Detection>) -> Self {
        self.per_image.insert(image_id.into(), detections);
        self
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self
            .per_image
            .get(frame.image_id())
            .unwrap_or(&self.fallback)
            .clone())
    }
}
