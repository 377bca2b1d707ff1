use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend maps one decoded frame to its detections. Backends must not
/// filter by the batch confidence threshold themselves; the caller applies
/// it. Backends may hold model state, hence `&mut self`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Output that violates the detection contract (mismatched arrays,
    /// inverted boxes, confidences outside `[0, 1]`) must be reported as an
    /// error rather than repaired.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
