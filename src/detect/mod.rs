mod backend;
mod backends;
mod registry;
mod result;
mod select;

pub use backend::DetectorBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::{labels, LabelFileBackend, StubBackend};
pub use registry::{detect_shared, BackendRegistry, SharedBackend};
pub use result::{
    filter_by_confidence, validate_detections, BoundingBox, Detection, RawDetections,
};
pub use select::{DetectorKind, DetectorSelection, DEFAULT_MODEL_INPUT_SIZE};
