pub mod labels;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use labels::LabelFileBackend;
pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
