use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};

use crate::catalog::ClassCatalog;
use crate::detect::backends::{LabelFileBackend, StubBackend};
use crate::detect::registry::BackendRegistry;

pub const DEFAULT_MODEL_INPUT_SIZE: u32 = 960;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    /// YOLO-format prediction files.
    Labels,
    /// No detections for any image.
    Stub,
    /// ONNX model run in-process.
    Tract,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "labels" => Ok(DetectorKind::Labels),
            "stub" => Ok(DetectorKind::Stub),
            "tract" | "onnx" => Ok(DetectorKind::Tract),
            other => Err(anyhow!(
                "unknown detector '{}' (expected labels, stub or tract)",
                other
            )),
        }
    }
}

/// Everything needed to construct the detector for a run.
#[derive(Clone, Debug)]
pub struct DetectorSelection {
    pub kind: DetectorKind,
    pub labels_dir: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
}

impl DetectorSelection {
    pub fn new(kind: DetectorKind) -> Self {
        Self {
            kind,
            labels_dir: None,
            model_path: None,
            input_size: DEFAULT_MODEL_INPUT_SIZE,
        }
    }

    /// Registry holding the selected backend as its default.
    pub fn build_registry(&self, catalog: &ClassCatalog) -> Result<BackendRegistry> {
        let mut registry = BackendRegistry::new();
        match self.kind {
            DetectorKind::Labels => {
                let dir = self
                    .labels_dir
                    .clone()
                    .ok_or_else(|| anyhow!("the labels detector needs a label directory"))?;
                registry.register(LabelFileBackend::new(dir, catalog.clone())?);
            }
            DetectorKind::Stub => registry.register(StubBackend::default()),
            DetectorKind::Tract => self.register_tract(&mut registry, catalog)?,
        }
        registry.warm_up_all()?;
        log::info!("detector backend: {}", registry.list().join(", "));
        Ok(registry)
    }

    #[cfg(feature = "backend-tract")]
    fn register_tract(&self, registry: &mut BackendRegistry, catalog: &ClassCatalog) -> Result<()> {
        let model = self
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("the tract detector needs a model path"))?;
        if self.input_size == 0 {
            return Err(anyhow!("model input size must be positive"));
        }
        registry.register(crate::detect::backends::TractBackend::new(
            model,
            self.input_size,
            catalog.clone(),
        )?);
        Ok(())
    }

    #[cfg(not(feature = "backend-tract"))]
    fn register_tract(&self, _registry: &mut BackendRegistry, _catalog: &ClassCatalog) -> Result<()> {
        Err(anyhow!(
            "the tract detector requires building with the backend-tract feature"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_detector_names() {
        assert_eq!("labels".parse::<DetectorKind>().unwrap(), DetectorKind::Labels);
        assert_eq!("STUB".parse::<DetectorKind>().unwrap(), DetectorKind::Stub);
        assert_eq!("onnx".parse::<DetectorKind>().unwrap(), DetectorKind::Tract);
        assert!("yolo".parse::<DetectorKind>().is_err());
    }

    #[test]
    fn labels_detector_requires_directory() {
        let catalog = ClassCatalog::visdrone();
        let selection = DetectorSelection::new(DetectorKind::Labels);
        assert!(selection.build_registry(&catalog).is_err());

        let dir = tempfile::tempdir().unwrap();
        let selection = DetectorSelection {
            labels_dir: Some(dir.path().to_path_buf()),
            ..DetectorSelection::new(DetectorKind::Labels)
        };
        let registry = selection.build_registry(&catalog).unwrap();
        assert_eq!(registry.list(), vec!["labels".to_string()]);
        assert!(registry.default_backend().is_some());
    }

    #[test]
    fn stub_detector_builds() {
        let registry = DetectorSelection::new(DetectorKind::Stub)
            .build_registry(&ClassCatalog::visdrone())
            .unwrap();
        assert_eq!(registry.list(), vec!["stub".to_string()]);
    }
}
