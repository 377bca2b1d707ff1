use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::result::Detection;
use crate::frame::Frame;

use super::backend::DetectorBackend;

/// Shared handle to a backend.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

/// Thread-safe registry of detector backends.
pub struct BackendRegistry {
    backends: HashMap<String, SharedBackend>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<SharedBackend> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Warm up every registered backend.
    pub fn warm_up_all(&self) -> Result<()> {
        for (name, backend) in &self.backends {
            let mut guard = backend
                .lock()
                .map_err(|_| anyhow!("backend '{}' lock poisoned", name))?;
            guard.warm_up()?;
        }
        Ok(())
    }

    /// Run detection with the default backend.
    pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let backend = self
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        detect_shared(&backend, frame)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run detection through a shared backend handle.
pub fn detect_shared(backend: &SharedBackend, frame: &Frame) -> Result<Vec<Detection>> {
    let mut guard = backend
        .lock()
        .map_err(|_| anyhow!("backend lock poisoned"))?;
    guard.detect(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubBackend;
    use crate::detect::result::BoundingBox;
    use image::RgbImage;

    #[test]
    fn first_backend_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new(vec![Detection::new(
            BoundingBox::new(0.0, 0.0, 2.0, 2.0),
            "car",
            0.9,
        )]));
        assert_eq!(registry.list(), vec!["stub".to_string()]);

        let frame = Frame::from_image("a.png", RgbImage::new(4, 4)).unwrap();
        let detections = registry.detect(&frame).unwrap();
        assert_eq!(detections.len(), 1);
    }

    #[test]
    fn empty_registry_cannot_detect() {
        let registry = BackendRegistry::new();
        assert!(registry.default_backend().is_none());
        let frame = Frame::from_image("a.png", RgbImage::new(4, 4)).unwrap();
        assert!(registry.detect(&frame).is_err());
    }
}
