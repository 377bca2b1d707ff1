use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::catalog::{ClassCatalog, PEDESTRIAN_LABELS, VEHICLE_LABELS, VISDRONE_LABELS};

pub const CONFIG_ENV: &str = "FRAME_ANALYTICS_CONFIG";

const DEFAULT_PROXIMITY_FRACTION: f64 = 0.08;
const DEFAULT_SIGMA_FLOOR: f64 = 8.0;
const DEFAULT_SIGMA_FRACTION: f64 = 0.015;
const DEFAULT_ALPHA_SCALE: f64 = 200.0;
const DEFAULT_FONT_SIZE: f32 = 16.0;
const DEFAULT_BOX_THICKNESS: u32 = 2;
const DEFAULT_UNKNOWN_WEIGHT: f64 = 1.0;

/// Congestion weights for the VisDrone classes.
pub const DEFAULT_CLASS_WEIGHTS: [(&str, f64); 11] = [
    ("pedestrian", 0.8),
    ("people", 0.8),
    ("bicycle", 0.5),
    ("car", 1.0),
    ("van", 1.2),
    ("truck", 1.5),
    ("tricycle", 0.7),
    ("awning-tricycle", 0.9),
    ("bus", 2.0),
    ("motor", 0.6),
    ("others", 0.5),
];

#[derive(Debug, Deserialize, Default)]
struct AnalyticsConfigFile {
    classes: Option<ClassesConfigFile>,
    class_weights: Option<BTreeMap<String, f64>>,
    proximity: Option<ProximityConfigFile>,
    heatmap: Option<HeatmapConfigFile>,
    overlay: Option<OverlayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassesConfigFile {
    labels: Option<Vec<String>>,
    pedestrian: Option<Vec<String>>,
    vehicle: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct ProximityConfigFile {
    threshold_fraction: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct HeatmapConfigFile {
    sigma_floor: Option<f64>,
    sigma_fraction: Option<f64>,
    alpha_scale: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    font_path: Option<PathBuf>,
    font_size: Option<f32>,
    box_thickness: Option<u32>,
}

/// Tunable constants of the analytics engine.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub catalog: ClassCatalog,
    /// Congestion weight per label. Labels missing here weigh 1.0.
    pub class_weights: BTreeMap<String, f64>,
    /// Proximity threshold as a fraction of the image diagonal.
    pub proximity_fraction: f64,
    pub heatmap: HeatmapSettings,
    pub overlay: OverlaySettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapSettings {
    /// Smallest smoothing sigma in pixels.
    pub sigma_floor: f64,
    /// Sigma as a fraction of the longer image side.
    pub sigma_fraction: f64,
    /// Peak overlay alpha (0..=255) reached at normalized density 1.0.
    pub alpha_scale: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySettings {
    /// TrueType font for label tags. System fonts are tried when unset.
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
    pub box_thickness: u32,
}

impl Default for HeatmapSettings {
    fn default() -> Self {
        Self {
            sigma_floor: DEFAULT_SIGMA_FLOOR,
            sigma_fraction: DEFAULT_SIGMA_FRACTION,
            alpha_scale: DEFAULT_ALPHA_SCALE,
        }
    }
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            font_path: None,
            font_size: DEFAULT_FONT_SIZE,
            box_thickness: DEFAULT_BOX_THICKNESS,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            catalog: ClassCatalog::visdrone(),
            class_weights: default_class_weights(),
            proximity_fraction: DEFAULT_PROXIMITY_FRACTION,
            heatmap: HeatmapSettings::default(),
            overlay: OverlaySettings::default(),
        }
    }
}

impl AnalyticsConfig {
    /// Load from the file named by `FRAME_ANALYTICS_CONFIG` (if set), then
    /// apply environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV)
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (or defaults when `None`), then apply
    /// environment overrides and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AnalyticsConfigFile) -> Result<Self> {
        let catalog = match file.classes {
            Some(classes) => ClassCatalog::new(
                classes
                    .labels
                    .unwrap_or_else(|| VISDRONE_LABELS.iter().map(|s| s.to_string()).collect()),
                classes
                    .pedestrian
                    .unwrap_or_else(|| PEDESTRIAN_LABELS.iter().map(|s| s.to_string()).collect()),
                classes
                    .vehicle
                    .unwrap_or_else(|| VEHICLE_LABELS.iter().map(|s| s.to_string()).collect()),
            )?,
            None => ClassCatalog::visdrone(),
        };
        let mut class_weights = default_class_weights();
        if let Some(overrides) = file.class_weights {
            class_weights.extend(overrides);
        }
        let proximity_fraction = file
            .proximity
            .and_then(|proximity| proximity.threshold_fraction)
            .unwrap_or(DEFAULT_PROXIMITY_FRACTION);
        let heatmap = HeatmapSettings {
            sigma_floor: file
                .heatmap
                .as_ref()
                .and_then(|heatmap| heatmap.sigma_floor)
                .unwrap_or(DEFAULT_SIGMA_FLOOR),
            sigma_fraction: file
                .heatmap
                .as_ref()
                .and_then(|heatmap| heatmap.sigma_fraction)
                .unwrap_or(DEFAULT_SIGMA_FRACTION),
            alpha_scale: file
                .heatmap
                .and_then(|heatmap| heatmap.alpha_scale)
                .unwrap_or(DEFAULT_ALPHA_SCALE),
        };
        let overlay = OverlaySettings {
            font_path: file
                .overlay
                .as_ref()
                .and_then(|overlay| overlay.font_path.clone()),
            font_size: file
                .overlay
                .as_ref()
                .and_then(|overlay| overlay.font_size)
                .unwrap_or(DEFAULT_FONT_SIZE),
            box_thickness: file
                .overlay
                .and_then(|overlay| overlay.box_thickness)
                .unwrap_or(DEFAULT_BOX_THICKNESS),
        };
        Ok(Self {
            catalog,
            class_weights,
            proximity_fraction,
            heatmap,
            overlay,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("FRAME_ANALYTICS_PROXIMITY_FRACTION") {
            self.proximity_fraction = parse_env_f64("FRAME_ANALYTICS_PROXIMITY_FRACTION", &value)?;
        }
        if let Ok(value) = std::env::var("FRAME_ANALYTICS_SIGMA_FLOOR") {
            self.heatmap.sigma_floor = parse_env_f64("FRAME_ANALYTICS_SIGMA_FLOOR", &value)?;
        }
        if let Ok(value) = std::env::var("FRAME_ANALYTICS_ALPHA_SCALE") {
            self.heatmap.alpha_scale = parse_env_f64("FRAME_ANALYTICS_ALPHA_SCALE", &value)?;
        }
        if let Ok(path) = std::env::var("FRAME_ANALYTICS_FONT") {
            if !path.trim().is_empty() {
                self.overlay.font_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(weights) = std::env::var("FRAME_ANALYTICS_CLASS_WEIGHTS") {
            for (label, weight) in parse_weight_list(&weights)? {
                self.class_weights.insert(label, weight);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.proximity_fraction.is_finite() && self.proximity_fraction > 0.0) {
            return Err(anyhow!(
                "proximity threshold fraction must be positive, got {}",
                self.proximity_fraction
            ));
        }
        if !(self.heatmap.sigma_floor.is_finite() && self.heatmap.sigma_floor > 0.0) {
            return Err(anyhow!("heatmap sigma floor must be positive"));
        }
        if !(self.heatmap.sigma_fraction.is_finite() && self.heatmap.sigma_fraction >= 0.0) {
            return Err(anyhow!("heatmap sigma fraction must not be negative"));
        }
        if !(0.0..=255.0).contains(&self.heatmap.alpha_scale) {
            return Err(anyhow!(
                "heatmap alpha scale must be within 0..=255, got {}",
                self.heatmap.alpha_scale
            ));
        }
        if !(self.overlay.font_size.is_finite() && self.overlay.font_size > 0.0) {
            return Err(anyhow!("overlay font size must be positive"));
        }
        if self.overlay.box_thickness == 0 {
            return Err(anyhow!("overlay box thickness must be at least 1"));
        }
        for (label, weight) in &self.class_weights {
            if !(weight.is_finite() && *weight >= 0.0) {
                return Err(anyhow!(
                    "class weight for '{}' must be a non-negative number, got {}",
                    label,
                    weight
                ));
            }
        }
        Ok(())
    }

    /// Congestion weight of a label; unknown labels weigh 1.0.
    pub fn weight(&self, label: &str) -> f64 {
        self.class_weights
            .get(label)
            .copied()
            .unwrap_or(DEFAULT_UNKNOWN_WEIGHT)
    }
}

pub fn default_class_weights() -> BTreeMap<String, f64> {
    DEFAULT_CLASS_WEIGHTS
        .iter()
        .map(|(label, weight)| (label.to_string(), *weight))
        .collect()
}

fn read_config_file(path: &Path) -> Result<AnalyticsConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg: AnalyticsConfigFile = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_env_f64(key: &str, value: &str) -> Result<f64> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be a number, got '{}'", key, value))
}

/// Parse `label=weight,label=weight`.
fn parse_weight_list(value: &str) -> Result<Vec<(String, f64)>> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (label, weight) = entry.split_once('=').ok_or_else(|| {
                anyhow!("FRAME_ANALYTICS_CLASS_WEIGHTS entry '{}' is not label=weight", entry)
            })?;
            let weight = parse_env_f64("FRAME_ANALYTICS_CLASS_WEIGHTS", weight)?;
            Ok((label.trim().to_string(), weight))
        })
        .collect()
}
