//! Class-label catalog.
//!
//! The detector speaks in class ids or label strings; the analytics speak in
//! roles (pedestrian-like, vehicle-like) and in a fixed report column order.
//! `ClassCatalog` is the single place that maps between the two.
//!
//! The catalog is an open set: labels that are not listed still count, still
//! weigh 1.0 in the congestion index, and still get a report column (after
//! the known labels).

use std::collections::BTreeSet;

use anyhow::{anyhow, Result};

/// VisDrone category names, in detector class-id order.
pub const VISDRONE_LABELS: [&str; 11] = [
    "pedestrian",
    "people",
    "bicycle",
    "car",
    "van",
    "truck",
    "tricycle",
    "awning-tricycle",
    "bus",
    "motor",
    "others",
];

/// Labels that mean a person on foot.
pub const PEDESTRIAN_LABELS: [&str; 2] = ["pedestrian", "people"];

/// Moving-object labels that pose a risk to pedestrians.
pub const VEHICLE_LABELS: [&str; 8] = [
    "car",
    "van",
    "truck",
    "bus",
    "motor",
    "tricycle",
    "awning-tricycle",
    "bicycle",
];

/// Role a label plays in the proximity risk computation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassRole {
    Pedestrian,
    Vehicle,
    Other,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassCatalog {
    labels: Vec<String>,
    pedestrian: BTreeSet<String>,
    vehicle: BTreeSet<String>,
}

impl ClassCatalog {
    /// Build a catalog. Labels must be unique and non-empty, and the
    /// pedestrian and vehicle sets must not overlap.
    pub fn new<P, V>(labels: Vec<String>, pedestrian: P, vehicle: V) -> Result<Self>
    where
        P: IntoIterator<Item = String>,
        V: IntoIterator<Item = String>,
    {
        if labels.is_empty() {
            return Err(anyhow!("class catalog must list at least one label"));
        }
        let mut seen = BTreeSet::new();
        for label in &labels {
            if label.trim().is_empty() {
                return Err(anyhow!("class labels must not be empty"));
            }
            if !seen.insert(label.as_str()) {
                return Err(anyhow!("duplicate class label '{}'", label));
            }
        }

        let pedestrian: BTreeSet<String> = pedestrian.into_iter().collect();
        let vehicle: BTreeSet<String> = vehicle.into_iter().collect();
        if let Some(shared) = pedestrian.intersection(&vehicle).next() {
            return Err(anyhow!(
                "label '{}' cannot be both pedestrian-like and vehicle-like",
                shared
            ));
        }

        Ok(Self {
            labels,
            pedestrian,
            vehicle,
        })
    }

    /// The VisDrone label set with its pedestrian and vehicle groupings.
    pub fn visdrone() -> Self {
        Self {
            labels: VISDRONE_LABELS.iter().map(|s| s.to_string()).collect(),
            pedestrian: PEDESTRIAN_LABELS.iter().map(|s| s.to_string()).collect(),
            vehicle: VEHICLE_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Label for a detector class id, if the id is in range.
    pub fn label_for_id(&self, class_id: usize) -> Option<&str> {
        self.labels.get(class_id).map(String::as_str)
    }

    /// Label for a class id, falling back to the id itself for ids the
    /// catalog does not know.
    pub fn resolve_id(&self, class_id: usize) -> String {
        self.label_for_id(class_id)
            .map(str::to_string)
            .unwrap_or_else(|| class_id.to_string())
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|known| known == label)
    }

    pub fn role(&self, label: &str) -> ClassRole {
        if self.pedestrian.contains(label) {
            ClassRole::Pedestrian
        } else if self.vehicle.contains(label) {
            ClassRole::Vehicle
        } else {
            ClassRole::Other
        }
    }

    /// Column order for a report: every catalog label in catalog order,
    /// followed by any unknown labels in lexicographic order.
    pub fn column_order<'a, I>(&self, seen: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let unknown: BTreeSet<&str> = seen
            .into_iter()
            .filter(|label| !self.contains(label))
            .collect();
        self.labels
            .iter()
            .cloned()
            .chain(unknown.into_iter().map(str::to_string))
            .collect()
    }
}

impl Default for ClassCatalog {
    fn default() -> Self {
        Self::visdrone()
    }
}
