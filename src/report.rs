//! Tabular batch reports and the batch summary.
//!
//! Reports are assembled in memory and written once, atomically, at the end
//! of a batch so a crash never leaves a partial file behind.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::catalog::ClassCatalog;
use crate::metrics::FrameMetrics;

pub const METRICS_FILE_NAME: &str = "metrics.csv";
pub const SUMMARY_FILE_NAME: &str = "summary.json";

const CI_DECIMALS: usize = 3;
const PRI_DECIMALS: usize = 3;
const OCCUPANCY_DECIMALS: usize = 4;
const DISTANCE_DECIMALS: usize = 2;

/// Round to `decimals` places. Rounding works on the exact binary value
/// with ties to even, so `0.0625` becomes `0.062`.
pub fn round_to(value: f64, decimals: usize) -> f64 {
    let rounded: f64 = format!("{:.*}", decimals, value)
        .parse()
        .unwrap_or(value);
    // avoid "-0" in the output
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Shortest decimal text for a report value; whole numbers keep one
/// fractional digit (`2.0`).
pub fn format_decimal(value: f64) -> String {
    let text = value.to_string();
    if value.is_finite() && !text.contains('.') {
        format!("{text}.0")
    } else {
        text
    }
}

/// Per-image metrics table, one row per analyzed image.
#[derive(Clone, Debug)]
pub struct MetricsReport {
    labels: Vec<String>,
    rows: Vec<FrameMetrics>,
}

impl MetricsReport {
    /// Build the report. Count columns cover the whole catalog plus any
    /// unknown label seen in `rows`; rows are ordered by rounded PRI then CI,
    /// both descending, with image name ascending as the tie-break.
    pub fn new(catalog: &ClassCatalog, mut rows: Vec<FrameMetrics>) -> Self {
        let labels = catalog.column_order(
            rows.iter()
                .flat_map(|row| row.class_counts.keys().map(String::as_str)),
        );
        rows.sort_by(compare_rows);
        Self { labels, rows }
    }

    pub fn rows(&self) -> &[FrameMetrics] {
        &self.rows
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn header(&self) -> Vec<String> {
        let mut header: Vec<String> = [
            "image",
            "congestion_index",
            "proximity_risk_index",
            "occupancy_frac",
            "total_detections",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        header.extend(self.labels.iter().map(|label| format!("count_{label}")));
        header.push("avg_min_ped_vehicle_px".to_string());
        header
    }

    pub fn records(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| {
                let mut record = vec![
                    row.image_id.clone(),
                    format_decimal(round_to(row.congestion_index, CI_DECIMALS)),
                    format_decimal(round_to(row.proximity_risk_index, PRI_DECIMALS)),
                    format_decimal(round_to(row.occupancy_fraction, OCCUPANCY_DECIMALS)),
                    row.total_detections.to_string(),
                ];
                record.extend(self.labels.iter().map(|label| row.count(label).to_string()));
                record.push(format_decimal(round_to(
                    row.avg_min_pedestrian_vehicle_distance_px,
                    DISTANCE_DECIMALS,
                )));
                record
            })
            .collect()
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        csv_bytes(&self.header(), &self.records())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_csv_bytes()?)
    }
}

fn compare_rows(a: &FrameMetrics, b: &FrameMetrics) -> Ordering {
    let pri = |m: &FrameMetrics| round_to(m.proximity_risk_index, PRI_DECIMALS);
    let ci = |m: &FrameMetrics| round_to(m.congestion_index, CI_DECIMALS);
    pri(b)
        .total_cmp(&pri(a))
        .then_with(|| ci(b).total_cmp(&ci(a)))
        .then_with(|| a.image_id.cmp(&b.image_id))
}

/// Class counts only, one row per image in discovery order.
#[derive(Clone, Debug)]
pub struct CountReport {
    labels: Vec<String>,
    rows: Vec<(String, BTreeMap<String, u32>)>,
}

impl CountReport {
    pub fn new(catalog: &ClassCatalog, rows: Vec<(String, BTreeMap<String, u32>)>) -> Self {
        let labels = catalog.column_order(
            rows.iter()
                .flat_map(|(_, counts)| counts.keys().map(String::as_str)),
        );
        Self { labels, rows }
    }

    pub fn header(&self) -> Vec<String> {
        std::iter::once("image".to_string())
            .chain(self.labels.iter().cloned())
            .collect()
    }

    pub fn records(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|(image, counts)| {
                std::iter::once(image.clone())
                    .chain(
                        self.labels
                            .iter()
                            .map(|label| counts.get(label).copied().unwrap_or(0).to_string()),
                    )
                    .collect()
            })
            .collect()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, &csv_bytes(&self.header(), &self.records())?)
    }
}

fn csv_bytes(header: &[String], records: &[Vec<String>]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(header).context("failed to write csv header")?;
    for record in records {
        writer.write_record(record).context("failed to write csv row")?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow!("failed to flush csv writer: {}", e.error()))
}

/// KPI roll-up for a batch.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub images_processed: usize,
    pub images_skipped: usize,
    pub mean_congestion_index: f64,
    pub mean_proximity_risk_index: f64,
    pub mean_occupancy_fraction: f64,
    pub total_detections: usize,
    pub highest_risk_image: Option<String>,
}

impl BatchSummary {
    pub fn from_report(report: &MetricsReport, images_skipped: usize) -> Self {
        let rows = report.rows();
        let mean = |f: fn(&FrameMetrics) -> f64| {
            if rows.is_empty() {
                0.0
            } else {
                rows.iter().map(f).sum::<f64>() / rows.len() as f64
            }
        };
        // rows are already ordered by risk
        let highest_risk_image = rows.first().map(|row| row.image_id.clone());
        Self {
            images_processed: rows.len(),
            images_skipped,
            mean_congestion_index: round_to(mean(|m| m.congestion_index), CI_DECIMALS),
            mean_proximity_risk_index: round_to(mean(|m| m.proximity_risk_index), PRI_DECIMALS),
            mean_occupancy_fraction: round_to(
                mean(|m| m.occupancy_fraction),
                OCCUPANCY_DECIMALS,
            ),
            total_detections: rows.iter().map(|row| row.total_detections).sum(),
            highest_risk_image,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("failed to serialize batch summary")?;
        write_atomic(path, &json)
    }
}

/// Write `bytes` to a temp file beside `path`, then rename it into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create directory {}", parent.display()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tmp.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| anyhow!("failed to persist {}: {}", path.display(), e.error))?;
    Ok(())
}
