//! Backend that reads detections from YOLO-format prediction files.
//!
//! A detector run elsewhere (for example a YOLO `predict` with text output
//! and confidences enabled) leaves one `<stem>.txt` per image, one detection
//! per line:
//!
//! ```text
//! <class_id> <cx> <cy> <w> <h> [confidence]
//! ```
//!
//! Coordinates are normalized to the image size. A missing file means the
//! detector found nothing in that image.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::catalog::ClassCatalog;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection, RawDetections};
use crate::frame::Frame;

pub struct LabelFileBackend {
    dir: PathBuf,
    catalog: ClassCatalog,
}

impl LabelFileBackend {
    pub fn new(dir: impl Into<PathBuf>, catalog: ClassCatalog) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(anyhow!(
                "label directory {} does not exist or is not a directory",
                dir.display()
            ));
        }
        Ok(Self { dir, catalog })
    }

    pub fn label_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", stem))
    }
}

impl DetectorBackend for LabelFileBackend {
    fn name(&self) -> &'static str {
        "labels"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let path = self.label_path(frame.stem());
        if !path.exists() {
            log::debug!("no label file for {}, assuming no detections", frame.image_id());
            return Ok(Vec::new());
        }
        let raw = read_label_file(&path, frame.width(), frame.height())?;
        raw.into_detections(&self.catalog)
            .with_context(|| format!("invalid detections in {}", path.display()))
    }
}

/// Parse one prediction file into pixel-space arrays.
pub fn read_label_file(path: &Path, width: u32, height: u32) -> Result<RawDetections> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read label file {}", path.display()))?;
    parse_labels(&text, width, height)
        .with_context(|| format!("malformed label file {}", path.display()))
}

/// Parse YOLO label text. Blank lines are ignored; anything else malformed
/// fails the whole file.
pub fn parse_labels(text: &str, width: u32, height: u32) -> Result<RawDetections> {
    let mut raw = RawDetections::default();
    let (w, h) = (width as f32, height as f32);

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 && fields.len() != 6 {
            return Err(anyhow!(
                "line {}: expected 5 or 6 fields, found {}",
                line_no + 1,
                fields.len()
            ));
        }
        let class_id: usize = fields[0]
            .parse()
            .map_err(|_| anyhow!("line {}: invalid class id '{}'", line_no + 1, fields[0]))?;
        let mut values = [0f32; 5];
        for (slot, field) in values.iter_mut().zip(&fields[1..]) {
            *slot = field
                .parse()
                .map_err(|_| anyhow!("line {}: invalid number '{}'", line_no + 1, field))?;
        }
        let [cx, cy, bw, bh, _] = values;
        let confidence = if fields.len() == 6 { values[4] } else { 1.0 };

        let bbox = BoundingBox::from_center(cx * w, cy * h, bw * w, bh * h).clamp_to(width, height);
        raw.boxes.push([bbox.x1, bbox.y1, bbox.x2, bbox.y2]);
        raw.class_ids.push(class_id);
        raw.scores.push(confidence);
    }

    Ok(raw)
}
