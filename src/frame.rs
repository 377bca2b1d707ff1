//! Decoded input images.
//!
//! A `Frame` is one image of a batch, decoded to RGB, together with the
//! identifier used for its report row and artifact file names.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

pub struct Frame {
    image_id: String,
    stem: String,
    image: RgbImage,
}

impl Frame {
    /// Decode an image file. Unreadable files and zero-sized images are errors.
    pub fn open(path: &Path) -> Result<Self> {
        let image_id = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("image path {} has no file name", path.display()))?
            .to_string();
        let decoded = image::open(path)
            .with_context(|| format!("failed to decode image {}", path.display()))?;
        Self::from_image(image_id, decoded.to_rgb8())
    }

    /// Wrap an already decoded image.
    pub fn from_image(image_id: impl Into<String>, image: RgbImage) -> Result<Self> {
        let image_id = image_id.into();
        if image.width() == 0 || image.height() == 0 {
            return Err(anyhow!(
                "image {} has zero area ({}x{})",
                image_id,
                image.width(),
                image.height()
            ));
        }
        let stem = Path::new(&image_id)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&image_id)
            .to_string();
        Ok(Self {
            image_id,
            stem,
            image,
        })
    }

    /// File name of the image, used as the report's `image` column.
    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        &self.stem
    }


    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}
