//! Detection overlays: box outlines and `"{label} {confidence}"` tags drawn
//! on a copy of the source image.

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::config::OverlaySettings;
use crate::detect::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const TAG_PADDING: u32 = 3;
const FALLBACK_CHAR_WIDTH: u32 = 8;
const FALLBACK_TEXT_HEIGHT: u32 = 16;

const SYSTEM_FONT_CANDIDATES: [&str; 5] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Drawing resources shared by every frame of a batch.
pub struct OverlayStyle {
    font: Option<FontVec>,
    scale: PxScale,
    thickness: u32,
}

impl OverlayStyle {
    /// Load the configured font, falling back to common system fonts. Without
    /// any font, tags are drawn as blank boxes of estimated size.
    pub fn from_settings(settings: &OverlaySettings) -> Self {
        let font = match &settings.font_path {
            Some(path) => load_font(path),
            None => SYSTEM_FONT_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .filter(|path| path.exists())
                .find_map(|path| load_font(&path)),
        };
        if font.is_none() {
            log::warn!("no usable font found; overlay tags will be drawn without text");
        }
        Self {
            font,
            scale: PxScale::from(settings.font_size),
            thickness: settings.box_thickness.max(1),
        }
    }

    /// Style with no font, for headless use and tests.
    pub fn without_font(settings: &OverlaySettings) -> Self {
        Self {
            font: None,
            scale: PxScale::from(settings.font_size),
            thickness: settings.box_thickness.max(1),
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    fn measure(&self, text: &str) -> (u32, u32) {
        match &self.font {
            Some(font) => text_size(self.scale, font, text),
            None => (
                FALLBACK_CHAR_WIDTH * text.chars().count() as u32,
                FALLBACK_TEXT_HEIGHT,
            ),
        }
    }
}

fn load_font(path: &Path) -> Option<FontVec> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("failed to read font {}: {}", path.display(), e);
            return None;
        }
    };
    match FontVec::try_from_vec(bytes) {
        Ok(font) => {
            log::debug!("overlay font loaded from {}", path.display());
            Some(font)
        }
        Err(e) => {
            log::warn!("invalid font {}: {}", path.display(), e);
            None
        }
    }
}

/// Tag text for a detection.
pub fn label_text(detection: &Detection) -> String {
    format!("{} {:.2}", detection.class_label, detection.confidence)
}

/// Filled tag rectangle in canvas coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagRect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

/// Place a tag of the given text size directly above a box's top-left
/// corner. The tag is pushed down to the image top when it would start
/// above it, and cut at the image's right edge.
pub fn tag_rect(x1: f32, y1: f32, text_width: u32, text_height: u32, image_width: u32) -> TagRect {
    let tag_width = (text_width + 2 * TAG_PADDING) as i32;
    let tag_height = text_height + 2 * TAG_PADDING;
    let last_column = image_width.saturating_sub(1) as i32;
    let left = (x1.floor() as i32).clamp(0, last_column);
    let top = (y1.floor() as i32 - tag_height as i32).max(0);
    let right = (left + tag_width).min(image_width as i32);
    TagRect {
        left,
        top,
        width: (right - left).max(1) as u32,
        height: tag_height,
    }
}

fn box_outline(detection: &Detection, inset: u32) -> Option<Rect> {
    let bbox = &detection.bbox;
    let left = bbox.x1.floor() as i32 + inset as i32;
    let top = bbox.y1.floor() as i32 + inset as i32;
    let right = bbox.x2.ceil() as i32 - inset as i32;
    let bottom = bbox.y2.ceil() as i32 - inset as i32;
    if right <= left || bottom <= top {
        return None;
    }
    Some(Rect::at(left, top).of_size((right - left) as u32, (bottom - top) as u32))
}

/// Draw every detection on a copy of `source`.
pub fn draw_overlay(source: &RgbImage, detections: &[Detection], style: &OverlayStyle) -> RgbImage {
    let mut canvas = source.clone();
    for detection in detections {
        for inset in 0..style.thickness {
            if let Some(rect) = box_outline(detection, inset) {
                draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
            }
        }

        let text = label_text(detection);
        let (text_width, text_height) = style.measure(&text);
        let tag = tag_rect(
            detection.bbox.x1,
            detection.bbox.y1,
            text_width,
            text_height,
            canvas.width(),
        );
        draw_filled_rect_mut(
            &mut canvas,
            Rect::at(tag.left, tag.top).of_size(tag.width, tag.height),
            BOX_COLOR,
        );
        if let Some(font) = &style.font {
            draw_text_mut(
                &mut canvas,
                TEXT_COLOR,
                tag.left + TAG_PADDING as i32,
                tag.top + TAG_PADDING as i32,
                style.scale,
                font,
                &text,
            );
        }
    }
    canvas
}
