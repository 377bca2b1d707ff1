//! Detection density heatmaps.
//!
//! Detection centers are dropped into an impulse field, smoothed with a
//! Gaussian, min-max normalized, colored with a jet ramp and alpha-blended
//! over the source image.

use image::{ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};

use crate::config::HeatmapSettings;
use crate::detect::Detection;

/// Single-channel float raster, row-major, `width x height`.
pub type DensityField = ImageBuffer<Luma<f32>, Vec<f32>>;

const NORMALIZE_EPSILON: f32 = 1e-6;

/// Smoothing sigma for an image: `max(floor, round(fraction * longer side))`.
pub fn heatmap_sigma(width: u32, height: u32, settings: &HeatmapSettings) -> f64 {
    let longer = width.max(height) as f64;
    settings.sigma_floor.max((settings.sigma_fraction * longer).round())
}

/// Odd kernel size of at least 3 covering roughly three sigmas.
pub fn kernel_size(sigma: f64) -> usize {
    let span = (sigma * 3.0).max(0.0) as usize;
    (span / 2 * 2 + 1).max(3)
}

/// Normalized 1-D Gaussian weights of the given odd size.
pub fn gaussian_kernel(sigma: f64, size: usize) -> Vec<f32> {
    let center = (size / 2) as f64;
    let denom = 2.0 * sigma * sigma;
    let weights: Vec<f64> = (0..size)
        .map(|i| {
            let x = i as f64 - center;
            (-(x * x) / denom).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    weights.iter().map(|w| (w / total) as f32).collect()
}

/// One unit of density at each detection center, rounded to the nearest
/// pixel. Centers outside the image are dropped.
pub fn accumulate_centers(width: u32, height: u32, detections: &[Detection]) -> DensityField {
    let mut field = DensityField::new(width, height);
    for detection in detections {
        let (cx, cy) = detection.bbox.center();
        let (x, y) = (cx.round(), cy.round());
        if x < 0.0 || y < 0.0 || x >= width as f64 || y >= height as f64 {
            continue;
        }
        field.get_pixel_mut(x as u32, y as u32)[0] += 1.0;
    }
    field
}

/// Mirror an out-of-range index back into `0..len` without repeating the
/// edge sample (`dcb|abcd|cba`).
fn reflect_101(index: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let len = len as isize;
    let period = 2 * (len - 1);
    let mut i = index.rem_euclid(period);
    if i >= len {
        i = period - i;
    }
    i as usize
}

/// Separable Gaussian blur with mirrored borders.
pub fn gaussian_blur(field: &DensityField, sigma: f64) -> DensityField {
    let (width, height) = field.dimensions();
    let (w, h) = (width as usize, height as usize);
    let size = kernel_size(sigma);
    let kernel = gaussian_kernel(sigma, size);
    let radius = (size / 2) as isize;
    let src = field.as_raw();

    let mut horizontal = vec![0f32; w * h];
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            horizontal[y * w + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, weight)| {
                    let sx = reflect_101(x as isize + k as isize - radius, w);
                    weight * row[sx]
                })
                .sum();
        }
    }

    let mut out = vec![0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            out[y * w + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, weight)| {
                    let sy = reflect_101(y as isize + k as isize - radius, h);
                    weight * horizontal[sy * w + x]
                })
                .sum();
        }
    }

    DensityField::from_raw(width, height, out).unwrap_or_else(|| DensityField::new(width, height))
}

/// Min-max scale to `[0, 1]`. A constant field maps to all zeros.
pub fn normalize(field: &DensityField) -> DensityField {
    let (min, max) = field
        .as_raw()
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let mut out = DensityField::new(field.width(), field.height());
    if !min.is_finite() || max <= min {
        return out;
    }
    let range = max - min + NORMALIZE_EPSILON;
    for (dst, src) in out.iter_mut().zip(field.as_raw()) {
        *dst = ((src - min) / range).clamp(0.0, 1.0);
    }
    out
}

/// Smoothed, normalized density of detection centers.
pub fn density_map(
    width: u32,
    height: u32,
    detections: &[Detection],
    settings: &HeatmapSettings,
) -> DensityField {
    if detections.is_empty() {
        return DensityField::new(width, height);
    }
    let impulses = accumulate_centers(width, height, detections);
    let sigma = heatmap_sigma(width, height, settings);
    normalize(&gaussian_blur(&impulses, sigma))
}

/// Jet color ramp: blue at 0, through cyan, yellow, to red at 1.
pub fn jet(value: f32) -> Rgb<u8> {
    let v = value.clamp(0.0, 1.0);
    let channel = |offset: f32| {
        let c = (1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0);
        (c * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Color the density field and blend it over the source image.
///
/// Per-pixel alpha is `density * alpha_scale`, so the source stays visible
/// even at peak density. The composite is returned opaque.
pub fn composite(source: &RgbImage, density: &DensityField, alpha_scale: f64) -> RgbaImage {
    let mut out = RgbaImage::new(source.width(), source.height());
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let value = density.get_pixel(x, y)[0];
        let color = jet(value);
        let alpha = (value as f64 * alpha_scale).clamp(0.0, 255.0).floor() / 255.0;
        let base = source.get_pixel(x, y);
        let mut blended = [0u8; 4];
        for c in 0..3 {
            let mixed = alpha * color[c] as f64 + (1.0 - alpha) * base[c] as f64;
            blended[c] = mixed.clamp(0.0, 255.0) as u8;
        }
        blended[3] = u8::MAX;
        *pixel = Rgba(blended);
    }
    out
}

/// Density heatmap composite for one frame.
pub fn render_heatmap(
    source: &RgbImage,
    detections: &[Detection],
    settings: &HeatmapSettings,
) -> RgbaImage {
    let density = density_map(source.width(), source.height(), detections, settings);
    composite(source, &density, settings.alpha_scale)
}
