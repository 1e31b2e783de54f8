//! Region preprocessing for recognition
//!
//! Turns a rectified frame and a selection region into candidate bitmaps:
//! binarized grayscale crops for OCR, or hue-masked color crops for regions
//! whose value is read from their color. Several threshold-jittered variants
//! are produced per part so that recognition can vote across them.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage, RgbaImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use tracing::{debug, warn};

use crate::config::{Polarity, Rect, RegionKind, SelectionRegion};

/// Which rect of a region a candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Part {
    /// Primary rect (the whole value, or the integer digits of a split number)
    Integer,
    /// Secondary rect of a split number
    Decimal,
}

/// Identity of one candidate bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CandidateKey {
    /// Index of the region in the configured list
    pub region: usize,
    pub part: Part,
    pub variant: usize,
}

/// One preprocessed bitmap, consumed by recognition or classification
#[derive(Debug, Clone)]
pub struct CandidateImage {
    pub key: CandidateKey,
    /// Threshold this variant was rendered with
    pub threshold: u8,
    /// Single-channel binary image, or masked RGB for categorical regions
    pub image: DynamicImage,
}

/// Threshold jitter used to render variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantConfig {
    /// Number of variants per part (at least one is always produced)
    pub count: usize,
    /// Threshold distance between neighbouring variants
    pub step: i32,
}

impl Default for VariantConfig {
    fn default() -> Self {
        Self { count: 1, step: 0 }
    }
}

/// Thresholds `base + (i - count/2) * step` for `i in 0..count`, clamped to `[0, 255]`
pub fn variant_thresholds(base: u8, count: usize, step: i32) -> Vec<u8> {
    let count = count.max(1);
    let center = (count / 2) as i64;
    (0..count as i64)
        .map(|i| {
            let t = i64::from(base) + (i - center) * i64::from(step);
            t.clamp(0, 255) as u8
        })
        .collect()
}

/// Build every candidate for one region.
///
/// Categorical regions yield at most one candidate (no jitter); text and
/// numeric regions yield up to `variants.count` per part.
pub fn build_candidates(
    frame: &RgbaImage,
    region_index: usize,
    region: &SelectionRegion,
    variants: VariantConfig,
) -> Vec<CandidateImage> {
    let mut parts = vec![(Part::Integer, region.rect)];
    if let Some(decimal) = region.decimal_rect() {
        parts.push((Part::Decimal, decimal));
    }

    let thresholds = match region.kind {
        RegionKind::Categorical => vec![region.threshold],
        _ => variant_thresholds(region.threshold, variants.count, variants.step),
    };

    let mut candidates = Vec::with_capacity(parts.len() * thresholds.len());
    for (part, rect) in parts {
        for (variant, &threshold) in thresholds.iter().enumerate() {
            if let Some(image) = preprocess_part(frame, region, rect, threshold) {
                candidates.push(CandidateImage {
                    key: CandidateKey {
                        region: region_index,
                        part,
                        variant,
                    },
                    threshold,
                    image,
                });
            }
        }
    }

    debug!(
        "Region '{}': {} candidates",
        region.label,
        candidates.len()
    );
    candidates
}

/// Crop, scale and threshold one rect of a region.
///
/// Returns `None` when the rect leaves the frame, the scaled size is empty,
/// or a categorical mask selects nothing.
pub fn preprocess_part(
    frame: &RgbaImage,
    region: &SelectionRegion,
    rect: Rect,
    threshold: u8,
) -> Option<DynamicImage> {
    let (frame_width, frame_height) = frame.dimensions();
    if !rect.fits_within(frame_width, frame_height) {
        warn!(
            "Region '{}' rect {:?} lies outside the {}x{} frame",
            region.label, rect, frame_width, frame_height
        );
        return None;
    }

    let scaled_width = (f64::from(rect.width) * region.scale_x).round();
    let scaled_height = (f64::from(rect.height) * region.scale_y).round();
    if scaled_width < 1.0 || scaled_height < 1.0 {
        return None;
    }

    let crop = imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image();
    let scaled = imageops::resize(
        &crop,
        scaled_width as u32,
        scaled_height as u32,
        FilterType::Lanczos3,
    );

    match region.kind {
        RegionKind::Categorical => hue_masked_crop(&scaled, threshold).map(DynamicImage::ImageRgb8),
        _ => Some(DynamicImage::ImageLuma8(binarize(
            &scaled,
            threshold,
            region.polarity,
        ))),
    }
}

/// Channel mean gray, `(R + G + B) / 3`
pub fn gray_value(r: u8, g: u8, b: u8) -> f64 {
    (f64::from(r) + f64::from(g) + f64::from(b)) / 3.0
}

/// Gray above `threshold` becomes white (black when inverted)
pub fn binarize(image: &RgbaImage, threshold: u8, polarity: Polarity) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let p = image.get_pixel(x, y);
        let above = gray_value(p[0], p[1], p[2]) > f64::from(threshold);
        let white = match polarity {
            Polarity::Normal => above,
            Polarity::Inverted => !above,
        };
        Luma([if white { 255 } else { 0 }])
    })
}

/// 8-bit HSV with hue on a 0–180 scale
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (rf, gf, bf) = (f64::from(r), f64::from(g), f64::from(b));
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max > 0.0 { delta / max * 255.0 } else { 0.0 };

    let h = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    let hue = ((h / 2.0).round() as u32 % 180) as u8;
    (hue, s.round() as u8, max as u8)
}

/// Keep pixels with hue `>= min_hue`, blank the rest, crop to the foreground
fn hue_masked_crop(image: &RgbaImage, min_hue: u8) -> Option<RgbImage> {
    let (width, height) = image.dimensions();

    let mask = GrayImage::from_fn(width, height, |x, y| {
        let p = image.get_pixel(x, y);
        let (h, _, _) = rgb_to_hsv(p[0], p[1], p[2]);
        Luma([if h >= min_hue { 255 } else { 0 }])
    });

    let (x0, y0, x1, y1) = foreground_bounds(&mask)?;

    let masked = RgbImage::from_fn(width, height, |x, y| {
        if mask.get_pixel(x, y)[0] > 0 {
            let p = image.get_pixel(x, y);
            Rgb([p[0], p[1], p[2]])
        } else {
            Rgb([0, 0, 0])
        }
    });

    Some(imageops::crop_imm(&masked, x0, y0, x1 - x0 + 1, y1 - y0 + 1).to_image())
}

/// Union of the bounding boxes of all connected foreground components
fn foreground_bounds(mask: &GrayImage) -> Option<(u32, u32, u32, u32)> {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, label) in labels.enumerate_pixels() {
        if label[0] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    bounds
}
