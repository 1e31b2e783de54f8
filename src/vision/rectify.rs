//! Perspective rectification
//!
//! Maps a screen filmed at an angle onto a frontal, axis-aligned bitmap.
//! The homography is solved exactly from the four quad corners and the frame
//! is resampled through its inverse with bilinear interpolation.

use image::{Rgba, RgbaImage};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use std::borrow::Cow;
use tracing::warn;

use crate::config::{PerspectiveQuad, Point};

/// Fill for output pixels that map outside the source frame
const BORDER: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Quads with less area than this are treated as degenerate
const MIN_QUAD_AREA: f64 = 1.0;

/// Rectify `frame` through `quad`.
///
/// An empty quad, or one that cannot define a projective transform, yields
/// the raw frame unchanged.
pub fn rectify<'a>(frame: &'a RgbaImage, quad: &PerspectiveQuad) -> Cow<'a, RgbaImage> {
    let Some(corners) = quad.corners() else {
        return Cow::Borrowed(frame);
    };

    match warp_quad(frame, corners) {
        Some(rectified) => Cow::Owned(rectified),
        None => {
            warn!("Degenerate perspective quad {:?}, using raw frame", corners);
            Cow::Borrowed(frame)
        }
    }
}

/// Output size for a quad: the longer of each pair of opposite edges
pub fn target_size(corners: &[Point; 4]) -> (u32, u32) {
    let [tl, tr, br, bl] = corners;
    let width = br.distance(bl).max(tr.distance(tl));
    let height = tr.distance(br).max(tl.distance(bl));
    (width.round() as u32, height.round() as u32)
}

fn warp_quad(frame: &RgbaImage, corners: &[Point; 4]) -> Option<RgbaImage> {
    if quad_area(corners) < MIN_QUAD_AREA {
        return None;
    }

    let (width, height) = target_size(corners);
    if width == 0 || height == 0 {
        return None;
    }

    let (w, h) = (f64::from(width), f64::from(height));
    let target = [
        Point::new(0.0, 0.0),
        Point::new(w, 0.0),
        Point::new(w, h),
        Point::new(0.0, h),
    ];

    // Solve for the map from output pixels back into the source frame
    let inverse = homography_from_points(&target, corners)?;

    let mut out = RgbaImage::from_pixel(width, height, BORDER);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let (sx, sy) = project(&inverse, f64::from(x), f64::from(y))?;
        if let Some(sampled) = sample_bilinear(frame, sx, sy) {
            *pixel = sampled;
        }
    }

    Some(out)
}

/// Shoelace area of the quad
fn quad_area(corners: &[Point; 4]) -> f64 {
    let mut twice_area = 0.0;
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        twice_area += a.x * b.y - b.x * a.y;
    }
    twice_area.abs() / 2.0
}

/// Exact homography H with `dst ≈ H * src` from four correspondences
fn homography_from_points(src: &[Point; 4], dst: &[Point; 4]) -> Option<Matrix3<f64>> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for i in 0..4 {
        let (sx, sy) = (src[i].x, src[i].y);
        let (dx, dy) = (dst[i].x, dst[i].y);

        // u = (h0 sx + h1 sy + h2) / (h6 sx + h7 sy + 1)
        a[(2 * i, 0)] = sx;
        a[(2 * i, 1)] = sy;
        a[(2 * i, 2)] = 1.0;
        a[(2 * i, 6)] = -dx * sx;
        a[(2 * i, 7)] = -dx * sy;
        b[2 * i] = dx;

        // v = (h3 sx + h4 sy + h5) / (h6 sx + h7 sy + 1)
        a[(2 * i + 1, 3)] = sx;
        a[(2 * i + 1, 4)] = sy;
        a[(2 * i + 1, 5)] = 1.0;
        a[(2 * i + 1, 6)] = -dy * sx;
        a[(2 * i + 1, 7)] = -dy * sy;
        b[2 * i + 1] = dy;
    }

    let h = a.lu().solve(&b)?;
    if h.iter().any(|v| !v.is_finite()) {
        return None;
    }

    Some(Matrix3::new(
        h[0], h[1], h[2], //
        h[3], h[4], h[5], //
        h[6], h[7], 1.0,
    ))
}

fn project(h: &Matrix3<f64>, x: f64, y: f64) -> Option<(f64, f64)> {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-12 {
        return None;
    }
    Some((p[0] / p[2], p[1] / p[2]))
}

/// Bilinear sample with neighbours clamped at the frame edge; `None` outside the frame
fn sample_bilinear(frame: &RgbaImage, x: f64, y: f64) -> Option<Rgba<u8>> {
    const EPS: f64 = 1e-6;
    let (width, height) = frame.dimensions();
    let max_x = f64::from(width) - 1.0;
    let max_y = f64::from(height) - 1.0;

    if x < -EPS || y < -EPS || x > max_x + EPS || y > max_y + EPS {
        return None;
    }

    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - f64::from(x0);
    let fy = y - f64::from(y0);

    let p00 = frame.get_pixel(x0, y0);
    let p10 = frame.get_pixel(x1, y0);
    let p01 = frame.get_pixel(x0, y1);
    let p11 = frame.get_pixel(x1, y1);

    let mut out = [0u8; 4];
    for (c, value) in out.iter_mut().enumerate() {
        let top = f64::from(p00[c]) * (1.0 - fx) + f64::from(p10[c]) * fx;
        let bottom = f64::from(p01[c]) * (1.0 - fx) + f64::from(p11[c]) * fx;
        *value = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }

    Some(Rgba(out))
}
