//! Frame data structures for captured result screens

use image::RgbaImage;

/// A rectified frame taken from the recording
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Rectified RGBA pixels
    pub image: RgbaImage,
    /// Position in the recording, in seconds
    pub position: f64,
}

impl CapturedFrame {
    /// Create a new captured frame
    pub fn new(image: RgbaImage, position: f64) -> Self {
        Self { image, position }
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
