//! Frame Source Layer
//!
//! The pipeline steps through a recording one frame at a time. A source
//! exposes the current frame and an awaitable seek; the shipped
//! implementation walks a directory of frames extracted from the video.

pub mod frame;

use async_trait::async_trait;
use image::RgbaImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};

pub use frame::CapturedFrame;

/// Playback collaborator driven by the change detector
#[async_trait]
pub trait FrameSource: Send {
    /// Move by `seconds` (negative steps backwards) and wait for the new frame to settle.
    ///
    /// A frame that cannot be read is still stepped over: the position moves,
    /// the previous frame stays current and the error is returned.
    async fn seek_by(&mut self, seconds: f64) -> PipelineResult<()>;

    /// Raw pixels of the frame at the current position
    fn current_frame(&self) -> &RgbaImage;

    /// True once no later frame can be reached
    fn at_end(&self) -> bool;

    /// Current position in seconds
    fn position(&self) -> f64;
}

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Frames previously extracted from a video, played back at a fixed rate
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    index: usize,
    frame_rate: f64,
    current: RgbaImage,
}

impl ImageSequenceSource {
    /// Open every image file in `dir`, ordered by file name with numbered
    /// names compared by value (`frame_9` before `frame_10`)
    pub async fn open(dir: &Path, frame_rate: f64) -> PipelineResult<Self> {
        if frame_rate.is_nan() || frame_rate <= 0.0 {
            return Err(PipelineError::Configuration(format!(
                "frame rate must be positive, got {frame_rate}"
            )));
        }

        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_frame_file(&path) {
                paths.push(path);
            }
        }
        paths.sort_by_cached_key(|path| frame_order_key(path));

        if paths.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "no frame images found in {}",
                dir.display()
            )));
        }

        let mut start = None;
        for (index, path) in paths.iter().enumerate() {
            match load_frame(path).await {
                Ok(frame) => {
                    start = Some((index, frame));
                    break;
                }
                Err(e) => warn!("Skipping unreadable frame {}: {}", path.display(), e),
            }
        }
        let Some((index, current)) = start else {
            return Err(PipelineError::Configuration(format!(
                "no readable frame images in {}",
                dir.display()
            )));
        };

        info!(
            "Opened {} frames from {} at {} fps",
            paths.len(),
            dir.display(),
            frame_rate
        );

        Ok(Self {
            paths,
            index,
            frame_rate,
            current,
        })
    }

    /// Number of frames in the sequence
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Index of the current frame
    pub fn index(&self) -> usize {
        self.index
    }
}

#[async_trait]
impl FrameSource for ImageSequenceSource {
    async fn seek_by(&mut self, seconds: f64) -> PipelineResult<()> {
        let delta = (seconds * self.frame_rate).round() as i64;
        let last = self.paths.len().saturating_sub(1) as i64;
        let target = (self.index as i64 + delta).clamp(0, last) as usize;

        if target == self.index {
            return Ok(());
        }

        self.index = target;
        match load_frame(&self.paths[target]).await {
            Ok(frame) => {
                self.current = frame;
                debug!("Seeked to frame {} ({:.3}s)", self.index, self.position());
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Frame {} ({}) unreadable, keeping previous frame: {}",
                    self.index,
                    self.paths[target].display(),
                    e
                );
                Err(e)
            }
        }
    }

    fn current_frame(&self) -> &RgbaImage {
        &self.current
    }

    fn at_end(&self) -> bool {
        self.index + 1 >= self.paths.len()
    }

    fn position(&self) -> f64 {
        self.index as f64 / self.frame_rate
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Sort key splitting a trailing frame number off the file stem
fn frame_order_key(path: &Path) -> (String, Option<u64>, String) {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let prefix = stem.trim_end_matches(|c: char| c.is_ascii_digit());
    let number = stem[prefix.len()..].parse().ok();
    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
    (prefix.to_string(), number, name.to_string())
}

async fn load_frame(path: &Path) -> PipelineResult<RgbaImage> {
    let bytes = tokio::fs::read(path).await?;
    Ok(image::load_from_memory(&bytes)?.to_rgba8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::TempDir;

    fn write_frames(dir: &Path, shades: &[u8]) {
        for (i, shade) in shades.iter().enumerate() {
            let img = RgbaImage::from_pixel(4, 3, Rgba([*shade, *shade, *shade, 255]));
            img.save(dir.join(format!("frame_{i:04}.png"))).unwrap();
        }
    }

    #[tokio::test]
    async fn test_sequence_steps_in_name_order() {
        let dir = TempDir::new().unwrap();
        write_frames(dir.path(), &[10, 20, 30]);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), 60.0).await.unwrap();
        assert_eq!(source.len(), 3);
        assert_eq!(source.current_frame().get_pixel(0, 0)[0], 10);
        assert!(!source.at_end());

        source.seek_by(1.0 / 60.0).await.unwrap();
        assert_eq!(source.index(), 1);
        assert_eq!(source.current_frame().get_pixel(0, 0)[0], 20);

        source.seek_by(1.0).await.unwrap();
        assert_eq!(source.index(), 2);
        assert!(source.at_end());
        assert_eq!(source.current_frame().get_pixel(0, 0)[0], 30);

        source.seek_by(-1.0).await.unwrap();
        assert_eq!(source.index(), 0);
    }

    #[tokio::test]
    async fn test_empty_directory_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let result = ImageSequenceSource::open(dir.path(), 60.0).await;
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_non_positive_frame_rate_rejected() {
        let dir = TempDir::new().unwrap();
        write_frames(dir.path(), &[0]);
        let result = ImageSequenceSource::open(dir.path(), 0.0).await;
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_unreadable_frame_is_stepped_over() {
        let dir = TempDir::new().unwrap();
        write_frames(dir.path(), &[10, 20, 30, 40]);
        std::fs::write(dir.path().join("frame_0002.png"), b"truncated").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), 60.0).await.unwrap();
        source.seek_by(1.0 / 60.0).await.unwrap();
        assert_eq!(source.current_frame().get_pixel(0, 0)[0], 20);

        let result = source.seek_by(1.0 / 60.0).await;
        assert!(matches!(result, Err(PipelineError::Image(_))));
        assert_eq!(source.index(), 2);
        assert_eq!(source.current_frame().get_pixel(0, 0)[0], 20);

        source.seek_by(1.0 / 60.0).await.unwrap();
        assert_eq!(source.index(), 3);
        assert_eq!(source.current_frame().get_pixel(0, 0)[0], 40);
    }

    #[tokio::test]
    async fn test_open_starts_at_first_readable_frame() {
        let dir = TempDir::new().unwrap();
        write_frames(dir.path(), &[10, 20]);
        std::fs::write(dir.path().join("frame_0000.png"), b"").unwrap();

        let source = ImageSequenceSource::open(dir.path(), 60.0).await.unwrap();
        assert_eq!(source.index(), 1);
        assert_eq!(source.current_frame().get_pixel(0, 0)[0], 20);
    }

    #[tokio::test]
    async fn test_numbered_names_sort_by_value() {
        let dir = TempDir::new().unwrap();
        for (i, shade) in [(9u8, 90u8), (10, 100), (1, 10)] {
            let img = RgbaImage::from_pixel(2, 2, Rgba([shade, shade, shade, 255]));
            img.save(dir.path().join(format!("frame_{i}.png"))).unwrap();
        }

        let mut source = ImageSequenceSource::open(dir.path(), 1.0).await.unwrap();
        let mut shades = vec![source.current_frame().get_pixel(0, 0)[0]];
        while !source.at_end() {
            source.seek_by(1.0).await.unwrap();
            shades.push(source.current_frame().get_pixel(0, 0)[0]);
        }
        assert_eq!(shades, vec![10, 90, 100]);
    }

    #[test]
    fn test_frame_file_filter() {
        assert!(is_frame_file(Path::new("a/b/0001.PNG")));
        assert!(is_frame_file(Path::new("0001.jpeg")));
        assert!(!is_frame_file(Path::new("0001.txt")));
        assert!(!is_frame_file(Path::new("noext")));
    }
}
