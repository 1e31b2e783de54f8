//! Result-screen change detection
//!
//! Steps through the recording one frame at a time and compares every
//! configured region against its content at the moment seeking started.
//! The first region whose mean grayscale difference exceeds the threshold
//! ends the search.

use image::{imageops, RgbaImage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{CapturedFrame, FrameSource};
use crate::config::{DetectionSettings, PerspectiveQuad, Rect, SelectionRegion};
use crate::error::{PipelineError, PipelineResult};
use crate::vision::preprocess::gray_value;
use crate::vision::rectify::rectify;

/// How a seek ended
#[derive(Debug)]
pub enum SeekOutcome {
    /// A region changed; `frame` is captured after the settle steps
    ChangeFound {
        frame: CapturedFrame,
        /// Index of the first region that exceeded the threshold
        region: usize,
        diff: f64,
        /// Unreadable frame met while settling; `frame` is the last readable one
        settle_error: Option<PipelineError>,
    },
    /// The source ended before any region changed
    ExhaustedSource,
    /// The cancellation token was set at a step boundary
    Cancelled,
}

/// Frame-difference driven auto-seek
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    quad: PerspectiveQuad,
    settings: DetectionSettings,
    step_seconds: f64,
}

impl ChangeDetector {
    /// Create a detector stepping one frame of a `frame_rate` recording at a time
    pub fn new(quad: PerspectiveQuad, settings: DetectionSettings, frame_rate: f64) -> Self {
        Self {
            quad,
            settings,
            step_seconds: 1.0 / frame_rate,
        }
    }

    pub fn settings(&self) -> &DetectionSettings {
        &self.settings
    }

    /// Seek forward until any region changes, the source ends, or `cancel` is set.
    ///
    /// The token is only checked between steps; a seek that has started is
    /// always awaited to completion. A failed step while searching is
    /// returned as the error, with the source already moved past the bad
    /// frame. A failed step while settling ends the settle early.
    pub async fn seek_next_change<S>(
        &self,
        source: &mut S,
        regions: &[SelectionRegion],
        cancel: &CancellationToken,
    ) -> PipelineResult<SeekOutcome>
    where
        S: FrameSource + ?Sized,
    {
        let references = self.capture_references(source.current_frame(), regions);
        if references.is_empty() {
            return Err(PipelineError::Configuration(
                "no selection region fits inside the frame".to_string(),
            ));
        }

        info!(
            "Seeking from {:.3}s, watching {} regions (threshold {})",
            source.position(),
            references.len(),
            self.settings.diff_threshold
        );

        let (region, diff) = loop {
            if cancel.is_cancelled() {
                info!("Seek cancelled at {:.3}s", source.position());
                return Ok(SeekOutcome::Cancelled);
            }
            if source.at_end() {
                info!("Reached end of source without a change");
                return Ok(SeekOutcome::ExhaustedSource);
            }

            source.seek_by(self.step_seconds).await?;

            let frame = rectify(source.current_frame(), &self.quad);
            if let Some(hit) = self.first_changed_region(&frame, &references) {
                break hit;
            }
        };

        info!(
            "Change in region {} (diff {:.2}) at {:.3}s",
            regions[region].label,
            diff,
            source.position()
        );

        let mut settle_error = None;
        for _ in 0..self.settings.skip_frames_after_change {
            if cancel.is_cancelled() {
                return Ok(SeekOutcome::Cancelled);
            }
            if source.at_end() {
                break;
            }
            if let Err(e) = source.seek_by(self.step_seconds).await {
                warn!("Settling stopped at {:.3}s: {}", source.position(), e);
                settle_error = Some(e);
                break;
            }
        }

        let frame = rectify(source.current_frame(), &self.quad).into_owned();
        Ok(SeekOutcome::ChangeFound {
            frame: CapturedFrame::new(frame, source.position()),
            region,
            diff,
            settle_error,
        })
    }

    /// Crops of every region that fits the current rectified frame
    fn capture_references(
        &self,
        raw: &RgbaImage,
        regions: &[SelectionRegion],
    ) -> Vec<(usize, Rect, RgbaImage)> {
        let frame = rectify(raw, &self.quad);
        let (width, height) = frame.dimensions();

        regions
            .iter()
            .enumerate()
            .filter_map(|(index, region)| {
                if !region.rect.fits_within(width, height) {
                    warn!(
                        "Skipping region '{}' for change detection: outside {}x{} frame",
                        region.label, width, height
                    );
                    return None;
                }
                Some((index, region.rect, crop(&frame, region.rect)))
            })
            .collect()
    }

    fn first_changed_region(
        &self,
        frame: &RgbaImage,
        references: &[(usize, Rect, RgbaImage)],
    ) -> Option<(usize, f64)> {
        let (width, height) = frame.dimensions();
        for (index, rect, reference) in references {
            if !rect.fits_within(width, height) {
                continue;
            }
            let current = crop(frame, *rect);
            let Some(diff) = region_diff(reference, &current) else {
                continue;
            };
            debug!("Region {} diff {:.3}", index, diff);
            if diff > self.settings.diff_threshold {
                return Some((*index, diff));
            }
        }
        None
    }
}

fn crop(frame: &RgbaImage, rect: Rect) -> RgbaImage {
    imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image()
}

/// Mean absolute difference of `(R + G + B) / 3` over all pixels.
///
/// `None` when the images differ in size or are empty.
pub fn region_diff(a: &RgbaImage, b: &RgbaImage) -> Option<f64> {
    if a.dimensions() != b.dimensions() || a.width() == 0 || a.height() == 0 {
        return None;
    }

    let total: f64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(p1, p2)| (gray_value(p1[0], p1[1], p1[2]) - gray_value(p2[0], p2[1], p2[2])).abs())
        .sum();

    Some(total / f64::from(a.width() * a.height()))
}
