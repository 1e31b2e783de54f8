//! Capture settings shared with the UI
//!
//! Perspective points, detection tuning and the list of selection regions,
//! exchanged as JSON. The pipeline only ever reads these.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::{PipelineError, PipelineResult};

/// A 2D point in raw frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Four corners of the game screen, clockwise from top-left.
///
/// An empty quad means the raw frame is used as-is.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct PerspectiveQuad {
    corners: Option<[Point; 4]>,
}

impl PerspectiveQuad {
    /// Quad that leaves frames untouched
    pub fn passthrough() -> Self {
        Self { corners: None }
    }

    /// Quad from (top-left, top-right, bottom-right, bottom-left)
    pub fn new(tl: Point, tr: Point, br: Point, bl: Point) -> Self {
        Self {
            corners: Some([tl, tr, br, bl]),
        }
    }

    pub fn corners(&self) -> Option<&[Point; 4]> {
        self.corners.as_ref()
    }

    pub fn is_passthrough(&self) -> bool {
        self.corners.is_none()
    }
}

impl TryFrom<Vec<Point>> for PerspectiveQuad {
    type Error = String;

    fn try_from(points: Vec<Point>) -> Result<Self, Self::Error> {
        match points.as_slice() {
            [] => Ok(Self::passthrough()),
            [tl, tr, br, bl] => Ok(Self::new(*tl, *tr, *br, *bl)),
            other => Err(format!(
                "perspective quad needs 0 or 4 points, got {}",
                other.len()
            )),
        }
    }
}

impl From<PerspectiveQuad> for Vec<Point> {
    fn from(quad: PerspectiveQuad) -> Self {
        quad.corners.map(|c| c.to_vec()).unwrap_or_default()
    }
}

/// Axis-aligned pixel rectangle in rectified frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Whether the rectangle is non-empty and lies entirely inside a frame
    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).is_some_and(|r| r <= frame_width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= frame_height)
    }
}

/// Whether binarization keeps bright pixels white or black
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Pixels above the threshold become white
    Normal,
    /// Pixels above the threshold become black (dark text for the OCR engine)
    #[default]
    Inverted,
}

/// What a region holds and how it is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RegionKind {
    /// Plain OCR over the primary rect
    #[default]
    Text,
    /// Integer digits in the primary rect, fractional digits in `decimal`
    SplitNumeric { decimal: Rect },
    /// Value conveyed by color; classified by hue, never sent to OCR
    Categorical,
}

/// The six notes-radar values of a chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RadarField {
    Notes,
    Chord,
    Peak,
    Charge,
    Scratch,
    Soflan,
}

impl RadarField {
    pub const ALL: [RadarField; 6] = [
        RadarField::Notes,
        RadarField::Chord,
        RadarField::Peak,
        RadarField::Charge,
        RadarField::Scratch,
        RadarField::Soflan,
    ];

    /// Field name as written in output records
    pub fn name(&self) -> &'static str {
        match self {
            RadarField::Notes => "notes",
            RadarField::Chord => "chord",
            RadarField::Peak => "peak",
            RadarField::Charge => "charge",
            RadarField::Scratch => "scratch",
            RadarField::Soflan => "soflan",
        }
    }
}

/// What a region's value means, derived from its label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionRole {
    Title,
    Artist,
    Difficulty,
    Radar(RadarField),
    Other,
}

impl RegionRole {
    /// Case-insensitive label lookup
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "TITLE" => RegionRole::Title,
            "ARTIST" => RegionRole::Artist,
            "DIFFICULTY" => RegionRole::Difficulty,
            "NOTES" => RegionRole::Radar(RadarField::Notes),
            "CHORD" => RegionRole::Radar(RadarField::Chord),
            "PEAK" => RegionRole::Radar(RadarField::Peak),
            "CHARGE" => RegionRole::Radar(RadarField::Charge),
            "SCRATCH" => RegionRole::Radar(RadarField::Scratch),
            "SOF-LAN" | "SOFLAN" => RegionRole::Radar(RadarField::Soflan),
            _ => RegionRole::Other,
        }
    }
}

/// A labelled region of the result screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRegion {
    pub label: String,
    #[serde(flatten)]
    pub rect: Rect,
    #[serde(default)]
    pub kind: RegionKind,
    /// Luma cutoff, or hue lower bound for categorical regions
    #[serde(default = "default_threshold")]
    pub threshold: u8,
    #[serde(default = "default_scale")]
    pub scale_x: f64,
    #[serde(default = "default_scale")]
    pub scale_y: f64,
    #[serde(default)]
    pub polarity: Polarity,
}

fn default_threshold() -> u8 {
    150
}

fn default_scale() -> f64 {
    3.0
}

impl SelectionRegion {
    pub fn new(label: &str, rect: Rect) -> Self {
        Self {
            label: label.to_string(),
            rect,
            kind: RegionKind::Text,
            threshold: default_threshold(),
            scale_x: default_scale(),
            scale_y: default_scale(),
            polarity: Polarity::default(),
        }
    }

    pub fn with_kind(mut self, kind: RegionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_scale(mut self, scale_x: f64, scale_y: f64) -> Self {
        self.scale_x = scale_x;
        self.scale_y = scale_y;
        self
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_polarity(mut self, polarity: Polarity) -> Self {
        self.polarity = polarity;
        self
    }

    pub fn role(&self) -> RegionRole {
        RegionRole::from_label(&self.label)
    }

    /// Secondary rect for split numeric regions
    pub fn decimal_rect(&self) -> Option<Rect> {
        match self.kind {
            RegionKind::SplitNumeric { decimal } => Some(decimal),
            _ => None,
        }
    }
}

/// Auto-seek tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSettings {
    /// Mean grayscale difference above which a region counts as changed
    pub diff_threshold: f64,
    /// Extra frames to step over after a change so transitions settle
    pub skip_frames_after_change: u32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            diff_threshold: 20.0,
            skip_frames_after_change: 0,
        }
    }
}

/// Settings document exported/imported by the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub perspective_points: PerspectiveQuad,
    #[serde(default)]
    pub detection_settings: DetectionSettings,
    #[serde(default = "default_selections")]
    pub selections: Vec<SelectionRegion>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            perspective_points: PerspectiveQuad::passthrough(),
            detection_settings: DetectionSettings::default(),
            selections: default_selections(),
        }
    }
}

/// Stock layout of the 1080p result screen
pub fn default_selections() -> Vec<SelectionRegion> {
    vec![
        SelectionRegion::new("TITLE", Rect::new(496, 654, 656, 45)).with_scale(1.0, 1.0),
        SelectionRegion::new("NOTES", Rect::new(669, 592, 107, 22)),
        SelectionRegion::new("CHORD", Rect::new(962, 583, 101, 19)),
        SelectionRegion::new("PEAK", Rect::new(1248, 570, 88, 20)),
        SelectionRegion::new("CHARGE", Rect::new(670, 613, 107, 23)),
        SelectionRegion::new("SOF-LAN", Rect::new(961, 602, 101, 23)),
        SelectionRegion::new("SCRATCH", Rect::new(1248, 591, 91, 21)),
    ]
}

/// Load settings from a JSON file
pub fn load_settings(path: &Path) -> PipelineResult<Settings> {
    let content = std::fs::read_to_string(path)?;
    parse_settings(&content)
}

/// Parse settings JSON, mapping schema problems to configuration errors.
///
/// Regions with a non-positive scale are dropped with a warning; the rest
/// of the document is kept.
pub fn parse_settings(content: &str) -> PipelineResult<Settings> {
    let mut settings: Settings = serde_json::from_str(content)
        .map_err(|e| PipelineError::Configuration(format!("malformed settings: {e}")))?;

    settings.selections.retain(|region| {
        let usable = region.scale_x > 0.0 && region.scale_y > 0.0;
        if !usable {
            warn!(
                "Dropping region '{}': scale {}x{} is not positive",
                region.label, region.scale_x, region.scale_y
            );
        }
        usable
    });

    Ok(settings)
}

/// Save settings to a JSON file
pub fn save_settings(settings: &Settings, path: &Path) -> PipelineResult<()> {
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content)?;
    Ok(())
}
