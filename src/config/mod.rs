//! Application Configuration
//!
//! Tool settings stored in TOML format. Region layout and detection tuning
//! live in the JSON settings document (see [`settings`]).

pub mod settings;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use settings::{
    DetectionSettings, PerspectiveQuad, Point, Polarity, RadarField, Rect, RegionKind,
    RegionRole, SelectionRegion, Settings,
};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Frame stepping settings
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Recognition settings
    #[serde(default)]
    pub ocr: OcrConfig,
    /// Catalog matching settings
    #[serde(default)]
    pub correction: CorrectionConfig,
}

/// Frame stepping settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Frame rate of the recording; one seek step is `1 / frame_rate` seconds
    pub frame_rate: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { frame_rate: 60.0 }
    }
}

/// Recognition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Threshold-jittered renderings per region part
    pub variant_count: usize,
    /// Threshold distance between neighbouring variants
    pub variant_step: i32,
    /// Path or name of the tesseract executable
    pub tesseract_command: String,
    /// Tesseract language code for latin script
    pub latin_language: String,
    /// Tesseract language code for CJK script
    pub cjk_language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            variant_count: 3,
            variant_step: 10,
            tesseract_command: "tesseract".to_string(),
            latin_language: "eng".to_string(),
            cjk_language: "jpn".to_string(),
        }
    }
}

/// Catalog matching settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionConfig {
    /// Number of ranked catalog suggestions kept per extraction
    pub max_suggestions: usize,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self { max_suggestions: 20 }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
