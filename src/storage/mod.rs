//! Storage Layer
//!
//! Loads the reference catalog and collects extracted records for export.

pub mod catalog;
pub mod output;

pub use catalog::{load_catalog, MasterCatalogEntry};
pub use output::{OutputRecord, OutputStore, PlayStyle};

use anyhow::Result;
use std::path::PathBuf;

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "radarocr", "RadarOcr")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}
