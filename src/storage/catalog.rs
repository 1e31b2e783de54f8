//! Master music catalog

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};

/// One song of the reference catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterCatalogEntry {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub artist: String,
}

impl MasterCatalogEntry {
    pub fn new(id: u32, title: &str, artist: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            artist: artist.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogDocument {
    data: CatalogData,
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogData {
    music: Vec<MasterCatalogEntry>,
}

/// Load a catalog file shaped `{"data": {"music": [...]}}`
pub fn load_catalog(path: &Path) -> PipelineResult<Vec<MasterCatalogEntry>> {
    let content = std::fs::read_to_string(path)?;
    let catalog = parse_catalog(&content)?;
    info!("Loaded {} catalog entries from {}", catalog.len(), path.display());
    Ok(catalog)
}

/// Parse catalog JSON; a malformed document is a configuration error
pub fn parse_catalog(content: &str) -> PipelineResult<Vec<MasterCatalogEntry>> {
    let document: CatalogDocument = serde_json::from_str(content)
        .map_err(|e| PipelineError::Configuration(format!("malformed catalog: {e}")))?;
    Ok(document.data.music)
}
