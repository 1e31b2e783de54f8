//! Session state threaded through a scan

use crate::app::ExtractionReport;
use crate::config::{AppConfig, Settings};
use crate::storage::{MasterCatalogEntry, OutputStore};

/// Everything one extraction session works with
#[derive(Debug)]
pub struct SessionState {
    /// Tool configuration
    pub config: AppConfig,
    /// Perspective quad, detection tuning and regions
    pub settings: Settings,
    /// Reference catalog for title matching
    pub catalog: Vec<MasterCatalogEntry>,
    /// Records committed so far
    pub store: OutputStore,
    /// Result of the most recent extraction
    pub last_report: Option<ExtractionReport>,
    /// Counters (not persisted)
    pub runtime: RuntimeState,
}

impl SessionState {
    /// Create a new session with an empty output store
    pub fn new(config: AppConfig, settings: Settings, catalog: Vec<MasterCatalogEntry>) -> Self {
        Self {
            config,
            settings,
            catalog,
            store: OutputStore::new(),
            last_report: None,
            runtime: RuntimeState::default(),
        }
    }
}

/// Scan counters that are not persisted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeState {
    /// Result screens found by the change detector
    pub changes_found: usize,
    /// Records accepted by the store
    pub committed: usize,
    /// Records rejected as duplicates
    pub duplicates: usize,
    /// Drafts that failed validation
    pub invalid: usize,
    /// Extractions whose OCR session failed
    pub recognition_failures: usize,
    /// Frames skipped because they could not be read
    pub frame_errors: usize,
    /// Last error message (if any)
    pub last_error: Option<String>,
}

impl RuntimeState {
    /// Clear any error state
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Set an error message
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }
}
