//! Error types for the extraction pipeline
//!
//! Every failure the core can produce is reportable and retryable; none of
//! them is meant to end the session.

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the library
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Pipeline-level failures
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad region, malformed settings/catalog, unusable frame source
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A recognition engine rejected a job or could not be started
    #[error("recognition failed: {0}")]
    RecognitionFailure(#[from] EngineError),

    /// One or more draft fields failed validation; nothing was committed
    #[error("validation failed: {}", join_field_errors(.0))]
    Validation(Vec<FieldError>),

    /// A record with the same (music id, difficulty) is already stored
    #[error("record for music {music_id} at difficulty {difficulty} already exists")]
    DuplicateKey { music_id: u32, difficulty: u8 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure reported by a recognition engine
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("failed to start engine for '{language}': {reason}")]
    Startup { language: String, reason: String },

    #[error("engine '{language}' rejected job: {reason}")]
    Rejected { language: String, reason: String },
}

/// A single failing field of a record draft
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
