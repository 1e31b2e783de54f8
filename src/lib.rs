//! radar-ocr - notes radar extraction from recorded result screens
//!
//! Steps through frames of a gameplay recording, detects when the result
//! screen changes, reads its regions with OCR and reconciles the readings
//! against a music catalog into deduplicated records.

pub mod analysis;
pub mod app;
pub mod capture;
pub mod config;
pub mod error;
pub mod shared;
pub mod storage;
pub mod vision;

pub use error::{PipelineError, PipelineResult};
