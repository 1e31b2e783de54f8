//! Vision/OCR Layer
//!
//! Turns rectified result-screen frames into recognized text:
//! - Perspective rectification of the raw frame
//! - Per-region preprocessing into threshold-jittered candidates
//! - Change detection between consecutive frames
//! - Batched recognition through a pluggable engine (tesseract by default)

pub mod change;
pub mod ocr;
pub mod preprocess;
pub mod rectify;
pub mod tesseract;

pub use change::{ChangeDetector, SeekOutcome};
pub use ocr::{
    EngineProvider, Language, OcrJob, OcrSession, RecognitionEngine, RecognitionMode,
    RecognitionResult,
};
pub use preprocess::{CandidateImage, CandidateKey, Part, VariantConfig};
pub use rectify::rectify;
pub use tesseract::{TesseractEngine, TesseractProvider};
