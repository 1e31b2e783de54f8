//! Tesseract backend
//!
//! Drives the `tesseract` command-line program. Each recognition writes the
//! candidate bitmap to a temporary PNG and runs one child process, so many
//! jobs can be in flight at once.

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::OcrConfig;
use crate::error::EngineError;
use crate::vision::ocr::{EngineProvider, Language, RecognitionEngine, RecognitionMode};

/// Page segmentation mode flag for a recognition mode
fn psm(mode: RecognitionMode) -> &'static str {
    match mode {
        RecognitionMode::SingleBlock => "6",
        RecognitionMode::SingleLine => "7",
    }
}

/// Tesseract engine for one language
pub struct TesseractEngine {
    command: String,
    language: Language,
    /// Tesseract traineddata code, e.g. "eng" or "jpn"
    code: String,
}

impl TesseractEngine {
    pub fn new(command: &str, language: Language, code: &str) -> Self {
        Self {
            command: command.to_string(),
            language,
            code: code.to_string(),
        }
    }

    /// Traineddata code this engine runs with
    pub fn code(&self) -> &str {
        &self.code
    }

    fn rejected(&self, reason: impl Into<String>) -> EngineError {
        EngineError::Rejected {
            language: self.code.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    fn language(&self) -> Language {
        self.language
    }

    async fn recognize(&self, image: &DynamicImage, mode: RecognitionMode) -> Result<String, EngineError> {
        let file = tempfile::Builder::new()
            .prefix("radar-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| self.rejected(format!("failed to create temp file: {e}")))?;
        image
            .save_with_format(file.path(), ImageFormat::Png)
            .map_err(|e| self.rejected(format!("failed to write candidate: {e}")))?;

        let output = Command::new(&self.command)
            .arg(file.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.code)
            .arg("--psm")
            .arg(psm(mode))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.rejected(format!("failed to run {}: {e}", self.command)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.rejected(format!("{}: {}", output.status, stderr.trim())));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("tesseract[{}] -> {:?}", self.code, text.trim());
        Ok(text)
    }

    async fn terminate(&self) {
        // Child processes are reaped per call; only the handle goes away here
        debug!("Released tesseract engine '{}'", self.code);
    }
}

/// Hands out tesseract engines after checking the program and language are installed
pub struct TesseractProvider {
    command: String,
    latin_code: String,
    cjk_code: String,
}

impl TesseractProvider {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command: config.tesseract_command.clone(),
            latin_code: config.latin_language.clone(),
            cjk_code: config.cjk_language.clone(),
        }
    }

    fn code_for(&self, language: Language) -> &str {
        match language {
            Language::Latin => &self.latin_code,
            Language::Cjk => &self.cjk_code,
        }
    }

    /// Languages reported by `tesseract --list-langs`
    pub async fn available_languages(&self) -> Result<Vec<String>, EngineError> {
        let output = Command::new(&self.command)
            .arg("--list-langs")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::Startup {
                language: "*".to_string(),
                reason: format!("failed to run {} --list-langs: {e}", self.command),
            })?;

        if !output.status.success() {
            return Err(EngineError::Startup {
                language: "*".to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_language_list(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl EngineProvider for TesseractProvider {
    async fn acquire(&self, language: Language) -> Result<Box<dyn RecognitionEngine>, EngineError> {
        let code = self.code_for(language);
        let available = self.available_languages().await?;
        if !available.iter().any(|l| l == code) {
            return Err(EngineError::Startup {
                language: code.to_string(),
                reason: format!("not installed (available: {})", available.join(", ")),
            });
        }

        info!("Acquired tesseract engine '{}' for {} text", code, language);
        Ok(Box::new(TesseractEngine::new(&self.command, language, code)))
    }
}

/// Skip the header line of `--list-langs` output
fn parse_language_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
