//! Optical character recognition: isolated engine execution and
//! normalization of whatever the engine printed.

pub mod isolator;
pub mod normalizer;
pub mod worker;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use isolator::{EngineCommand, OcrIsolator};
pub use normalizer::{normalize, normalize_outcome};

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Recognition timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Recognition engine failed ({status}): {stderr}")]
    EngineFailed { status: String, stderr: String },
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Recognition engine could not be started: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("OCR workspace error: {0}")]
    Workspace(#[source] std::io::Error),
    #[error("OCR admission closed")]
    Closed,
}

/// Shape of the output the configured engine prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Flat text lines with confidence, no structure.
    Lines,
    /// Layout-parsed regions, tables and rendered markdown.
    Layout,
}

impl Default for EngineKind {
    fn default() -> Self {
        EngineKind::Lines
    }
}

impl EngineKind {
    /// Separator preference used when chunking this engine's markdown.
    pub fn default_separators(&self) -> Vec<String> {
        let seps: &[&str] = match self {
            EngineKind::Lines => &["\n\n", "\n", " "],
            EngineKind::Layout => &["###", "\n\n", " "],
        };
        seps.iter().map(|s| s.to_string()).collect()
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lines" | "line" | "ocr" => Ok(EngineKind::Lines),
            "layout" | "structure" => Ok(EngineKind::Layout),
            other => Err(format!("unknown OCR engine kind '{}'", other)),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Lines => write!(f, "lines"),
            EngineKind::Layout => write!(f, "layout"),
        }
    }
}

/// A decoded upload. Only ever touches disk inside an isolator workspace.
pub struct RawImage {
    image: DynamicImage,
}

impl RawImage {
    pub fn decode(bytes: &[u8]) -> Result<Self, OcrError> {
        if bytes.is_empty() {
            return Err(OcrError::InvalidImage("empty upload".to_string()));
        }
        let image =
            image::load_from_memory(bytes).map_err(|e| OcrError::InvalidImage(e.to_string()))?;
        Ok(Self { image })
    }

    pub fn from_image(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub(crate) fn into_inner(self) -> DynamicImage {
        self.image
    }
}

/// Engine output exactly as printed, plus any markdown the engine left in
/// its artifact directory (already read back; the files are gone).
#[derive(Debug, Clone)]
pub struct RecognitionOutput {
    pub engine: EngineKind,
    pub raw: serde_json::Value,
    pub markdown_artifacts: Vec<String>,
}

impl RecognitionOutput {
    pub fn new(engine: EngineKind, raw: serde_json::Value) -> Self {
        Self {
            engine,
            raw,
            markdown_artifacts: Vec::new(),
        }
    }
}
