//! On-image text recognition
//!
//! Two engines sit behind [`TextRecognizer`]:
//!
//! - **Heavy**: a GGUF vision-language model run through the llama.cpp
//!   multimodal CLI, GPU-offloaded when the host has an accelerator
//! - **Light**: the Tesseract CLI, CPU only
//!
//! [`OcrEngineSelector`] probes both once at construction. After that it is
//! read-only: every call tries heavy, falls back to light, and returns empty
//! text when neither produced anything. Callers never see an error.

mod tesseract;
mod vision;

pub use tesseract::TesseractEngine;
pub use vision::{LaunchSettings, VisionEngine, EXTRACTION_PROMPT};

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::OcrConfig;
use crate::gpu::{AccelerationMode, AccelerationProbe};

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Engine not available: {0}")]
    NotAvailable(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid model file: {0}")]
    InvalidModel(String),

    #[error("Recognition failed: {0}")]
    Failed(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A backend that turns pixels into raw text
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &'static str;
    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Heavy,
    Light,
    None,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Heavy => "heavy",
            EngineKind::Light => "light",
            EngineKind::None => "none",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the probe outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub current: EngineKind,
    pub heavy_available: bool,
    pub light_available: bool,
    /// Only reported when the heavy engine loaded
    pub acceleration: Option<AccelerationMode>,
}

/// Recognized text reduced to what gets stored
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrText {
    pub summary: String,
    pub keywords: Vec<String>,
}

impl OcrText {
    pub fn from_raw(text: &str, max_len: usize) -> Self {
        Self {
            summary: summarize(text, max_len),
            keywords: extract_keywords(text),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_empty() && self.keywords.is_empty()
    }
}

/// Engine choice made once and shared read-only afterwards
pub struct OcrEngineSelector {
    heavy: Option<Box<dyn TextRecognizer>>,
    light: Option<Box<dyn TextRecognizer>>,
    acceleration: Option<AccelerationMode>,
}

impl OcrEngineSelector {
    /// Probe both engines. Failures only mark an engine unavailable.
    pub fn probe(config: &OcrConfig, accel: &dyn AccelerationProbe) -> Self {
        let mut acceleration = None;
        let heavy: Option<Box<dyn TextRecognizer>> = if config.heavy_enabled {
            match VisionEngine::load(config, accel) {
                Ok(engine) => {
                    acceleration = Some(engine.acceleration());
                    Some(Box::new(engine))
                }
                Err(e) => {
                    warn!("⚠️ Heavy OCR engine unavailable: {}", e);
                    None
                }
            }
        } else {
            info!("Heavy OCR engine disabled by configuration");
            None
        };

        let light: Option<Box<dyn TextRecognizer>> = if config.light_enabled {
            match TesseractEngine::probe(config.light_binary.as_deref()) {
                Ok(engine) => Some(Box::new(engine)),
                Err(e) => {
                    warn!("⚠️ Light OCR engine unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let selector = Self::from_engines(heavy, light, acceleration);
        info!("🔍 OCR engine: {}", selector.current_engine());
        selector
    }

    /// Assemble a selector from already-built engines
    pub fn from_engines(
        heavy: Option<Box<dyn TextRecognizer>>,
        light: Option<Box<dyn TextRecognizer>>,
        acceleration: Option<AccelerationMode>,
    ) -> Self {
        let acceleration = if heavy.is_some() { acceleration } else { None };
        Self { heavy, light, acceleration }
    }

    /// No engines at all; every call yields empty text
    pub fn unavailable() -> Self {
        Self::from_engines(None, None, None)
    }

    pub fn current_engine(&self) -> EngineKind {
        if self.heavy.is_some() {
            EngineKind::Heavy
        } else if self.light.is_some() {
            EngineKind::Light
        } else {
            EngineKind::None
        }
    }

    pub fn engine_status(&self) -> EngineStatus {
        EngineStatus {
            current: self.current_engine(),
            heavy_available: self.heavy.is_some(),
            light_available: self.light.is_some(),
            acceleration: self.acceleration,
        }
    }

    /// Recognize text, heavy engine first. Never fails.
    pub fn extract_text(&self, image: &DynamicImage, max_len: usize) -> OcrText {
        for engine in [&self.heavy, &self.light].into_iter().flatten() {
            match engine.recognize(image) {
                Ok(text) => return OcrText::from_raw(&text, max_len),
                Err(e) => warn!("{} OCR failed, falling back: {}", engine.name(), e),
            }
        }
        OcrText::default()
    }
}

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "is",
    "are", "was", "were",
];

const MAX_KEYWORDS: usize = 5;

/// Up to five distinct lowercase words, in first-seen order
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for raw in text.split_whitespace() {
        let word = raw
            .to_lowercase()
            .trim_matches(|c: char| ".,!?;:()[]{}\"'-".contains(c))
            .to_string();
        if word.chars().count() < 3
            || STOPWORDS.contains(&word.as_str())
            || !word.chars().all(char::is_alphabetic)
            || keywords.contains(&word)
        {
            continue;
        }
        keywords.push(word);
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
    }
    keywords
}

/// Trimmed text cut to `max_len` characters
pub fn summarize(text: &str, max_len: usize) -> String {
    text.trim().chars().take(max_len).collect()
}
