//! Runtime configuration
//!
//! Loaded once from an optional JSON file. Missing keys fall back to defaults,
//! so a partial file such as `{"ocr": {"use_gpu": false}}` is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{MediaError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub ocr: OcrConfig,
    pub extractor: ExtractorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("metadata.db"),
            ocr: OcrConfig::default(),
            extractor: ExtractorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| MediaError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| MediaError::Config(format!("{}: {}", path.display(), e)))?;
        info!("📋 Loaded configuration from {}", path.display());
        Ok(config)
    }
}

/// Text recognition engines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Single switch for the vision-model engine
    pub heavy_enabled: bool,
    /// GGUF model weights
    pub model_path: PathBuf,
    /// Multimodal projector, when shipped separately from the weights
    pub projector_path: Option<PathBuf>,
    /// llama.cpp multimodal CLI
    pub runtime_path: PathBuf,
    pub use_gpu: bool,
    /// Layers to offload when accelerated; -1 offloads all
    pub gpu_layers: i32,
    pub context_size: u32,
    pub threads: u32,
    pub light_enabled: bool,
    /// Tesseract binary; `None` uses PATH
    pub light_binary: Option<PathBuf>,
    pub max_summary_len: usize,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            heavy_enabled: true,
            model_path: PathBuf::from("models/deepseek-ocr.gguf"),
            projector_path: None,
            runtime_path: PathBuf::from("llama-mtmd-cli"),
            use_gpu: true,
            gpu_layers: -1,
            context_size: 2048,
            threads: 4,
            light_enabled: true,
            light_binary: None,
            max_summary_len: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub thumbnail_dir: PathBuf,
    pub face_cascade_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub exiftool_path: PathBuf,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            thumbnail_dir: PathBuf::from("thumbnails"),
            face_cascade_path: PathBuf::from("models/haarcascade_frontalface_default.xml"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            exiftool_path: PathBuf::from("exiftool"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let cfg = AppConfig::load(None).unwrap();
        assert_eq!(cfg.database_path, PathBuf::from("metadata.db"));
        assert!(cfg.ocr.heavy_enabled);
        assert_eq!(cfg.ocr.gpu_layers, -1);
        assert_eq!(cfg.ocr.max_summary_len, 100);
        assert_eq!(cfg.extractor.thumbnail_dir, PathBuf::from("thumbnails"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"ocr": {"use_gpu": false, "threads": 8}}"#).unwrap();

        let cfg = AppConfig::load(Some(&path)).unwrap();
        assert!(!cfg.ocr.use_gpu);
        assert_eq!(cfg.ocr.threads, 8);
        assert_eq!(cfg.ocr.context_size, 2048);
        assert_eq!(cfg.extractor.ffmpeg_path, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load(Some(&path)), Err(MediaError::Config(_))));
    }
}
