//! media_vault - metadata catalog for photo and video libraries
//!
//! Walks a directory tree and, for each still or video, records capture
//! time, GPS position, face count, on-image text, scene tags, a mood label
//! and a thumbnail in SQLite. Heavy lifting is shelled out where a tool
//! does it best (ffmpeg, exiftool, llama.cpp, tesseract); the rest is
//! pure Rust.

pub mod config;
pub mod error;
pub mod extractor;
pub mod faces;
pub mod ffmpeg;
pub mod gpu;
pub mod imaging;
pub mod metadata;
pub mod metrics;
pub mod mood;
pub mod ocr;
pub mod scanner;
pub mod scene;
pub mod store;
pub mod thumbnail;
pub mod video;

pub use config::{AppConfig, ExtractorConfig, OcrConfig};
pub use error::{MediaError, Result};
pub use extractor::{MediaRecord, MetadataExtractor};
pub use ffmpeg::{FfmpegCommand, FfmpegError};
pub use gpu::{AccelerationMode, AccelerationProbe, FixedProbe, SystemProbe};
pub use metadata::{dms_to_decimal, CaptureMetadata, GpsCoordinates, MediaKind};
pub use metrics::{Metrics, MetricsSnapshot};
pub use ocr::{EngineKind, EngineStatus, OcrEngineSelector, OcrError, OcrText, TextRecognizer};
pub use scanner::{MediaScanner, ScanStats, StopHandle};
pub use store::{MediaFilter, MediaStore, SqliteStore};
pub use video::{FfmpegFrameSampler, FrameSampler};
