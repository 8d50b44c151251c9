//! Per-file metadata extraction
//!
//! Every stage runs independently. A failing stage logs, bumps its metric,
//! and leaves its field at the default; the record is always produced.
//!
//! Stills: capture metadata, faces, text, scene tags, thumbnail.
//! Videos: one frame sampled at 5s feeds faces, text and scene tags; the
//! thumbnail samples its own frame at the same offset. Video containers are
//! never parsed for capture metadata.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ExtractorConfig;
use crate::error::{MediaError, Result};
use crate::faces::FaceDetector;
use crate::imaging;
use crate::metadata::{ExifParserChain, GpsCoordinates, MediaKind};
use crate::metrics::{stage, Metrics, Timer};
use crate::mood;
use crate::ocr::{OcrEngineSelector, OcrText};
use crate::scene::SceneAnalyzer;
use crate::thumbnail::ThumbnailGenerator;
use crate::video::{FfmpegFrameSampler, FrameSampler, SAMPLE_OFFSET};

pub const DEFAULT_MOOD: &str = "Neutral";

/// One catalog row, keyed by `path`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub path: String,
    pub name: String,
    pub kind: MediaKind,
    /// `YYYY:MM:DD HH:MM:SS` as embedded in the file
    pub captured_at: Option<String>,
    pub gps: Option<GpsCoordinates>,
    pub person_count: u32,
    pub ocr_summary: String,
    /// Scene tags then text keywords, comma separated
    pub keywords: Option<String>,
    pub mood: String,
    pub thumbnail_path: Option<String>,
}

impl MediaRecord {
    /// Record with only the identity fields filled in
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_string_lossy().into_owned(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            kind: MediaKind::from_path(path),
            captured_at: None,
            gps: None,
            person_count: 0,
            ocr_summary: String::new(),
            keywords: None,
            mood: DEFAULT_MOOD.to_string(),
            thumbnail_path: None,
        }
    }
}

/// Frame-level analysis shared by stills and video frames
#[derive(Default)]
struct FrameFindings {
    person_count: u32,
    text: OcrText,
    scene_tags: Vec<String>,
}

pub struct MetadataExtractor {
    exif: ExifParserChain,
    faces: Option<FaceDetector>,
    ocr: Arc<OcrEngineSelector>,
    scene: SceneAnalyzer,
    thumbnails: ThumbnailGenerator,
    sampler: Box<dyn FrameSampler>,
    ffmpeg: PathBuf,
    max_summary_len: usize,
    metrics: Arc<Metrics>,
}

impl MetadataExtractor {
    /// Build from configuration; the face cascade is loaded here, once
    pub fn new(config: &ExtractorConfig, ocr: Arc<OcrEngineSelector>, max_summary_len: usize) -> Self {
        let faces = match FaceDetector::load(&config.face_cascade_path) {
            Ok(detector) => {
                info!("✅ Face cascade loaded: {}", config.face_cascade_path.display());
                Some(detector)
            }
            Err(e) => {
                warn!(
                    "⚠️ Face cascade unavailable ({}): {}; person counts will be 0",
                    config.face_cascade_path.display(),
                    e
                );
                None
            }
        };

        Self {
            exif: ExifParserChain::standard(&config.exiftool_path),
            faces,
            ocr,
            scene: SceneAnalyzer::new(),
            thumbnails: ThumbnailGenerator::new(&config.thumbnail_dir),
            sampler: Box::new(FfmpegFrameSampler::new(&config.ffmpeg_path)),
            ffmpeg: config.ffmpeg_path.clone(),
            max_summary_len,
            metrics: Metrics::new(),
        }
    }

    pub fn with_sampler(mut self, sampler: Box<dyn FrameSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_exif_parsers(mut self, exif: ExifParserChain) -> Self {
        self.exif = exif;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Extract everything available for `path`. Never fails.
    pub fn extract(&self, path: &Path) -> MediaRecord {
        let timer = Timer::new();
        let mut record = MediaRecord::empty(path);

        let findings = match record.kind {
            MediaKind::Image => {
                let capture = self.stage(stage::EXIF, path, self.exif.parse(path));
                record.captured_at = capture.captured_at;
                record.gps = capture.gps;

                let decoded =
                    self.stage(stage::DECODE, path, imaging::load_image(path, &self.ffmpeg).map(Some));
                let findings = decoded.as_ref().map(|img| self.analyze_frame(path, img));
                record.thumbnail_path = self.thumbnail(path, move || {
                    decoded.ok_or_else(|| MediaError::ProcessingError("image not decodable".to_string()))
                });
                findings
            }
            MediaKind::Video => {
                let frame = self.stage(stage::FRAME, path, self.sample(path).map(Some));
                let findings = frame.as_ref().map(|img| self.analyze_frame(path, img));
                record.thumbnail_path = self.thumbnail(path, || self.sample(path));
                findings
            }
            MediaKind::Unknown => None,
        };

        if let Some(findings) = findings {
            record.person_count = findings.person_count;
            record.keywords = combine_keywords(&findings.scene_tags, &findings.text.keywords);
            record.ocr_summary = findings.text.summary;
        }
        record.mood = mood::classify(path, record.captured_at.as_deref());

        self.metrics.record_extraction(timer.elapsed_ms());
        debug!("Extracted {} in {}ms", path.display(), timer.elapsed_ms());
        record
    }

    fn analyze_frame(&self, path: &Path, image: &DynamicImage) -> FrameFindings {
        let person_count = match &self.faces {
            Some(detector) => detector.count_faces(image) as u32,
            None => {
                // no cascade loaded: the count stays at its default
                self.metrics.record_stage_failure(stage::FACES);
                0
            }
        };

        let text = self.ocr.extract_text(image, self.max_summary_len);
        if text.is_empty() {
            self.metrics.record_stage_failure(stage::OCR);
        }

        let scene_tags = self.stage(stage::SCENE, path, self.scene.tags(image));

        FrameFindings { person_count, text, scene_tags }
    }

    fn sample(&self, path: &Path) -> Result<DynamicImage> {
        Ok(self.sampler.sample(path, SAMPLE_OFFSET)?)
    }

    fn thumbnail<F>(&self, path: &Path, load: F) -> Option<String>
    where
        F: FnOnce() -> Result<DynamicImage>,
    {
        let generated = self.thumbnails.generate(path, load).map(Some);
        self.stage(stage::THUMBNAIL, path, generated)
            .map(|p| p.to_string_lossy().into_owned())
    }

    /// Unwrap a stage result, degrading to the default on failure
    fn stage<T: Default>(&self, name: &str, path: &Path, result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!("⚠️ {} stage failed for {}: {}", name, path.display(), e);
                self.metrics.record_stage_failure(name);
                T::default()
            }
        }
    }
}

/// Order-preserving, de-duplicated join; `None` when there is nothing to join
pub fn combine_keywords(scene_tags: &[String], ocr_keywords: &[String]) -> Option<String> {
    let mut combined: Vec<&str> = Vec::new();
    for word in scene_tags.iter().chain(ocr_keywords) {
        if !word.is_empty() && !combined.contains(&word.as_str()) {
            combined.push(word);
        }
    }
    if combined.is_empty() {
        None
    } else {
        Some(combined.join(", "))
    }
}
