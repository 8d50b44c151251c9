//! Extraction metrics for media_vault

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Pipeline stage names used as metric keys
pub mod stage {
    pub const DECODE: &str = "decode";
    pub const EXIF: &str = "exif";
    pub const FACES: &str = "faces";
    pub const OCR: &str = "ocr";
    pub const SCENE: &str = "scene";
    pub const THUMBNAIL: &str = "thumbnail";
    pub const FRAME: &str = "frame";
}

/// Counters shared by the extractor across a run
#[derive(Default)]
pub struct Metrics {
    pub files_extracted: AtomicU64,
    pub total_latency_ms: AtomicU64,

    // Per-stage failures (each one degraded a record field to its default)
    pub decode_failures: AtomicU64,
    pub exif_failures: AtomicU64,
    pub face_failures: AtomicU64,
    pub ocr_empty: AtomicU64,
    pub scene_failures: AtomicU64,
    pub thumbnail_failures: AtomicU64,
    pub frame_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_extraction(&self, latency_ms: u64) {
        self.files_extracted.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn record_stage_failure(&self, stage: &str) {
        let counter = match stage {
            stage::DECODE => &self.decode_failures,
            stage::EXIF => &self.exif_failures,
            stage::FACES => &self.face_failures,
            stage::OCR => &self.ocr_empty,
            stage::SCENE => &self.scene_failures,
            stage::THUMBNAIL => &self.thumbnail_failures,
            stage::FRAME => &self.frame_failures,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let files = self.files_extracted.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            files_extracted: files,
            avg_latency_ms: if files > 0 { total_latency / files } else { 0 },
            stage_failures: StageFailures {
                decode: self.decode_failures.load(Ordering::Relaxed),
                exif: self.exif_failures.load(Ordering::Relaxed),
                faces: self.face_failures.load(Ordering::Relaxed),
                ocr_empty: self.ocr_empty.load(Ordering::Relaxed),
                scene: self.scene_failures.load(Ordering::Relaxed),
                thumbnail: self.thumbnail_failures.load(Ordering::Relaxed),
                frame: self.frame_failures.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub files_extracted: u64,
    pub avg_latency_ms: u64,
    pub stage_failures: StageFailures,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailures {
    pub decode: u64,
    pub exif: u64,
    pub faces: u64,
    pub ocr_empty: u64,
    pub scene: u64,
    pub thumbnail: u64,
    pub frame: u64,
}

/// Timer for tracking extraction latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_averages() {
        let metrics = Metrics::new();
        metrics.record_extraction(30);
        metrics.record_extraction(10);
        metrics.record_stage_failure(stage::EXIF);
        metrics.record_stage_failure(stage::EXIF);
        metrics.record_stage_failure(stage::THUMBNAIL);
        metrics.record_stage_failure("unknown-stage");

        let snap = metrics.snapshot();
        assert_eq!(snap.files_extracted, 2);
        assert_eq!(snap.avg_latency_ms, 20);
        assert_eq!(snap.stage_failures.exif, 2);
        assert_eq!(snap.stage_failures.thumbnail, 1);
        assert_eq!(snap.stage_failures.faces, 0);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = Metrics::default().snapshot();
        assert_eq!(snap.avg_latency_ms, 0);
        assert_eq!(snap.stage_failures, StageFailures::default());
    }
}
