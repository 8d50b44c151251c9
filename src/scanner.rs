//! Directory scanning and incremental cataloging
//!
//! Candidates are collected up front (so the total is known for progress),
//! then processed one at a time in file-name order. Already-cataloged paths
//! are skipped unless `update_existing` is set.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{MediaError, Result};
use crate::extractor::MetadataExtractor;
use crate::metadata;
use crate::store::MediaStore;

/// Run totals. `processed + skipped + errors <= total_found` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub total_found: usize,
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub new_records: usize,
    pub updated_records: usize,
}

/// Cooperative cancellation flag, checked between files
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// `(index, total, file_name)`, index is 1-based
pub type ProgressCallback<'a> = &'a mut dyn FnMut(usize, usize, &str);

pub struct MediaScanner {
    extractor: Arc<MetadataExtractor>,
    store: Arc<dyn MediaStore>,
    stop: StopHandle,
}

impl MediaScanner {
    pub fn new(extractor: Arc<MetadataExtractor>, store: Arc<dyn MediaStore>) -> Self {
        Self {
            extractor,
            store,
            stop: StopHandle::default(),
        }
    }

    /// Handle that can stop a running scan from another thread
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Catalog every supported file under `root`.
    ///
    /// Only an unreadable root is fatal. Per-file failures, including
    /// panics inside extraction, are counted in `errors`.
    pub fn scan(
        &self,
        root: &Path,
        mut progress: Option<ProgressCallback<'_>>,
        update_existing: bool,
    ) -> Result<ScanStats> {
        self.stop.reset();

        let candidates = discover(root)?;
        let mut stats = ScanStats {
            total_found: candidates.len(),
            ..ScanStats::default()
        };
        info!("🔍 Found {} media files under {}", stats.total_found, root.display());

        for (index, path) in candidates.iter().enumerate() {
            if self.stop.is_stopped() {
                info!("⏹️ Scan stopped after {} of {} files", index, stats.total_found);
                break;
            }

            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Some(callback) = progress.as_mut() {
                callback(index + 1, stats.total_found, &name);
            }

            match self.process(path, update_existing) {
                Ok(Outcome::Skipped) => stats.skipped += 1,
                Ok(Outcome::Inserted) => {
                    stats.processed += 1;
                    stats.new_records += 1;
                }
                Ok(Outcome::Updated) => {
                    stats.processed += 1;
                    stats.updated_records += 1;
                }
                Err(e) => {
                    warn!("❌ Failed to process {}: {}", path.display(), e);
                    stats.errors += 1;
                }
            }
        }

        info!(
            "✅ Scan complete: {} processed ({} new, {} updated), {} skipped, {} errors",
            stats.processed, stats.new_records, stats.updated_records, stats.skipped, stats.errors
        );
        Ok(stats)
    }

    fn process(&self, path: &Path, update_existing: bool) -> Result<Outcome> {
        let key = path.to_string_lossy();
        let existed = self.store.file_exists(&key)?;
        if existed && !update_existing {
            debug!("Skipping cataloged {}", key);
            return Ok(Outcome::Skipped);
        }

        let record = catch_unwind(AssertUnwindSafe(|| self.extractor.extract(path)))
            .map_err(|panic| MediaError::ProcessingError(panic_message(panic.as_ref())))?;
        self.store.upsert(&record)?;

        Ok(if existed { Outcome::Updated } else { Outcome::Inserted })
    }
}

enum Outcome {
    Skipped,
    Inserted,
    Updated,
}

/// Supported files under `root` in file-name order.
/// Errors below the root and paths that are not valid UTF-8 are logged and
/// skipped.
pub fn discover(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(MediaError::Traversal(format!("{} is not a readable directory", root.display())));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        match entry {
            Ok(entry) => {
                if !entry.file_type().is_file() || !metadata::is_supported(entry.path()) {
                    continue;
                }
                // Records are keyed by path text; lossy keys could collide
                if entry.path().to_str().is_none() {
                    warn!("⚠️ Skipping non-UTF-8 path: {}", entry.path().display());
                    continue;
                }
                files.push(entry.into_path());
            }
            Err(e) if e.depth() == 0 => {
                return Err(MediaError::Traversal(format!("{}: {}", root.display(), e)));
            }
            Err(e) => warn!("⚠️ Skipping unreadable entry: {}", e),
        }
    }
    Ok(files)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("extraction panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;
    use crate::extractor::MediaRecord;
    use crate::ocr::OcrEngineSelector;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<HashMap<String, MediaRecord>>,
        fail_upsert_for: Option<&'static str>,
    }

    impl MediaStore for MemoryStore {
        fn file_exists(&self, path: &str) -> Result<bool> {
            Ok(self.rows.lock().unwrap().contains_key(path))
        }
        fn upsert(&self, record: &MediaRecord) -> Result<()> {
            if self.fail_upsert_for.is_some_and(|n| record.name == n) {
                return Err(MediaError::ProcessingError("disk full".to_string()));
            }
            self.rows.lock().unwrap().insert(record.path.clone(), record.clone());
            Ok(())
        }
    }

    fn scanner(dir: &Path, store: Arc<MemoryStore>) -> MediaScanner {
        let config = ExtractorConfig {
            thumbnail_dir: dir.join("thumbs"),
            face_cascade_path: dir.join("missing.xml"),
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            exiftool_path: PathBuf::from("/nonexistent/exiftool"),
        };
        let extractor = MetadataExtractor::new(&config, Arc::new(OcrEngineSelector::unavailable()), 100);
        MediaScanner::new(Arc::new(extractor), store)
    }

    fn library(dir: &Path) -> PathBuf {
        let root = dir.join("library");
        std::fs::create_dir_all(root.join("nested")).unwrap();
        for name in ["b.JPG", "a.png", "nested/c.mp4", "notes.txt", "raw.cr2"] {
            std::fs::write(root.join(name), b"placeholder").unwrap();
        }
        root
    }

    #[test]
    fn test_discover_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        let root = library(dir.path());
        let names: Vec<String> = discover(&root)
            .unwrap()
            .iter()
            .map(|p| p.strip_prefix(&root).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "b.JPG", "nested/c.mp4"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_discover_skips_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let root = library(dir.path());
        std::fs::write(root.join(OsStr::from_bytes(b"caf\xe9.jpg")), b"placeholder").unwrap();
        std::fs::write(root.join(OsStr::from_bytes(b"caf\xe8.jpg")), b"placeholder").unwrap();

        let found = discover(&root).unwrap();
        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|p| p.to_str().is_some()));
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let err = scanner(dir.path(), store).scan(&dir.path().join("absent"), None, false);
        assert!(matches!(err, Err(MediaError::Traversal(_))));
    }

    #[test]
    fn test_second_pass_skips() {
        let dir = tempfile::tempdir().unwrap();
        let root = library(dir.path());
        let store = Arc::new(MemoryStore::default());
        let scanner = scanner(dir.path(), store.clone());

        let first = scanner.scan(&root, None, false).unwrap();
        assert_eq!(first.total_found, 3);
        assert_eq!((first.processed, first.new_records, first.skipped), (3, 3, 0));

        let second = scanner.scan(&root, None, false).unwrap();
        assert_eq!((second.processed, second.new_records, second.updated_records), (0, 0, 0));
        assert_eq!(second.skipped, 3);

        let third = scanner.scan(&root, None, true).unwrap();
        assert_eq!((third.processed, third.updated_records, third.new_records), (3, 3, 0));
        assert_eq!(store.rows.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_progress_reports_every_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let root = library(dir.path());
        let scanner = scanner(dir.path(), Arc::new(MemoryStore::default()));

        let mut seen = Vec::new();
        let mut callback = |i: usize, total: usize, name: &str| seen.push((i, total, name.to_string()));
        scanner.scan(&root, Some(&mut callback), false).unwrap();
        assert_eq!(
            seen,
            vec![
                (1, 3, "a.png".to_string()),
                (2, 3, "b.JPG".to_string()),
                (3, 3, "c.mp4".to_string()),
            ]
        );
    }

    #[test]
    fn test_stop_halts_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let root = library(dir.path());
        let scanner = scanner(dir.path(), Arc::new(MemoryStore::default()));
        let handle = scanner.stop_handle();

        let mut dispatched = 0;
        let mut callback = |_: usize, _: usize, _: &str| {
            dispatched += 1;
            handle.stop();
        };
        let stats = scanner.scan(&root, Some(&mut callback), false).unwrap();
        assert_eq!(dispatched, 1);
        assert_eq!(stats.processed, 1);
        assert!(stats.processed + stats.skipped + stats.errors <= stats.total_found);
    }

    #[test]
    fn test_store_failure_counts_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = library(dir.path());
        let store = Arc::new(MemoryStore {
            fail_upsert_for: Some("b.JPG"),
            ..MemoryStore::default()
        });
        let stats = scanner(dir.path(), store).scan(&root, None, false).unwrap();
        assert_eq!((stats.processed, stats.errors), (2, 1));
    }
}
