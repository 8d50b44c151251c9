//! Cached square previews
//!
//! File names derive from a hash of the source path, so a second request for
//! the same path finds the existing file and returns without decoding.

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, Rgb, RgbImage};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::Result;
use crate::imaging;

/// Bounding box the source is shrunk into before placement
pub const FIT_SIZE: u32 = 128;
/// Output canvas edge
pub const CANVAS_SIZE: u32 = 64;
pub const JPEG_QUALITY: u8 = 85;

pub struct ThumbnailGenerator {
    dir: PathBuf,
}

impl ThumbnailGenerator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Where the thumbnail for `source` lives, whether or not it exists yet
    pub fn path_for(&self, source: &Path) -> PathBuf {
        self.dir.join(thumbnail_name(source))
    }

    pub fn exists(&self, source: &Path) -> bool {
        is_cached(&self.path_for(source))
    }

    /// Return the cached thumbnail, or build one from the frame `load` yields
    pub fn generate<F>(&self, source: &Path, load: F) -> Result<PathBuf>
    where
        F: FnOnce() -> Result<DynamicImage>,
    {
        let target = self.path_for(source);
        if is_cached(&target) {
            debug!("Thumbnail cached: {}", target.display());
            return Ok(target);
        }

        let canvas = render(&load()?)?;
        std::fs::create_dir_all(&self.dir)?;

        // Encode beside the target and rename, so an interrupted write never
        // leaves a partial file under the cached name
        let staging = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(staging.as_file());
            JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY).encode_image(&canvas)?;
            writer.flush()?;
        }
        staging.persist(&target).map_err(|e| e.error)?;
        debug!("Thumbnail written: {}", target.display());
        Ok(target)
    }
}

/// An empty file is what a crash before the first byte leaves behind
fn is_cached(target: &Path) -> bool {
    std::fs::metadata(target)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// `thumb_<last 10 digits of the path hash>.jpg`
pub fn thumbnail_name(source: &Path) -> String {
    let hash = blake3::hash(source.to_string_lossy().as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    let digits = u64::from_le_bytes(head) % 10_000_000_000;
    format!("thumb_{:010}.jpg", digits)
}

/// Shrink into 128x128 and center on a black 64x64 canvas.
/// Anything larger than the canvas is clipped around the center.
fn render(image: &DynamicImage) -> Result<RgbImage> {
    let rgb = image.to_rgb8();
    let (w, h) = imaging::fit_within(rgb.width(), rgb.height(), FIT_SIZE, FIT_SIZE);
    let fitted = imaging::resize_rgb(&rgb, w, h)?;

    let mut canvas = RgbImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, Rgb([0, 0, 0]));
    let x = (CANVAS_SIZE as i64 - w as i64).div_euclid(2);
    let y = (CANVAS_SIZE as i64 - h as i64).div_euclid(2);
    imageops::overlay(&mut canvas, &fitted, x, y);
    Ok(canvas)
}
