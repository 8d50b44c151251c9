//! Single-frame video sampling via FFmpeg

use crate::ffmpeg::{FfmpegCommand, FfmpegError};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Offset at which video frames are sampled for analysis and thumbnails
pub const SAMPLE_OFFSET: Duration = Duration::from_secs(5);

/// Source of still frames from a video container
pub trait FrameSampler: Send + Sync {
    /// Decode the frame shown at `offset`, seeking by timestamp
    fn sample(&self, video: &Path, offset: Duration) -> Result<DynamicImage, FfmpegError>;
}

/// Samples frames by piping a single PNG out of ffmpeg
pub struct FfmpegFrameSampler {
    program: PathBuf,
}

impl FfmpegFrameSampler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

impl Default for FfmpegFrameSampler {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FrameSampler for FfmpegFrameSampler {
    fn sample(&self, video: &Path, offset: Duration) -> Result<DynamicImage, FfmpegError> {
        // Seeking past the end exits cleanly with no output, which
        // execute_to_bytes turns into an error.
        let png = FfmpegCommand::with_program(&self.program)
            .seek(offset.as_secs_f64())
            .input(video)
            .single_png_frame()
            .execute_to_bytes()?;

        image::load_from_memory(&png).map_err(|e| FfmpegError::InvalidOutput(e.to_string()))
    }
}
