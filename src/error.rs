use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Dependency not found: {0}")]
    DependencyNotFound(String),

    #[error("Processing failed: {0}")]
    ProcessingError(String),

    #[error("Unsupported media: {0}")]
    Unsupported(String),

    #[error("Directory traversal failed: {0}")]
    Traversal(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] crate::ffmpeg::FfmpegError),
}

pub type Result<T> = std::result::Result<T, MediaError>;
