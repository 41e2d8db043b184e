use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("unsupported image extension: {0:?}")]
    UnsupportedExtension(String),
    #[error("invalid file name: {0:?}")]
    InvalidFilename(String),
    #[error("source image not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("thumbnail generation failed for {}: {reason}", .path.display())]
    ThumbnailGenerationFailed { path: PathBuf, reason: String },
    #[error("write failed for {}: {source}", .path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no free file name left for {0:?}")]
    NameExhausted(String),
}

pub type GalleryResult<T> = Result<T, GalleryError>;
