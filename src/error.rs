//! Error types shared by the label store, persistence, loading and export.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A label name was empty (or whitespace only); the mutation is aborted.
    #[error("label name must not be empty")]
    EmptyNameRejected,

    /// An index did not address an existing label.
    #[error("label index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// The rendering surface has no usable size yet.
    #[error("view geometry unavailable")]
    GeometryUnavailable,

    /// Stored labels exist but could not be parsed.
    #[error("persisted labels are corrupt: {0}")]
    PersistenceCorrupt(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to load image {path:?}: {source}")]
    ImageLoadFailed {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("font error: {0}")]
    Font(String),

    #[error("encode error: {0}")]
    Encode(#[from] image::ImageError),

    #[error("raster error: {0}")]
    Raster(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
