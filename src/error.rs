use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TailError {
    #[error("transcript {} is not available", .path.display())]
    TranscriptUnavailable { path: PathBuf },

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid cache content in {}: {source}", .path.display())]
    CacheDecode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode cache record: {0}")]
    CacheEncode(#[from] serde_json::Error),

    #[error("failed to persist {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TailError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type TailResult<T> = std::result::Result<T, TailError>;
