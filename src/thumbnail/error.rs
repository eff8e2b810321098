use crate::engine::EngineError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why a thumbnail is unavailable.
///
/// None of these are fatal; [`ThumbnailCache::thumbnail_for`] turns every one
/// of them into `None`.
///
/// [`ThumbnailCache::thumbnail_for`]: super::ThumbnailCache::thumbnail_for
#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("no thumbnail delivered within {0:?}")]
    Timeout(Duration),

    #[error("thumbnail wait was interrupted")]
    Interrupted,

    #[error("engine could not generate a thumbnail")]
    GenerationFailed,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cached thumbnail {path} is not a valid PNG: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("generation for {0} failed recently; not retrying yet")]
    RecentFailure(PathBuf),
}

impl ThumbnailError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Outcomes the engine contract treats as a normal "no thumbnail".
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            ThumbnailError::Timeout(_) | ThumbnailError::Interrupted | ThumbnailError::RecentFailure(_)
        )
    }

    /// Whether this failure says something about the media itself and may be
    /// remembered by a negative cache.
    pub fn is_media_failure(&self) -> bool {
        matches!(
            self,
            ThumbnailError::Timeout(_) | ThumbnailError::GenerationFailed | ThumbnailError::Engine(_)
        )
    }
}
