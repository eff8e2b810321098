//! Thumbnail generation and caching
//!
//! This module handles:
//! - Deriving cache keys from media paths (key.rs)
//! - Waiting on one native thumbnail request with a deadline (request.rs)
//! - Storing and retrieving thumbnails on disk (cache.rs)
//! - Interrupting blocked waits (cancel.rs)

mod cache;
mod cancel;
mod error;
pub mod key;
mod request;

pub use cache::{NegativeCache, Thumbnail, ThumbnailCache};
pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use error::ThumbnailError;
pub use key::{CacheKey, Fingerprint, KeyDeriver, KeyStrategy, PathDigest};
pub use request::{ThumbnailImage, ThumbnailRequestCoordinator};
