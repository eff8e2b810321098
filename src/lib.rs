//! Disk-cached video thumbnails produced by a native media engine.
//!
//! The pieces, bottom up:
//! - [`engine`]: the narrow engine surface plus an ffmpeg-backed engine
//! - [`thumbnail`]: the request coordinator and the disk cache
//! - [`scan`]: finding candidate video files
//! - [`loader`]: running lookups on a background worker
//! - [`config`]: process-level settings

pub mod config;
pub mod engine;
pub mod loader;
pub mod scan;
pub mod thumbnail;

pub use config::{ConfigError, ThumbnailConfig, ThumbnailSettings};
pub use loader::{LoadSummary, LoaderEvent, ThumbnailLoader};
pub use scan::{MediaFile, MediaScanner};
pub use thumbnail::{Thumbnail, ThumbnailCache, ThumbnailError};
