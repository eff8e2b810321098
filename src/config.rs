//! Process-level configuration
//!
//! Everything is optional in the JSON file; missing fields fall back to the
//! defaults below. The cache directory follows the platform cache location:
//! - Linux: ~/.cache/thumbgrid/thumbnails
//! - macOS: ~/Library/Caches/thumbgrid/thumbnails
//! - Windows: %LOCALAPPDATA%\thumbgrid\thumbnails

use crate::scan::DEFAULT_EXTENSIONS;
use crate::thumbnail::{KeyStrategy, NegativeCache};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_POSITION: f32 = 0.1;
pub const DEFAULT_WIDTH: u32 = 240;
pub const DEFAULT_HEIGHT: u32 = 135;
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("thumbnail position must be within 0.0..=1.0, got {0}")]
    InvalidPosition(f32),

    #[error("thumbnail dimensions must be non-zero, got {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },

    #[error("thumbnail timeout must be non-zero")]
    ZeroTimeout,

    #[error("at least one loader worker is required")]
    ZeroWorkers,
}

/// What the coordinator asks the engine for on every cache miss.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailSettings {
    position: f32,
    width: u32,
    height: u32,
    timeout: Duration,
}

impl ThumbnailSettings {
    pub fn new(position: f32, width: u32, height: u32, timeout: Duration) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&position) {
            return Err(ConfigError::InvalidPosition(position));
        }
        if width == 0 || height == 0 {
            return Err(ConfigError::ZeroDimension { width, height });
        }
        if timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(Self {
            position,
            width,
            height,
            timeout,
        })
    }

    pub fn position(&self) -> f32 {
        self.position
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            position: DEFAULT_POSITION,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub cache_dir: PathBuf,
    pub media_dir: PathBuf,
    pub position: f32,
    pub width: u32,
    pub height: u32,
    pub timeout_ms: u64,
    pub extensions: Vec<String>,
    /// Descend into symlinked directories while scanning.
    pub follow_links: bool,
    pub workers: usize,
    pub key: KeyStrategy,
    /// Remember failed generations for this many seconds. `None` retries on
    /// every lookup.
    pub negative_cache_ttl_secs: Option<u64>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            media_dir: default_media_dir(),
            position: DEFAULT_POSITION,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            follow_links: true,
            workers: 1,
            key: KeyStrategy::default(),
            negative_cache_ttl_secs: None,
        }
    }
}

impl ThumbnailConfig {
    /// Load a config file and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings()?;
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }

    pub fn settings(&self) -> Result<ThumbnailSettings, ConfigError> {
        ThumbnailSettings::new(
            self.position,
            self.width,
            self.height,
            Duration::from_millis(self.timeout_ms),
        )
    }

    pub fn negative_cache(&self) -> NegativeCache {
        match self.negative_cache_ttl_secs {
            Some(secs) => NegativeCache::Ttl(Duration::from_secs(secs)),
            None => NegativeCache::RetryAlways,
        }
    }
}

/// Get the thumbnail cache directory
pub fn default_cache_dir() -> PathBuf {
    let mut path = dirs::cache_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir);

    path.push("thumbgrid");
    path.push("thumbnails");
    path
}

/// Directory scanned for media when none is given
pub fn default_media_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
}
