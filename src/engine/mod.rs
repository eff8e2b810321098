//! Native media engine surface
//!
//! The thumbnail core only needs a narrow slice of a media engine:
//! - opening a media resource for a file path
//! - attaching and detaching picture listeners on that resource
//! - issuing one asynchronous thumbnail request by position
//! - releasing every native handle those calls produced
//!
//! Anything that owns native resources is released through the guards in
//! [`guard`], so cleanup runs on every exit path.

pub mod ffmpeg;
mod guard;

pub use guard::{EngineGuard, ListenerGuard, MediaGuard, RequestGuard};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// How hard the engine should try to land on the exact requested position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekSpeed {
    /// Nearest keyframe; good enough for previews.
    #[default]
    Fast,
    /// Decode up to the exact frame.
    Precise,
}

/// Encoding of the picture bytes delivered by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PictureType {
    #[default]
    Png,
    Jpeg,
}

/// A still frame delivered by the engine's thumbnail callback.
#[derive(Clone, PartialEq, Eq)]
pub struct Picture {
    pub picture_type: PictureType,
    pub width: u32,
    pub height: u32,
    pub buffer: Vec<u8>,
}

impl std::fmt::Debug for Picture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Picture")
            .field("picture_type", &self.picture_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.buffer.len())
            .finish()
    }
}

/// Parameters of a single request-by-position call.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailParams {
    /// Normalized position in the media, 0.0 to 1.0.
    pub position: f32,
    pub seek_speed: SeekSpeed,
    pub width: u32,
    pub height: u32,
    /// Crop to exactly `width` x `height` instead of fitting.
    pub exact: bool,
    pub picture_type: PictureType,
    pub timeout: Duration,
}

/// Identifies one listener registration on a [`Media`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Receives media events from the engine, usually on an engine-owned thread.
pub trait MediaEventListener: Send + Sync {
    fn thumbnail_generated(&self, picture: Picture);

    /// The engine gave up on the request (decode error, unsupported codec...).
    fn thumbnail_failed(&self) {}
}

/// Process-wide engine handle; opens media resources.
pub trait MediaEngine: Send + Sync {
    type Media: Media;

    fn open_media(&self, path: &Path) -> Result<Self::Media, EngineError>;

    /// Release the engine itself. Called once when the owning session ends.
    fn release(&self);
}

/// A media resource opened for one file.
pub trait Media {
    type Request: ThumbnailRequest;

    fn add_listener(&self, listener: Arc<dyn MediaEventListener>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);

    /// Issue an asynchronous thumbnail request. The picture arrives through
    /// the registered listeners.
    fn request_thumbnail_by_position(
        &self,
        params: &ThumbnailParams,
    ) -> Result<Self::Request, EngineError>;

    fn release(&mut self);
}

/// An in-flight native thumbnail request.
pub trait ThumbnailRequest {
    fn release(&mut self);
}

/// Errors raised by an engine while opening media or issuing requests
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("media not found: {0}")]
    MediaNotFound(PathBuf),

    #[error("failed to open media {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("thumbnail request rejected: {0}")]
    RequestRejected(String),

    #[error("engine has already been released")]
    Released,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
