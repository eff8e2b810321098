//! One native thumbnail request, waited on synchronously.
//!
//! The engine reports pictures through a listener callback on its own thread.
//! The coordinator turns that into a blocking call with a hard deadline: the
//! callback fills a single-slot channel and the calling worker waits on it,
//! on the cancel token, and on the timeout, whichever fires first.

use super::{CancelToken, ThumbnailError};
use crate::config::ThumbnailSettings;
use crate::engine::{
    ListenerGuard, Media, MediaEventListener, Picture, PictureType, RequestGuard, SeekSpeed,
    ThumbnailParams,
};
use crossbeam_channel::{select, Sender};
use std::sync::Arc;

/// Encoded thumbnail bytes as produced by the engine.
#[derive(Clone, PartialEq, Eq)]
pub struct ThumbnailImage {
    pub picture_type: PictureType,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

impl From<Picture> for ThumbnailImage {
    fn from(picture: Picture) -> Self {
        Self {
            picture_type: picture.picture_type,
            width: picture.width,
            height: picture.height,
            bytes: picture.buffer,
        }
    }
}

impl std::fmt::Debug for ThumbnailImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailImage")
            .field("picture_type", &self.picture_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Forwards the first engine callback into the waiting worker's slot.
struct PictureLatch {
    slot: Sender<Option<Picture>>,
}

impl MediaEventListener for PictureLatch {
    fn thumbnail_generated(&self, picture: Picture) {
        // Full slot means a picture was already delivered; later ones are dropped.
        let _ = self.slot.try_send(Some(picture));
    }

    fn thumbnail_failed(&self) {
        let _ = self.slot.try_send(None);
    }
}

/// Drives a single thumbnail request against an opened media resource.
///
/// Built per request and consumed by it; run several on different media to
/// work on files concurrently.
pub struct ThumbnailRequestCoordinator<'m, M: Media> {
    media: &'m M,
    settings: ThumbnailSettings,
    cancel: CancelToken,
}

impl<'m, M: Media> ThumbnailRequestCoordinator<'m, M> {
    pub fn new(media: &'m M, settings: ThumbnailSettings) -> Self {
        Self {
            media,
            settings,
            cancel: CancelToken::never(),
        }
    }

    /// Abandon the wait, as an interruption, once `cancel` fires.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fast keyframe seek, PNG output, fit rather than crop.
    pub fn params(&self) -> ThumbnailParams {
        ThumbnailParams {
            position: self.settings.position(),
            seek_speed: SeekSpeed::Fast,
            width: self.settings.width(),
            height: self.settings.height(),
            exact: false,
            picture_type: PictureType::Png,
            timeout: self.settings.timeout(),
        }
    }

    /// Request a thumbnail, or `None` when none arrived in time.
    pub fn request_thumbnail(self) -> Option<ThumbnailImage> {
        match self.generate() {
            Ok(image) => Some(image),
            Err(e) => {
                tracing::debug!(error = %e, "no thumbnail from engine");
                None
            }
        }
    }

    /// Like [`request_thumbnail`](Self::request_thumbnail), keeping the reason
    /// for a missing picture.
    pub fn generate(self) -> Result<ThumbnailImage, ThumbnailError> {
        let (slot, delivered) = crossbeam_channel::bounded(1);

        // Listen before requesting so an immediate callback is not lost.
        let listener = ListenerGuard::register(self.media, Arc::new(PictureLatch { slot }));
        let request = RequestGuard::new(self.media.request_thumbnail_by_position(&self.params())?);

        let timeout = self.settings.timeout();
        let outcome = select! {
            recv(delivered) -> picture => match picture {
                Ok(Some(picture)) => Ok(ThumbnailImage::from(picture)),
                Ok(None) | Err(_) => Err(ThumbnailError::GenerationFailed),
            },
            recv(self.cancel.receiver()) -> _ => Err(ThumbnailError::Interrupted),
            default(timeout) => Err(ThumbnailError::Timeout(timeout)),
        };

        drop(listener);
        drop(request);
        outcome
    }
}
