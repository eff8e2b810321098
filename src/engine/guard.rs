//! Scoped release of native engine resources.
//!
//! Each guard owns (or borrows) one native handle and releases it exactly
//! once when dropped.

use super::{ListenerId, Media, MediaEngine, MediaEventListener, ThumbnailRequest};
use std::ops::Deref;
use std::sync::Arc;

/// Owns the process-wide engine for the lifetime of a cache session.
#[derive(Debug)]
pub struct EngineGuard<E: MediaEngine> {
    engine: E,
}

impl<E: MediaEngine> EngineGuard<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }
}

impl<E: MediaEngine> Deref for EngineGuard<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.engine
    }
}

impl<E: MediaEngine> Drop for EngineGuard<E> {
    fn drop(&mut self) {
        tracing::debug!("releasing media engine");
        self.engine.release();
    }
}

/// Owns a media resource opened for a single cache miss.
#[derive(Debug)]
pub struct MediaGuard<M: Media> {
    media: M,
}

impl<M: Media> MediaGuard<M> {
    pub fn new(media: M) -> Self {
        Self { media }
    }
}

impl<M: Media> Deref for MediaGuard<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.media
    }
}

impl<M: Media> Drop for MediaGuard<M> {
    fn drop(&mut self) {
        self.media.release();
    }
}

/// Owns an in-flight thumbnail request.
#[derive(Debug)]
pub struct RequestGuard<R: ThumbnailRequest> {
    request: R,
}

impl<R: ThumbnailRequest> RequestGuard<R> {
    pub fn new(request: R) -> Self {
        Self { request }
    }
}

impl<R: ThumbnailRequest> Drop for RequestGuard<R> {
    fn drop(&mut self) {
        self.request.release();
    }
}

/// A listener registration that is removed from the media on drop.
pub struct ListenerGuard<'m, M: Media> {
    media: &'m M,
    id: ListenerId,
}

impl<'m, M: Media> ListenerGuard<'m, M> {
    /// Register `listener` on `media` for as long as the guard lives.
    pub fn register(media: &'m M, listener: Arc<dyn MediaEventListener>) -> Self {
        let id = media.add_listener(listener);
        Self { media, id }
    }
}

impl<M: Media> Drop for ListenerGuard<'_, M> {
    fn drop(&mut self) {
        self.media.remove_listener(self.id);
    }
}
