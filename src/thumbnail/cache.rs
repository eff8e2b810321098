//! Disk-backed thumbnail cache
//!
//! Thumbnails live as `<cache_dir>/<key>.png`; the existence of that file is
//! the only persisted state. A miss opens the media through the engine, runs
//! one [`ThumbnailRequestCoordinator`], stores the bytes, and reads them back.

use super::key::{CacheKey, KeyDeriver, PathDigest};
use super::request::ThumbnailRequestCoordinator;
use super::{CancelToken, ThumbnailError};
use crate::config::{ConfigError, ThumbnailConfig, ThumbnailSettings};
use crate::engine::{EngineGuard, MediaEngine, MediaGuard};
use image::{ImageFormat, RgbaImage};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// What to do after generation for a file has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegativeCache {
    /// Try the engine again on every lookup.
    #[default]
    RetryAlways,
    /// Report the file as unavailable without asking the engine until the
    /// duration has passed. Kept in memory only.
    Ttl(Duration),
}

/// A decoded thumbnail ready for display.
#[derive(Clone)]
pub struct Thumbnail {
    pub path: PathBuf,
    pub key: CacheKey,
    /// PNG bytes exactly as stored on disk.
    pub encoded: Vec<u8>,
    pub image: RgbaImage,
}

impl Thumbnail {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl std::fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thumbnail")
            .field("path", &self.path)
            .field("key", &self.key)
            .field("width", &self.width())
            .field("height", &self.height())
            .field("bytes", &self.encoded.len())
            .finish()
    }
}

pub struct ThumbnailCache<E: MediaEngine> {
    engine: EngineGuard<E>,
    cache_dir: PathBuf,
    settings: ThumbnailSettings,
    keys: Box<dyn KeyDeriver>,
    negative: NegativeCache,
    failures: Mutex<HashMap<CacheKey, Instant>>,
    in_flight: InFlight,
    cancel: CancelToken,
}

impl<E: MediaEngine> ThumbnailCache<E> {
    /// Create a cache session. The engine is released when the cache drops.
    pub fn new(engine: E, cache_dir: impl Into<PathBuf>, settings: ThumbnailSettings) -> Self {
        Self {
            engine: EngineGuard::new(engine),
            cache_dir: cache_dir.into(),
            settings,
            keys: Box::new(PathDigest),
            negative: NegativeCache::default(),
            failures: Mutex::default(),
            in_flight: InFlight::default(),
            cancel: CancelToken::never(),
        }
    }

    pub fn from_config(engine: E, config: &ThumbnailConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(engine, config.cache_dir.clone(), config.settings()?)
            .with_key_deriver(config.key.deriver())
            .with_negative_cache(config.negative_cache()))
    }

    pub fn with_key_deriver(mut self, keys: Box<dyn KeyDeriver>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_negative_cache(mut self, negative: NegativeCache) -> Self {
        self.negative = negative;
        self
    }

    /// Default token for [`thumbnail_for`](Self::thumbnail_for).
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn settings(&self) -> &ThumbnailSettings {
        &self.settings
    }

    /// Where the thumbnail for `path` is (or would be) stored.
    pub fn cache_path(&self, path: &Path) -> io::Result<PathBuf> {
        let key = self.keys.derive(path)?;
        Ok(self.cache_dir.join(key.file_name()))
    }

    /// Check if a thumbnail is cached for `path`
    pub fn contains(&self, path: &Path) -> bool {
        self.cache_path(path).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Thumbnail for `path`, generating and storing it on a miss.
    ///
    /// Every failure (missing file, engine timeout, decode or disk error)
    /// yields `None` so a batch of files keeps going.
    pub fn thumbnail_for(&self, path: &Path) -> Option<Thumbnail> {
        self.thumbnail_for_cancellable(path, &self.cancel)
    }

    /// [`thumbnail_for`](Self::thumbnail_for) with a caller-supplied cancel token.
    pub fn thumbnail_for_cancellable(&self, path: &Path, cancel: &CancelToken) -> Option<Thumbnail> {
        match self.try_thumbnail_for(path, cancel) {
            Ok(thumbnail) => Some(thumbnail),
            Err(e) if e.is_expected() => {
                tracing::debug!(path = %path.display(), error = %e, "thumbnail unavailable");
                None
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "thumbnail unavailable");
                None
            }
        }
    }

    pub fn try_thumbnail_for(
        &self,
        path: &Path,
        cancel: &CancelToken,
    ) -> Result<Thumbnail, ThumbnailError> {
        let key = self
            .keys
            .derive(path)
            .map_err(|source| ThumbnailError::io(path, source))?;
        let cache_file = self.cache_dir.join(key.file_name());

        if !cache_file.is_file() {
            let _slot = self.in_flight.acquire(&key, cancel)?;

            // Another worker may have stored it while we waited for the slot.
            if !cache_file.is_file() {
                if cancel.is_cancelled() {
                    return Err(ThumbnailError::Interrupted);
                }
                self.check_recent_failure(&key, path)?;
                match self.generate(path, cancel) {
                    Ok(bytes) => self.store(&cache_file, &bytes)?,
                    Err(e) => {
                        if e.is_media_failure() {
                            self.record_failure(&key);
                        }
                        return Err(e);
                    }
                }
            }
        }

        self.load(path, key, &cache_file)
    }

    /// Remove the cached thumbnail for `path`. Returns whether one existed.
    pub fn evict(&self, path: &Path) -> io::Result<bool> {
        let cache_file = self.cache_path(path)?;
        match fs::remove_file(&cache_file) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete every cached thumbnail and forget remembered failures.
    pub fn clear(&self) -> io::Result<usize> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "png") && path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        tracing::info!(removed, dir = %self.cache_dir.display(), "cleared thumbnail cache");
        Ok(removed)
    }

    fn generate(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<u8>, ThumbnailError> {
        tracing::info!(path = %path.display(), "generating thumbnail");
        let media = MediaGuard::new(self.engine.open_media(path)?);
        let image = ThumbnailRequestCoordinator::new(&*media, self.settings.clone())
            .with_cancel_token(cancel.clone())
            .generate()?;
        Ok(image.bytes)
    }

    /// Create-only: bytes go to a temp file next to the target and are moved
    /// into place without replacing an existing entry.
    fn store(&self, cache_file: &Path, bytes: &[u8]) -> Result<(), ThumbnailError> {
        fs::create_dir_all(&self.cache_dir)
            .map_err(|source| ThumbnailError::io(&self.cache_dir, source))?;

        let mut staged = NamedTempFile::new_in(&self.cache_dir)
            .map_err(|source| ThumbnailError::io(&self.cache_dir, source))?;
        staged
            .write_all(bytes)
            .and_then(|()| staged.as_file().sync_all())
            .map_err(|source| ThumbnailError::io(staged.path(), source))?;

        match staged.persist_noclobber(cache_file) {
            Ok(_) => {
                tracing::info!(file = %cache_file.display(), bytes = bytes.len(), "stored thumbnail");
                Ok(())
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!(file = %cache_file.display(), "thumbnail already stored by another writer");
                Ok(())
            }
            Err(e) => Err(ThumbnailError::io(cache_file, e.error)),
        }
    }

    fn load(&self, path: &Path, key: CacheKey, cache_file: &Path) -> Result<Thumbnail, ThumbnailError> {
        let encoded = fs::read(cache_file).map_err(|source| ThumbnailError::io(cache_file, source))?;

        let image = match image::load_from_memory_with_format(&encoded, ImageFormat::Png) {
            Ok(image) => image.to_rgba8(),
            Err(source) => {
                // Drop the entry so the next lookup regenerates it.
                if let Err(e) = fs::remove_file(cache_file) {
                    tracing::warn!(file = %cache_file.display(), error = %e, "failed to evict corrupt thumbnail");
                }
                return Err(ThumbnailError::Decode {
                    path: cache_file.to_path_buf(),
                    source,
                });
            }
        };

        Ok(Thumbnail {
            path: path.to_path_buf(),
            key,
            encoded,
            image,
        })
    }

    fn check_recent_failure(&self, key: &CacheKey, path: &Path) -> Result<(), ThumbnailError> {
        let NegativeCache::Ttl(ttl) = self.negative else {
            return Ok(());
        };

        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let failed_at = failures.get(key).copied();
        match failed_at {
            Some(failed_at) if failed_at.elapsed() < ttl => {
                Err(ThumbnailError::RecentFailure(path.to_path_buf()))
            }
            Some(_) => {
                failures.remove(key);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn record_failure(&self, key: &CacheKey) {
        let NegativeCache::Ttl(ttl) = self.negative else {
            return;
        };

        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        failures.retain(|_, failed_at| failed_at.elapsed() < ttl);
        failures.insert(key.clone(), Instant::now());
    }
}

impl<E: MediaEngine> std::fmt::Debug for ThumbnailCache<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailCache")
            .field("cache_dir", &self.cache_dir)
            .field("settings", &self.settings)
            .field("keys", &self.keys)
            .field("negative", &self.negative)
            .finish()
    }
}

/// How often a caller waiting on another's generation checks its cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// Keys currently being generated. A second caller for the same key waits
/// for the first instead of issuing its own native request.
#[derive(Default)]
struct InFlight {
    keys: Mutex<HashSet<CacheKey>>,
    done: Condvar,
}

impl InFlight {
    /// Claim `key`, waiting while another caller holds it. Gives up with
    /// `Interrupted` once `cancel` fires, whether or not it had to wait.
    fn acquire(&self, key: &CacheKey, cancel: &CancelToken) -> Result<InFlightSlot<'_>, ThumbnailError> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if cancel.is_cancelled() {
                return Err(ThumbnailError::Interrupted);
            }
            if !keys.contains(key) {
                break;
            }
            let (guard, _) = self
                .done
                .wait_timeout(keys, CANCEL_POLL)
                .unwrap_or_else(PoisonError::into_inner);
            keys = guard;
        }
        keys.insert(key.clone());
        Ok(InFlightSlot {
            owner: self,
            key: key.clone(),
        })
    }
}

struct InFlightSlot<'a> {
    owner: &'a InFlight,
    key: CacheKey,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.owner
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        self.owner.done.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, ListenerId, Media, MediaEventListener, ThumbnailParams, ThumbnailRequest};
    use std::sync::Arc;
    use std::thread;

    /// Engine that cannot open anything.
    struct Unreadable;

    struct NoMedia;

    struct NoRequest;

    impl MediaEngine for Unreadable {
        type Media = NoMedia;

        fn open_media(&self, path: &Path) -> Result<NoMedia, EngineError> {
            Err(EngineError::MediaNotFound(path.to_path_buf()))
        }

        fn release(&self) {}
    }

    impl Media for NoMedia {
        type Request = NoRequest;

        fn add_listener(&self, _listener: Arc<dyn MediaEventListener>) -> ListenerId {
            ListenerId(0)
        }

        fn remove_listener(&self, _id: ListenerId) {}

        fn request_thumbnail_by_position(&self, _params: &ThumbnailParams) -> Result<NoRequest, EngineError> {
            Err(EngineError::RequestRejected("unreadable".into()))
        }

        fn release(&mut self) {}
    }

    impl ThumbnailRequest for NoRequest {
        fn release(&mut self) {}
    }

    fn remembered(cache: &ThumbnailCache<Unreadable>) -> usize {
        cache.failures.lock().unwrap().len()
    }

    #[test]
    fn test_expired_failures_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(Unreadable, dir.path(), ThumbnailSettings::default())
            .with_negative_cache(NegativeCache::Ttl(Duration::from_millis(50)));

        for name in ["a.mp4", "b.mp4", "c.mp4"] {
            assert!(cache.thumbnail_for(&dir.path().join(name)).is_none());
        }
        assert_eq!(remembered(&cache), 3);

        thread::sleep(Duration::from_millis(100));
        assert!(cache.thumbnail_for(&dir.path().join("d.mp4")).is_none());
        assert_eq!(remembered(&cache), 1);
    }

    #[test]
    fn test_retry_always_remembers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(Unreadable, dir.path(), ThumbnailSettings::default());

        assert!(cache.thumbnail_for(&dir.path().join("a.mp4")).is_none());
        assert_eq!(remembered(&cache), 0);
    }
}
