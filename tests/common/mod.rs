//! Scriptable in-memory media engine that counts every native call.

#![allow(dead_code)]

use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thumbgrid::engine::{
    EngineError, ListenerId, Media, MediaEngine, MediaEventListener, Picture, PictureType,
    ThumbnailParams, ThumbnailRequest,
};
use thumbgrid::ThumbnailSettings;

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Deliver `bytes` from an engine thread after `delay`.
    Deliver { bytes: Vec<u8>, delay: Duration },
    /// Deliver `bytes` from inside the request call itself.
    DeliverInline(Vec<u8>),
    /// Accept the request and never call back.
    Never,
    /// Report a generation failure from an engine thread.
    ReportFailure,
    /// Refuse to issue the request.
    FailIssue,
    /// Refuse to open the media.
    FailOpen,
}

#[derive(Debug)]
pub struct Shared {
    behavior: Mutex<Behavior>,
    pub opened: AtomicUsize,
    pub media_released: AtomicUsize,
    pub listeners_added: AtomicUsize,
    pub listeners_removed: AtomicUsize,
    pub requests: AtomicUsize,
    pub requests_released: AtomicUsize,
    pub engine_released: AtomicUsize,
    pub last_params: Mutex<Option<ThumbnailParams>>,
}

impl Shared {
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        Self::count(&self.opened)
    }

    pub fn media_released(&self) -> usize {
        Self::count(&self.media_released)
    }

    pub fn requests(&self) -> usize {
        Self::count(&self.requests)
    }

    pub fn requests_released(&self) -> usize {
        Self::count(&self.requests_released)
    }

    pub fn engine_released(&self) -> usize {
        Self::count(&self.engine_released)
    }

    /// Every listener that was added has been removed again.
    pub fn listeners_balanced(&self) -> bool {
        Self::count(&self.listeners_added) == Self::count(&self.listeners_removed)
    }
}

#[derive(Debug)]
pub struct StubEngine {
    shared: Arc<Shared>,
}

impl StubEngine {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            shared: Arc::new(Shared {
                behavior: Mutex::new(behavior),
                opened: AtomicUsize::new(0),
                media_released: AtomicUsize::new(0),
                listeners_added: AtomicUsize::new(0),
                listeners_removed: AtomicUsize::new(0),
                requests: AtomicUsize::new(0),
                requests_released: AtomicUsize::new(0),
                engine_released: AtomicUsize::new(0),
                last_params: Mutex::new(None),
            }),
        }
    }

    pub fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }
}

impl MediaEngine for StubEngine {
    type Media = StubMedia;

    fn open_media(&self, path: &Path) -> Result<StubMedia, EngineError> {
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        if matches!(*self.shared.behavior.lock().unwrap(), Behavior::FailOpen) {
            return Err(EngineError::MediaNotFound(path.to_path_buf()));
        }
        Ok(StubMedia {
            shared: Arc::clone(&self.shared),
            listeners: Arc::default(),
            next_listener: AtomicU64::new(0),
        })
    }

    fn release(&self) {
        self.shared.engine_released.fetch_add(1, Ordering::SeqCst);
    }
}

type Listeners = Arc<Mutex<Vec<(ListenerId, Arc<dyn MediaEventListener>)>>>;

pub struct StubMedia {
    shared: Arc<Shared>,
    listeners: Listeners,
    next_listener: AtomicU64,
}

fn snapshot(listeners: &Listeners) -> Vec<Arc<dyn MediaEventListener>> {
    listeners
        .lock()
        .unwrap()
        .iter()
        .map(|(_, listener)| Arc::clone(listener))
        .collect()
}

fn picture(bytes: Vec<u8>, params: &ThumbnailParams) -> Picture {
    Picture {
        picture_type: PictureType::Png,
        width: params.width,
        height: params.height,
        buffer: bytes,
    }
}

impl Media for StubMedia {
    type Request = StubRequest;

    fn add_listener(&self, listener: Arc<dyn MediaEventListener>) -> ListenerId {
        self.shared.listeners_added.fetch_add(1, Ordering::SeqCst);
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().unwrap().push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.shared.listeners_removed.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().retain(|(existing, _)| *existing != id);
    }

    fn request_thumbnail_by_position(
        &self,
        params: &ThumbnailParams,
    ) -> Result<StubRequest, EngineError> {
        *self.shared.last_params.lock().unwrap() = Some(params.clone());
        let behavior = self.shared.behavior.lock().unwrap().clone();

        match behavior {
            Behavior::FailIssue => {
                return Err(EngineError::RequestRejected("stub refuses".into()));
            }
            Behavior::Deliver { bytes, delay } => {
                let listeners = Arc::clone(&self.listeners);
                let params = params.clone();
                thread::spawn(move || {
                    thread::sleep(delay);
                    for listener in snapshot(&listeners) {
                        listener.thumbnail_generated(picture(bytes.clone(), &params));
                    }
                });
            }
            Behavior::DeliverInline(bytes) => {
                for listener in snapshot(&self.listeners) {
                    listener.thumbnail_generated(picture(bytes.clone(), params));
                }
            }
            Behavior::ReportFailure => {
                let listeners = Arc::clone(&self.listeners);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(10));
                    for listener in snapshot(&listeners) {
                        listener.thumbnail_failed();
                    }
                });
            }
            Behavior::Never | Behavior::FailOpen => {}
        }

        self.shared.requests.fetch_add(1, Ordering::SeqCst);
        Ok(StubRequest {
            shared: Arc::clone(&self.shared),
        })
    }

    fn release(&mut self) {
        self.shared.media_released.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct StubRequest {
    shared: Arc<Shared>,
}

impl ThumbnailRequest for StubRequest {
    fn release(&mut self) {
        self.shared.requests_released.fetch_add(1, Ordering::SeqCst);
    }
}

/// A real PNG whose pixels are all `shade`, so distinct shades give
/// distinct bytes.
pub fn png_bytes(shade: u8) -> Vec<u8> {
    let image = RgbaImage::from_pixel(24, 16, Rgba([shade, shade / 2, 255 - shade, 255]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn deliver(bytes: Vec<u8>, delay_ms: u64) -> Behavior {
    Behavior::Deliver {
        bytes,
        delay: Duration::from_millis(delay_ms),
    }
}

pub fn settings(timeout_ms: u64) -> ThumbnailSettings {
    ThumbnailSettings::new(0.1, 240, 135, Duration::from_millis(timeout_ms)).unwrap()
}
