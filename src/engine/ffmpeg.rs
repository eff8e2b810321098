//! Media engine backed by the `ffmpeg` and `ffprobe` executables.
//!
//! Each thumbnail request runs on its own background thread: probe the
//! duration, seek to the requested fraction, encode a single scaled frame and
//! hand it to the media's listeners. Releasing the request kills the child
//! process if it is still running.

use super::{
    EngineError, ListenerId, Media, MediaEngine, MediaEventListener, Picture, PictureType,
    SeekSpeed, ThumbnailParams, ThumbnailRequest,
};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// How often the request thread polls the child for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

type Listeners = Arc<Mutex<Vec<(ListenerId, Arc<dyn MediaEventListener>)>>>;

#[derive(Debug)]
pub struct FfmpegEngine {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    released: AtomicBool,
}

impl FfmpegEngine {
    /// Use `ffmpeg` and `ffprobe` from `PATH`.
    pub fn new() -> Self {
        Self::with_binaries("ffmpeg", "ffprobe")
    }

    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            released: AtomicBool::new(false),
        }
    }
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaEngine for FfmpegEngine {
    type Media = FfmpegMedia;

    fn open_media(&self, path: &Path) -> Result<FfmpegMedia, EngineError> {
        if self.released.load(Ordering::Acquire) {
            return Err(EngineError::Released);
        }
        if !path.is_file() {
            return Err(EngineError::MediaNotFound(path.to_path_buf()));
        }

        Ok(FfmpegMedia {
            path: path.to_path_buf(),
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
            listeners: Arc::default(),
            next_listener: AtomicU64::new(0),
        })
    }

    fn release(&self) {
        self.released.store(true, Ordering::Release);
    }
}

pub struct FfmpegMedia {
    path: PathBuf,
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    listeners: Listeners,
    next_listener: AtomicU64,
}

impl std::fmt::Debug for FfmpegMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegMedia").field("path", &self.path).finish()
    }
}

impl Media for FfmpegMedia {
    type Request = FfmpegRequest;

    fn add_listener(&self, listener: Arc<dyn MediaEventListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }

    fn request_thumbnail_by_position(
        &self,
        params: &ThumbnailParams,
    ) -> Result<FfmpegRequest, EngineError> {
        if !(0.0..=1.0).contains(&params.position) {
            return Err(EngineError::RequestRejected(format!(
                "position {} outside 0..=1",
                params.position
            )));
        }

        let state = Arc::new(RequestState::default());
        let job = FrameJob {
            path: self.path.clone(),
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
            params: params.clone(),
            listeners: Arc::clone(&self.listeners),
            state: Arc::clone(&state),
        };

        thread::Builder::new()
            .name("ffmpeg-thumbnail".into())
            .spawn(move || job.run())?;

        Ok(FfmpegRequest { state })
    }

    fn release(&mut self) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[derive(Default)]
struct RequestState {
    cancelled: AtomicBool,
    child: Mutex<Option<Child>>,
}

impl RequestState {
    fn kill(&self) {
        let mut slot = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(child) = slot.as_mut() {
            // Already-exited children report an error here; nothing to do then.
            let _ = child.kill();
            let _ = child.wait();
        }
        *slot = None;
    }
}

pub struct FfmpegRequest {
    state: Arc<RequestState>,
}

impl ThumbnailRequest for FfmpegRequest {
    fn release(&mut self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.kill();
    }
}

struct FrameJob {
    path: PathBuf,
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    params: ThumbnailParams,
    listeners: Listeners,
    state: Arc<RequestState>,
}

impl FrameJob {
    fn run(self) {
        let outcome = self.extract();
        if self.state.cancelled.load(Ordering::Acquire) {
            return;
        }

        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        match outcome {
            Ok(picture) => {
                for listener in listeners {
                    listener.thumbnail_generated(picture.clone());
                }
            }
            Err(reason) => {
                tracing::debug!(path = %self.path.display(), %reason, "ffmpeg thumbnail failed");
                for listener in listeners {
                    listener.thumbnail_failed();
                }
            }
        }
    }

    fn extract(&self) -> Result<Picture, String> {
        // Probing and encoding share one deadline.
        let deadline = Instant::now() + self.params.timeout;
        let duration = self.probe_duration(deadline)?.unwrap_or(0.0);
        let offset = format!("{:.3}", duration * f64::from(self.params.position));

        let mut command = Command::new(&self.ffmpeg);
        command.args(["-v", "error", "-nostdin"]);
        match self.params.seek_speed {
            SeekSpeed::Fast => {
                command.arg("-ss").arg(&offset).arg("-i").arg(&self.path);
            }
            SeekSpeed::Precise => {
                command.arg("-i").arg(&self.path).arg("-ss").arg(&offset);
            }
        }
        command
            .args(["-frames:v", "1", "-vf"])
            .arg(scale_filter(&self.params))
            .args(["-f", "image2pipe", "-vcodec"])
            .arg(match self.params.picture_type {
                PictureType::Png => "png",
                PictureType::Jpeg => "mjpeg",
            })
            .arg("-");

        let (success, buffer) = self.run_child(&mut command, deadline)?;
        if !success || buffer.is_empty() {
            return Err("ffmpeg produced no frame".into());
        }

        let (width, height) = image::ImageReader::new(Cursor::new(&buffer))
            .with_guessed_format()
            .map_err(|e| e.to_string())?
            .into_dimensions()
            .map_err(|e| e.to_string())?;

        Ok(Picture {
            picture_type: self.params.picture_type,
            width,
            height,
            buffer,
        })
    }

    /// Media duration in seconds. A missing or failing ffprobe only costs the
    /// seek offset; a released or expired request stops the job.
    fn probe_duration(&self, deadline: Instant) -> Result<Option<f64>, String> {
        let mut command = Command::new(&self.ffprobe);
        command
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(&self.path);

        match self.run_child(&mut command, deadline) {
            Ok((true, stdout)) => Ok(parse_duration(&stdout)),
            Ok((false, _)) => Ok(None),
            Err(reason)
                if self.state.cancelled.load(Ordering::Acquire) || Instant::now() >= deadline =>
            {
                Err(reason)
            }
            Err(reason) => {
                tracing::debug!(path = %self.path.display(), %reason, "ffprobe unavailable, seeking from the start");
                Ok(None)
            }
        }
    }

    /// Run `command` to completion with its stdout captured. The child sits in
    /// the request state while it runs, so releasing the request kills it; it
    /// is also killed once `deadline` passes.
    fn run_child(&self, command: &mut Command, deadline: Instant) -> Result<(bool, Vec<u8>), String> {
        let program = command.get_program().to_string_lossy().into_owned();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = command.spawn().map_err(|e| format!("spawn {}: {}", program, e))?;
        let stdout = child.stdout.take();
        {
            let mut slot = self.state.child.lock().unwrap_or_else(PoisonError::into_inner);
            if self.state.cancelled.load(Ordering::Acquire) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(format!("request released before {} started", program));
            }
            *slot = Some(child);
        }

        let reader = thread::spawn(move || {
            let mut buffer = Vec::new();
            if let Some(mut stdout) = stdout {
                let _ = stdout.read_to_end(&mut buffer);
            }
            buffer
        });

        let success = loop {
            let status = {
                let mut slot = self.state.child.lock().unwrap_or_else(PoisonError::into_inner);
                match slot.as_mut() {
                    Some(child) => child.try_wait().map_err(|e| e.to_string())?,
                    None => return Err("request released".into()),
                }
            };
            if let Some(status) = status {
                break status.success();
            }
            if Instant::now() >= deadline {
                self.state.kill();
                return Err(format!("{} exceeded {:?}", program, self.params.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let buffer = reader.join().map_err(|_| "stdout reader panicked".to_string())?;
        self.state
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok((success, buffer))
    }
}

fn scale_filter(params: &ThumbnailParams) -> String {
    if params.exact {
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}",
            w = params.width,
            h = params.height
        )
    } else {
        format!(
            "scale={}:{}:force_original_aspect_ratio=decrease",
            params.width, params.height
        )
    }
}

fn parse_duration(stdout: &[u8]) -> Option<f64> {
    String::from_utf8_lossy(stdout)
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}
