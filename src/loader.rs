//! Background thumbnail loading
//!
//! Runs cache lookups off the presentation thread. Files are taken from a
//! queue in submission order and each lookup runs on the blocking pool, so
//! waiting on the engine never stalls the caller's event loop. Results are
//! sent back as [`LoaderEvent`]s; the receiver owns all display state.

use crate::engine::MediaEngine;
use crate::scan::MediaFile;
use crate::thumbnail::{cancel_pair, CancelHandle, CancelToken, Thumbnail, ThumbnailCache};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{self, JoinError, JoinHandle, JoinSet};

#[derive(Debug)]
pub enum LoaderEvent {
    Ready { file: MediaFile, thumbnail: Thumbnail },
    Unavailable { file: MediaFile },
    /// Always the last event.
    Finished(LoadSummary),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub ready: usize,
    pub unavailable: usize,
    /// Files submitted again while an earlier submission was still pending.
    pub duplicates: usize,
}

pub struct ThumbnailLoader {
    jobs: mpsc::UnboundedSender<MediaFile>,
    cancel: CancelHandle,
    task: JoinHandle<LoadSummary>,
}

impl ThumbnailLoader {
    /// Start the loader on the current tokio runtime.
    ///
    /// With `workers == 1` files are processed strictly one at a time, and
    /// events arrive in submission order. Larger values process up to that
    /// many files at once, with no ordering between them.
    pub fn spawn<E>(
        cache: Arc<ThumbnailCache<E>>,
        workers: usize,
    ) -> (Self, mpsc::UnboundedReceiver<LoaderEvent>)
    where
        E: MediaEngine + 'static,
    {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel, token) = cancel_pair();

        let task = tokio::spawn(run(cache, workers.max(1), jobs_rx, events_tx, token));

        (
            Self {
                jobs: jobs_tx,
                cancel,
                task,
            },
            events_rx,
        )
    }

    /// Queue a file. Returns false once the loader has stopped.
    pub fn submit(&self, file: MediaFile) -> bool {
        self.jobs.send(file).is_ok()
    }

    pub fn submit_all(&self, files: impl IntoIterator<Item = MediaFile>) -> usize {
        files.into_iter().take_while(|file| self.submit(file.clone())).count()
    }

    /// Stop accepting files, drain the queue and wait for the summary.
    pub async fn finish(self) -> LoadSummary {
        let Self { jobs, cancel, task } = self;
        drop(jobs);
        let summary = task.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "thumbnail loader task failed");
            LoadSummary::default()
        });
        drop(cancel);
        summary
    }

    /// Interrupt in-flight waits and skip whatever is still queued.
    pub async fn shutdown(self) -> LoadSummary {
        self.cancel.cancel();
        self.finish().await
    }
}

async fn run<E>(
    cache: Arc<ThumbnailCache<E>>,
    workers: usize,
    mut jobs: mpsc::UnboundedReceiver<MediaFile>,
    events: mpsc::UnboundedSender<LoaderEvent>,
    token: CancelToken,
) -> LoadSummary
where
    E: MediaEngine + 'static,
{
    let permits = Arc::new(Semaphore::new(workers));
    let pending: Arc<Mutex<HashSet<PathBuf>>> = Arc::default();
    let mut tasks = JoinSet::new();
    let mut summary = LoadSummary::default();

    while let Some(file) = jobs.recv().await {
        if token.is_cancelled() {
            break;
        }
        while let Some(result) = tasks.try_join_next() {
            tally(&mut summary, result);
        }

        let path = file.path().to_path_buf();
        if !lock(&pending).insert(path.clone()) {
            summary.duplicates += 1;
            continue;
        }

        // Held until the event is sent, which keeps a single worker in order.
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            lock(&pending).remove(&path);
            break;
        };
        let cache = Arc::clone(&cache);
        let events = events.clone();
        let token = token.clone();
        let pending = Arc::clone(&pending);

        tasks.spawn(async move {
            let _permit = permit;
            let lookup = path.clone();
            let thumbnail = task::spawn_blocking(move || cache.thumbnail_for_cancellable(&lookup, &token))
                .await
                .unwrap_or_else(|e| {
                    tracing::error!(error = %e, "thumbnail lookup panicked");
                    None
                });

            // No longer pending once the consumer can see the outcome.
            lock(&pending).remove(&path);

            let ready = thumbnail.is_some();
            let event = match thumbnail {
                Some(thumbnail) => LoaderEvent::Ready { file, thumbnail },
                None => LoaderEvent::Unavailable { file },
            };
            // The receiver may be gone; the summary still counts the result.
            let _ = events.send(event);
            ready
        });
    }

    while let Some(result) = tasks.join_next().await {
        tally(&mut summary, result);
    }

    tracing::info!(
        ready = summary.ready,
        unavailable = summary.unavailable,
        duplicates = summary.duplicates,
        "thumbnail loading finished"
    );
    let _ = events.send(LoaderEvent::Finished(summary));
    summary
}

fn tally(summary: &mut LoadSummary, result: Result<bool, JoinError>) {
    match result {
        Ok(true) => summary.ready += 1,
        Ok(false) => summary.unavailable += 1,
        Err(e) => tracing::error!(error = %e, "thumbnail task failed"),
    }
}

fn lock(pending: &Mutex<HashSet<PathBuf>>) -> MutexGuard<'_, HashSet<PathBuf>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}
