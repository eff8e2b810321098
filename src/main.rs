use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use thumbgrid::engine::ffmpeg::FfmpegEngine;
use thumbgrid::{LoaderEvent, MediaScanner, ThumbnailCache, ThumbnailConfig, ThumbnailLoader};
use tracing_subscriber::EnvFilter;

/// Scan a folder for videos and build (or reuse) their thumbnails
#[derive(Debug, Parser)]
#[command(name = "thumbgrid", version)]
struct Args {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Folder to scan for video files
    #[arg(long)]
    media_dir: Option<PathBuf>,

    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Position of the frame, 0.0 to 1.0 of the duration
    #[arg(long)]
    position: Option<f32>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Files processed at once; 1 keeps results in scan order
    #[arg(long)]
    workers: Option<usize>,

    /// Do not descend into symlinked directories
    #[arg(long)]
    no_follow_links: bool,

    /// Delete every cached thumbnail before scanning
    #[arg(long)]
    clear: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<(ThumbnailConfig, bool)> {
        let mut config = match &self.config {
            Some(path) => ThumbnailConfig::load(path)?,
            None => ThumbnailConfig::default(),
        };

        if let Some(dir) = self.media_dir {
            config.media_dir = dir;
        }
        if let Some(dir) = self.cache_dir {
            config.cache_dir = dir;
        }
        if let Some(position) = self.position {
            config.position = position;
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.no_follow_links {
            config.follow_links = false;
        }

        config.validate()?;
        Ok((config, self.clear))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (config, clear) = Args::parse().into_config()?;
    tracing::info!(
        media_dir = %config.media_dir.display(),
        cache_dir = %config.cache_dir.display(),
        "thumbgrid starting"
    );

    let cache = Arc::new(
        ThumbnailCache::from_config(FfmpegEngine::new(), &config)
            .context("invalid thumbnail configuration")?,
    );
    if clear {
        cache.clear().context("failed to clear thumbnail cache")?;
    }

    let (loader, mut events) = ThumbnailLoader::spawn(Arc::clone(&cache), config.workers);

    // Scanning walks the disk, so keep it off the async workers too.
    let scanner = MediaScanner::new(&config.media_dir)
        .extensions(&config.extensions)
        .follow_links(config.follow_links);
    let files = tokio::task::spawn_blocking(move || scanner.scan().collect::<Vec<_>>()).await?;
    tracing::info!(count = files.len(), "found media files");

    loader.submit_all(files);
    let finished = tokio::spawn(loader.finish());

    while let Some(event) = events.recv().await {
        match event {
            LoaderEvent::Ready { file, thumbnail } => {
                println!(
                    "{}\t{}x{}\t{}",
                    file.path().display(),
                    thumbnail.width(),
                    thumbnail.height(),
                    thumbnail.key
                );
            }
            LoaderEvent::Unavailable { file } => {
                println!("{}\t-", file.path().display());
            }
            LoaderEvent::Finished(summary) => {
                println!(
                    "{} thumbnails, {} unavailable, {} duplicates",
                    summary.ready, summary.unavailable, summary.duplicates
                );
                break;
            }
        }
    }

    finished.await?;
    Ok(())
}
