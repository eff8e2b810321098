//! Media discovery
//!
//! Walks a directory tree and yields the video files worth thumbnailing.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Video extensions picked up by default (matched case-insensitively).
pub const DEFAULT_EXTENSIONS: &[&str] = &["mp4", "avi", "flv", "mkv", "mov", "webm", "m4v"];

/// A discovered media file, identified by its absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaFile {
    path: PathBuf,
}

impl MediaFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let path = std::path::absolute(&path).unwrap_or(path);
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Filename only (e.g., "holiday.mp4")
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct MediaScanner {
    root: PathBuf,
    extensions: Vec<String>,
    follow_links: bool,
}

impl MediaScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            follow_links: true,
        }
    }

    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    pub fn follow_links(mut self, follow_links: bool) -> Self {
        self.follow_links = follow_links;
        self
    }

    /// Walk the tree in file-name order and yield every matching file.
    pub fn scan(&self) -> impl Iterator<Item = MediaFile> + '_ {
        tracing::info!(root = %self.root.display(), "scanning for media");

        WalkDir::new(&self.root)
            .follow_links(self.follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| self.matches(entry.path()))
            .map(|entry| MediaFile::new(entry.into_path()))
    }

    fn matches(&self, path: &Path) -> bool {
        match path.extension() {
            Some(extension) => {
                let ext = extension.to_string_lossy().to_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            }
            None => false,
        }
    }
}
