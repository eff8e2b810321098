//! Cache key derivation
//!
//! A key names exactly one file in the cache directory: `<key>.png`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Lowercase hex digest naming a cached thumbnail.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an already-computed digest. Only hex characters are kept so a
    /// key can never escape the cache directory.
    pub fn new(digest: impl AsRef<str>) -> Self {
        Self(
            digest
                .as_ref()
                .chars()
                .filter(char::is_ascii_hexdigit)
                .map(|c| c.to_ascii_lowercase())
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}.png", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Turns a media path into its cache key.
pub trait KeyDeriver: Send + Sync + fmt::Debug {
    fn derive(&self, path: &Path) -> io::Result<CacheKey>;
}

/// BLAKE3 of the normalized absolute path.
///
/// Stable for a given path within and across runs; does not notice when the
/// file behind the path changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathDigest;

impl KeyDeriver for PathDigest {
    fn derive(&self, path: &Path) -> io::Result<CacheKey> {
        let normalized = normalize_path(path)?;
        let hash = blake3::hash(normalized.as_os_str().as_encoded_bytes());
        Ok(CacheKey(hash.to_hex().to_string()))
    }
}

/// BLAKE3 of the normalized path, file size and modification time.
///
/// A re-encoded or replaced file gets a fresh key, so stale thumbnails are
/// never served. The file must exist.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fingerprint;

impl KeyDeriver for Fingerprint {
    fn derive(&self, path: &Path) -> io::Result<CacheKey> {
        let normalized = normalize_path(path)?;
        let metadata = std::fs::metadata(&normalized)?;
        let modified = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut hasher = blake3::Hasher::new();
        hasher.update(normalized.as_os_str().as_encoded_bytes());
        hasher.update(&metadata.len().to_le_bytes());
        hasher.update(&modified.to_le_bytes());
        Ok(CacheKey(hasher.finalize().to_hex().to_string()))
    }
}

/// Selects a [`KeyDeriver`] from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    #[default]
    PathDigest,
    Fingerprint,
}

impl KeyStrategy {
    pub fn deriver(&self) -> Box<dyn KeyDeriver> {
        match self {
            KeyStrategy::PathDigest => Box::new(PathDigest),
            KeyStrategy::Fingerprint => Box::new(Fingerprint),
        }
    }
}

/// Absolute, symlink-resolved path when the file exists; otherwise an
/// absolute path with `.` and `..` resolved lexically.
pub fn normalize_path(path: &Path) -> io::Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }

    let absolute = std::path::absolute(path)?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_path_digest_is_stable() {
        let a = PathDigest.derive(Path::new("/videos/a.mp4")).unwrap();
        let again = PathDigest.derive(Path::new("/videos/a.mp4")).unwrap();
        assert_eq!(a, again);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.file_name().ends_with(".png"));
    }

    #[test]
    fn test_path_digest_normalizes_dot_components() {
        let plain = PathDigest.derive(Path::new("/videos/a.mp4")).unwrap();
        let dotted = PathDigest
            .derive(Path::new("/videos/./extra/../a.mp4"))
            .unwrap();
        assert_eq!(plain, dotted);
    }

    #[test]
    fn test_distinct_paths_distinct_keys() {
        let a = PathDigest.derive(Path::new("/videos/a.mp4")).unwrap();
        let b = PathDigest.derive(Path::new("/videos/b.mp4")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_tracks_content_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        fs::write(&file, b"first").unwrap();
        let before = Fingerprint.derive(&file).unwrap();

        fs::write(&file, b"second, and longer").unwrap();
        let after = Fingerprint.derive(&file).unwrap();
        assert_ne!(before, after);
        assert_ne!(before, PathDigest.derive(&file).unwrap());
    }

    #[test]
    fn test_fingerprint_requires_existing_file() {
        assert!(Fingerprint.derive(Path::new("/nonexistent/clip.mp4")).is_err());
    }

    #[test]
    fn test_cache_key_strips_non_hex() {
        let key = CacheKey::new("../AB/cd");
        assert_eq!(key.as_str(), "abcd");
        assert_eq!(key.file_name(), "abcd.png");
    }
}
