//! Configuration for the shared binary cache.
//!
//! Resolves the cache directory from environment variables with XDG-compliant
//! fallback paths and derives the content-addressed layout beneath it.

use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Subdirectory path within the XDG cache home.
const CACHE_SUBDIR: &str = "mongo-ephemeral";

/// Environment variable overriding the cache root.
pub(crate) const CACHE_DIR_ENV: &str = "MONGOIM_CACHE_DIR";

const DOWNLOAD_SUBDIR: &str = "download";
const EXTRACT_SUBDIR: &str = "extract";

/// Configuration for the shared binary cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryCacheConfig {
    /// Root directory for cached `mongod` archives and extractions.
    pub cache_dir: Utf8PathBuf,
    /// Overrides `<cache_dir>/download` when set.
    pub download_dir: Option<Utf8PathBuf>,
    /// Overrides `<cache_dir>/extract` when set.
    pub extract_dir: Option<Utf8PathBuf>,
    /// Re-download archives even when they are already cached.
    pub force_refresh: bool,
}

impl BinaryCacheConfig {
    /// Creates a new cache configuration using the resolved cache directory.
    #[must_use]
    pub fn new() -> Self {
        Self::with_dir(resolve_cache_dir())
    }

    /// Creates a cache configuration with a custom directory.
    #[must_use]
    pub const fn with_dir(cache_dir: Utf8PathBuf) -> Self {
        Self {
            cache_dir,
            download_dir: None,
            extract_dir: None,
            force_refresh: false,
        }
    }

    /// Directory holding one subdirectory per downloaded URL.
    #[must_use]
    pub fn download_root(&self) -> Utf8PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| self.cache_dir.join(DOWNLOAD_SUBDIR))
    }

    /// Directory holding one extraction per downloaded URL.
    #[must_use]
    pub fn extract_root(&self) -> Utf8PathBuf {
        self.extract_dir
            .clone()
            .unwrap_or_else(|| self.cache_dir.join(EXTRACT_SUBDIR))
    }

    /// Directory the archive for `url` is downloaded into.
    #[must_use]
    pub fn download_dir_for(&self, url: &str) -> Utf8PathBuf {
        self.download_root().join(url_hash(url))
    }

    /// Directory the archive for `url` is extracted into.
    #[must_use]
    pub fn extract_dir_for(&self, url: &str) -> Utf8PathBuf {
        self.extract_root().join(url_hash(url))
    }
}

impl Default for BinaryCacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Hex-encoded SHA-256 digest of a download URL, used as its cache key.
#[must_use]
pub fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Resolves the binary cache directory from environment and XDG conventions.
///
/// The resolution order is:
///
/// 1. `MONGOIM_CACHE_DIR` environment variable if set and valid UTF-8
/// 2. `$XDG_CACHE_HOME/mongo-ephemeral` if `XDG_CACHE_HOME` is set
/// 3. `~/.cache/mongo-ephemeral` as fallback
/// 4. `<temp dir>/mongo-ephemeral` as last resort
///
/// # Examples
///
/// ```
/// use mongo_ephemeral::cache::resolve_cache_dir;
///
/// let cache_dir = resolve_cache_dir();
/// assert!(!cache_dir.as_str().is_empty());
/// ```
#[must_use]
pub fn resolve_cache_dir() -> Utf8PathBuf {
    resolve_from_env()
        .or_else(resolve_from_xdg_cache)
        .or_else(resolve_from_home)
        .unwrap_or_else(resolve_from_temp)
}

fn resolve_from_env() -> Option<Utf8PathBuf> {
    non_empty_path_var(CACHE_DIR_ENV)
}

fn resolve_from_xdg_cache() -> Option<Utf8PathBuf> {
    non_empty_path_var("XDG_CACHE_HOME").map(|path| path.join(CACHE_SUBDIR))
}

fn resolve_from_home() -> Option<Utf8PathBuf> {
    let home = dirs::home_dir()?;
    let path = Utf8PathBuf::from_path_buf(home).ok()?;
    Some(path.join(".cache").join(CACHE_SUBDIR))
}

fn resolve_from_temp() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .unwrap_or_else(|_| Utf8Path::new("/tmp").to_path_buf())
        .join(CACHE_SUBDIR)
}

fn non_empty_path_var(key: &str) -> Option<Utf8PathBuf> {
    let raw = std::env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Utf8PathBuf::from_path_buf(PathBuf::from(trimmed)).ok()
}
