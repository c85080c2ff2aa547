//! Composes fetching and extraction into a self-healing binary cache.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use tracing::{debug, info, info_span, warn};

use super::config::BinaryCacheConfig;
use super::extract::ArchiveExtractor;
use super::fetch::ArchiveFetcher;
use super::lock::CacheLock;
use crate::cleanup_helpers::try_remove_dir_all;
use crate::error::{AcquisitionError, AcquisitionErrorKind, AcquisitionResult};
use crate::fs::ensure_dir_exists;
use crate::observability::CACHE_TARGET;
use crate::version::ResolvedRelease;

/// File name of the server executable on this platform.
#[must_use]
pub const fn mongod_executable() -> &'static str {
    if cfg!(windows) { "mongod.exe" } else { "mongod" }
}

/// Cache locations derived from a download URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    /// URL the archive is downloaded from; the record's identity.
    pub url: String,
    /// Canonical location of the downloaded archive.
    pub archive_path: Utf8PathBuf,
    /// Directory the archive is unpacked into.
    pub extract_dir: Utf8PathBuf,
}

impl ArchiveRecord {
    /// Derives the record for `url` under `cache`.
    #[must_use]
    pub fn for_url(url: &str, cache: &BinaryCacheConfig) -> Self {
        Self {
            url: url.to_owned(),
            archive_path: ArchiveFetcher::archive_path(url, cache),
            extract_dir: cache.extract_dir_for(url),
        }
    }

    /// Reports whether the archive is present in the cache.
    #[must_use]
    pub fn is_downloaded(&self) -> bool {
        self.archive_path.is_file()
    }

    /// Directory holding the extracted `mongod`, if extraction completed.
    #[must_use]
    pub fn binary_dir(&self) -> Option<Utf8PathBuf> {
        locate_binary_dir(&self.extract_dir)
    }
}

/// Returns the directory containing executable `mongod` binaries for a
/// release, downloading and unpacking it on first use.
///
/// An archive that is cached but whose extraction is missing or incomplete is
/// re-extracted without another download.
#[derive(Debug, Clone)]
pub struct BinaryCache {
    config: BinaryCacheConfig,
    fetcher: ArchiveFetcher,
    extractor: ArchiveExtractor,
}

impl BinaryCache {
    /// Creates a cache that downloads over HTTP.
    #[must_use]
    pub fn new(config: BinaryCacheConfig) -> Self {
        Self::with_fetcher(config, ArchiveFetcher::default())
    }

    /// Creates a cache that downloads through `fetcher`.
    #[must_use]
    pub const fn with_fetcher(config: BinaryCacheConfig, fetcher: ArchiveFetcher) -> Self {
        Self {
            config,
            fetcher,
            extractor: ArchiveExtractor,
        }
    }

    /// Returns the cache configuration.
    #[must_use]
    pub const fn config(&self) -> &BinaryCacheConfig {
        &self.config
    }

    /// Ensures the binaries for `release` are available locally.
    ///
    /// # Errors
    ///
    /// Propagates [`AcquisitionErrorKind::CantDownload`] and
    /// [`AcquisitionErrorKind::InvalidDownloadedFile`], and returns
    /// [`AcquisitionErrorKind::BinaryMissing`] when the unpacked archive holds
    /// no `mongod` executable.
    pub fn ensure_binary(&self, release: &ResolvedRelease) -> AcquisitionResult<Utf8PathBuf> {
        self.ensure_url(&release.url)
    }

    /// Ensures the binaries behind `url` are available locally.
    ///
    /// # Errors
    ///
    /// See [`BinaryCache::ensure_binary`].
    pub fn ensure_url(&self, url: &str) -> AcquisitionResult<Utf8PathBuf> {
        let span = info_span!(target: CACHE_TARGET, "ensure_binary", url);
        let _entered = span.enter();

        ensure_dir_exists(&self.config.cache_dir)?;
        let _lock = self.acquire_lock(url);

        let record = ArchiveRecord::for_url(url, &self.config);
        let fresh_download = self.config.force_refresh || !record.is_downloaded();
        let archive = self.fetcher.fetch(url, &self.config)?;

        if fresh_download {
            discard_stale_extraction(&record.extract_dir);
        } else if let Some(binary_dir) = record.binary_dir() {
            debug!(target: CACHE_TARGET, binary_dir = %binary_dir, "binary cache hit");
            return Ok(binary_dir);
        } else {
            info!(
                target: CACHE_TARGET,
                archive = %archive,
                "archive cached but mongod missing; re-extracting"
            );
        }

        self.extractor.extract(&archive, &record.extract_dir)?;
        record.binary_dir().ok_or_else(|| {
            AcquisitionError::new(
                AcquisitionErrorKind::BinaryMissing,
                eyre!(
                    "no {} executable found after extracting {archive}",
                    mongod_executable()
                ),
            )
        })
    }

    fn acquire_lock(&self, url: &str) -> Option<CacheLock> {
        match CacheLock::acquire(&self.config.cache_dir, url) {
            Ok(lock) => Some(lock),
            Err(err) => {
                warn!(
                    target: CACHE_TARGET,
                    url,
                    error = %err,
                    "failed to lock cache entry; continuing without cross-process coordination"
                );
                None
            }
        }
    }
}

fn discard_stale_extraction(extract_dir: &Utf8Path) {
    if let Err(err) = try_remove_dir_all(extract_dir.as_std_path()) {
        warn!(
            target: CACHE_TARGET,
            extract_dir = %extract_dir,
            error = %err,
            "failed to remove stale extraction"
        );
    }
}

/// Finds the directory holding `mongod` beneath `root`.
///
/// Entries are visited depth-first in name order so the result is stable
/// across runs.
#[must_use]
pub fn locate_binary_dir(root: &Utf8Path) -> Option<Utf8PathBuf> {
    let mut entries: Vec<_> = fs::read_dir(root).ok()?.flatten().collect();
    entries.sort_by_key(fs::DirEntry::file_name);
    for entry in entries {
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            continue;
        };
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if let Some(found) = locate_binary_dir(&path) {
                return Some(found);
            }
        } else if path.file_name() == Some(mongod_executable()) {
            return Some(root.to_path_buf());
        }
    }
    None
}

/// Finds the directory holding `mongod` on the `PATH` search path.
///
/// # Errors
///
/// Returns [`AcquisitionErrorKind::BinaryMissing`] when no `PATH` entry
/// contains the executable.
pub fn locate_on_path() -> AcquisitionResult<Utf8PathBuf> {
    let search = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&search)
        .filter_map(|dir| Utf8PathBuf::from_path_buf(dir).ok())
        .find(|dir| dir.join(mongod_executable()).is_file())
        .ok_or_else(|| {
            AcquisitionError::new(
                AcquisitionErrorKind::BinaryMissing,
                eyre!("{} not found on PATH", mongod_executable()),
            )
        })
}
