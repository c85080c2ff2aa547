//! Downloads release archives into the content-addressed cache.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::thread;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{WrapErr, eyre};
use tempfile::NamedTempFile;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info};

use super::config::BinaryCacheConfig;
use crate::error::{AcquisitionError, AcquisitionErrorKind, AcquisitionResult};
use crate::fs::ensure_dir_exists;
use crate::observability::CACHE_TARGET;

const FALLBACK_ARCHIVE_NAME: &str = "mongodb-archive";

/// Streams the body behind a URL into a local file.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Writes the body of `url` into `sink`, returning the number of bytes
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionErrorKind::CantDownload`] when the server cannot
    /// be reached or refuses the request.
    fn download(&self, url: &str, sink: &mut File) -> AcquisitionResult<u64>;
}

/// HTTP transport backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn download_on_own_runtime(&self, url: &str, sink: &mut File) -> AcquisitionResult<u64> {
        let runtime = build_runtime()?;
        runtime.block_on(async {
            let mut response = self
                .client
                .get(url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|err| cant_download(url, &err))?;
            let mut progress = Progress::new(url, response.content_length());
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|err| cant_download(url, &err))?
            {
                sink.write_all(&chunk)
                    .wrap_err_with(|| format!("failed to write download of {url}"))?;
                progress.advance(chunk.len());
            }
            Ok::<_, AcquisitionError>(progress.written)
        })
    }
}

impl Transport for ReqwestTransport {
    /// Blocks until the transfer completes.
    ///
    /// Inside a Tokio runtime the transfer is driven from a scoped thread,
    /// since runtimes cannot be nested.
    fn download(&self, url: &str, sink: &mut File) -> AcquisitionResult<u64> {
        if Handle::try_current().is_err() {
            return self.download_on_own_runtime(url, sink);
        }
        debug!(target: CACHE_TARGET, url, "downloading from a runtime worker; using a scoped thread");
        thread::scope(|scope| {
            scope
                .spawn(|| self.download_on_own_runtime(url, sink))
                .join()
                .map_err(|_| AcquisitionError::from(eyre!("download thread for {url} panicked")))?
        })
    }
}

/// Constructs the current-thread runtime used to drive a single download.
fn build_runtime() -> AcquisitionResult<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("failed to create Tokio runtime for archive download")
        .map_err(AcquisitionError::from)
}

fn cant_download(url: &str, err: &reqwest::Error) -> AcquisitionError {
    AcquisitionError::new(
        AcquisitionErrorKind::CantDownload,
        eyre!("can't download {url}: {err}"),
    )
}

struct Progress<'url> {
    url: &'url str,
    total: Option<u64>,
    written: u64,
    logged_decile: u64,
}

impl<'url> Progress<'url> {
    const fn new(url: &'url str, total: Option<u64>) -> Self {
        Self {
            url,
            total,
            written: 0,
            logged_decile: 0,
        }
    }

    fn advance(&mut self, bytes: usize) {
        self.written = self
            .written
            .saturating_add(u64::try_from(bytes).unwrap_or(u64::MAX));
        let Some(decile) = self
            .total
            .and_then(|total| self.written.saturating_mul(10).checked_div(total))
        else {
            return;
        };
        if decile > self.logged_decile {
            self.logged_decile = decile;
            debug!(
                target: CACHE_TARGET,
                url = self.url,
                percent = decile.saturating_mul(10),
                bytes = self.written,
                "download progress"
            );
        }
    }
}

/// Downloads archives at most once per cache entry.
///
/// The archive for a URL lives at
/// `<download root>/<sha256(url)>/<basename(url)>`. A download is streamed to a
/// temporary file in the same directory and renamed into place only once it
/// completes, so a failed transfer never leaves a partial archive behind.
#[derive(Clone)]
pub struct ArchiveFetcher {
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for ArchiveFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveFetcher").finish_non_exhaustive()
    }
}

impl Default for ArchiveFetcher {
    fn default() -> Self {
        Self::new(Arc::new(ReqwestTransport::new()))
    }
}

impl ArchiveFetcher {
    /// Creates a fetcher using the supplied transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Returns the canonical archive path for `url` under `cache`.
    #[must_use]
    pub fn archive_path(url: &str, cache: &BinaryCacheConfig) -> Utf8PathBuf {
        cache.download_dir_for(url).join(archive_name(url))
    }

    /// Ensures the archive for `url` exists in the cache and returns its path.
    ///
    /// An existing archive is returned without touching the network unless
    /// `cache.force_refresh` is set.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionErrorKind::CantDownload`] when the transfer fails
    /// and [`AcquisitionErrorKind::Other`] when the cache directory cannot be
    /// written.
    pub fn fetch(&self, url: &str, cache: &BinaryCacheConfig) -> AcquisitionResult<Utf8PathBuf> {
        let archive = Self::archive_path(url, cache);
        if archive.is_file() && !cache.force_refresh {
            debug!(target: CACHE_TARGET, url, archive = %archive, "archive already cached");
            return Ok(archive);
        }

        let directory = archive
            .parent()
            .map_or_else(|| cache.download_root(), Utf8Path::to_path_buf);
        ensure_dir_exists(&directory).map_err(AcquisitionError::from)?;

        info!(target: CACHE_TARGET, url, archive = %archive, "downloading mongod archive");
        let mut staging = NamedTempFile::new_in(&directory)
            .wrap_err_with(|| format!("failed to create staging file in {directory}"))?;
        let written = self.transport.download(url, staging.as_file_mut())?;
        staging
            .as_file()
            .sync_all()
            .wrap_err_with(|| format!("failed to flush download of {url}"))?;
        staging
            .persist(&archive)
            .map_err(|err| eyre!("failed to move download into {archive}: {}", err.error))?;

        info!(target: CACHE_TARGET, url, archive = %archive, bytes = written, "download complete");
        Ok(archive)
    }
}

/// Last path segment of `url`, ignoring query and fragment.
fn archive_name(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_owned))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_ARCHIVE_NAME.to_owned())
}
