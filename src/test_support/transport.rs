//! In-memory download transport that counts network transfers.

use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use color_eyre::eyre::{WrapErr, eyre};

use crate::cache::Transport;
use crate::error::{AcquisitionError, AcquisitionErrorKind, AcquisitionResult};

/// Serves a fixed body for every URL, or refuses every URL.
#[derive(Debug)]
pub struct CountingTransport {
    body: Option<Vec<u8>>,
    calls: AtomicUsize,
}

impl CountingTransport {
    /// Serves `body` for any URL.
    #[must_use]
    pub const fn serving(body: Vec<u8>) -> Self {
        Self {
            body: Some(body),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails every download as a missing remote file would.
    #[must_use]
    pub const fn failing() -> Self {
        Self {
            body: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of transfers attempted so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for CountingTransport {
    fn download(&self, url: &str, sink: &mut File) -> AcquisitionResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(body) = self.body.as_deref() else {
            return Err(AcquisitionError::new(
                AcquisitionErrorKind::CantDownload,
                eyre!("HTTP status client error (404 Not Found) for url ({url})"),
            ));
        };
        sink.write_all(body)
            .wrap_err_with(|| format!("failed to write download of {url}"))?;
        Ok(u64::try_from(body.len()).unwrap_or(u64::MAX))
    }
}
