//! Cross-process file locking for cache coordination.
//!
//! Serialises downloads and extractions of the same archive across parallel
//! test runners. On Unix systems this uses `flock(2)` advisory locking; on
//! other platforms locking is a no-op.

use camino::Utf8Path;
use std::fs::{File, OpenOptions};
use std::io;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use super::config::url_hash;

/// Subdirectory within the cache for lock files.
const LOCKS_SUBDIR: &str = ".locks";

/// Guard that holds an exclusive file lock until dropped.
#[derive(Debug)]
pub struct CacheLock {
    _file: File,
}

impl CacheLock {
    /// Acquires the exclusive lock guarding the cache entry for `url`.
    ///
    /// Blocks until any other holder, in this or another process, releases
    /// it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be created or the lock cannot
    /// be acquired.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use camino::Utf8Path;
    /// use mongo_ephemeral::cache::CacheLock;
    ///
    /// let cache_dir = Utf8Path::new("/tmp/mongo-cache");
    /// let _lock = CacheLock::acquire(cache_dir, "https://example.invalid/mongodb-4.0.23.tgz")?;
    /// # Ok::<(), std::io::Error>(())
    /// ```
    pub fn acquire(cache_dir: &Utf8Path, url: &str) -> io::Result<Self> {
        let locks_dir = cache_dir.join(LOCKS_SUBDIR);
        std::fs::create_dir_all(&locks_dir)?;

        let lock_path = locks_dir.join(format!("{}.lock", url_hash(url)));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        lock_exclusive(&file)?;
        Ok(Self { _file: file })
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    // SAFETY: `file` owns a valid descriptor for the duration of this call.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
const fn lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}
