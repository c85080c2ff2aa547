//! Content-addressed cache of downloaded `mongod` releases.
//!
//! Archives are downloaded once per URL and unpacked next to each other so
//! repeated test runs never touch the network again.
//!
//! # Cache Location
//!
//! The cache directory is resolved in the following order:
//!
//! 1. `MONGOIM_CACHE_DIR` environment variable if set
//! 2. `$XDG_CACHE_HOME/mongo-ephemeral` if `XDG_CACHE_HOME` is set
//! 3. `~/.cache/mongo-ephemeral` as fallback
//!
//! Beneath it, `download/<sha256(url)>/` holds the archive and
//! `extract/<sha256(url)>/` its unpacked contents.
//!
//! # Cross-Process Coordination
//!
//! Each URL has its own file lock so parallel test runners download and
//! extract a release at most once while different releases proceed
//! concurrently.

mod binary;
mod config;
mod extract;
mod fetch;
mod lock;

pub use binary::{
    ArchiveRecord, BinaryCache, locate_binary_dir, locate_on_path, mongod_executable,
};
pub use config::{BinaryCacheConfig, resolve_cache_dir, url_hash};
pub use extract::{ArchiveExtractor, ArchiveKind};
pub use fetch::{ArchiveFetcher, ReqwestTransport, Transport};
pub use lock::CacheLock;
