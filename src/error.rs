//! Domain error types for provisioning and supervising ephemeral `mongod`
//! instances.
//!
//! Errors are grouped by the axis that failed so callers can tell a request
//! the release table cannot satisfy apart from a release that could not be
//! downloaded, a data directory already owned by another instance, or a
//! process that never became healthy.

use color_eyre::Report;
use thiserror::Error;

/// Result alias for operations that may return a [`MongoEphemeralError`].
pub type Result<T> = std::result::Result<T, MongoEphemeralError>;

/// Result alias for release-resolution operations.
pub type ResolutionResult<T> = std::result::Result<T, ResolutionError>;

/// Result alias for download, extraction, and cache operations.
pub type AcquisitionResult<T> = std::result::Result<T, AcquisitionError>;

/// Result alias for process supervision operations.
pub type SupervisorResult<T> = std::result::Result<T, SupervisorError>;

/// Result alias for configuration fallible operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result alias for process registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Top-level error exposed by the crate.
#[derive(Debug, Error)]
pub enum MongoEphemeralError {
    /// The requested version or operating system cannot be satisfied.
    #[error("release resolution failed: {0}")]
    Resolution(#[from] ResolutionError),
    /// A resolved release could not be materialised as a binary.
    #[error("binary acquisition failed: {0}")]
    Acquisition(#[from] AcquisitionError),
    /// Launching, probing, or stopping `mongod` failed.
    #[error("mongod supervision failed: {0}")]
    Supervisor(#[from] SupervisorError),
    /// Configuration could not be loaded or validated.
    #[error("configuration failed: {0}")]
    Config(#[from] ConfigError),
    /// Exit hooks for the process registry could not be installed.
    #[error("process registry failed: {0}")]
    Registry(#[from] RegistryError),
}

/// Raised when a request cannot be mapped onto the known release table.
///
/// These are never retried: the table structurally cannot satisfy the request.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// No release is published for the requested operating system name.
    #[error("can't find a mongod release for operating system '{os_name}'")]
    OperatingSystemNameNotFound {
        /// Operating system name as requested.
        os_name: String,
    },
    /// Several OS versions are published and the requested one is not among them.
    #[error(
        "can't find a mongod release for {os_name} version {os_version}; available versions: {}",
        available.join(", ")
    )]
    OperatingSystemVersionNotFound {
        /// Operating system name as requested.
        os_name: String,
        /// Operating system version as requested.
        os_version: String,
        /// OS versions published for the selected release.
        available: Vec<String>,
    },
    /// The release table contains no rows.
    #[error("the release table is empty")]
    EmptyReleaseTable,
    /// The release table could not be parsed or contains malformed rows.
    #[error("the release table is invalid: {0}")]
    InvalidReleaseTable(String),
}

/// Categorises acquisition failures so callers can branch on structured errors.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum AcquisitionErrorKind {
    /// Represents errors without a more specific semantic meaning.
    #[default]
    Other,
    /// The transport failed or the server refused the resolved URL.
    CantDownload,
    /// The cached archive is neither a tar nor a zip file.
    InvalidDownloadedFile,
    /// Extraction finished but no `mongod` executable was found.
    BinaryMissing,
}

/// Captures download, extraction, and cache failures.
#[derive(Debug, Error)]
#[error("{report}")]
pub struct AcquisitionError {
    kind: AcquisitionErrorKind,
    #[source]
    report: Report,
}

impl AcquisitionError {
    /// Constructs a new acquisition error with the provided kind and
    /// diagnostic report.
    #[must_use]
    pub const fn new(kind: AcquisitionErrorKind, report: Report) -> Self {
        Self { kind, report }
    }

    /// Returns the semantic category for this acquisition failure.
    #[must_use]
    pub const fn kind(&self) -> AcquisitionErrorKind {
        self.kind
    }

    /// Extracts the underlying diagnostic report.
    pub fn into_report(self) -> Report {
        self.report
    }
}

impl From<Report> for AcquisitionError {
    fn from(report: Report) -> Self {
        Self::new(AcquisitionErrorKind::Other, report)
    }
}

/// Categorises supervision failures.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum SupervisorErrorKind {
    /// Represents errors without a more specific semantic meaning.
    #[default]
    Other,
    /// A caller-supplied data directory is held by a live `mongod`.
    DataDirectoryLocked,
    /// `mongod` exited or never became healthy within the startup bound.
    StartupFailed,
    /// The caller cancelled a pending start.
    StartupCancelled,
    /// The operation requires a started instance.
    NotStarted,
    /// The `mongod` process could not be spawned.
    Spawn,
    /// Stopping the process failed.
    Shutdown,
    /// The dump tool failed.
    Dump,
    /// The instance log could not be read.
    Logs,
}

/// Captures supervision failures.
#[derive(Debug, Error)]
#[error("{report}")]
pub struct SupervisorError {
    kind: SupervisorErrorKind,
    #[source]
    report: Report,
}

impl SupervisorError {
    /// Constructs a new supervision error with the provided kind and
    /// diagnostic report.
    #[must_use]
    pub const fn new(kind: SupervisorErrorKind, report: Report) -> Self {
        Self { kind, report }
    }

    /// Returns the semantic category for this supervision failure.
    #[must_use]
    pub const fn kind(&self) -> SupervisorErrorKind {
        self.kind
    }

    /// Extracts the underlying diagnostic report.
    pub fn into_report(self) -> Report {
        self.report
    }
}

impl From<Report> for SupervisorError {
    fn from(report: Report) -> Self {
        Self::new(SupervisorErrorKind::Other, report)
    }
}

/// Captures configuration failures.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ConfigError(#[from] Report);

/// Captures failures installing the registry's exit hooks.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Signal handlers may only be installed from the main thread.
    #[error("signal hooks must be installed from the main thread (called from '{thread}')")]
    NotMainThread {
        /// Name of the thread that attempted the installation.
        thread: String,
    },
    /// `atexit(3)` refused the registration.
    #[error("libc::atexit registration failed (rc={rc})")]
    AtExit {
        /// Return code reported by `atexit`.
        rc: i32,
    },
    /// The SIGTERM listener could not be registered.
    #[error("failed to install SIGTERM listener")]
    Signal(#[source] std::io::Error),
}
