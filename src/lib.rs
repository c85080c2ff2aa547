//! Provisions disposable `mongod` instances for tests.
//!
//! The library resolves a possibly partial version request against the
//! catalogue of published `MongoDB` builds, downloads and unpacks the matching
//! archive into a content-addressed cache, and supervises `mongod` as a child
//! process until it is healthy and, later, until it has exited and its data
//! directory is gone.
//!
//! ```no_run
//! use mongo_ephemeral::{Configuration, SemanticVersion, start};
//!
//! # fn main() -> mongo_ephemeral::Result<()> {
//! let config = Configuration::for_host()?.with_version(SemanticVersion::new(4, Some(0), None));
//! let mut mongod = start(&config)?;
//! let uri = mongod.connection_string()?.to_owned();
//! assert!(uri.starts_with("mongodb://"));
//! mongod.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
mod cleanup_helpers;
mod config;
mod error;
mod fs;
mod observability;
pub mod registry;
pub mod supervisor;
#[doc(hidden)]
pub mod test_support;
pub mod version;

pub use cache::{BinaryCache, BinaryCacheConfig};
pub use config::{
    Configuration, MAX_TIMEOUT_SECS, SHUTDOWN_TIMEOUT_ENV, STARTUP_TIMEOUT_ENV, host_os_name,
    parse_timeout_secs,
};
pub use error::{
    AcquisitionError, AcquisitionErrorKind, AcquisitionResult, ConfigError, ConfigResult,
    MongoEphemeralError, RegistryError, RegistryResult, ResolutionError, ResolutionResult, Result,
    SupervisorError, SupervisorErrorKind, SupervisorResult,
};
pub use registry::{ProcessRegistry, install_exit_hooks};
pub use supervisor::{MongodSupervisor, SupervisorSettings, SupervisorState};
pub use version::{ResolvedRelease, SemanticVersion, VersionResolver, VersionTree};

use std::ffi::OsString;

use camino::Utf8PathBuf;
use color_eyre::eyre::eyre;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span};

use crate::cache::locate_on_path;
use crate::config::DEFAULT_STARTUP_TIMEOUT;
use crate::observability::LOG_TARGET;
use crate::supervisor::DEFAULT_SHUTDOWN_TIMEOUT;

/// Captures `mongod` provisioning options supplied via `MONGOIM_*`
/// environment variables and configuration files.
///
/// # Examples
/// ```
/// use mongo_ephemeral::MongoEnvCfg;
///
/// let cfg = MongoEnvCfg::default();
/// assert!(cfg.mongod_port.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, OrthoConfig, Default)]
#[ortho_config(prefix = "MONGOIM")]
pub struct MongoEnvCfg {
    /// Requested version such as `4`, `4.4`, or `4.4.6`.
    pub mongo_version: Option<String>,
    /// Operating system name as used by the release table.
    pub operating_system: Option<String>,
    /// Operating system version as used by the release table.
    pub os_version: Option<String>,
    /// Archive URL that bypasses release resolution.
    pub download_url: Option<String>,
    /// Re-download even when the archive is cached.
    pub ignore_cache: Option<bool>,
    /// Fixed listening port.
    pub mongod_port: Option<u16>,
    /// Fixed data directory.
    pub mongod_data_folder: Option<Utf8PathBuf>,
    /// Use the `mongod` found on `PATH`.
    pub use_local_mongod: Option<bool>,
    /// Default database of the connection string.
    pub dbname: Option<String>,
    /// Host override or complete connection string.
    pub mongo_client_host: Option<String>,
    /// Storage engine passed to `mongod`.
    pub storage_engine: Option<String>,
    /// Overrides the archive download directory.
    pub download_folder: Option<Utf8PathBuf>,
    /// Overrides the archive extraction directory.
    pub extract_folder: Option<Utf8PathBuf>,
    /// Startup bound in whole seconds.
    pub startup_timeout_secs: Option<String>,
    /// Shutdown grace period in whole seconds.
    pub shutdown_timeout_secs: Option<String>,
}

impl MongoEnvCfg {
    /// Loads configuration from environment variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns an error when a variable cannot be parsed into its field type.
    pub fn load() -> ConfigResult<Self> {
        let args = [OsString::from("mongo-ephemeral")];
        Self::load_from_iter(args).map_err(|err| ConfigError::from(eyre!(err)))
    }

    /// Folds the loaded values into a [`Configuration`].
    ///
    /// Unset keys take the defaults of [`Configuration::for_host`].
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed version or timeout, or when no
    /// operating system is configured and the host has no published builds.
    pub fn to_configuration(&self) -> ConfigResult<Configuration> {
        let os_name = match self.operating_system.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_lowercase(),
            _ => host_os_name()?.to_owned(),
        };
        let mut config = Configuration::new(os_name);

        self.apply_release(&mut config)?;
        self.apply_cache(&mut config);
        self.apply_instance(&mut config);
        self.apply_timeouts(&mut config)?;
        Ok(config)
    }

    fn apply_release(&self, config: &mut Configuration) -> ConfigResult<()> {
        if let Some(raw) = self.mongo_version.as_deref() {
            config.version = Some(raw.parse()?);
        }
        config.os_version.clone_from(&self.os_version);
        config.download_url.clone_from(&self.download_url);
        config.use_local_mongod = self.use_local_mongod.unwrap_or(false);
        Ok(())
    }

    fn apply_cache(&self, config: &mut Configuration) {
        config.cache.force_refresh = self.ignore_cache.unwrap_or(false);
        config.cache.download_dir.clone_from(&self.download_folder);
        config.cache.extract_dir.clone_from(&self.extract_folder);
    }

    fn apply_instance(&self, config: &mut Configuration) {
        config.port = self.mongod_port;
        config.data_dir.clone_from(&self.mongod_data_folder);
        config.dbname.clone_from(&self.dbname);
        config.client_host.clone_from(&self.mongo_client_host);
        config.storage_engine.clone_from(&self.storage_engine);
    }

    fn apply_timeouts(&self, config: &mut Configuration) -> ConfigResult<()> {
        config.startup_timeout = parse_timeout_secs(
            STARTUP_TIMEOUT_ENV,
            self.startup_timeout_secs.as_deref(),
            DEFAULT_STARTUP_TIMEOUT,
        )?;
        config.shutdown_timeout = parse_timeout_secs(
            SHUTDOWN_TIMEOUT_ENV,
            self.shutdown_timeout_secs.as_deref(),
            DEFAULT_SHUTDOWN_TIMEOUT,
        )?;
        Ok(())
    }
}

/// Makes a `mongod` binary available and returns its directory.
///
/// Honours `use_local_mongod` and `download_url`; otherwise resolves the
/// request against the bundled release table.
///
/// # Errors
///
/// Returns resolution errors for requests the table cannot satisfy and
/// acquisition errors when the archive cannot be downloaded or unpacked.
pub fn provision(config: &Configuration) -> Result<Utf8PathBuf> {
    let cache = BinaryCache::new(config.cache.clone());
    provision_with(config, VersionTree::bundled()?, &cache)
}

/// [`provision`] against an injected release table and cache.
///
/// # Errors
///
/// See [`provision`].
pub fn provision_with(
    config: &Configuration,
    tree: &VersionTree,
    cache: &BinaryCache,
) -> Result<Utf8PathBuf> {
    let span = info_span!(target: LOG_TARGET, "provision", os_name = %config.os_name);
    let _entered = span.enter();

    if config.use_local_mongod {
        let dir = locate_on_path()?;
        info!(target: LOG_TARGET, binary_dir = %dir, "using mongod from PATH");
        return Ok(dir);
    }
    if let Some(url) = config.download_url.as_deref() {
        info!(target: LOG_TARGET, url, "download url override bypasses release resolution");
        return Ok(cache.ensure_url(url)?);
    }

    config.warn_on_generic_linux();
    let release = VersionResolver::new(tree).resolve(
        config.version,
        &config.os_name,
        config.os_version.as_deref(),
    )?;
    Ok(cache.ensure_binary(&release)?)
}

/// Provisions a binary and starts a healthy `mongod` from it.
///
/// The instance is registered with [`ProcessRegistry::global`], which
/// disposes it at process exit. Call [`install_exit_hooks`] from the main
/// thread to also dispose it on `SIGTERM`.
///
/// # Errors
///
/// Returns provisioning errors as for [`provision`] and supervision errors
/// when the instance cannot be started.
pub fn start(config: &Configuration) -> Result<MongodSupervisor> {
    let binary_dir = provision(config)?;
    let mut supervisor = MongodSupervisor::new(config.supervisor_settings(binary_dir));
    supervisor.start()?;
    Ok(supervisor)
}

/// [`provision`] on a blocking worker thread, for use from async code.
///
/// # Errors
///
/// See [`provision`].
#[cfg(feature = "async-api")]
pub async fn provision_async(config: Configuration) -> Result<Utf8PathBuf> {
    tokio::task::spawn_blocking(move || provision(&config))
        .await
        .map_err(|err| AcquisitionError::from(eyre!("provisioning task failed: {err}")))?
}

/// [`start`] without blocking the async runtime.
///
/// Dropping the returned future while `mongod` is starting cancels the
/// start, as for [`MongodSupervisor::start_async`].
///
/// # Errors
///
/// See [`start`].
#[cfg(feature = "async-api")]
pub async fn start_async(config: &Configuration) -> Result<MongodSupervisor> {
    let binary_dir = provision_async(config.clone()).await?;
    let supervisor = MongodSupervisor::new(config.supervisor_settings(binary_dir));
    Ok(supervisor.start_async().await?)
}

/// Loads configuration from the environment and provisions a binary.
///
/// The instance is not started. Returns the binary directory.
///
/// # Errors
///
/// Returns configuration, resolution, or acquisition errors.
pub fn run() -> Result<Utf8PathBuf> {
    let config = MongoEnvCfg::load()?.to_configuration()?;
    info!(target: LOG_TARGET, "provisioning mongod\n{config}");
    provision(&config)
}
