//! Resolved options for one provisioning attempt.
//!
//! [`Configuration`] is an explicit value built once, either from the
//! environment through [`MongoEnvCfg`](crate::MongoEnvCfg) or
//! programmatically, and passed by reference to the resolver, the binary
//! cache, and the supervisor.

mod timeout;

pub use timeout::{
    DEFAULT_STARTUP_TIMEOUT, MAX_TIMEOUT_SECS, SHUTDOWN_TIMEOUT_ENV, STARTUP_TIMEOUT_ENV,
    parse_timeout_secs,
};

use std::fmt;
use std::time::Duration;

use camino::Utf8PathBuf;
use color_eyre::eyre::eyre;
use tracing::warn;

use crate::cache::BinaryCacheConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::observability::LOG_TARGET;
use crate::supervisor::{DEFAULT_HOST, DEFAULT_SHUTDOWN_TIMEOUT, StartupPolicy, SupervisorSettings};
use crate::version::SemanticVersion;

/// Generic Linux builds are only published up to this major version.
const GENERIC_LINUX_LAST_MAJOR: u32 = 4;

/// Everything needed to provision and launch one `mongod`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    /// Requested version; `None` selects the newest release.
    pub version: Option<SemanticVersion>,
    /// Operating system name used for release resolution.
    pub os_name: String,
    /// Operating system version used for release resolution.
    pub os_version: Option<String>,
    /// Archive URL that bypasses release resolution.
    pub download_url: Option<String>,
    /// Uses `mongod` from `PATH` instead of downloading one.
    pub use_local_mongod: bool,
    /// Binary cache layout and refresh policy.
    pub cache: BinaryCacheConfig,
    /// Address `mongod` binds to.
    pub host: String,
    /// Fixed port; `None` allocates one.
    pub port: Option<u16>,
    /// Fixed data directory; `None` uses an auto-managed one.
    pub data_dir: Option<Utf8PathBuf>,
    /// Default database appended to the connection string.
    pub dbname: Option<String>,
    /// Host override or complete connection string for clients.
    pub client_host: Option<String>,
    /// Value passed to `--storageEngine`.
    pub storage_engine: Option<String>,
    /// Bound on the wait for a healthy instance.
    pub startup_timeout: Duration,
    /// Grace period before a stopping instance is killed.
    pub shutdown_timeout: Duration,
}

impl Configuration {
    /// Defaults for `os_name`: newest release, shared cache, loopback host,
    /// and automatic port and data directory.
    #[must_use]
    pub fn new(os_name: impl Into<String>) -> Self {
        Self {
            version: None,
            os_name: os_name.into(),
            os_version: None,
            download_url: None,
            use_local_mongod: false,
            cache: BinaryCacheConfig::new(),
            host: DEFAULT_HOST.to_owned(),
            port: None,
            data_dir: None,
            dbname: None,
            client_host: None,
            storage_engine: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Defaults for the operating system this process runs on.
    ///
    /// # Errors
    ///
    /// Returns an error when the host operating system has no published
    /// `mongod` builds.
    pub fn for_host() -> ConfigResult<Self> {
        Ok(Self::new(host_os_name()?))
    }

    /// Requests a specific, possibly partial, version.
    #[must_use]
    pub const fn with_version(mut self, version: SemanticVersion) -> Self {
        self.version = Some(version);
        self
    }

    /// Requests a specific operating system version.
    #[must_use]
    pub fn with_os_version(mut self, os_version: impl Into<String>) -> Self {
        self.os_version = Some(os_version.into());
        self
    }

    /// Downloads from `url` instead of resolving a release.
    #[must_use]
    pub fn with_download_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = Some(url.into());
        self
    }

    /// Uses the `mongod` found on `PATH` instead of downloading one.
    #[must_use]
    pub const fn with_local_mongod(mut self, enabled: bool) -> Self {
        self.use_local_mongod = enabled;
        self
    }

    /// Replaces the binary cache configuration.
    #[must_use]
    pub fn with_cache(mut self, cache: BinaryCacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Binds `mongod` to `host` instead of loopback.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Pins the listening port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Pins the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, data_dir: impl Into<Utf8PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    /// Sets the default database of the connection string.
    #[must_use]
    pub fn with_dbname(mut self, dbname: impl Into<String>) -> Self {
        self.dbname = Some(dbname.into());
        self
    }

    /// Overrides the host clients connect to. A value carrying the
    /// `mongodb://` scheme replaces the whole connection string.
    #[must_use]
    pub fn with_client_host(mut self, client_host: impl Into<String>) -> Self {
        self.client_host = Some(client_host.into());
        self
    }

    /// Selects the storage engine passed to `--storageEngine`.
    #[must_use]
    pub fn with_storage_engine(mut self, engine: impl Into<String>) -> Self {
        self.storage_engine = Some(engine.into());
        self
    }

    /// Bounds the wait for a healthy instance.
    #[must_use]
    pub const fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Bounds the grace period on stop.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Supervisor settings for the binaries in `binary_dir`.
    #[must_use]
    pub fn supervisor_settings(&self, binary_dir: impl Into<Utf8PathBuf>) -> SupervisorSettings {
        SupervisorSettings {
            binary_dir: binary_dir.into(),
            host: self.host.clone(),
            port: self.port,
            data_dir: self.data_dir.clone(),
            dbname: self.dbname.clone(),
            client_host: self.client_host.clone(),
            storage_engine: self.storage_engine.clone(),
            startup: StartupPolicy::with_timeout(self.startup_timeout),
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    /// Logs a warning for requests generic Linux builds cannot satisfy.
    pub(crate) fn warn_on_generic_linux(&self) {
        if self.os_name != "linux" || self.download_url.is_some() || self.use_local_mongod {
            return;
        }
        let beyond_generic = self
            .version
            .is_none_or(|version| version.major > GENERIC_LINUX_LAST_MAJOR);
        if beyond_generic {
            warn!(
                target: LOG_TARGET,
                requested = ?self.version.map(|version| version.to_string()),
                "generic linux builds stop at {GENERIC_LINUX_LAST_MAJOR}.0; set operating_system to a distribution for newer releases"
            );
        }
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = self
            .version
            .map_or_else(|| "latest".to_owned(), |version| version.to_string());
        writeln!(f, "mongo version: {version}")?;
        writeln!(f, "operating system: {}", self.os_name)?;
        writeln!(f, "os version: {}", self.os_version.as_deref().unwrap_or("any"))?;
        writeln!(f, "download url: {}", self.download_url.as_deref().unwrap_or("resolved"))?;
        writeln!(f, "use local mongod: {}", self.use_local_mongod)?;
        writeln!(f, "ignore cache: {}", self.cache.force_refresh)?;
        writeln!(f, "download folder: {}", self.cache.download_root())?;
        writeln!(f, "extract folder: {}", self.cache.extract_root())?;
        writeln!(f, "host: {}", self.host)?;
        match self.port {
            Some(port) => writeln!(f, "port: {port}")?,
            None => writeln!(f, "port: automatic")?,
        }
        match &self.data_dir {
            Some(dir) => writeln!(f, "data folder: {dir}"),
            None => writeln!(f, "data folder: ephemeral"),
        }
    }
}

/// Maps the compile-time target OS onto the release table's OS names.
///
/// # Errors
///
/// Returns an error for targets without published builds.
pub fn host_os_name() -> ConfigResult<&'static str> {
    os_name_for(std::env::consts::OS)
}

fn os_name_for(target_os: &str) -> ConfigResult<&'static str> {
    match target_os {
        "linux" => Ok("linux"),
        "macos" => Ok("osx"),
        "windows" => Ok("windows"),
        other => Err(ConfigError::from(eyre!(
            "OperatingSystemNotFound: no mongod builds are published for '{other}'; set MONGOIM_OPERATING_SYSTEM"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::capture_warn_logs;
    use rstest::rstest;

    #[rstest]
    #[case::linux("linux", "linux")]
    #[case::macos("macos", "osx")]
    #[case::windows("windows", "windows")]
    fn maps_target_operating_systems(#[case] target: &str, #[case] want: &str) {
        assert_eq!(os_name_for(target).expect("supported target"), want);
    }

    #[test]
    fn unknown_targets_are_rejected() {
        let err = os_name_for("haiku").expect_err("haiku has no builds");
        assert!(err.to_string().contains("OperatingSystemNotFound"), "{err}");
    }

    #[test]
    fn builders_override_defaults() {
        let config = Configuration::new("ubuntu")
            .with_version(SemanticVersion::new(4, Some(4), None))
            .with_os_version("20")
            .with_port(27999)
            .with_dbname("shop")
            .with_startup_timeout(Duration::from_secs(5));
        assert_eq!(config.os_version.as_deref(), Some("20"));
        let settings = config.supervisor_settings("/opt/mongo/bin");
        assert_eq!(settings.port, Some(27999));
        assert_eq!(settings.dbname.as_deref(), Some("shop"));
        assert_eq!(settings.startup.timeout, Duration::from_secs(5));
        assert_eq!(settings.host, DEFAULT_HOST);
    }

    #[test]
    fn instance_builders_reach_the_supervisor() {
        let config = Configuration::new("linux")
            .with_host("0.0.0.0")
            .with_client_host("db.internal")
            .with_storage_engine("ephemeralForTest")
            .with_local_mongod(true);
        assert!(config.use_local_mongod);
        let settings = config.supervisor_settings("/opt/mongo/bin");
        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.client_host.as_deref(), Some("db.internal"));
        assert_eq!(settings.storage_engine.as_deref(), Some("ephemeralForTest"));
    }

    #[rstest]
    #[case::latest(None, true)]
    #[case::modern(Some(SemanticVersion::new(5, None, None)), true)]
    #[case::legacy(Some(SemanticVersion::new(4, Some(0), None)), false)]
    fn warns_when_generic_linux_cannot_serve_the_request(
        #[case] version: Option<SemanticVersion>,
        #[case] warned: bool,
    ) {
        let mut config = Configuration::new("linux");
        config.version = version;
        let (logs, ()) = capture_warn_logs(|| config.warn_on_generic_linux());
        assert_eq!(
            logs.iter().any(|line| line.contains("generic linux")),
            warned,
            "{logs:?}"
        );
    }

    #[test]
    fn display_summarises_the_request() {
        let rendered = Configuration::new("osx").to_string();
        assert!(rendered.contains("mongo version: latest"));
        assert!(rendered.contains("operating system: osx"));
        assert!(rendered.contains("data folder: ephemeral"));
    }
}
