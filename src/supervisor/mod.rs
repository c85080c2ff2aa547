//! Lifecycle management for one disposable `mongod` instance.
//!
//! [`MongodSupervisor`] allocates a data directory and a listening port,
//! launches `mongod` from a provisioned binary directory, registers the child
//! with a [`ProcessRegistry`], and blocks until a [`HealthProbe`] reports the
//! server ready. [`MongodSupervisor::stop`] terminates the child and reclaims
//! everything the supervisor allocated.

mod command;
mod connection;
mod data_dir;
mod health;
mod output;
mod port;
pub(crate) mod process;

pub use command::LOG_FILE;
pub use connection::{SCHEME, connection_string};
pub use data_dir::LOCK_FILE;
pub use health::{HealthProbe, ProbeStatus, ProbeTarget, ShellStatusProbe, StartupPolicy};
pub use port::DEFAULT_PORT_RANGE;

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{WrapErr, eyre};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use crate::error::{SupervisorError, SupervisorErrorKind, SupervisorResult};
use crate::observability::SUPERVISOR_TARGET;
use crate::registry::{ProcessRegistry, SharedChild};
use command::{LaunchSpec, dump_command};
use data_dir::DataDirectory;
use output::{log_tail, truncate_output};
use port::PortReservation;
use process::{Termination, terminate_child};

/// Host `mongod` binds to unless configured otherwise.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Grace period between `SIGTERM` and `SIGKILL` on stop.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// Lifecycle states of a [`MongodSupervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Constructed; nothing has been allocated.
    Created,
    /// Resources are allocated and the child is waiting to become healthy.
    Starting,
    /// The child answered the health probe.
    Healthy,
    /// The child is being terminated.
    Stopping,
    /// The child exited and resources were reclaimed.
    Stopped,
    /// Startup or shutdown failed; any started child has been terminated.
    Failed,
}

/// Options for launching one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Directory containing `mongod` and its companion tools.
    pub binary_dir: Utf8PathBuf,
    /// Address `mongod` binds to.
    pub host: String,
    /// Fixed port; `None` allocates one from [`DEFAULT_PORT_RANGE`].
    pub port: Option<u16>,
    /// Fixed data directory; `None` uses an auto-managed temporary one.
    pub data_dir: Option<Utf8PathBuf>,
    /// Default database appended to the connection string.
    pub dbname: Option<String>,
    /// Host override, or a complete connection string when it carries the
    /// `mongodb://` scheme.
    pub client_host: Option<String>,
    /// Value passed to `--storageEngine`.
    pub storage_engine: Option<String>,
    /// Bounds on the wait for readiness.
    pub startup: StartupPolicy,
    /// Grace period before a stopping child is killed.
    pub shutdown_timeout: Duration,
}

impl SupervisorSettings {
    /// Settings with defaults for everything but the binary directory.
    #[must_use]
    pub fn new(binary_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            binary_dir: binary_dir.into(),
            host: DEFAULT_HOST.to_owned(),
            port: None,
            data_dir: None,
            dbname: None,
            client_host: None,
            storage_engine: None,
            startup: StartupPolicy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Snapshot of a running instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    /// Process identifier of `mongod`.
    pub pid: u32,
    /// Data directory passed as `--dbpath`.
    pub data_directory: Utf8PathBuf,
    /// Log file passed as `--logpath`.
    pub log_path: Utf8PathBuf,
    /// Listening port.
    pub port: u16,
    /// Bound host.
    pub host: String,
    /// Connection string clients should use.
    pub connection_string: String,
    /// Supervisor state when the snapshot was taken.
    pub state: SupervisorState,
}

#[derive(Debug)]
struct RunningInstance {
    child: SharedChild,
    pid: u32,
    data_dir: DataDirectory,
    port: PortReservation,
    log_path: Utf8PathBuf,
}

/// Owns one `mongod` child process and the resources allocated for it.
///
/// Dropping a running supervisor stops the child on a best-effort basis.
///
/// # Examples
///
/// ```no_run
/// use mongo_ephemeral::supervisor::{MongodSupervisor, SupervisorSettings};
///
/// # fn main() -> mongo_ephemeral::SupervisorResult<()> {
/// let mut mongod = MongodSupervisor::new(SupervisorSettings::new("/opt/mongodb/bin"));
/// mongod.start()?;
/// println!("{}", mongod.connection_string()?);
/// mongod.stop()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MongodSupervisor {
    settings: SupervisorSettings,
    registry: ProcessRegistry,
    probe: Arc<dyn HealthProbe>,
    state: SupervisorState,
    running: Option<RunningInstance>,
    connection: OnceLock<String>,
    log_path: Option<Utf8PathBuf>,
}

impl MongodSupervisor {
    /// Creates a supervisor that probes with [`ShellStatusProbe`] and
    /// registers its child with [`ProcessRegistry::global`].
    ///
    /// The global registry disposes its children at process exit. The
    /// `SIGTERM` listener is opt-in through
    /// [`install_exit_hooks`](crate::registry::install_exit_hooks).
    #[must_use]
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            settings,
            registry: ProcessRegistry::global().clone(),
            probe: Arc::new(ShellStatusProbe::default()),
            state: SupervisorState::Created,
            running: None,
            connection: OnceLock::new(),
            log_path: None,
        }
    }

    /// Replaces the readiness probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Registers children with `registry` instead of the global one.
    #[must_use]
    pub fn with_registry(mut self, registry: ProcessRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Launch options.
    #[must_use]
    pub const fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SupervisorState {
        self.state
    }

    /// Snapshot of the running instance, or `None` when nothing runs.
    #[must_use]
    pub fn handle(&self) -> Option<ProcessHandle> {
        let instance = self.running.as_ref()?;
        Some(ProcessHandle {
            pid: instance.pid,
            data_directory: instance.data_dir.path().to_path_buf(),
            log_path: instance.log_path.clone(),
            port: instance.port.port(),
            host: self.settings.host.clone(),
            connection_string: self.connection_for(instance.port.port()).to_owned(),
            state: self.state,
        })
    }

    /// Starts `mongod` and blocks until it is healthy.
    ///
    /// # Errors
    ///
    /// See [`MongodSupervisor::start_with_cancellation`].
    pub fn start(&mut self) -> SupervisorResult<()> {
        self.start_with_cancellation(&CancellationToken::new())
    }

    /// Starts `mongod` and blocks until it is healthy or `cancel` fires.
    ///
    /// Calling this on a healthy supervisor does nothing. On failure the
    /// child is terminated and unregistered, an auto-managed data directory
    /// is removed, and the state becomes [`SupervisorState::Failed`].
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorErrorKind::DataDirectoryLocked`] when a fixed data
    /// directory is in use, [`SupervisorErrorKind::Spawn`] when `mongod`
    /// cannot be launched, [`SupervisorErrorKind::StartupFailed`] when it
    /// exits or stays unhealthy past the startup timeout, and
    /// [`SupervisorErrorKind::StartupCancelled`] when `cancel` fires.
    pub fn start_with_cancellation(&mut self, cancel: &CancellationToken) -> SupervisorResult<()> {
        if self.state == SupervisorState::Healthy {
            debug!(target: SUPERVISOR_TARGET, "mongod already running; ignoring start");
            return Ok(());
        }
        let span = info_span!(
            target: SUPERVISOR_TARGET,
            "mongod_start",
            binary_dir = %self.settings.binary_dir
        );
        let _entered = span.enter();

        self.state = SupervisorState::Starting;
        self.connection = OnceLock::new();
        match self.launch(cancel) {
            Ok(instance) => {
                info!(
                    target: SUPERVISOR_TARGET,
                    pid = instance.pid,
                    port = instance.port.port(),
                    data_dir = %instance.data_dir.path(),
                    "mongod is healthy"
                );
                self.running = Some(instance);
                self.state = SupervisorState::Healthy;
                Ok(())
            }
            Err(err) => {
                self.state = SupervisorState::Failed;
                Err(err)
            }
        }
    }

    fn launch(&mut self, cancel: &CancellationToken) -> SupervisorResult<RunningInstance> {
        let data_dir = DataDirectory::acquire(self.settings.data_dir.as_deref())?;
        let mut port = match self.settings.port {
            Some(fixed) => PortReservation::fixed(fixed),
            None => PortReservation::allocate(&self.settings.host, DEFAULT_PORT_RANGE)?,
        };
        let launch = LaunchSpec {
            binary_dir: &self.settings.binary_dir,
            data_dir: data_dir.path(),
            host: &self.settings.host,
            port: port.port(),
            storage_engine: self.settings.storage_engine.as_deref(),
        };
        let log_path = launch.log_path();
        self.log_path = Some(log_path.clone());
        let mut command = launch.command();

        port.release_listener();
        let spawned = command.spawn().map_err(|err| {
            SupervisorError::new(
                SupervisorErrorKind::Spawn,
                eyre!(
                    "failed to launch {}: {err}",
                    command.get_program().to_string_lossy()
                ),
            )
        })?;
        let child: SharedChild = Arc::new(Mutex::new(spawned));
        let cleanup_dir = data_dir.is_ephemeral().then(|| data_dir.path());
        let pid = self.registry.register(&child, cleanup_dir);
        debug!(target: SUPERVISOR_TARGET, pid, port = port.port(), "spawned mongod");

        let target = ProbeTarget {
            host: self.settings.host.clone(),
            port: port.port(),
            binary_dir: self.settings.binary_dir.clone(),
        };
        match self
            .settings
            .startup
            .wait_until_healthy(self.probe.as_ref(), &target, &child, cancel)
        {
            Ok(_) => Ok(RunningInstance {
                child,
                pid,
                data_dir,
                port,
                log_path,
            }),
            Err(err) => {
                let diagnostics = log_tail(&log_path);
                self.abandon(&child, pid, data_dir);
                Err(with_log_tail(err, &log_path, diagnostics))
            }
        }
    }

    /// Kills a child that never became healthy and releases what it held.
    fn abandon(&self, child: &SharedChild, pid: u32, data_dir: DataDirectory) {
        let outcome = terminate_child(
            &mut child.lock().unwrap_or_else(PoisonError::into_inner),
            Duration::ZERO,
        );
        if let Err(err) = outcome {
            warn!(target: SUPERVISOR_TARGET, pid, error = %err, "failed to kill mongod after failed start");
        }
        self.registry.unregister(pid);
        if let Err(err) = data_dir.reclaim() {
            warn!(target: SUPERVISOR_TARGET, pid, error = %err, "failed to reclaim data directory after failed start");
        }
    }

    /// Terminates `mongod` and reclaims an auto-managed data directory.
    ///
    /// Sends `SIGTERM`, waits up to the shutdown timeout, then kills the
    /// child. Stopping a supervisor that is not running does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorErrorKind::Shutdown`] when the child cannot be
    /// signalled or awaited, or the data directory cannot be removed.
    pub fn stop(&mut self) -> SupervisorResult<()> {
        let Some(instance) = self.running.take() else {
            return Ok(());
        };
        let span = info_span!(target: SUPERVISOR_TARGET, "mongod_stop", pid = instance.pid);
        let _entered = span.enter();

        self.state = SupervisorState::Stopping;
        match self.shutdown(instance) {
            Ok(()) => {
                self.state = SupervisorState::Stopped;
                Ok(())
            }
            Err(err) => {
                self.state = SupervisorState::Failed;
                Err(err)
            }
        }
    }

    fn shutdown(&self, instance: RunningInstance) -> SupervisorResult<()> {
        let RunningInstance {
            child,
            pid,
            data_dir,
            port,
            ..
        } = instance;
        let outcome = terminate_child(
            &mut child.lock().unwrap_or_else(PoisonError::into_inner),
            self.settings.shutdown_timeout,
        );
        self.registry.unregister(pid);
        drop(port);

        let termination = outcome
            .wrap_err_with(|| format!("failed to stop mongod (pid {pid})"))
            .map_err(|report| SupervisorError::new(SupervisorErrorKind::Shutdown, report))?;
        match termination {
            Termination::Killed(status) => warn!(
                target: SUPERVISOR_TARGET,
                pid,
                %status,
                timeout = ?self.settings.shutdown_timeout,
                "mongod ignored SIGTERM and was killed"
            ),
            Termination::Graceful(status) | Termination::AlreadyExited(status) => {
                info!(target: SUPERVISOR_TARGET, pid, %status, "mongod stopped");
            }
        }
        data_dir.reclaim()
    }

    /// Connection string of the instance, derived once per start.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorErrorKind::NotStarted`] before the first
    /// successful start.
    pub fn connection_string(&self) -> SupervisorResult<&str> {
        if let Some(cached) = self.connection.get() {
            return Ok(cached);
        }
        let instance = self.running()?;
        Ok(self.connection_for(instance.port.port()))
    }

    fn connection_for(&self, port: u16) -> &str {
        self.connection.get_or_init(|| {
            connection_string(
                &self.settings.host,
                port,
                self.settings.dbname.as_deref(),
                self.settings.client_host.as_deref(),
            )
        })
    }

    /// Dumps one collection with `mongodump --archive` and returns the
    /// archive bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorErrorKind::NotStarted`] when nothing runs and
    /// [`SupervisorErrorKind::Dump`] when the tool cannot be run or fails.
    pub fn dump(&self, database: &str, collection: &str) -> SupervisorResult<Vec<u8>> {
        let instance = self.running()?;
        let output = dump_command(
            &self.settings.binary_dir,
            &self.settings.host,
            instance.port.port(),
            database,
            collection,
        )
        .output()
        .map_err(|err| {
            SupervisorError::new(SupervisorErrorKind::Dump, eyre!("failed to run mongodump: {err}"))
        })?;
        if output.status.success() {
            return Ok(output.stdout);
        }
        Err(SupervisorError::new(
            SupervisorErrorKind::Dump,
            eyre!(
                "mongodump of {database}.{collection} exited with {}: {}",
                output.status,
                truncate_output(String::from_utf8_lossy(&output.stderr))
            ),
        ))
    }

    /// Lines of the instance log.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorErrorKind::NotStarted`] before any start and
    /// [`SupervisorErrorKind::Logs`] when the log cannot be read.
    pub fn logs(&self) -> SupervisorResult<Vec<String>> {
        let Some(path) = self.log_path.as_deref() else {
            return Err(not_started("logs"));
        };
        let contents = std::fs::read_to_string(path).map_err(|err| {
            SupervisorError::new(
                SupervisorErrorKind::Logs,
                eyre!("failed to read mongod log {path}: {err}"),
            )
        })?;
        Ok(contents.lines().map(str::to_owned).collect())
    }

    fn running(&self) -> SupervisorResult<&RunningInstance> {
        self.running
            .as_ref()
            .ok_or_else(|| not_started("this operation"))
    }
}

#[cfg(feature = "async-api")]
impl MongodSupervisor {
    /// Starts `mongod` on a blocking worker thread.
    ///
    /// Dropping the returned future cancels a pending start; the worker then
    /// cleans up as for any failed start.
    ///
    /// # Errors
    ///
    /// See [`MongodSupervisor::start_with_cancellation`].
    pub async fn start_async(mut self) -> SupervisorResult<Self> {
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();
        tokio::task::spawn_blocking(move || {
            self.start_with_cancellation(&cancel)?;
            Ok::<_, SupervisorError>(self)
        })
        .await
        .map_err(|err| SupervisorError::from(eyre!("mongod start task failed: {err}")))?
    }

    /// Stops `mongod` on a blocking worker thread.
    ///
    /// Consumes the supervisor so `Drop` cannot stop it a second time.
    ///
    /// # Errors
    ///
    /// See [`MongodSupervisor::stop`].
    pub async fn stop_async(mut self) -> SupervisorResult<()> {
        tokio::task::spawn_blocking(move || self.stop())
            .await
            .map_err(|err| SupervisorError::from(eyre!("mongod stop task failed: {err}")))?
    }
}

impl Drop for MongodSupervisor {
    fn drop(&mut self) {
        if self.running.is_none() {
            return;
        }
        if let Err(err) = self.stop() {
            warn!(target: SUPERVISOR_TARGET, error = %err, "failed to stop mongod on drop");
        }
    }
}

fn not_started(operation: &str) -> SupervisorError {
    SupervisorError::new(
        SupervisorErrorKind::NotStarted,
        eyre!("{operation} requires a started mongod"),
    )
}

fn with_log_tail(err: SupervisorError, log_path: &Utf8Path, tail: Option<String>) -> SupervisorError {
    let kind = err.kind();
    let report = err.into_report();
    match tail {
        Some(lines) => SupervisorError::new(
            kind,
            report.wrap_err(format!("mongod did not start; last lines of {log_path}:\n{lines}")),
        ),
        None => SupervisorError::new(kind, report),
    }
}
