//! Readiness probing and the bounded startup wait.

use std::fmt;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wait_timeout::ChildExt;

use super::command::tool_path;
use crate::config::DEFAULT_STARTUP_TIMEOUT;
use crate::error::{SupervisorError, SupervisorErrorKind, SupervisorResult};
use crate::observability::SUPERVISOR_TARGET;

const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Expression evaluated by the shell client to read the server uptime.
const STATUS_EXPRESSION: &str = "db.serverStatus().uptime";

/// Endpoint and installation a probe runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Host the instance listens on.
    pub host: String,
    /// Port the instance listens on.
    pub port: u16,
    /// Directory containing the instance's executables.
    pub binary_dir: Utf8PathBuf,
}

/// Result of a single readiness check.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeStatus {
    /// The server answered with a positive uptime.
    Healthy {
        /// Reported uptime in seconds.
        uptime_secs: f64,
    },
    /// The server is not ready yet.
    NotReady(String),
}

/// Protocol-level readiness check for a running instance.
pub trait HealthProbe: Send + Sync + fmt::Debug {
    /// Checks the instance once, taking no longer than `budget`.
    ///
    /// `budget` is what remains of the startup timeout.
    fn check(&self, target: &ProbeTarget, budget: Duration) -> ProbeStatus;
}

/// Probe that asks the server for its uptime through the shell client.
///
/// Runs `mongo` from the binary directory, falling back to `mongosh`, with
/// `--quiet --eval "db.serverStatus().uptime"`.
#[derive(Debug, Clone, Copy)]
pub struct ShellStatusProbe {
    timeout: Duration,
}

impl Default for ShellStatusProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl ShellStatusProbe {
    /// Creates a probe that abandons a single check after `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn shell(binary_dir: &Utf8Path) -> Utf8PathBuf {
        ["mongo", "mongosh"]
            .into_iter()
            .map(|name| tool_path(binary_dir, name))
            .find(|candidate| candidate.is_file())
            .unwrap_or_else(|| Utf8PathBuf::from("mongosh"))
    }

    fn run(&self, target: &ProbeTarget, budget: Duration) -> Result<String, String> {
        let timeout = self.timeout.min(budget);
        let mut child = Command::new(Self::shell(&target.binary_dir))
            .args(["--quiet", "--host", target.host.as_str(), "--port"])
            .arg(target.port.to_string())
            .args(["--eval", STATUS_EXPRESSION])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| format!("failed to spawn shell client: {err}"))?;

        let Some(status) = child
            .wait_timeout(timeout)
            .map_err(|err| format!("failed waiting for shell client: {err}"))?
        else {
            kill_quietly(&mut child);
            return Err(format!("shell client timed out after {timeout:?}"));
        };

        let mut stdout = String::new();
        if let Some(mut pipe) = child.stdout.take() {
            pipe.read_to_string(&mut stdout)
                .map_err(|err| format!("failed to read shell output: {err}"))?;
        }
        if status.success() {
            Ok(stdout)
        } else {
            Err(format!("shell client exited with {status}"))
        }
    }
}

impl HealthProbe for ShellStatusProbe {
    fn check(&self, target: &ProbeTarget, budget: Duration) -> ProbeStatus {
        match self.run(target, budget) {
            Ok(stdout) => parse_uptime(&stdout),
            Err(reason) => ProbeStatus::NotReady(reason),
        }
    }
}

fn kill_quietly(child: &mut Child) {
    if child.kill().is_ok() {
        drop(child.wait());
    }
}

/// Interprets the last non-empty output line as the server uptime.
pub(crate) fn parse_uptime(stdout: &str) -> ProbeStatus {
    let Some(line) = stdout.lines().map(str::trim).rfind(|line| !line.is_empty()) else {
        return ProbeStatus::NotReady("shell client printed nothing".to_owned());
    };
    match line.parse::<f64>() {
        Ok(uptime_secs) if uptime_secs > 0.0 => ProbeStatus::Healthy { uptime_secs },
        Ok(uptime_secs) => ProbeStatus::NotReady(format!("uptime is {uptime_secs}")),
        Err(_) => ProbeStatus::NotReady(format!("unexpected shell output '{line}'")),
    }
}

/// Bounds the wait for a freshly spawned instance to become healthy.
///
/// Probes are retried with exponential backoff until one succeeds, the child
/// exits, the timeout elapses, or the caller cancels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupPolicy {
    /// Wall-clock bound on the whole wait.
    pub timeout: Duration,
    /// Delay after the first failed probe.
    pub initial_backoff: Duration,
    /// Upper bound for the delay between probes.
    pub max_backoff: Duration,
}

impl Default for StartupPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_STARTUP_TIMEOUT,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl StartupPolicy {
    /// Creates a policy with the default backoff and the given bound.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Blocks until `probe` reports the instance healthy.
    ///
    /// Returns the uptime reported by the successful probe.
    pub(crate) fn wait_until_healthy(
        &self,
        probe: &dyn HealthProbe,
        target: &ProbeTarget,
        child: &Mutex<Child>,
        cancel: &CancellationToken,
    ) -> SupervisorResult<f64> {
        let started = Instant::now();
        let mut backoff = self.initial_backoff;
        let mut attempts: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(SupervisorError::new(
                    SupervisorErrorKind::StartupCancelled,
                    eyre!("mongod startup on port {} was cancelled", target.port),
                ));
            }
            if let Some(status) = exit_status(child)? {
                return Err(SupervisorError::new(
                    SupervisorErrorKind::StartupFailed,
                    eyre!("mongod exited during startup with {status}"),
                ));
            }

            let Some(budget) = self.remaining(started) else {
                return Err(self.timed_out(attempts));
            };
            attempts = attempts.saturating_add(1);
            match probe.check(target, budget) {
                ProbeStatus::Healthy { uptime_secs } => {
                    debug!(
                        target: SUPERVISOR_TARGET,
                        port = target.port,
                        attempts,
                        uptime_secs,
                        "mongod reported healthy"
                    );
                    return Ok(uptime_secs);
                }
                ProbeStatus::NotReady(reason) => {
                    debug!(
                        target: SUPERVISOR_TARGET,
                        port = target.port,
                        attempts,
                        reason = %reason,
                        "mongod not ready yet"
                    );
                }
            }

            let Some(remaining) = self.remaining(started) else {
                return Err(self.timed_out(attempts));
            };
            thread::sleep(backoff.min(remaining));
            backoff = backoff.saturating_mul(2).min(self.max_backoff);
        }
    }

    fn remaining(&self, started: Instant) -> Option<Duration> {
        self.timeout
            .checked_sub(started.elapsed())
            .filter(|left| !left.is_zero())
    }

    fn timed_out(&self, attempts: u32) -> SupervisorError {
        SupervisorError::new(
            SupervisorErrorKind::StartupFailed,
            eyre!(
                "mongod did not become healthy within {:?} ({attempts} probes)",
                self.timeout
            ),
        )
    }
}

fn exit_status(child: &Mutex<Child>) -> SupervisorResult<Option<std::process::ExitStatus>> {
    child
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .try_wait()
        .map_err(|err| SupervisorError::from(eyre!("failed to poll mongod: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedProbe;
    use rstest::rstest;

    #[rstest]
    #[case::integer("12\n", true)]
    #[case::float("0.5\n", true)]
    #[case::trailing_blank("noise\n3\n\n", true)]
    #[case::zero("0\n", false)]
    #[case::garbage("connection refused\n", false)]
    #[case::empty("", false)]
    fn parses_uptime_output(#[case] stdout: &str, #[case] healthy: bool) {
        let status = parse_uptime(stdout);
        assert_eq!(matches!(status, ProbeStatus::Healthy { .. }), healthy, "{status:?}");
    }

    fn sleeper() -> Mutex<Child> {
        Mutex::new(
            Command::new("sleep")
                .arg("30")
                .spawn()
                .expect("spawn sleep"),
        )
    }

    fn target() -> ProbeTarget {
        ProbeTarget {
            host: "127.0.0.1".to_owned(),
            port: 27017,
            binary_dir: Utf8PathBuf::from("/nonexistent"),
        }
    }

    fn reap(child: Mutex<Child>) {
        let mut inner = child.into_inner().unwrap_or_else(PoisonError::into_inner);
        drop(inner.kill());
        drop(inner.wait());
    }

    #[cfg(unix)]
    #[test]
    fn waits_through_failed_probes() {
        let child = sleeper();
        let probe = ScriptedProbe::healthy_after(3);
        let policy = StartupPolicy::with_timeout(Duration::from_secs(5));
        let uptime = policy
            .wait_until_healthy(&probe, &target(), &child, &CancellationToken::new())
            .expect("healthy");
        assert!(uptime > 0.0);
        assert_eq!(probe.calls(), 3);
        reap(child);
    }

    #[cfg(unix)]
    #[test]
    fn never_healthy_instances_time_out() {
        let child = sleeper();
        let probe = ScriptedProbe::never_healthy();
        let policy = StartupPolicy::with_timeout(Duration::from_millis(300));
        let err = policy
            .wait_until_healthy(&probe, &target(), &child, &CancellationToken::new())
            .expect_err("must time out");
        assert_eq!(err.kind(), SupervisorErrorKind::StartupFailed);
        reap(child);
    }

    #[cfg(unix)]
    #[test]
    fn probes_never_outlive_the_startup_timeout() {
        let child = sleeper();
        let probe = ScriptedProbe::never_healthy();
        let timeout = Duration::from_millis(300);
        let err = StartupPolicy::with_timeout(timeout)
            .wait_until_healthy(&probe, &target(), &child, &CancellationToken::new())
            .expect_err("must time out");
        assert_eq!(err.kind(), SupervisorErrorKind::StartupFailed);
        let largest = probe.largest_budget().expect("at least one probe ran");
        assert!(largest <= timeout, "probe was granted {largest:?}");
        reap(child);
    }

    #[cfg(unix)]
    #[test]
    fn cancelled_waits_stop_early() {
        let child = sleeper();
        let token = CancellationToken::new();
        token.cancel();
        let err = StartupPolicy::default()
            .wait_until_healthy(&ScriptedProbe::never_healthy(), &target(), &child, &token)
            .expect_err("must be cancelled");
        assert_eq!(err.kind(), SupervisorErrorKind::StartupCancelled);
        reap(child);
    }

    #[cfg(unix)]
    #[test]
    fn exited_children_fail_fast() {
        let mut spawned = Command::new("true").spawn().expect("spawn true");
        spawned.wait().expect("wait");
        let child = Mutex::new(spawned);
        let err = StartupPolicy::default()
            .wait_until_healthy(
                &ScriptedProbe::never_healthy(),
                &target(),
                &child,
                &CancellationToken::new(),
            )
            .expect_err("exited child must fail");
        assert_eq!(err.kind(), SupervisorErrorKind::StartupFailed);
    }
}
