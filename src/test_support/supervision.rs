//! Shortcuts for driving supervisors against fake installations.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::registry::ProcessRegistry;
use crate::supervisor::{MongodSupervisor, StartupPolicy, SupervisorSettings};

use super::fake_mongod::FakeMongodInstall;
use super::probe::ScriptedProbe;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const POLL_LIMIT: Duration = Duration::from_secs(5);

/// Settings for `install` with five-second startup and shutdown bounds.
#[must_use]
pub fn fast_settings(install: &FakeMongodInstall) -> SupervisorSettings {
    let mut settings = SupervisorSettings::new(install.bin_dir());
    settings.startup = StartupPolicy::with_timeout(Duration::from_secs(5));
    settings.shutdown_timeout = Duration::from_secs(5);
    settings
}

/// Supervisor whose first probe succeeds, registered with `registry`.
#[must_use]
pub fn scripted_supervisor(
    settings: SupervisorSettings,
    registry: &ProcessRegistry,
) -> MongodSupervisor {
    MongodSupervisor::new(settings)
        .with_probe(Arc::new(ScriptedProbe::always_healthy()))
        .with_registry(registry.clone())
}

/// Reports whether `pid` names a live process.
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    crate::supervisor::process::process_is_running(pid)
}

/// Polls `condition` until it holds or five seconds pass.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + POLL_LIMIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(POLL_INTERVAL);
    }
    condition()
}

/// Waits until the instance log contains `needle`.
#[must_use]
pub fn wait_for_log(supervisor: &MongodSupervisor, needle: &str) -> bool {
    eventually(|| {
        supervisor
            .logs()
            .is_ok_and(|lines| lines.iter().any(|line| line.contains(needle)))
    })
}
