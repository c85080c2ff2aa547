//! Signal and liveness helpers for supervised children.

use std::io;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

/// Polling interval when waiting for a child to exit.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a child was brought down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Termination {
    /// The child had already exited before any signal was sent.
    AlreadyExited(ExitStatus),
    /// The child exited after the graceful signal.
    Graceful(ExitStatus),
    /// The child ignored the graceful signal and was killed.
    Killed(ExitStatus),
}

impl Termination {
    pub(crate) const fn status(self) -> ExitStatus {
        match self {
            Self::AlreadyExited(status) | Self::Graceful(status) | Self::Killed(status) => status,
        }
    }
}

/// Stops `child` gracefully, escalating to a forced kill after `grace`.
///
/// Sends `SIGTERM` on Unix and polls for exit every [`POLL_INTERVAL`]. On
/// other platforms the child is killed immediately.
pub(crate) fn terminate_child(child: &mut Child, grace: Duration) -> io::Result<Termination> {
    if let Some(status) = child.try_wait()? {
        return Ok(Termination::AlreadyExited(status));
    }

    if send_terminate(child) {
        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Termination::Graceful(status));
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    match child.kill() {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::InvalidInput => {}
        Err(err) => return Err(err),
    }
    child.wait().map(Termination::Killed)
}

/// Sends the graceful termination signal. Returns `false` when no graceful
/// signal exists on this platform or delivery failed.
#[cfg(unix)]
fn send_terminate(child: &Child) -> bool {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return false;
    };
    // SAFETY: `pid` identifies a child we spawned and have not yet reaped, so
    // it cannot have been recycled for another process.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
const fn send_terminate(_child: &Child) -> bool {
    false
}

/// Returns `true` if a process with the given PID is currently running.
#[cfg(unix)]
pub(crate) fn process_is_running(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // SAFETY: signal 0 probes for existence without delivering a signal.
    let rc = unsafe { libc::kill(raw, 0) };
    if rc == 0 {
        return true;
    }
    !matches!(
        io::Error::last_os_error().raw_os_error(),
        Some(code) if code == libc::ESRCH
    )
}

/// Liveness cannot be probed without a handle on this platform; assume the
/// holder is alive so locks are never stolen.
#[cfg(not(unix))]
pub(crate) const fn process_is_running(_pid: u32) -> bool {
    true
}
