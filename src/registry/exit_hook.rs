//! Process-exit and `SIGTERM` hooks that dispose the global registry.
//!
//! The `extern "C"` callback registered via [`libc::atexit`] is installed
//! automatically on the first registration with [`ProcessRegistry::global`].
//! [`install_exit_hooks`] adds, on Unix, a `signal-hook` listener thread.
//! Both call [`ProcessRegistry::dispose`] on the global registry, so no
//! `mongod` outlives the host process after a normal exit or a termination
//! request.

use std::sync::OnceLock;
use std::thread;

use tracing::{debug, warn};

use super::ProcessRegistry;
use crate::error::{RegistryError, RegistryResult};
use crate::observability::REGISTRY_TARGET;

/// Return code of the `atexit` registration, recorded on first install.
static ATEXIT_RC: OnceLock<i32> = OnceLock::new();

/// Set once the `SIGTERM` listener thread is running.
#[cfg(unix)]
static SIGNAL_LISTENER: OnceLock<()> = OnceLock::new();

/// Exit status used after disposing on `SIGTERM` (128 + 15).
#[cfg(unix)]
const SIGTERM_EXIT_CODE: i32 = 143;

/// Installs the hooks that dispose the global registry.
///
/// The `atexit` callback is registered at most once per process from any
/// thread. The `SIGTERM` listener must be installed from the main thread;
/// repeated calls are no-ops.
///
/// # Errors
///
/// Returns [`RegistryError::AtExit`] when `atexit(3)` refuses the callback,
/// [`RegistryError::NotMainThread`] when called off the main thread, and
/// [`RegistryError::Signal`] when the listener cannot be registered.
pub fn install_exit_hooks() -> RegistryResult<()> {
    register_atexit()?;
    ensure_main_thread()?;
    install_signal_listener()
}

/// Reports whether the `atexit` disposal hook is in place.
#[must_use]
pub fn atexit_hook_registered() -> bool {
    ATEXIT_RC.get() == Some(&0)
}

/// Registers the `atexit` hook, logging rather than failing when refused.
pub(super) fn ensure_atexit_hook() {
    if let Err(err) = register_atexit() {
        warn!(target: REGISTRY_TARGET, error = %err, "mongod children will not be disposed at exit");
    }
}

fn register_atexit() -> RegistryResult<()> {
    let rc = *ATEXIT_RC.get_or_init(|| {
        // SAFETY: `dispose_at_exit` is an `extern "C"` function with no
        // parameters and no return value, matching `atexit(3)`. It only reads
        // the global registry, which lives for the whole process.
        let rc = unsafe { libc::atexit(dispose_at_exit) };
        if rc == 0 {
            debug!(target: REGISTRY_TARGET, "registered atexit disposal hook");
        }
        rc
    });
    if rc == 0 {
        Ok(())
    } else {
        Err(RegistryError::AtExit { rc })
    }
}

fn ensure_main_thread() -> RegistryResult<()> {
    let current = thread::current();
    match current.name() {
        Some("main") => Ok(()),
        name => Err(RegistryError::NotMainThread {
            thread: name.unwrap_or("<unnamed>").to_owned(),
        }),
    }
}

#[cfg(unix)]
fn install_signal_listener() -> RegistryResult<()> {
    use signal_hook::consts::SIGTERM;
    use signal_hook::iterator::Signals;

    if SIGNAL_LISTENER.get().is_some() {
        return Ok(());
    }
    let mut signals = Signals::new([SIGTERM]).map_err(RegistryError::Signal)?;
    thread::Builder::new()
        .name("mongo-ephemeral-sigterm".to_owned())
        .spawn(move || {
            if signals.forever().next().is_some() {
                let terminated = ProcessRegistry::global().dispose();
                debug!(target: REGISTRY_TARGET, terminated, "disposed registry after SIGTERM");
                std::process::exit(SIGTERM_EXIT_CODE);
            }
        })
        .map_err(RegistryError::Signal)?;
    if SIGNAL_LISTENER.set(()).is_err() {
        debug!(target: REGISTRY_TARGET, "SIGTERM listener already installed");
    }
    debug!(target: REGISTRY_TARGET, "installed SIGTERM disposal listener");
    Ok(())
}

#[cfg(not(unix))]
const fn install_signal_listener() -> RegistryResult<()> {
    Ok(())
}

/// Callback invoked by the C runtime during process exit.
extern "C" fn dispose_at_exit() {
    ProcessRegistry::global().dispose();
}
