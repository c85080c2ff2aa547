//! Process-wide bookkeeping of spawned `mongod` children.
//!
//! The registry holds only [`Weak`] references to the child handles owned by
//! each supervisor. It never keeps a supervisor's process alive; it exists so
//! that [`ProcessRegistry::dispose`], run at session end, on normal process
//! exit, or after `SIGTERM`, can terminate anything still running.
//!
//! The global registry registers its `atexit` disposal hook the first time
//! it records a child. The `SIGTERM` listener stays opt-in through
//! [`install_exit_hooks`], which must run on the main thread.

mod exit_hook;

pub use exit_hook::{atexit_hook_registered, install_exit_hooks};

use std::process::Child;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::cleanup_helpers::try_remove_dir_all;
use crate::observability::REGISTRY_TARGET;
use crate::supervisor::process::{Termination, terminate_child};

/// Child handle shared between a supervisor and the registry.
pub type SharedChild = Arc<Mutex<Child>>;

/// Grace period between `SIGTERM` and `SIGKILL` during disposal.
const DISPOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Entry {
    child: Weak<Mutex<Child>>,
    cleanup_dir: Option<Utf8PathBuf>,
}

/// Registry of live children, safe to share across threads.
///
/// Cloning yields another handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    entries: Arc<DashMap<u32, Entry>>,
    dispose_at_exit: bool,
}

impl ProcessRegistry {
    /// Creates an empty registry for injected use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the registry shared by the whole process.
    ///
    /// Supervisors register here unless given another registry. Its first
    /// registration installs the `atexit` hook that disposes it; the
    /// `SIGTERM` listener from [`install_exit_hooks`] disposes it too.
    #[must_use]
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<ProcessRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| Self {
            dispose_at_exit: true,
            ..Self::new()
        })
    }

    /// Records a child. `cleanup_dir` is removed after the child is
    /// terminated by [`ProcessRegistry::dispose`].
    pub fn register(&self, child: &SharedChild, cleanup_dir: Option<&Utf8Path>) -> u32 {
        if self.dispose_at_exit {
            exit_hook::ensure_atexit_hook();
        }
        let pid = child.lock().unwrap_or_else(PoisonError::into_inner).id();
        self.entries.insert(
            pid,
            Entry {
                child: Arc::downgrade(child),
                cleanup_dir: cleanup_dir.map(Utf8Path::to_path_buf),
            },
        );
        debug!(target: REGISTRY_TARGET, pid, "registered mongod child");
        pid
    }

    /// Forgets a child, typically after its supervisor stopped it.
    pub fn unregister(&self, pid: u32) {
        if self.entries.remove(&pid).is_some() {
            debug!(target: REGISTRY_TARGET, pid, "unregistered mongod child");
        }
    }

    /// Number of recorded children, alive or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Reports whether no children are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reports whether `pid` is recorded.
    #[must_use]
    pub fn contains(&self, pid: u32) -> bool {
        self.entries.contains_key(&pid)
    }

    /// PIDs of recorded children that are still running, in ascending order.
    #[must_use]
    pub fn live_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self
            .entries
            .iter()
            .filter(|entry| entry.value().child.upgrade().is_some_and(|child| is_alive(&child)))
            .map(|entry| *entry.key())
            .collect();
        pids.sort_unstable();
        pids
    }

    /// Terminates every recorded child that is still running and clears the
    /// registry. Returns how many children had to be terminated.
    ///
    /// Safe to call repeatedly and with no entries.
    pub fn dispose(&self) -> usize {
        let pids: Vec<u32> = self.entries.iter().map(|entry| *entry.key()).collect();
        let mut terminated = 0;
        for pid in pids {
            let Some((_, entry)) = self.entries.remove(&pid) else {
                continue;
            };
            if dispose_entry(pid, entry) {
                terminated += 1;
            }
        }
        if terminated > 0 {
            warn!(target: REGISTRY_TARGET, terminated, "terminated orphaned mongod children");
        }
        terminated
    }
}

fn is_alive(child: &Mutex<Child>) -> bool {
    matches!(
        child.lock().unwrap_or_else(PoisonError::into_inner).try_wait(),
        Ok(None)
    )
}

/// Returns `true` when the child was still running and had to be stopped.
fn dispose_entry(pid: u32, entry: Entry) -> bool {
    let Some(child) = entry.child.upgrade() else {
        return false;
    };
    let outcome = terminate_child(
        &mut child.lock().unwrap_or_else(PoisonError::into_inner),
        DISPOSE_GRACE,
    );
    let stopped = match outcome {
        Ok(Termination::AlreadyExited(_)) => false,
        Ok(termination) => {
            debug!(
                target: REGISTRY_TARGET,
                pid,
                status = %termination.status(),
                "terminated mongod child during disposal"
            );
            true
        }
        Err(err) => {
            warn!(target: REGISTRY_TARGET, pid, error = %err, "failed to terminate mongod child");
            return false;
        }
    };
    if let Some(dir) = entry.cleanup_dir {
        if let Err(err) = try_remove_dir_all(dir.as_std_path()) {
            warn!(target: REGISTRY_TARGET, pid, dir = %dir, error = %err, "failed to remove data directory");
        }
    }
    stopped
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    fn sleeper() -> SharedChild {
        Arc::new(Mutex::new(
            Command::new("sleep").arg("30").spawn().expect("spawn sleep"),
        ))
    }

    #[test]
    fn dispose_tolerates_an_empty_registry() {
        let registry = ProcessRegistry::new();
        assert_eq!(registry.dispose(), 0);
        assert_eq!(registry.dispose(), 0);
    }

    #[test]
    fn dispose_terminates_live_children() {
        let registry = ProcessRegistry::new();
        let children = [sleeper(), sleeper()];
        for child in &children {
            registry.register(child, None);
        }
        assert_eq!(registry.live_pids().len(), 2);

        assert_eq!(registry.dispose(), 2);
        assert!(registry.is_empty());
        for child in &children {
            assert!(!is_alive(child));
        }
        assert_eq!(registry.dispose(), 0);
    }

    #[test]
    fn registry_does_not_keep_children_alive() {
        let registry = ProcessRegistry::new();
        let child = sleeper();
        let pid = registry.register(&child, None);
        let mut owned = Arc::try_unwrap(child)
            .expect("registry holds no strong reference")
            .into_inner()
            .expect("mutex not poisoned");
        owned.kill().expect("kill");
        owned.wait().expect("wait");
        drop(owned);

        assert!(registry.contains(pid));
        assert!(registry.live_pids().is_empty());
        assert_eq!(registry.dispose(), 0);
    }

    #[test]
    fn dispose_removes_cleanup_directories() {
        let registry = ProcessRegistry::new();
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = Utf8PathBuf::from_path_buf(temp.path().join("db")).expect("utf8 path");
        std::fs::create_dir_all(&dir).expect("create dir");
        let child = sleeper();
        registry.register(&child, Some(&dir));

        registry.dispose();
        assert!(!dir.exists());
    }

    #[test]
    fn unregister_forgets_children() {
        let registry = ProcessRegistry::new();
        let child = sleeper();
        let pid = registry.register(&child, None);
        registry.unregister(pid);
        assert!(registry.is_empty());
        assert_eq!(registry.dispose(), 0);
        let mut owned = child.lock().expect("lock");
        owned.kill().expect("kill");
        owned.wait().expect("wait");
    }
}
