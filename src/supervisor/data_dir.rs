//! Data directories for supervised instances and lock-artifact detection.

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{WrapErr, eyre};
use tempfile::TempDir;
use tracing::debug;

use super::process::process_is_running;
use crate::error::{SupervisorError, SupervisorErrorKind, SupervisorResult};
use crate::fs::{ensure_dir_exists, read_optional_to_string};
use crate::observability::SUPERVISOR_TARGET;

/// Lock artifact `mongod` writes into its data directory.
pub const LOCK_FILE: &str = "mongod.lock";

const TEMP_PREFIX: &str = "mongo-ephemeral-";

/// Working directory of one supervised instance.
#[derive(Debug)]
pub(crate) enum DataDirectory {
    /// Auto-managed directory removed when the supervisor stops.
    Ephemeral { dir: TempDir, path: Utf8PathBuf },
    /// Caller-supplied directory left untouched on stop.
    Fixed(Utf8PathBuf),
}

impl DataDirectory {
    /// Prepares the working directory for a new instance.
    ///
    /// A caller-supplied directory held by a live `mongod` is a conflict. An
    /// auto-managed directory is always freshly created and so never locked.
    pub(crate) fn acquire(requested: Option<&Utf8Path>) -> SupervisorResult<Self> {
        match requested {
            Some(path) => Self::fixed(path),
            None => Self::ephemeral(),
        }
    }

    fn fixed(path: &Utf8Path) -> SupervisorResult<Self> {
        ensure_dir_exists(path)?;
        if let Some(pid) = live_lock_holder(path)? {
            return Err(SupervisorError::new(
                SupervisorErrorKind::DataDirectoryLocked,
                eyre!("data directory {path} is in use by mongod (pid {pid})"),
            ));
        }
        Ok(Self::Fixed(path.to_path_buf()))
    }

    fn ephemeral() -> SupervisorResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir()
            .wrap_err("failed to create ephemeral data directory")?;
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|raw| eyre!("ephemeral data directory is not UTF-8: {}", raw.display()))?;
        debug!(target: SUPERVISOR_TARGET, path = %path, "created ephemeral data directory");
        Ok(Self::Ephemeral { dir, path })
    }

    pub(crate) fn path(&self) -> &Utf8Path {
        match self {
            Self::Ephemeral { path, .. } => path,
            Self::Fixed(path) => path,
        }
    }

    pub(crate) const fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Ephemeral { .. })
    }

    /// Removes an auto-managed directory; a fixed one is left in place.
    pub(crate) fn reclaim(self) -> SupervisorResult<()> {
        match self {
            Self::Ephemeral { dir, path } => match dir.close() {
                Ok(()) => {
                    debug!(target: SUPERVISOR_TARGET, path = %path, "removed ephemeral data directory");
                    Ok(())
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(target: SUPERVISOR_TARGET, path = %path, "ephemeral data directory already removed");
                    Ok(())
                }
                Err(err) => Err(SupervisorError::new(
                    SupervisorErrorKind::Shutdown,
                    eyre!("failed to remove ephemeral data directory {path}: {err}"),
                )),
            },
            Self::Fixed(_) => Ok(()),
        }
    }
}

/// Returns the PID recorded in `<dir>/mongod.lock` when that process is alive.
///
/// Missing, empty, unparsable, and stale lock files are not conflicts.
pub(crate) fn live_lock_holder(dir: &Utf8Path) -> SupervisorResult<Option<u32>> {
    let Some(contents) = read_optional_to_string(&dir.join(LOCK_FILE))? else {
        return Ok(None);
    };
    let Ok(pid) = contents.trim().parse::<u32>() else {
        return Ok(None);
    };
    Ok(process_is_running(pid).then_some(pid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 path")
    }

    #[test]
    fn ephemeral_directories_are_distinct_and_reclaimed() {
        let first = DataDirectory::acquire(None).expect("first");
        let second = DataDirectory::acquire(None).expect("second");
        assert_ne!(first.path(), second.path());
        assert!(first.is_ephemeral());

        let path = first.path().to_path_buf();
        first.reclaim().expect("reclaim");
        assert!(!path.exists());
        drop(second);
    }

    #[test]
    fn ephemeral_directories_start_without_a_lock() {
        let dir = DataDirectory::acquire(None).expect("ephemeral");
        assert!(dir.path().is_dir());
        assert!(!dir.path().join(LOCK_FILE).exists());
        assert_eq!(live_lock_holder(dir.path()).expect("read lock"), None);
        dir.reclaim().expect("reclaim");
    }

    #[test]
    fn reclaiming_an_already_removed_directory_succeeds() {
        let dir = DataDirectory::acquire(None).expect("ephemeral");
        std::fs::remove_dir_all(dir.path()).expect("remove behind the supervisor's back");
        dir.reclaim().expect("missing directory is not an error");
    }

    #[test]
    fn fixed_directories_survive_reclaim() {
        let temp = tempdir().expect("tempdir");
        let path = utf8(&temp).join("db");
        let dir = DataDirectory::acquire(Some(&path)).expect("fixed");
        assert!(!dir.is_ephemeral());
        dir.reclaim().expect("reclaim");
        assert!(path.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn fixed_directory_held_by_live_process_is_a_conflict() {
        let temp = tempdir().expect("tempdir");
        let path = utf8(&temp);
        std::fs::write(path.join(LOCK_FILE), format!("{}\n", std::process::id()))
            .expect("write lock");

        let err = DataDirectory::acquire(Some(&path)).expect_err("live lock must conflict");
        assert_eq!(err.kind(), SupervisorErrorKind::DataDirectoryLocked);
    }

    #[test]
    fn empty_or_stale_lock_files_are_ignored() {
        let temp = tempdir().expect("tempdir");
        let path = utf8(&temp);
        std::fs::write(path.join(LOCK_FILE), "").expect("write empty lock");
        assert_eq!(live_lock_holder(&path).expect("read lock"), None);

        std::fs::write(path.join(LOCK_FILE), "not-a-pid").expect("write junk lock");
        assert_eq!(live_lock_holder(&path).expect("read lock"), None);
    }

    #[cfg(unix)]
    #[test]
    fn stale_pid_is_not_a_conflict() {
        let temp = tempdir().expect("tempdir");
        let path = utf8(&temp);
        std::fs::write(path.join(LOCK_FILE), format!("{}\n", i32::MAX)).expect("write lock");
        DataDirectory::acquire(Some(&path)).expect("stale lock is not a conflict");
    }
}
