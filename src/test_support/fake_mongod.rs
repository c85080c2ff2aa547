//! Shell-script stand-ins for a `mongod` installation.
//!
//! The scripts honour the flags the supervisor passes: they write their PID
//! to `<dbpath>/mongod.lock`, append to `--logpath`, and exit on `SIGTERM`
//! (unless built to ignore it). A companion `mongodump` prints a
//! recognisable archive body. An optional fake shell client records its
//! arguments in `bin/shell-args` before running its body.

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{Result, eyre};
use tempfile::TempDir;

use crate::fs::{ensure_dir_exists, write_file};

const ARGUMENT_PARSING: &str = r#"dbpath=""
logpath=""
while [ $# -gt 0 ]; do
  case "$1" in
    --dbpath) dbpath="$2"; shift 2 ;;
    --logpath) logpath="$2"; shift 2 ;;
    *) shift ;;
  esac
done
"#;

/// Body of a well-behaved fake `mongod`.
pub const HEALTHY_MONGOD: &str = r#"echo "$$" > "$dbpath/mongod.lock"
echo "fake mongod waiting for connections (pid $$)" >> "$logpath"
trap 'echo "fake mongod shutting down" >> "$logpath"; : > "$dbpath/mongod.lock"; exit 0' TERM
while true; do sleep 1 & wait $!; done
"#;

/// Body of a fake `mongod` that dies during startup.
pub const CRASHING_MONGOD: &str = r#"echo "fake mongod: fatal assertion, exiting" >> "$logpath"
exit 14
"#;

/// Body of a fake `mongod` that ignores `SIGTERM`.
pub const STUBBORN_MONGOD: &str = r#"echo "$$" > "$dbpath/mongod.lock"
echo "fake mongod ignoring SIGTERM (pid $$)" >> "$logpath"
trap '' TERM
while true; do sleep 1; done
"#;

const FAKE_MONGODUMP: &str = r#"#!/bin/sh
db=""
collection=""
while [ $# -gt 0 ]; do
  case "$1" in
    --db) db="$2"; shift 2 ;;
    --collection) collection="$2"; shift 2 ;;
    *) shift ;;
  esac
done
if [ "$collection" = "missing" ]; then
  echo "Failed: collection $db.$collection does not exist" >&2
  exit 1
fi
printf 'fake-archive:%s.%s' "$db" "$collection"
"#;

/// Shell client body that reports a positive uptime.
pub const UPTIME_SHELL: &str = "echo 42.5\n";

/// Shell client body that never answers.
pub const HANGING_SHELL: &str = "exec sleep 30\n";

const SHELL_ARGS_FILE: &str = "shell-args";

/// A temporary `bin/` directory holding fake `mongod` and `mongodump`.
#[derive(Debug)]
pub struct FakeMongodInstall {
    _root: TempDir,
    bin_dir: Utf8PathBuf,
}

impl FakeMongodInstall {
    /// Installation whose `mongod` runs until terminated.
    ///
    /// # Errors
    ///
    /// Returns an error when the scripts cannot be written.
    pub fn healthy() -> Result<Self> {
        Self::with_body(HEALTHY_MONGOD)
    }

    /// Installation whose `mongod` exits immediately.
    ///
    /// # Errors
    ///
    /// Returns an error when the scripts cannot be written.
    pub fn crashing() -> Result<Self> {
        Self::with_body(CRASHING_MONGOD)
    }

    /// Installation whose `mongod` must be killed.
    ///
    /// # Errors
    ///
    /// Returns an error when the scripts cannot be written.
    pub fn stubborn() -> Result<Self> {
        Self::with_body(STUBBORN_MONGOD)
    }

    /// Installation whose `mongod` runs `body` after argument parsing, with
    /// `$dbpath` and `$logpath` set.
    ///
    /// # Errors
    ///
    /// Returns an error when the scripts cannot be written.
    pub fn with_body(body: &str) -> Result<Self> {
        let root = tempfile::Builder::new().prefix("fake-mongod-").tempdir()?;
        let root_path = Utf8Path::from_path(root.path())
            .ok_or_else(|| eyre!("temporary directory is not UTF-8"))?;
        let bin_dir = root_path.join("bin");
        ensure_dir_exists(&bin_dir)?;
        write_script(&bin_dir.join("mongod"), &mongod_script(body))?;
        write_script(&bin_dir.join("mongodump"), FAKE_MONGODUMP)?;
        Ok(Self {
            _root: root,
            bin_dir,
        })
    }

    /// Adds a fake shell client called `name` (`mongo` or `mongosh`).
    ///
    /// The script writes its own name followed by one argument per line to
    /// `bin/shell-args`, then runs `body`.
    ///
    /// # Errors
    ///
    /// Returns an error when the script cannot be written.
    pub fn with_shell(self, name: &str, body: &str) -> Result<Self> {
        let script = format!(
            "#!/bin/sh\n{{ basename \"$0\"; printf '%s\\n' \"$@\"; }} > \"$(dirname \"$0\")/{SHELL_ARGS_FILE}\"\n{body}"
        );
        write_script(&self.bin_dir.join(name), &script)?;
        Ok(self)
    }

    /// Lines recorded by the last shell client invocation: the client's
    /// name, then its arguments.
    ///
    /// # Errors
    ///
    /// Returns an error when no shell client has run yet.
    pub fn shell_invocation(&self) -> Result<Vec<String>> {
        let recorded = std::fs::read_to_string(self.bin_dir.join(SHELL_ARGS_FILE))?;
        Ok(recorded.lines().map(str::to_owned).collect())
    }

    /// Directory to hand to the supervisor.
    #[must_use]
    pub fn bin_dir(&self) -> &Utf8Path {
        &self.bin_dir
    }
}

/// Full text of a fake `mongod` script with the given body.
#[must_use]
pub fn mongod_script(body: &str) -> String {
    format!("#!/bin/sh\n{ARGUMENT_PARSING}{body}")
}

#[cfg(unix)]
fn write_script(path: &Utf8Path, contents: &str) -> Result<()> {
    write_file(path, contents.as_bytes())?;
    crate::fs::set_permissions(path, 0o755)
}

#[cfg(not(unix))]
fn write_script(path: &Utf8Path, contents: &str) -> Result<()> {
    write_file(path, contents.as_bytes())
}
