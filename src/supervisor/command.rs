//! Command lines for `mongod` and its companion tools.

use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};

/// File name of the instance log inside the data directory.
pub const LOG_FILE: &str = "mongod.log";

/// Path of executable `name` inside `binary_dir`, with the platform suffix.
pub(crate) fn tool_path(binary_dir: &Utf8Path, name: &str) -> Utf8PathBuf {
    binary_dir.join(format!("{name}{}", std::env::consts::EXE_SUFFIX))
}

/// Everything needed to launch one `mongod`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LaunchSpec<'a> {
    pub(crate) binary_dir: &'a Utf8Path,
    pub(crate) data_dir: &'a Utf8Path,
    pub(crate) host: &'a str,
    pub(crate) port: u16,
    pub(crate) storage_engine: Option<&'a str>,
}

impl LaunchSpec<'_> {
    pub(crate) fn log_path(&self) -> Utf8PathBuf {
        self.data_dir.join(LOG_FILE)
    }

    /// `mongod --dbpath <dir> --port <port> --bind_ip <host> --logpath <log>
    /// [--storageEngine <engine>]` with standard streams discarded.
    pub(crate) fn command(&self) -> Command {
        let mut command = Command::new(tool_path(self.binary_dir, "mongod"));
        command
            .arg("--dbpath")
            .arg(self.data_dir)
            .arg("--port")
            .arg(self.port.to_string())
            .arg("--bind_ip")
            .arg(self.host)
            .arg("--logpath")
            .arg(self.log_path());
        if let Some(engine) = self.storage_engine {
            command.arg("--storageEngine").arg(engine);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }
}

/// `mongodump` invocation that streams one collection as an archive to stdout.
pub(crate) fn dump_command(
    binary_dir: &Utf8Path,
    host: &str,
    port: u16,
    database: &str,
    collection: &str,
) -> Command {
    let mut command = Command::new(tool_path(binary_dir, "mongodump"));
    command
        .arg("--host")
        .arg(host)
        .arg("--port")
        .arg(port.to_string())
        .arg("--db")
        .arg(database)
        .arg("--collection")
        .arg(collection)
        .arg("--archive")
        .stdin(Stdio::null());
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn args(command: &Command) -> Vec<&OsStr> {
        command.get_args().collect()
    }

    #[test]
    fn launch_command_binds_port_directory_and_log() {
        let spec = LaunchSpec {
            binary_dir: Utf8Path::new("/opt/mongo/bin"),
            data_dir: Utf8Path::new("/tmp/db"),
            host: "127.0.0.1",
            port: 27018,
            storage_engine: None,
        };
        let command = spec.command();
        assert_eq!(
            command.get_program(),
            tool_path(Utf8Path::new("/opt/mongo/bin"), "mongod").as_os_str()
        );
        assert_eq!(
            args(&command),
            [
                "--dbpath",
                "/tmp/db",
                "--port",
                "27018",
                "--bind_ip",
                "127.0.0.1",
                "--logpath",
                "/tmp/db/mongod.log",
            ]
            .map(OsStr::new)
        );
    }

    #[test]
    fn launch_command_passes_storage_engine_through() {
        let spec = LaunchSpec {
            binary_dir: Utf8Path::new("/opt/mongo/bin"),
            data_dir: Utf8Path::new("/tmp/db"),
            host: "127.0.0.1",
            port: 27018,
            storage_engine: Some("ephemeralForTest"),
        };
        let command = spec.command();
        let rendered = args(&command);
        assert_eq!(
            rendered.get(rendered.len().saturating_sub(2)..),
            Some(["--storageEngine", "ephemeralForTest"].map(OsStr::new).as_slice())
        );
    }

    #[test]
    fn dump_command_targets_one_collection() {
        let command = dump_command(Utf8Path::new("/bin"), "localhost", 27017, "shop", "orders");
        let rendered = args(&command);
        assert!(rendered.ends_with(&[OsStr::new("--archive")]));
        assert!(rendered.windows(2).any(|pair| pair == [OsStr::new("--db"), OsStr::new("shop")]));
    }
}
