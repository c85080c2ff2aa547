//! Shared filesystem helpers that operate within the capability sandbox.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs::Dir};
use color_eyre::eyre::{Context, Result};
use std::io::ErrorKind;

/// Resolves a path to an ambient directory handle paired with the relative path component.
///
/// Absolute paths are opened relative to the ambient root; relative paths reuse the current
/// working directory.
fn ambient_dir_and_path(path: &Utf8Path) -> Result<(Dir, Utf8PathBuf)> {
    if path.has_root() {
        let stripped = path
            .strip_prefix("/")
            .map_or_else(|_| path.to_path_buf(), Utf8Path::to_path_buf);
        let dir = Dir::open_ambient_dir("/", ambient_authority())
            .context("open ambient root directory")?;
        Ok((dir, stripped))
    } else {
        let dir = Dir::open_ambient_dir(".", ambient_authority())
            .context("open ambient working directory")?;
        Ok((dir, path.to_path_buf()))
    }
}

/// Ensures the provided path exists, creating intermediate directories when required.
pub(crate) fn ensure_dir_exists(path: &Utf8Path) -> Result<()> {
    let (dir, relative) = ambient_dir_and_path(path)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }

    dir.create_dir_all(relative.as_std_path())
        .or_else(|err| {
            if err.kind() == ErrorKind::AlreadyExists {
                Ok(())
            } else {
                Err(err)
            }
        })
        .with_context(|| format!("create {}", path.as_str()))
}

/// Applies the provided POSIX mode to the given path.
#[cfg(unix)]
pub(crate) fn set_permissions(path: &Utf8Path, mode: u32) -> Result<()> {
    use cap_std::fs::{Permissions, PermissionsExt};

    let (dir, relative) = ambient_dir_and_path(path)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }

    dir.set_permissions(relative.as_std_path(), Permissions::from_mode(mode))
        .with_context(|| format!("chmod {}", path.as_str()))
}

/// Writes `contents` to `path`, replacing any existing file.
pub(crate) fn write_file(path: &Utf8Path, contents: &[u8]) -> Result<()> {
    let (dir, relative) = ambient_dir_and_path(path)?;
    dir.write(relative.as_std_path(), contents)
        .with_context(|| format!("write {}", path.as_str()))
}

/// Reads a small text file, returning `None` when it does not exist.
pub(crate) fn read_optional_to_string(path: &Utf8Path) -> Result<Option<String>> {
    let (dir, relative) = ambient_dir_and_path(path)?;
    match dir.read_to_string(relative.as_std_path()) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", path.as_str())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ensure_dir_exists_creates_nested_directories() {
        let temp = tempdir().expect("tempdir");
        let root = Utf8Path::from_path(temp.path()).expect("utf8 path");
        let nested = root.join("a/b/c");
        ensure_dir_exists(&nested).expect("create nested");
        ensure_dir_exists(&nested).expect("idempotent");
        assert!(nested.is_dir());
    }

    #[test]
    fn read_optional_to_string_tolerates_missing_files() {
        let temp = tempdir().expect("tempdir");
        let root = Utf8Path::from_path(temp.path()).expect("utf8 path");
        assert_eq!(
            read_optional_to_string(&root.join("absent")).expect("read"),
            None
        );
        write_file(&root.join("present"), b"1234\n").expect("write");
        assert_eq!(
            read_optional_to_string(&root.join("present")).expect("read"),
            Some("1234\n".to_owned())
        );
    }

    #[cfg(unix)]
    #[test]
    fn set_permissions_applies_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().expect("tempdir");
        let root = Utf8Path::from_path(temp.path()).expect("utf8 path");
        let file = root.join("tool");
        std::fs::write(&file, b"").expect("write");
        set_permissions(&file, 0o700).expect("chmod");
        let mode = std::fs::metadata(&file).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
