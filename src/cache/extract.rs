//! Unpacks cached release archives.
//!
//! The archive format is detected from its leading bytes rather than its file
//! name, since download URLs are not guaranteed to carry a usable extension.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use camino::Utf8Path;
use color_eyre::eyre::{Report, WrapErr, eyre};
use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

use crate::error::{AcquisitionError, AcquisitionErrorKind, AcquisitionResult};
use crate::fs::ensure_dir_exists;
use crate::observability::CACHE_TARGET;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const EMPTY_ZIP_MAGIC: &[u8] = b"PK\x05\x06";
const USTAR_MAGIC: &[u8] = b"ustar";
const USTAR_OFFSET: usize = 257;
const HEADER_LEN: u64 = 512;

/// Mode applied to executables found under a `bin` directory.
#[cfg(unix)]
const EXECUTABLE_MODE: u32 = 0o755;

/// Archive container formats understood by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// A gzip-compressed tarball.
    GzipTar,
    /// An uncompressed POSIX tarball.
    Tar,
    /// A zip archive.
    Zip,
}

impl ArchiveKind {
    /// Identifies the archive format from its first bytes.
    #[must_use]
    pub fn detect(header: &[u8]) -> Option<Self> {
        if header.starts_with(GZIP_MAGIC) {
            Some(Self::GzipTar)
        } else if header.starts_with(ZIP_MAGIC) || header.starts_with(EMPTY_ZIP_MAGIC) {
            Some(Self::Zip)
        } else if header.get(USTAR_OFFSET..USTAR_OFFSET + USTAR_MAGIC.len()) == Some(USTAR_MAGIC) {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// Reads the header of `archive` and identifies its format.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionErrorKind::InvalidDownloadedFile`] when the file
    /// is neither a tar nor a zip archive, and
    /// [`AcquisitionErrorKind::Other`] when it cannot be read.
    pub fn sniff(archive: &Utf8Path) -> AcquisitionResult<Self> {
        let mut header = Vec::new();
        File::open(archive)
            .and_then(|file| file.take(HEADER_LEN).read_to_end(&mut header))
            .wrap_err_with(|| format!("failed to read archive header from {archive}"))?;
        Self::detect(&header).ok_or_else(|| {
            AcquisitionError::new(
                AcquisitionErrorKind::InvalidDownloadedFile,
                eyre!("{archive} is neither a tar nor a zip archive"),
            )
        })
    }
}

/// Unpacks tar, gzipped tar, and zip archives into a directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveExtractor;

impl ArchiveExtractor {
    /// Unpacks `archive` into `destination`, overwriting existing entries.
    ///
    /// Files beneath any `bin` directory are made executable afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionErrorKind::InvalidDownloadedFile`] when the
    /// archive format is unknown or its contents are corrupt.
    pub fn extract(&self, archive: &Utf8Path, destination: &Utf8Path) -> AcquisitionResult<()> {
        let kind = ArchiveKind::sniff(archive)?;
        ensure_dir_exists(destination)?;
        info!(
            target: CACHE_TARGET,
            archive = %archive,
            destination = %destination,
            kind = ?kind,
            "extracting mongod archive"
        );

        let file = File::open(archive).wrap_err_with(|| format!("failed to open {archive}"))?;
        let outcome = match kind {
            ArchiveKind::GzipTar => {
                unpack_tar(GzDecoder::new(BufReader::new(file)), destination.as_std_path())
            }
            ArchiveKind::Tar => unpack_tar(BufReader::new(file), destination.as_std_path()),
            ArchiveKind::Zip => unpack_zip(file, destination.as_std_path()),
        };
        outcome.map_err(|report| {
            AcquisitionError::new(
                AcquisitionErrorKind::InvalidDownloadedFile,
                report.wrap_err(format!("failed to extract {archive}")),
            )
        })?;

        mark_executables(destination.as_std_path())?;
        debug!(target: CACHE_TARGET, destination = %destination, "extraction complete");
        Ok(())
    }
}

fn unpack_tar<R: Read>(reader: R, destination: &Path) -> Result<(), Report> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive.unpack(destination).map_err(Report::from)
}

fn unpack_zip(file: File, destination: &Path) -> Result<(), Report> {
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(
                target: CACHE_TARGET,
                entry = entry.name(),
                "skipping zip entry that escapes the extraction directory"
            );
            continue;
        };
        let target = destination.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut output = File::create(&target)?;
        io::copy(&mut entry, &mut output)?;
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn mark_executables(root: &Path) -> AcquisitionResult<()> {
    use crate::fs::set_permissions;

    for bin_dir in find_dirs_named(root, "bin")? {
        let entries = std::fs::read_dir(&bin_dir)
            .wrap_err_with(|| format!("failed to list {}", bin_dir.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(utf8) = Utf8Path::from_path(&path) {
                set_permissions(utf8, EXECUTABLE_MODE)?;
            }
        }
    }
    Ok(())
}

#[cfg(not(unix))]
const fn mark_executables(_root: &Path) -> AcquisitionResult<()> {
    Ok(())
}

#[cfg(unix)]
fn find_dirs_named(root: &Path, name: &str) -> AcquisitionResult<Vec<std::path::PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries =
            std::fs::read_dir(&dir).wrap_err_with(|| format!("failed to list {}", dir.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !entry.file_type().is_ok_and(|kind| kind.is_dir()) {
                continue;
            }
            if entry.file_name() == name {
                found.push(path.clone());
            }
            pending.push(path);
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use rstest::rstest;
    use tempfile::tempdir;

    fn utf8(path: &Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path.to_path_buf()).expect("utf8 path")
    }

    fn tar_bytes(name: &str, body: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_ustar();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, body)
            .expect("append tar entry");
        builder.into_inner().expect("finish tar")
    }

    #[rstest]
    #[case::gzip(&[0x1f, 0x8b, 0x08, 0x00], Some(ArchiveKind::GzipTar))]
    #[case::zip(b"PK\x03\x04rest", Some(ArchiveKind::Zip))]
    #[case::empty_zip(b"PK\x05\x06rest", Some(ArchiveKind::Zip))]
    #[case::html(b"<html>not found</html>", None)]
    #[case::empty(b"", None)]
    fn detects_archive_kind_by_content(#[case] header: &[u8], #[case] expected: Option<ArchiveKind>) {
        assert_eq!(ArchiveKind::detect(header), expected);
    }

    #[test]
    fn detects_plain_tar_by_ustar_magic() {
        let bytes = tar_bytes("mongodb/bin/mongod", b"#!/bin/sh\n");
        assert_eq!(ArchiveKind::detect(&bytes), Some(ArchiveKind::Tar));
    }

    #[test]
    fn extracts_gzipped_tar_and_marks_binaries_executable() {
        use flate2::{Compression, write::GzEncoder};
        use std::io::Write;

        let temp = tempdir().expect("tempdir");
        let archive = temp.path().join("mongodb.tgz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder
            .write_all(&tar_bytes("mongodb-4.0/bin/mongod", b"#!/bin/sh\n"))
            .expect("compress");
        std::fs::write(&archive, encoder.finish().expect("finish gzip")).expect("write archive");

        let destination = utf8(&temp.path().join("out"));
        ArchiveExtractor
            .extract(&utf8(&archive), &destination)
            .expect("extract");

        let binary = destination.join("mongodb-4.0/bin/mongod");
        assert!(binary.is_file());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&binary).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn extracts_zip_archives() {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let temp = tempdir().expect("tempdir");
        let archive = temp.path().join("mongodb.zip");
        let mut writer = zip::ZipWriter::new(File::create(&archive).expect("create zip"));
        writer
            .start_file("mongodb-win32/bin/mongod.exe", SimpleFileOptions::default())
            .expect("start entry");
        writer.write_all(b"MZ").expect("write entry");
        writer.finish().expect("finish zip");

        let destination = utf8(&temp.path().join("out"));
        ArchiveExtractor
            .extract(&utf8(&archive), &destination)
            .expect("extract");
        assert!(destination.join("mongodb-win32/bin/mongod.exe").is_file());
    }

    #[test]
    fn rejects_unknown_archives() {
        let temp = tempdir().expect("tempdir");
        let archive = temp.path().join("mongodb.tgz");
        std::fs::write(&archive, b"404 page not found").expect("write archive");

        let err = ArchiveExtractor
            .extract(&utf8(&archive), &utf8(&temp.path().join("out")))
            .expect_err("unknown format must fail");
        assert_eq!(err.kind(), AcquisitionErrorKind::InvalidDownloadedFile);
    }

    #[test]
    fn corrupt_gzip_is_an_invalid_download() {
        let temp = tempdir().expect("tempdir");
        let archive = temp.path().join("mongodb.tgz");
        std::fs::write(&archive, [0x1f, 0x8b, 0x08, 0x00, 0xde, 0xad]).expect("write archive");

        let err = ArchiveExtractor
            .extract(&utf8(&archive), &utf8(&temp.path().join("out")))
            .expect_err("corrupt archive must fail");
        assert_eq!(err.kind(), AcquisitionErrorKind::InvalidDownloadedFile);
    }
}
