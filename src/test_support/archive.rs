//! In-memory release archives shaped like the official `MongoDB` downloads.

use std::io::{Cursor, Write};

use color_eyre::eyre::Result;
use flate2::Compression;
use flate2::write::GzEncoder;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::fake_mongod::{HEALTHY_MONGOD, mongod_script};

/// Top-level directory used inside generated archives.
pub const ARCHIVE_ROOT: &str = "mongodb-linux-x86_64-4.0.23";

fn entries() -> [(String, String); 2] {
    [
        (format!("{ARCHIVE_ROOT}/bin/mongod"), mongod_script(HEALTHY_MONGOD)),
        (
            format!("{ARCHIVE_ROOT}/README"),
            "fake MongoDB distribution\n".to_owned(),
        ),
    ]
}

/// Gzipped tarball containing `<root>/bin/mongod`.
///
/// # Errors
///
/// Returns an error when the archive cannot be assembled.
pub fn tar_gz_release() -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents) in entries() {
        let mut header = tar::Header::new_gnu();
        header.set_size(u64::try_from(contents.len())?);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, path, contents.as_bytes())?;
    }
    Ok(builder.into_inner()?.finish()?)
}

/// Zip file containing `<root>/bin/mongod`.
///
/// # Errors
///
/// Returns an error when the archive cannot be assembled.
pub fn zip_release() -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().unix_permissions(0o755);
    for (path, contents) in entries() {
        writer.start_file(path, options)?;
        writer.write_all(contents.as_bytes())?;
    }
    Ok(writer.finish()?.into_inner())
}
