//! Resolves, downloads, and unpacks the `mongod` build selected by the
//! `MONGOIM_*` environment, then prints the directory holding its binaries.
//!
//! The server is **not** started. Configuration is provided via environment
//! variables parsed by [`OrthoConfig`](https://github.com/leynos/ortho-config).
//! Logs go to stderr and honour `RUST_LOG`. The binary exits with status code
//! `0` on success and `1` on error.

use std::io::Write;

use tracing_subscriber::EnvFilter;

fn main() -> color_eyre::eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mongo_ephemeral=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let binary_dir = mongo_ephemeral::run().map_err(|err| color_eyre::eyre::eyre!(err))?;
    writeln!(std::io::stdout().lock(), "{binary_dir}")?;
    Ok(())
}
