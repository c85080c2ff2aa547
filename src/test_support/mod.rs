//! Internal helpers re-exported for integration tests.
//!
//! Besides log capture, this module provides stand-ins for the external
//! collaborators the crate talks to: a scripted [`HealthProbe`], a download
//! transport that counts transfers, in-memory release archives, and
//! shell-script `mongod` installations for lifecycle tests.
//!
//! [`HealthProbe`]: crate::supervisor::HealthProbe

mod archive;
mod fake_mongod;
mod logging;
mod probe;
mod supervision;
mod transport;

pub use archive::{ARCHIVE_ROOT, tar_gz_release, zip_release};
pub use fake_mongod::{
    CRASHING_MONGOD, FakeMongodInstall, HANGING_SHELL, HEALTHY_MONGOD, STUBBORN_MONGOD,
    UPTIME_SHELL, mongod_script,
};
pub use logging::{capture_debug_logs, capture_info_logs, capture_warn_logs};
pub use probe::{SCRIPTED_UPTIME_SECS, ScriptedProbe};
pub use supervision::{eventually, fast_settings, is_alive, scripted_supervisor, wait_for_log};
pub use transport::CountingTransport;
