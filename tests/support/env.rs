//! Environment helpers for integration tests.

use std::ffi::OsString;
use std::sync::{LazyLock, Mutex, PoisonError};

use temp_env::with_vars;

static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Every variable `MongoEnvCfg` reads, so scenarios start from a clean slate.
pub const MONGOIM_VARS: [&str; 15] = [
    "MONGOIM_MONGO_VERSION",
    "MONGOIM_OPERATING_SYSTEM",
    "MONGOIM_OS_VERSION",
    "MONGOIM_DOWNLOAD_URL",
    "MONGOIM_IGNORE_CACHE",
    "MONGOIM_MONGOD_PORT",
    "MONGOIM_MONGOD_DATA_FOLDER",
    "MONGOIM_USE_LOCAL_MONGOD",
    "MONGOIM_DBNAME",
    "MONGOIM_MONGO_CLIENT_HOST",
    "MONGOIM_STORAGE_ENGINE",
    "MONGOIM_DOWNLOAD_FOLDER",
    "MONGOIM_EXTRACT_FOLDER",
    "MONGOIM_STARTUP_TIMEOUT_SECS",
    "MONGOIM_SHUTDOWN_TIMEOUT_SECS",
];

/// Runs `body` with every `MONGOIM_*` variable cleared except `overrides`.
///
/// A global mutex serialises access so concurrent tests cannot interleave
/// environment mutations. The guard is not re-entrant.
pub fn with_mongoim_env<R>(overrides: &[(&str, &str)], body: impl FnOnce() -> R) -> R {
    let mut pairs: Vec<(OsString, Option<OsString>)> = MONGOIM_VARS
        .iter()
        .filter(|name| !overrides.iter().any(|(key, _)| key == *name))
        .map(|name| (OsString::from(name), None))
        .collect();
    pairs.extend(
        overrides
            .iter()
            .map(|(key, value)| (OsString::from(key), Some(OsString::from(value)))),
    );
    let _guard = ENV_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
    with_vars(&pairs, body)
}
