//! Validation of timeout options expressed in whole seconds.

use std::time::Duration;

use color_eyre::eyre::eyre;

use crate::error::{ConfigError, ConfigResult};

/// Environment variable bounding the startup wait.
pub const STARTUP_TIMEOUT_ENV: &str = "MONGOIM_STARTUP_TIMEOUT_SECS";

/// Environment variable bounding the shutdown grace period.
pub const SHUTDOWN_TIMEOUT_ENV: &str = "MONGOIM_SHUTDOWN_TIMEOUT_SECS";

/// Largest accepted timeout.
pub const MAX_TIMEOUT_SECS: u64 = 600;

/// Startup bound used when none is configured.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Parses a timeout option, falling back to `default` when it is unset.
///
/// # Errors
///
/// Returns an error naming `variable` when the value is empty, not a whole
/// number, zero, or above [`MAX_TIMEOUT_SECS`].
pub fn parse_timeout_secs(
    variable: &str,
    raw: Option<&str>,
    default: Duration,
) -> ConfigResult<Duration> {
    let Some(value) = raw else {
        return Ok(default);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::from(eyre!("{variable} is present but empty")));
    }

    let seconds: u64 = trimmed.parse().map_err(|err| {
        ConfigError::from(eyre!("failed to parse {variable} from '{trimmed}': {err}"))
    })?;

    if seconds == 0 {
        return Err(ConfigError::from(eyre!(
            "{variable} must be at least 1 second (received {trimmed})"
        )));
    }

    if seconds > MAX_TIMEOUT_SECS {
        return Err(ConfigError::from(eyre!(
            "{variable} must be {MAX_TIMEOUT_SECS} seconds or less (received {trimmed})"
        )));
    }

    Ok(Duration::from_secs(seconds))
}
