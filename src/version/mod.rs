//! Release catalogue and closest-match resolution for `mongod` downloads.
//!
//! [`VersionTree`] indexes every published release by operating system and
//! OS version; [`VersionResolver`] maps a possibly partial version request
//! onto the closest published release and its download URL.
//!
//! ```
//! use mongo_ephemeral::{SemanticVersion, VersionResolver, VersionTree};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tree = VersionTree::bundled()?;
//! let requested: SemanticVersion = "3.4".parse()?;
//! let release = VersionResolver::new(tree).resolve(Some(requested), "linux", None)?;
//! assert_eq!(release.version.to_string(), "3.4.24");
//! # Ok(())
//! # }
//! ```

mod os_version;
mod resolver;
mod tree;

pub use os_version::OsVersion;
pub use resolver::{ResolvedRelease, VersionResolver};
pub use tree::{ReleaseRow, VersionTree};

use std::fmt;
use std::str::FromStr;

use color_eyre::eyre::eyre;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A possibly partial `major[.minor[.patch]]` version request.
///
/// Missing components are resolved to the newest published value at that
/// level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SemanticVersion {
    /// Major version component.
    pub major: u32,
    /// Minor version component, if requested.
    pub minor: Option<u32>,
    /// Patch version component, if requested.
    pub patch: Option<u32>,
}

impl SemanticVersion {
    /// Creates a version request from its components.
    #[must_use]
    pub const fn new(major: u32, minor: Option<u32>, patch: Option<u32>) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Creates a fully populated version request.
    #[must_use]
    pub const fn exact(major: u32, minor: u32, patch: u32) -> Self {
        Self::new(major, Some(minor), Some(patch))
    }

    /// Returns the fully populated release when every component is present.
    #[must_use]
    pub const fn as_release(&self) -> Option<ReleaseVersion> {
        match (self.minor, self.patch) {
            (Some(minor), Some(patch)) => Some(ReleaseVersion::new(self.major, minor, patch)),
            _ => None,
        }
    }
}

impl From<ReleaseVersion> for SemanticVersion {
    fn from(release: ReleaseVersion) -> Self {
        Self::exact(release.major, release.minor, release.patch)
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.major)?;
        if let Some(minor) = self.minor {
            write!(f, ".{minor}")?;
            if let Some(patch) = self.patch {
                write!(f, ".{patch}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for SemanticVersion {
    type Err = ConfigError;

    /// Parses `4`, `4.0`, or `4.0.23`; components after the patch are ignored.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let mut components = trimmed.split('.').map(|part| {
            part.trim().parse::<u32>().map_err(|err| {
                ConfigError::from(eyre!("invalid mongo version '{trimmed}': {err}"))
            })
        });
        let major = components
            .next()
            .ok_or_else(|| ConfigError::from(eyre!("mongo version must not be empty")))??;
        let minor = components.next().transpose()?;
        let patch = if minor.is_some() {
            components.next().transpose()?
        } else {
            None
        };
        Ok(Self::new(major, minor, patch))
    }
}

/// A fully populated release version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReleaseVersion {
    /// Major version component.
    pub major: u32,
    /// Minor version component.
    pub minor: u32,
    /// Patch version component.
    pub patch: u32,
}

impl ReleaseVersion {
    /// Creates a release version from its components.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
