//! Closest-match resolution of version and OS requests.

use serde::Serialize;
use tracing::{debug, info};

use super::tree::URL_PLACEHOLDER;
use super::{OsVersion, ReleaseVersion, SemanticVersion, VersionTree};
use crate::error::{ResolutionError, ResolutionResult};
use crate::observability::RESOLVER_TARGET;

/// Concrete release chosen for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRelease {
    /// Fully populated release version.
    pub version: ReleaseVersion,
    /// Operating system family the build targets.
    pub os_name: String,
    /// Operating system version label the build targets.
    pub os_version: String,
    /// Download URL of the release archive.
    pub url: String,
}

impl ResolvedRelease {
    /// Returns the release version as a fully populated [`SemanticVersion`].
    #[must_use]
    pub fn semver(&self) -> SemanticVersion {
        SemanticVersion::from(self.version)
    }
}

/// Maps partial version and OS requests onto published releases.
///
/// Resolution is a pure function of the tree and the request: identical
/// inputs always yield the identical [`ResolvedRelease`].
#[derive(Debug, Clone, Copy)]
pub struct VersionResolver<'tree> {
    tree: &'tree VersionTree,
}

impl<'tree> VersionResolver<'tree> {
    /// Creates a resolver over `tree`.
    #[must_use]
    pub const fn new(tree: &'tree VersionTree) -> Self {
        Self { tree }
    }

    /// Resolves a request to the closest published release.
    ///
    /// The version walk descends `major → minor → patch`, taking the
    /// requested component when it is published and otherwise snapping to
    /// the newest value at that level and every level below it. When
    /// `os_version` names a bucket published for `os_name`, the walk only
    /// considers releases built for that bucket.
    ///
    /// The OS version is then chosen among the buckets that publish the
    /// resolved release: a single bucket is returned regardless of the
    /// request; otherwise the requested bucket, or the highest-ordered one
    /// when none was requested.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::OperatingSystemNameNotFound`] when nothing
    /// is published for `os_name`, and
    /// [`ResolutionError::OperatingSystemVersionNotFound`] when several OS
    /// versions publish the resolved release and the requested one is not
    /// among them.
    pub fn resolve(
        &self,
        version: Option<SemanticVersion>,
        os_name: &str,
        os_version: Option<&str>,
    ) -> ResolutionResult<ResolvedRelease> {
        let requested_os_version = os_version.map(OsVersion::new);
        let candidates = self.candidates(os_name, requested_os_version.as_ref());
        let release = closest_release(&candidates, version).ok_or_else(|| {
            ResolutionError::OperatingSystemNameNotFound {
                os_name: os_name.to_owned(),
            }
        })?;
        let chosen = self.choose_os_version(os_name, requested_os_version.as_ref(), release)?;
        let template = self
            .tree
            .url_template(os_name, &chosen, release)
            .ok_or_else(|| {
                ResolutionError::InvalidReleaseTable(format!(
                    "release {release} for {os_name} {chosen} has no URL template"
                ))
            })?;
        let url = template.replacen(URL_PLACEHOLDER, &release.to_string(), 1);
        let requested_label = version.map_or_else(|| "latest".to_owned(), |v| v.to_string());

        info!(
            target: RESOLVER_TARGET,
            requested_version = %requested_label,
            requested_os = os_name,
            requested_os_version = os_version.unwrap_or("any"),
            resolved_version = %release,
            resolved_os_version = %chosen,
            url = %url,
            "resolved mongod release"
        );

        Ok(ResolvedRelease {
            version: release,
            os_name: os_name.trim().to_lowercase(),
            os_version: chosen.to_string(),
            url,
        })
    }

    fn candidates(&self, os_name: &str, os_version: Option<&OsVersion>) -> Vec<ReleaseVersion> {
        let scoped = os_version
            .and_then(|label| self.tree.releases_for(os_name, label).map(|found| (label, found)));
        if let Some((label, releases)) = scoped {
            debug!(
                target: RESOLVER_TARGET,
                os_name,
                os_version = %label,
                candidates = releases.len(),
                "restricting version search to the requested OS version"
            );
            return releases;
        }
        self.tree.releases_for_os(os_name)
    }

    fn choose_os_version(
        &self,
        os_name: &str,
        requested: Option<&OsVersion>,
        release: ReleaseVersion,
    ) -> ResolutionResult<OsVersion> {
        let publishing = self.tree.os_versions_publishing(os_name, release);
        match (publishing.as_slice(), requested) {
            ([only], _) => Ok((*only).clone()),
            (all, None) => all.iter().max().map(|label| (*label).clone()).ok_or_else(|| {
                ResolutionError::OperatingSystemNameNotFound {
                    os_name: os_name.to_owned(),
                }
            }),
            (all, Some(label)) if all.contains(&label) => Ok(label.clone()),
            (all, Some(label)) => Err(ResolutionError::OperatingSystemVersionNotFound {
                os_name: os_name.to_owned(),
                os_version: label.to_string(),
                available: all.iter().map(ToString::to_string).collect(),
            }),
        }
    }
}

/// Walks `major → minor → patch` over `releases` (sorted ascending).
///
/// Each level keeps the requested component when present; the first miss
/// snaps to the newest release beneath the last matched level. There is no
/// backtracking to sibling branches.
fn closest_release(
    releases: &[ReleaseVersion],
    requested: Option<SemanticVersion>,
) -> Option<ReleaseVersion> {
    let newest = releases.last().copied()?;
    let Some(request) = requested else {
        return Some(newest);
    };
    let Some(by_major) = narrow(releases, |release| release.major.cmp(&request.major)) else {
        return Some(newest);
    };
    let newest_major = by_major.last().copied();
    let Some(minor) = request.minor else {
        return newest_major;
    };
    let Some(by_minor) = narrow(by_major, |release| release.minor.cmp(&minor)) else {
        return newest_major;
    };
    let newest_minor = by_minor.last().copied();
    let Some(patch) = request.patch else {
        return newest_minor;
    };
    by_minor
        .binary_search_by(|release| release.patch.cmp(&patch))
        .ok()
        .and_then(|index| by_minor.get(index).copied())
        .or(newest_minor)
}

/// Returns the contiguous run of `releases` for which `ordering` yields
/// `Equal`, or `None` when the run is empty.
fn narrow<F>(releases: &[ReleaseVersion], ordering: F) -> Option<&[ReleaseVersion]>
where
    F: Fn(&ReleaseVersion) -> std::cmp::Ordering,
{
    let start = releases.partition_point(|release| ordering(release).is_lt());
    let end = releases.partition_point(|release| ordering(release).is_le());
    releases.get(start..end).filter(|run| !run.is_empty())
}
