//! Immutable index of published `mongod` releases.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::OnceLock;

use serde::Deserialize;

use super::{OsVersion, ReleaseVersion};
use crate::error::{ResolutionError, ResolutionResult};

/// Placeholder replaced by the `x.y.z` release string in URL templates.
pub(crate) const URL_PLACEHOLDER: &str = "{}";

const BUNDLED_RELEASES: &str = include_str!("releases.json");

/// One row of the flat release table.
///
/// Serialised as a JSON array
/// `[major, minor, patch, os_name, os_version, url_template]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseRow {
    /// Major version component.
    pub major: u32,
    /// Minor version component.
    pub minor: u32,
    /// Patch version component.
    pub patch: u32,
    /// Operating system family, for example `ubuntu` or `windows`.
    pub os_name: String,
    /// Operating system version label, for example `18` or `generic`.
    pub os_version: String,
    /// Download URL with a single `{}` placeholder for the version string.
    pub url_template: String,
}

impl ReleaseRow {
    /// Builds a row from its components.
    #[must_use]
    pub fn new(
        version: ReleaseVersion,
        os_name: &str,
        os_version: &str,
        url_template: &str,
    ) -> Self {
        Self {
            major: version.major,
            minor: version.minor,
            patch: version.patch,
            os_name: os_name.to_owned(),
            os_version: os_version.to_owned(),
            url_template: url_template.to_owned(),
        }
    }

    const fn version(&self) -> ReleaseVersion {
        ReleaseVersion::new(self.major, self.minor, self.patch)
    }
}

/// Releases published for one `(os_name, os_version)` pair, keyed by version
/// so iteration yields them in ascending order.
#[derive(Debug, Clone, Default)]
struct Bucket {
    templates: BTreeMap<ReleaseVersion, String>,
}

/// Index of every published release by operating system and OS version.
///
/// Built once from the flat release table and immutable afterwards. Each
/// `(os_name, os_version)` bucket keeps its releases as a sorted sequence so
/// closest-match lookups can use ordered searches rather than map maxima.
#[derive(Debug, Clone)]
pub struct VersionTree {
    systems: BTreeMap<String, BTreeMap<OsVersion, Bucket>>,
    row_count: usize,
}

impl VersionTree {
    /// Folds flat rows into the nested index.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::EmptyReleaseTable`] when `rows` is empty and
    /// [`ResolutionError::InvalidReleaseTable`] when a template does not
    /// contain exactly one placeholder or a release is listed twice with
    /// different templates.
    pub fn from_rows<I>(rows: I) -> ResolutionResult<Self>
    where
        I: IntoIterator<Item = ReleaseRow>,
    {
        let mut systems: BTreeMap<String, BTreeMap<OsVersion, Bucket>> = BTreeMap::new();
        let mut row_count = 0;
        for row in rows {
            validate_template(&row)?;
            let os_name = row.os_name.trim().to_lowercase();
            if os_name.is_empty() {
                return Err(ResolutionError::InvalidReleaseTable(format!(
                    "release {} has an empty operating system name",
                    row.version()
                )));
            }
            let bucket = systems
                .entry(os_name)
                .or_default()
                .entry(OsVersion::new(&row.os_version))
                .or_default();
            match bucket.templates.entry(row.version()) {
                Entry::Vacant(slot) => {
                    slot.insert(row.url_template);
                    row_count += 1;
                }
                Entry::Occupied(existing) if existing.get() == &row.url_template => {}
                Entry::Occupied(existing) => {
                    return Err(ResolutionError::InvalidReleaseTable(format!(
                        "release {} for {} {} lists conflicting templates '{}' and '{}'",
                        row.version(),
                        row.os_name,
                        row.os_version,
                        existing.get(),
                        row.url_template
                    )));
                }
            }
        }
        if row_count == 0 {
            return Err(ResolutionError::EmptyReleaseTable);
        }
        Ok(Self { systems, row_count })
    }

    /// Parses a JSON array of [`ReleaseRow`] arrays and folds it into a tree.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::InvalidReleaseTable`] when the JSON is
    /// malformed, plus every error of [`VersionTree::from_rows`].
    pub fn from_json(raw: &str) -> ResolutionResult<Self> {
        let rows: Vec<ReleaseRow> = serde_json::from_str(raw)
            .map_err(|err| ResolutionError::InvalidReleaseTable(err.to_string()))?;
        Self::from_rows(rows)
    }

    /// Returns the release table bundled with the crate.
    ///
    /// The table is parsed on first use and shared for the life of the
    /// process.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::InvalidReleaseTable`] if the bundled table
    /// fails to parse.
    pub fn bundled() -> ResolutionResult<&'static Self> {
        static BUNDLED: OnceLock<Result<VersionTree, String>> = OnceLock::new();
        BUNDLED
            .get_or_init(|| Self::from_json(BUNDLED_RELEASES).map_err(|err| err.to_string()))
            .as_ref()
            .map_err(|message| ResolutionError::InvalidReleaseTable(message.clone()))
    }

    /// Number of distinct `(release, os_name, os_version)` entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.row_count
    }

    /// Reports whether the tree holds no releases. Always `false` for a
    /// successfully constructed tree.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Operating system names known to the tree, in ascending order.
    pub fn os_names(&self) -> impl Iterator<Item = &str> {
        self.systems.keys().map(String::as_str)
    }

    /// Reports whether any release is published for `os_name`.
    #[must_use]
    pub fn contains_os(&self, os_name: &str) -> bool {
        self.systems.contains_key(&normalise(os_name))
    }

    /// OS versions published for `os_name` anywhere in the tree.
    #[must_use]
    pub fn os_versions(&self, os_name: &str) -> Vec<&OsVersion> {
        self.systems
            .get(&normalise(os_name))
            .map(|versions| versions.keys().collect())
            .unwrap_or_default()
    }

    /// Every release published for `os_name`, sorted ascending and
    /// deduplicated across OS versions.
    #[must_use]
    pub fn releases_for_os(&self, os_name: &str) -> Vec<ReleaseVersion> {
        let Some(versions) = self.systems.get(&normalise(os_name)) else {
            return Vec::new();
        };
        let mut releases: Vec<ReleaseVersion> = versions
            .values()
            .flat_map(|bucket| bucket.templates.keys().copied())
            .collect();
        releases.sort_unstable();
        releases.dedup();
        releases
    }

    /// Releases published for one `(os_name, os_version)` bucket, sorted
    /// ascending. `None` when the bucket does not exist.
    #[must_use]
    pub fn releases_for(&self, os_name: &str, os_version: &OsVersion) -> Option<Vec<ReleaseVersion>> {
        self.bucket(os_name, os_version)
            .map(|bucket| bucket.templates.keys().copied().collect())
    }

    /// OS versions of `os_name` that publish `release`, in ascending order.
    #[must_use]
    pub fn os_versions_publishing(&self, os_name: &str, release: ReleaseVersion) -> Vec<&OsVersion> {
        self.systems
            .get(&normalise(os_name))
            .map(|versions| {
                versions
                    .iter()
                    .filter(|(_, bucket)| bucket.templates.contains_key(&release))
                    .map(|(os_version, _)| os_version)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// URL template for an exact release in a bucket.
    #[must_use]
    pub fn url_template(
        &self,
        os_name: &str,
        os_version: &OsVersion,
        release: ReleaseVersion,
    ) -> Option<&str> {
        self.bucket(os_name, os_version)?
            .templates
            .get(&release)
            .map(String::as_str)
    }

    fn bucket(&self, os_name: &str, os_version: &OsVersion) -> Option<&Bucket> {
        self.systems.get(&normalise(os_name))?.get(os_version)
    }
}

fn normalise(os_name: &str) -> String {
    os_name.trim().to_lowercase()
}

fn validate_template(row: &ReleaseRow) -> ResolutionResult<()> {
    let placeholders = row.url_template.matches(URL_PLACEHOLDER).count();
    if placeholders == 1 {
        Ok(())
    } else {
        Err(ResolutionError::InvalidReleaseTable(format!(
            "template for {} {} {} must contain exactly one '{URL_PLACEHOLDER}' (found {placeholders})",
            row.version(),
            row.os_name,
            row.os_version
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn row(version: (u32, u32, u32), os: &str, os_version: &str) -> ReleaseRow {
        ReleaseRow::new(
            ReleaseVersion::new(version.0, version.1, version.2),
            os,
            os_version,
            "https://example.invalid/mongodb-{}.tgz",
        )
    }

    #[test]
    fn bundled_table_loads_every_known_platform() {
        let tree = VersionTree::bundled().expect("bundled table should parse");
        let names: Vec<&str> = tree.os_names().collect();
        for expected in ["amazon", "debian", "linux", "osx", "rhel", "suse", "ubuntu", "windows"] {
            assert!(names.contains(&expected), "missing {expected} in {names:?}");
        }
        assert!(tree.len() > 1000);
    }

    #[test]
    fn bundled_generic_linux_stops_at_four_zero() {
        let tree = VersionTree::bundled().expect("bundled table should parse");
        let newest = tree
            .releases_for_os("linux")
            .last()
            .copied()
            .expect("linux releases");
        assert_eq!(newest, ReleaseVersion::new(4, 0, 23));
    }

    #[test]
    fn from_rows_rejects_empty_input() {
        let err = VersionTree::from_rows(Vec::new()).expect_err("empty table must fail");
        assert!(matches!(err, ResolutionError::EmptyReleaseTable));
    }

    #[rstest]
    #[case::missing("https://example.invalid/mongodb.tgz")]
    #[case::duplicated("https://example.invalid/{}/mongodb-{}.tgz")]
    fn from_rows_rejects_bad_templates(#[case] template: &str) {
        let bad = ReleaseRow::new(ReleaseVersion::new(4, 0, 0), "linux", "generic", template);
        let err = VersionTree::from_rows([bad]).expect_err("template must be rejected");
        assert!(matches!(err, ResolutionError::InvalidReleaseTable(_)));
    }

    #[test]
    fn from_rows_rejects_conflicting_duplicates() {
        let first = row((4, 0, 0), "linux", "generic");
        let mut second = first.clone();
        second.url_template = "https://mirror.invalid/{}.tgz".to_owned();
        let err = VersionTree::from_rows([first, second]).expect_err("conflict must fail");
        assert!(err.to_string().contains("conflicting templates"));
    }

    #[test]
    fn from_rows_folds_identical_duplicates() {
        let first = row((4, 0, 0), "linux", "generic");
        let tree = VersionTree::from_rows([first.clone(), first]).expect("duplicates fold");
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn os_names_are_case_insensitive() {
        let tree = VersionTree::from_rows([row((4, 0, 0), "Ubuntu", "18")]).expect("tree");
        assert!(tree.contains_os("UBUNTU"));
        assert_eq!(
            tree.os_versions_publishing("ubuntu", ReleaseVersion::new(4, 0, 0)),
            vec![&OsVersion::new("18")]
        );
    }

    #[test]
    fn releases_for_os_merges_buckets_in_order() {
        let tree = VersionTree::from_rows([
            row((4, 0, 1), "ubuntu", "18"),
            row((3, 6, 0), "ubuntu", "14"),
            row((4, 0, 1), "ubuntu", "16"),
        ])
        .expect("tree");
        assert_eq!(
            tree.releases_for_os("ubuntu"),
            vec![ReleaseVersion::new(3, 6, 0), ReleaseVersion::new(4, 0, 1)]
        );
    }

    #[test]
    fn from_json_reports_malformed_rows() {
        let err = VersionTree::from_json(r#"[[4, 0, "x", "linux", "generic", "{}"]]"#)
            .expect_err("malformed row must fail");
        assert!(matches!(err, ResolutionError::InvalidReleaseTable(_)));
    }
}
