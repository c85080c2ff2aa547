//! Resolves requests against the bundled release table.

use color_eyre::eyre::{Result, bail, ensure};
use mongo_ephemeral::{ResolutionError, SemanticVersion, VersionResolver, VersionTree};
use rstest::rstest;

const FASTDL: &str = "https://fastdl.mongodb.org/linux";

fn resolve_url(os_name: &str, version: Option<&str>, os_version: Option<&str>) -> Result<String> {
    let tree = VersionTree::bundled()?;
    let requested = version.map(str::parse::<SemanticVersion>).transpose()?;
    let release = VersionResolver::new(tree).resolve(requested, os_name, os_version)?;
    Ok(release.url)
}

#[rstest]
#[case::latest_generic("linux", None, None, "mongodb-linux-x86_64-4.0.23.tgz")]
#[case::latest_major("linux", Some("3"), None, "mongodb-linux-x86_64-3.6.22.tgz")]
#[case::latest_minor("linux", Some("3.4"), None, "mongodb-linux-x86_64-3.4.24.tgz")]
#[case::exact("linux", Some("2.6.11"), None, "mongodb-linux-x86_64-2.6.11.tgz")]
#[case::generic_ends_at_4_0("linux", Some("4.4.4"), None, "mongodb-linux-x86_64-4.0.23.tgz")]
#[case::newest_ubuntu("ubuntu", None, None, "mongodb-linux-x86_64-ubuntu2004-4.4.6.tgz")]
#[case::ubuntu_18("ubuntu", None, Some("18"), "mongodb-linux-x86_64-ubuntu1804-4.4.6.tgz")]
#[case::ubuntu_14_exact(
    "ubuntu",
    Some("3.0.3"),
    Some("14"),
    "mongodb-linux-x86_64-ubuntu1404-3.0.3.tgz"
)]
#[case::ubuntu_14_missing_major(
    "ubuntu",
    Some("1.4.4"),
    Some("14"),
    "mongodb-linux-x86_64-ubuntu1404-4.0.23.tgz"
)]
#[case::ubuntu_14_missing_minor(
    "ubuntu",
    Some("3.8.4"),
    Some("14"),
    "mongodb-linux-x86_64-ubuntu1404-3.6.22.tgz"
)]
#[case::ubuntu_14_missing_patch(
    "ubuntu",
    Some("3.4.22"),
    Some("14"),
    "mongodb-linux-x86_64-ubuntu1404-3.4.24.tgz"
)]
#[case::case_insensitive_os("Ubuntu", Some("3.0.3"), Some("14"), "mongodb-linux-x86_64-ubuntu1404-3.0.3.tgz")]
fn resolves_closest_published_release(
    #[case] os_name: &str,
    #[case] version: Option<&str>,
    #[case] os_version: Option<&str>,
    #[case] archive: &str,
) -> Result<()> {
    let url = resolve_url(os_name, version, os_version)?;
    ensure!(url == format!("{FASTDL}/{archive}"), "resolved {url}");
    Ok(())
}

#[test]
fn unknown_operating_systems_are_rejected() -> Result<()> {
    let tree = VersionTree::bundled()?;
    let err = VersionResolver::new(tree)
        .resolve(Some("3.0.3".parse()?), "xubuntu", Some("14"))
        .expect_err("xubuntu is not published");
    ensure!(
        matches!(err, ResolutionError::OperatingSystemNameNotFound { ref os_name } if os_name == "xubuntu"),
        "{err:?}"
    );
    Ok(())
}

#[test]
fn unpublished_os_versions_list_the_alternatives() -> Result<()> {
    let tree = VersionTree::bundled()?;
    let err = VersionResolver::new(tree)
        .resolve(Some("3.0.3".parse()?), "ubuntu", Some("10"))
        .expect_err("ubuntu 10 is not published");
    let ResolutionError::OperatingSystemVersionNotFound { available, .. } = &err else {
        bail!("unexpected error: {err:?}");
    };
    ensure!(available == &["12", "14"], "available: {available:?}");
    ensure!(err.to_string().contains("available versions: 12, 14"), "{err}");
    Ok(())
}

#[test]
fn every_published_os_resolves_its_latest_release() -> Result<()> {
    let tree = VersionTree::bundled()?;
    let resolver = VersionResolver::new(tree);
    for os_name in tree.os_names() {
        let release = resolver.resolve(None, os_name, None)?;
        let newest = tree
            .releases_for_os(os_name)
            .last()
            .copied()
            .expect("published operating systems have releases");
        ensure!(release.version == newest, "{os_name} resolved {}", release.version);
        ensure!(release.url.contains(&newest.to_string()), "{}", release.url);
    }
    Ok(())
}

#[test]
fn resolution_is_deterministic() -> Result<()> {
    let first = resolve_url("debian", Some("4.2"), None)?;
    for _ in 0..10 {
        let again = resolve_url("debian", Some("4.2"), None)?;
        ensure!(again == first, "{again} != {first}");
    }
    Ok(())
}
