//! Ordering for operating-system version labels.

use std::cmp::Ordering;
use std::fmt;

/// An operating-system version label such as `18`, `2`, or `generic`.
///
/// Numeric labels compare numerically, so `20` sorts above `9`. Non-numeric
/// labels sort above every numeric label and compare lexicographically among
/// themselves, which keeps `generic` builds preferred over distribution
/// specific ones when no OS version is requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OsVersion(String);

impl OsVersion {
    /// Normalises a label to lower case.
    #[must_use]
    pub fn new(label: &str) -> Self {
        Self(label.trim().to_lowercase())
    }

    /// Returns the normalised label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl Ord for OsVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(left), Some(right)) => left.cmp(&right).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for OsVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_labels_compare_numerically() {
        assert!(OsVersion::new("20") > OsVersion::new("9"));
        assert!(OsVersion::new("10") > OsVersion::new("8"));
    }

    #[test]
    fn named_labels_sort_above_numeric_ones() {
        assert!(OsVersion::new("generic") > OsVersion::new("20"));
        let max = ["14", "generic", "18"]
            .into_iter()
            .map(OsVersion::new)
            .max()
            .expect("non-empty");
        assert_eq!(max.as_str(), "generic");
    }

    #[test]
    fn labels_are_case_insensitive() {
        assert_eq!(OsVersion::new("Generic"), OsVersion::new("generic"));
    }
}
