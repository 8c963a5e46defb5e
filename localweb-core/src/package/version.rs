//! Package version ordering
//!
//! Versions are dotted strings that are usually, but not always, semver.
//! Comparison is numeric per segment so that `1.10.0` sorts after `1.9.0`.
//! A version also names a directory, so anything that could step outside
//! the package root is not a version.

use std::cmp::Ordering;
use std::fmt;

/// A parsed package version
#[derive(Debug, Clone)]
pub struct PackageVersion {
    raw: String,
    semver: Option<semver::Version>,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Segment {
    number: u64,
    suffix: String,
}

impl PackageVersion {
    /// Parse a version string
    ///
    /// Returns `None` for blank input and for strings holding path
    /// separators, `..`, drive colons or control characters.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let raw = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        if raw.is_empty() || !is_path_safe(raw) {
            return None;
        }

        let segments = raw.split('.').map(Segment::parse).collect();
        Some(Self {
            raw: raw.to_string(),
            semver: semver::Version::parse(raw).ok(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Name of the directory holding this version (`v<version>`)
    pub fn dir_name(&self) -> String {
        format!("v{}", self.raw)
    }
}

fn is_path_safe(raw: &str) -> bool {
    !raw.contains("..")
        && !raw
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':') || c.is_control())
}

impl Segment {
    fn parse(segment: &str) -> Self {
        let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
        Self {
            number: digits.parse().unwrap_or(0),
            suffix: segment[digits.len()..].to_string(),
        }
    }

    fn zero() -> Self {
        Self {
            number: 0,
            suffix: String::new(),
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.number.cmp(&other.number).then_with(|| {
            // A bare number sorts after the same number with a suffix (1 > 1-beta)
            match (self.suffix.is_empty(), other.suffix.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.suffix.cmp(&other.suffix),
            }
        })
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        if let (Some(a), Some(b)) = (&self.semver, &other.semver) {
            return a.cmp(b);
        }

        let len = self.segments.len().max(other.segments.len());
        let zero = Segment::zero();
        for i in 0..len {
            let a = self.segments.get(i).unwrap_or(&zero);
            let b = other.segments.get(i).unwrap_or(&zero);
            match a.compare(b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for PackageVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("'{s}' is not a valid version"))
    }
}

/// Compare two version strings; unparsable strings sort first
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    PackageVersion::parse(a).cmp(&PackageVersion::parse(b))
}

/// Whether `candidate` should replace `installed`
///
/// `force` bypasses the ordering check entirely.
pub fn is_newer(candidate: &str, installed: Option<&str>, force: bool) -> bool {
    if PackageVersion::parse(candidate).is_none() {
        return false;
    }
    if force {
        return true;
    }
    match installed {
        Some(installed) => compare_versions(candidate, installed) == Ordering::Greater,
        None => true,
    }
}

/// Whether `current` lies within the optional inclusive `[min, max]` range
pub fn in_range(current: &str, min: Option<&str>, max: Option<&str>) -> bool {
    let above_min = min
        .filter(|m| !m.trim().is_empty())
        .map(|m| compare_versions(current, m) != Ordering::Less)
        .unwrap_or(true);
    let below_max = max
        .filter(|m| !m.trim().is_empty())
        .map(|m| compare_versions(current, m) != Ordering::Greater)
        .unwrap_or(true);
    above_min && below_max
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> PackageVersion {
        PackageVersion::parse(s).unwrap()
    }

    #[test]
    fn test_numeric_segment_ordering() {
        assert!(v("1.2.0") < v("1.10.0"));
        assert!(v("1.2.0") < v("1.9.0"));
        assert!(v("1.9") < v("1.10"));
        assert!(v("2") > v("1.99.99"));
    }

    #[test]
    fn test_missing_segments_are_zero() {
        assert_eq!(v("1.2"), v("1.2.0"));
        assert_eq!(v("v1.2.0"), v("1.2"));
        assert!(v("1.2.0.1") > v("1.2"));
    }

    #[test]
    fn test_prerelease_sorts_before_release() {
        assert!(v("1.0.0-beta") < v("1.0.0"));
        assert!(v("1.0-rc1") < v("1.0"));
    }

    #[test]
    fn test_is_newer() {
        assert!(!is_newer("1.2.0", Some("1.10.0"), false));
        assert!(is_newer("1.10.0", Some("1.9.0"), false));
        assert!(!is_newer("1.0.0", Some("1.0.0"), false));
        assert!(is_newer("1.0.0", Some("1.0.0"), true));
        assert!(is_newer("0.1", None, false));
        assert!(!is_newer("", Some("1.0"), true));
    }

    #[test]
    fn test_in_range() {
        assert!(in_range("1.5.0", Some("1.0"), Some("2.0")));
        assert!(in_range("1.0", Some("1.0"), Some("1.0")));
        assert!(!in_range("0.9", Some("1.0"), None));
        assert!(!in_range("2.0.1", None, Some("2.0")));
        assert!(in_range("9.9", None, Some("")));
    }

    #[test]
    fn test_path_characters_are_not_versions() {
        for bad in [
            "1/../../x",
            "../1.0",
            "1.0/evil",
            "1.0\\evil",
            "C:1.0",
            "1..0",
            "1.0\u{0}x",
            "..",
        ] {
            assert!(PackageVersion::parse(bad).is_none(), "{bad:?} parsed");
            assert!(!is_newer(bad, None, true));
        }
        assert!(PackageVersion::parse("1.0.0-rc.1+build.5").is_some());
        assert!("1/2".parse::<PackageVersion>().is_err());
    }

    #[test]
    fn test_dir_name() {
        assert_eq!(v("1.2.3").dir_name(), "v1.2.3");
        assert_eq!(v("v0.1").dir_name(), "v0.1");
    }
}
