//! Package version parsing, ordering and normalization.

use crate::error::{Error, ErrorKind};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A package version.
///
/// The release part accepts between one and four dot-separated numeric
/// components (legacy feeds carry both `1.11` and `1.0.0.1` style versions),
/// followed by an optional prerelease identifier sequence and optional build
/// metadata. Build metadata **never** participates in ordering, equality or
/// hashing; two versions are equal iff their release and prerelease parts
/// are.
///
/// The exact source text is preserved and round-trips through serde, so a
/// persisted `2.0.0-test+tag` comes back byte-for-byte. The normalized form
/// (used for on-disk layout paths) drops build metadata and trailing zero
/// release components beyond the third.
///
/// # Examples
///
/// ```
/// use packrat_nupkg::models::PackageVersion;
///
/// let a: PackageVersion = "1.11".parse().unwrap();
/// let b: PackageVersion = "2.0.0-alpha".parse().unwrap();
/// let c: PackageVersion = "2.0.0".parse().unwrap();
/// assert!(a < b && b < c);
///
/// let tagged: PackageVersion = "2.0.0+tag".parse().unwrap();
/// assert_eq!(tagged, c); // build metadata is ignored
/// assert!(tagged.is_semver2());
/// assert_eq!(tagged.to_normalized_string(), "2.0.0");
/// ```
#[derive(Debug, Clone)]
pub struct PackageVersion {
    original: String,
    release: Vec<u64>,
    prerelease: Vec<Identifier>,
    build: Option<String>,
}

/// A single prerelease identifier.
///
/// Numeric identifiers compare numerically and sort below alphanumeric ones;
/// alphanumeric identifiers compare case-insensitively.
#[derive(Debug, Clone)]
enum Identifier {
    Numeric(u64),
    Alpha(String),
}

impl Identifier {
    fn parse(s: &str) -> Self {
        if s.bytes().all(|b| b.is_ascii_digit())
            && let Ok(n) = s.parse::<u64>()
        {
            return Self::Numeric(n);
        }
        Self::Alpha(s.to_string())
    }

    fn cmp_insensitive(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Numeric(a), Self::Numeric(b)) => a.cmp(b),
            // Numeric identifiers always have lower precedence than alphanumeric.
            (Self::Numeric(_), Self::Alpha(_)) => Ordering::Less,
            (Self::Alpha(_), Self::Numeric(_)) => Ordering::Greater,
            (Self::Alpha(a), Self::Alpha(b)) => a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()),
        }
    }
}

impl PackageVersion {
    /// The exact version string this value was parsed from.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Whether the version carries any prerelease identifiers.
    pub fn is_prerelease(&self) -> bool {
        !self.prerelease.is_empty()
    }

    /// Build metadata (the part after `+`), if any.
    pub fn build_metadata(&self) -> Option<&str> {
        self.build.as_deref()
    }

    /// A version is SemVer2-only when older clients cannot parse it: a
    /// multi-identifier prerelease (`1.0-beta.1`) or non-empty build
    /// metadata (`1.0+tag`).
    pub fn is_semver2(&self) -> bool {
        self.prerelease.len() >= 2 || self.build.is_some()
    }

    /// Normalized form: three release components minimum, trailing zero
    /// components beyond the third dropped, prerelease preserved, build
    /// metadata dropped.
    pub fn to_normalized_string(&self) -> String {
        let mut release = self.release.clone();
        while release.len() < 3 {
            release.push(0);
        }
        while release.len() > 3 && release.last() == Some(&0) {
            release.pop();
        }
        let mut out = release.iter().map(u64::to_string).collect::<Vec<_>>().join(".");
        if !self.prerelease.is_empty() {
            out.push('-');
            out.push_str(&self.prerelease_string());
        }
        out
    }

    fn prerelease_string(&self) -> String {
        self.prerelease
            .iter()
            .map(|id| match id {
                Identifier::Numeric(n) => n.to_string(),
                Identifier::Alpha(s) => s.clone(),
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Release component at `index`, treating missing components as zero.
    fn release_component(&self, index: usize) -> u64 {
        self.release.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for PackageVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let original = s.trim();
        let invalid = || ErrorKind::InvalidVersion { value: s.to_string() };
        if original.is_empty() {
            exn::bail!(invalid());
        }

        let (rest, build) = match original.split_once('+') {
            Some((rest, build)) => {
                if build.is_empty() || !build.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.') {
                    exn::bail!(invalid());
                }
                (rest, Some(build.to_string()))
            },
            None => (original, None),
        };

        let (release_str, prerelease_str) = match rest.split_once('-') {
            Some((release, prerelease)) => (release, Some(prerelease)),
            None => (rest, None),
        };

        let release = release_str
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(Error::from(invalid()));
                }
                part.parse::<u64>().map_err(|_| Error::from(invalid()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if release.is_empty() || release.len() > 4 {
            exn::bail!(invalid());
        }

        let prerelease = match prerelease_str {
            Some(pre) => {
                if pre.is_empty() {
                    exn::bail!(invalid());
                }
                pre.split('.')
                    .map(|id| {
                        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
                            return Err(Error::from(invalid()));
                        }
                        Ok(Identifier::parse(id))
                    })
                    .collect::<Result<Vec<_>, _>>()?
            },
            None => Vec::new(),
        };

        Ok(Self {
            original: original.to_string(),
            release,
            prerelease,
            build,
        })
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let components = self.release.len().max(other.release.len());
        for i in 0..components {
            match self.release_component(i).cmp(&other.release_component(i)) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        // A release-only version has higher precedence than any prerelease
        // of the same release.
        match (self.prerelease.is_empty(), other.prerelease.is_empty()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {},
        }
        for (a, b) in self.prerelease.iter().zip(&other.prerelease) {
            match a.cmp_insensitive(b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        self.prerelease.len().cmp(&other.prerelease.len())
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

impl Hash for PackageVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Consistent with `eq`: trailing zero components and build metadata
        // must not influence the hash.
        let mut release = self.release.as_slice();
        while let [head @ .., 0] = release {
            release = head;
        }
        release.hash(state);
        for id in &self.prerelease {
            match id {
                Identifier::Numeric(n) => n.hash(state),
                Identifier::Alpha(s) => s.to_ascii_lowercase().hash(state),
            }
        }
    }
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.original)
    }
}

impl Serialize for PackageVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.original)
    }
}

impl<'de> Deserialize<'de> for PackageVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| D::Error::custom(format!("invalid version: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> PackageVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_release_forms() {
        assert_eq!(v("1.11").to_normalized_string(), "1.11.0");
        assert_eq!(v("1.9").to_normalized_string(), "1.9.0");
        assert_eq!(v("2.0.0").to_normalized_string(), "2.0.0");
        assert_eq!(v("1.0.0.1").to_normalized_string(), "1.0.0.1");
        assert_eq!(v("1.0.0.0").to_normalized_string(), "1.0.0");
        assert_eq!(v("3").to_normalized_string(), "3.0.0");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "banana", "1.", ".1", "1..2", "1.0-", "1.0+", "1.0-beta..1", "1.0.0.0.0", "1.a.0", "-1.0"] {
            assert!(bad.parse::<PackageVersion>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_ordering() {
        assert!(v("1.9") < v("1.11"));
        assert!(v("2.0-alpha") < v("2.0.0"));
        assert!(v("2.0.0-0test") < v("2.0.0-test"));
        assert!(v("2.0.0-test") < v("2.0.0"));
        assert!(v("2.0.0") < v("2.0.1"));
        // Numeric identifiers sort below alphanumeric ones
        assert!(v("1.0-1") < v("1.0-alpha"));
        // Longer identifier list wins on equal prefix
        assert!(v("1.0-beta") < v("1.0-beta.1"));
        assert!(v("1.0-beta.1") < v("1.0-beta.2"));
    }

    #[test]
    fn test_equality_ignores_build_metadata() {
        assert_eq!(v("2.0.0+tag"), v("2.0.0"));
        assert_eq!(v("2.0.0-test+tag"), v("2.0.0-test"));
        assert_ne!(v("2.0.0-test"), v("2.0.0"));
    }

    #[test]
    fn test_equality_pads_missing_components() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert_eq!(v("1.0"), v("1.0.0.0"));
        assert_ne!(v("1.0"), v("1.0.0.1"));
    }

    #[test]
    fn test_prerelease_comparison_is_case_insensitive() {
        assert_eq!(v("3.5.0-beta2"), v("3.5.0-BETA2"));
    }

    #[test]
    fn test_hash_agrees_with_eq() {
        use std::collections::HashSet;
        let set: HashSet<PackageVersion> =
            ["2.0.0", "2.0.0+tag", "2.0", "1.0.0", "1.0"].iter().map(|s| v(s)).collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_semver2_detection() {
        assert!(!v("1.0").is_semver2());
        assert!(!v("1.0-beta").is_semver2());
        assert!(v("1.0-beta.1").is_semver2());
        assert!(v("1.0-beta+foo").is_semver2());
        assert!(v("1.0+tag").is_semver2());
    }

    #[test]
    fn test_normalization_keeps_prerelease() {
        assert_eq!(v("2.0-alpha").to_normalized_string(), "2.0.0-alpha");
        assert_eq!(v("2.0.0-test+tag").to_normalized_string(), "2.0.0-test");
    }

    #[test]
    fn test_serde_round_trips_original() {
        let version = v("2.0.0-test+tag");
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, "\"2.0.0-test+tag\"");
        let back: PackageVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back.original(), "2.0.0-test+tag");
        assert_eq!(back.build_metadata(), Some("tag"));
    }
}
