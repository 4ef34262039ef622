//! Version range parsing and matching.

use crate::error::{Error, ErrorKind};
use crate::models::PackageVersion;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// A version range in interval notation.
///
/// A bare version is an inclusive minimum with no upper bound (`1.0` means
/// "1.0 or anything newer"); bracket notation gives explicit bounds:
/// `[1.0]` exactly 1.0, `[1.0,2.0)` at least 1.0 and below 2.0, `(,1.5]`
/// anything up to and including 1.5. The source text is preserved for serde
/// round-trips.
///
/// # Examples
///
/// ```
/// use packrat_nupkg::models::{PackageVersion, VersionRange};
///
/// let range: VersionRange = "[1.0,2.0)".parse().unwrap();
/// let v = |s: &str| s.parse::<PackageVersion>().unwrap();
/// assert!(range.satisfies(&v("1.0")));
/// assert!(range.satisfies(&v("1.5.3")));
/// assert!(!range.satisfies(&v("2.0")));
/// ```
#[derive(Debug, Clone)]
pub struct VersionRange {
    original: String,
    min: Option<Bound>,
    max: Option<Bound>,
}

#[derive(Debug, Clone)]
struct Bound {
    version: PackageVersion,
    inclusive: bool,
}

impl VersionRange {
    /// Whether `version` falls inside the range.
    pub fn satisfies(&self, version: &PackageVersion) -> bool {
        if let Some(min) = &self.min {
            let ok = match min.inclusive {
                true => *version >= min.version,
                false => *version > min.version,
            };
            if !ok {
                return false;
            }
        }
        if let Some(max) = &self.max {
            let ok = match max.inclusive {
                true => *version <= max.version,
                false => *version < max.version,
            };
            if !ok {
                return false;
            }
        }
        true
    }

    /// A range is SemVer2-only when either bound is a SemVer2 version.
    pub fn is_semver2(&self) -> bool {
        self.min.as_ref().is_some_and(|b| b.version.is_semver2())
            || self.max.as_ref().is_some_and(|b| b.version.is_semver2())
    }

    /// The exact range string this value was parsed from.
    pub fn original(&self) -> &str {
        &self.original
    }
}

impl FromStr for VersionRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let original = s.trim();
        let invalid = || ErrorKind::InvalidRange { value: s.to_string() };

        let starts_open = original.starts_with('(');
        let starts_closed = original.starts_with('[');
        if !starts_open && !starts_closed {
            // Bare version: inclusive minimum, unbounded above.
            let version: PackageVersion = original.parse().map_err(|_| Error::from(invalid()))?;
            return Ok(Self {
                original: original.to_string(),
                min: Some(Bound { version, inclusive: true }),
                max: None,
            });
        }

        let ends_open = original.ends_with(')');
        let ends_closed = original.ends_with(']');
        if !ends_open && !ends_closed {
            exn::bail!(invalid());
        }
        let inner = &original[1..original.len() - 1];

        let parse = |part: &str| -> Result<Option<PackageVersion>, Error> {
            let part = part.trim();
            if part.is_empty() {
                return Ok(None);
            }
            part.parse().map(Some).map_err(|_| Error::from(invalid()))
        };

        let (min, max) = match inner.split_once(',') {
            None => {
                // Exact pin requires inclusive brackets on both sides.
                if starts_open || ends_open {
                    exn::bail!(invalid());
                }
                let Some(version) = parse(inner)? else {
                    exn::bail!(invalid());
                };
                let bound = Bound { version, inclusive: true };
                (Some(bound.clone()), Some(bound))
            },
            Some((lo, hi)) => {
                let min = parse(lo)?.map(|version| Bound { version, inclusive: starts_closed });
                let max = parse(hi)?.map(|version| Bound { version, inclusive: ends_closed });
                if min.is_none() && max.is_none() {
                    exn::bail!(invalid());
                }
                (min, max)
            },
        };

        Ok(Self { original: original.to_string(), min, max })
    }
}

impl PartialEq for VersionRange {
    /// Ranges compare textually; `[1.0,2.0)` and `[1.0.0,2.0)` are distinct.
    fn eq(&self, other: &Self) -> bool {
        self.original == other.original
    }
}

impl Eq for VersionRange {}

impl Display for VersionRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.original)
    }
}

impl Serialize for VersionRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.original)
    }
}

impl<'de> Deserialize<'de> for VersionRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| D::Error::custom(format!("invalid version range: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> PackageVersion {
        s.parse().unwrap()
    }

    fn r(s: &str) -> VersionRange {
        s.parse().unwrap()
    }

    #[test]
    fn test_bare_version_is_inclusive_minimum() {
        let range = r("1.0");
        assert!(!range.satisfies(&v("0.9")));
        assert!(range.satisfies(&v("1.0")));
        assert!(range.satisfies(&v("99.0")));
    }

    #[test]
    fn test_exact_pin() {
        let range = r("[1.0]");
        assert!(range.satisfies(&v("1.0")));
        assert!(range.satisfies(&v("1.0.0")));
        assert!(!range.satisfies(&v("1.0.1")));
    }

    #[test]
    fn test_half_open_interval() {
        let range = r("[1.0,2.0)");
        assert!(range.satisfies(&v("1.0")));
        assert!(range.satisfies(&v("1.9.9")));
        assert!(!range.satisfies(&v("2.0")));
    }

    #[test]
    fn test_open_lower_bound() {
        let range = r("(1.0,2.0]");
        assert!(!range.satisfies(&v("1.0")));
        assert!(range.satisfies(&v("1.0.1")));
        assert!(range.satisfies(&v("2.0")));
    }

    #[test]
    fn test_unbounded_sides() {
        assert!(r("(,1.5]").satisfies(&v("0.1")));
        assert!(r("(,1.5]").satisfies(&v("1.5")));
        assert!(!r("(,1.5]").satisfies(&v("1.6")));
        assert!(r("[1.0,)").satisfies(&v("42.0")));
    }

    #[test]
    fn test_invalid_ranges() {
        for bad in ["", "[1.0", "1.0]", "(1.0)", "[,]", "[banana]", "[1.0,nope]"] {
            assert!(bad.parse::<VersionRange>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_semver2_detection() {
        assert!(!r("[1.0,2.0)").is_semver2());
        assert!(r("[1.0-beta.1,2.0)").is_semver2());
        assert!(r("[1.0,2.0+tag)").is_semver2());
    }

    #[test]
    fn test_serde_round_trips_original() {
        let json = serde_json::to_string(&r("[1.0, 2.0)")).unwrap();
        assert_eq!(json, "\"[1.0, 2.0)\"");
        let back: VersionRange = serde_json::from_str(&json).unwrap();
        assert!(back.satisfies(&v("1.5")));
    }
}
