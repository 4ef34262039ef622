//! Target framework identifiers and compatibility rules.
//!
//! Frameworks arrive from two places: short folder names inside archives
//! (`lib/net45/`, `lib/netstandard2.0/`) and the longer identifiers nuspec
//! dependency groups use (`.NETFramework4.5`, `.NETStandard2.0`). Both parse
//! into the same [`TargetFramework`] value.
//!
//! The compatibility rules here cover the cases a feed's search filter
//! needs; they are deliberately a small table, not a full framework
//! reducer.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// The framework family a target framework belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameworkName {
    /// Classic .NET Framework (`net45`, `net472`).
    NetFramework,
    /// .NET Standard (`netstandard2.0`).
    NetStandard,
    /// .NET Core (`netcoreapp3.1`).
    NetCoreApp,
    /// Modern .NET, 5 and up (`net6.0`).
    Net,
    /// Matches everything (`any`, `dotnet`).
    Any,
    /// Unrecognized family; compatible only with itself.
    Other(String),
}

/// A parsed target framework.
///
/// Equality is on the parsed (family, version) pair, so `.NETStandard2.0`
/// and `netstandard2.0` compare equal; the original spelling is preserved
/// for display.
#[derive(Debug, Clone)]
pub struct TargetFramework {
    name: FrameworkName,
    version: Vec<u64>,
    original: String,
}

impl PartialEq for TargetFramework {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.version_cmp(other) == Ordering::Equal
    }
}

impl Eq for TargetFramework {}

impl std::hash::Hash for TargetFramework {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        // Trailing zeros must not influence the hash (net4.5 == net4.5.0).
        let mut version = self.version.as_slice();
        while let [head @ .., 0] = version {
            version = head;
        }
        version.hash(state);
    }
}

impl TargetFramework {
    /// The framework family.
    pub fn name(&self) -> &FrameworkName {
        &self.name
    }

    /// The exact string this value was parsed from.
    pub fn original(&self) -> &str {
        &self.original
    }

    fn version_cmp(&self, other: &Self) -> Ordering {
        cmp_versions(&self.version, &other.version)
    }
}

fn cmp_versions(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        match a.get(i).copied().unwrap_or(0).cmp(&b.get(i).copied().unwrap_or(0)) {
            Ordering::Equal => continue,
            unequal => return unequal,
        }
    }
    Ordering::Equal
}

impl FromStr for TargetFramework {
    type Err = ();

    /// Parsing is lenient: anything unrecognized becomes
    /// [`FrameworkName::Other`] rather than an error, so one odd folder name
    /// inside an archive never fails the whole read. The only rejected input
    /// is an empty string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let original = s.trim();
        if original.is_empty() {
            return Err(());
        }
        // ".NETStandard2.0" and "netstandard2.0" are the same framework.
        let mut lower = original.to_ascii_lowercase();
        if let Some(stripped) = lower.strip_prefix('.') {
            lower = stripped.to_string();
        }
        // Platform suffixes ("net6.0-windows") don't affect feed-level rules.
        let lower = match lower.split_once('-') {
            Some((base, _platform)) => base.to_string(),
            None => lower,
        };

        let (name, version) = if lower == "any" || lower == "dotnet" {
            (FrameworkName::Any, Vec::new())
        } else if let Some(rest) = lower.strip_prefix("netstandard") {
            (FrameworkName::NetStandard, parse_dotted(rest))
        } else if let Some(rest) = lower.strip_prefix("netcoreapp") {
            (FrameworkName::NetCoreApp, parse_dotted(rest))
        } else if let Some(rest) = lower.strip_prefix("netframework") {
            (FrameworkName::NetFramework, parse_dotted(rest))
        } else if let Some(rest) = lower.strip_prefix("net") {
            if rest.contains('.') {
                // Dotted form is modern .NET ("net6.0").
                (FrameworkName::Net, parse_dotted(rest))
            } else if rest.bytes().all(|b| b.is_ascii_digit()) && !rest.is_empty() {
                // Compact form is classic framework: "net45" reads digit by
                // digit as 4.5, "net472" as 4.7.2. A lone "net5"+ is modern.
                let digits = rest.bytes().map(|b| u64::from(b - b'0')).collect::<Vec<_>>();
                if digits.len() == 1 && digits[0] >= 5 {
                    (FrameworkName::Net, digits)
                } else {
                    (FrameworkName::NetFramework, digits)
                }
            } else {
                (FrameworkName::Other(lower.clone()), Vec::new())
            }
        } else {
            (FrameworkName::Other(lower.clone()), Vec::new())
        };

        Ok(Self { name, version, original: original.to_string() })
    }
}

impl Display for TargetFramework {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.original)
    }
}

/// Whether a package built for `package` can be consumed by a project
/// targeting `project`.
pub fn compatible(project: &TargetFramework, package: &TargetFramework) -> bool {
    match (&project.name, &package.name) {
        (FrameworkName::Any, _) | (_, FrameworkName::Any) => true,
        (a, b) if a == b => package.version_cmp(project) != Ordering::Greater,
        // netstandard libraries are consumable from the platforms that
        // implement the standard, up to a per-platform ceiling.
        (consumer, FrameworkName::NetStandard) => match max_netstandard(consumer, &project.version) {
            Some(ceiling) => cmp_versions(&package.version, &ceiling) != Ordering::Greater,
            None => false,
        },
        _ => false,
    }
}

/// Highest netstandard version the given platform implements.
fn max_netstandard(name: &FrameworkName, version: &[u64]) -> Option<Vec<u64>> {
    let major = version.first().copied().unwrap_or(0);
    match name {
        FrameworkName::Net => Some(vec![2, 1]),
        FrameworkName::NetCoreApp if major >= 3 => Some(vec![2, 1]),
        FrameworkName::NetCoreApp if major >= 2 => Some(vec![2, 0]),
        FrameworkName::NetCoreApp => Some(vec![1, 6]),
        FrameworkName::NetFramework => {
            // 4.6.1 is the first classic framework with netstandard 2.0.
            if cmp_versions(version, &[4, 6, 1]) != Ordering::Less {
                Some(vec![2, 0])
            } else if cmp_versions(version, &[4, 5]) != Ordering::Less {
                Some(vec![1, 1])
            } else {
                None
            }
        },
        _ => None,
    }
}

fn parse_dotted(s: &str) -> Vec<u64> {
    s.split('.').filter_map(|part| part.parse().ok()).collect()
}
