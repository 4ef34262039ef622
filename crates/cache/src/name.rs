//! Cache filename validation.

use crate::error::{ErrorKind, Result};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::Path;

/// Suffix every cache file carries.
const SUFFIX: &str = ".cache.bin";

/// Characters that can never appear in a bare filename on the platforms the
/// feed runs on.
const FORBIDDEN: [char; 9] = ['/', '\\', ':', '<', '>', '"', '|', '?', '*'];

/// A validated cache filename.
///
/// The cache file lives directly under the repository root, so the
/// configured name must be a bare filename — no separators, no drive
/// prefixes, no reserved characters. `.cache.bin` is appended when missing.
///
/// # Examples
///
/// ```
/// use packrat_cache::CacheFileName;
///
/// let name = CacheFileName::new("myfeed").unwrap();
/// assert_eq!(name.as_str(), "myfeed.cache.bin");
/// assert!(CacheFileName::new("foo:bar/baz").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFileName(String);

impl CacheFileName {
    /// Validate a configured filename.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidFileName`](ErrorKind::InvalidFileName) naming the
    /// offending value when the input is empty, is a dot-name, or contains
    /// separators/reserved/control characters.
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref().trim();
        let invalid = || ErrorKind::InvalidFileName(name.to_string());
        if name.is_empty() || name == "." || name == ".." {
            exn::bail!(invalid());
        }
        if name.chars().any(|c| FORBIDDEN.contains(&c) || c.is_control()) {
            exn::bail!(invalid());
        }
        let mut name = name.to_string();
        if !name.ends_with(SUFFIX) {
            name.push_str(SUFFIX);
        }
        Ok(Self(name))
    }

    /// The default name, derived from this machine's hostname so feeds
    /// sharing one package tree over a network mount don't clobber each
    /// other's caches.
    pub fn default_name() -> Self {
        let machine = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .ok()
            .filter(|name| Self::new(name.as_str()).is_ok())
            .unwrap_or_else(|| "packrat".to_string());
        Self(format!("{machine}{SUFFIX}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl Display for CacheFileName {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}
