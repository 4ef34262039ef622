//! Path validation and security utilities.
//!
//! Every path handed to a store comes from one of two places: the engine's
//! own layout code (which derives clean `<id-lower>/<version>/<file>`
//! paths) or an external caller relaying client input. Neither has any
//! business containing parent references, absolute components or drive
//! prefixes, so validation rejects those outright rather than resolving
//! them — a `..` in a store path is always either a bug or an escape
//! attempt.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a store path for security and correctness.
///
/// Accepted paths are purely relative: one or more normal segments, with
/// redundant separators and bare `.` segments normalized away. Rejected
/// with [`InvalidPath`](crate::error::ErrorKind::InvalidPath):
///
/// - empty paths (or paths that normalize to empty),
/// - any `..` segment, even one that would stay inside the root,
/// - absolute paths and platform drive/UNC prefixes,
/// - segments containing NUL bytes.
///
/// Recognizing the feed's canonical package layout is a separate,
/// stricter predicate owned by the layout layer; this function only
/// guarantees a path can't address anything outside the store root.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use packrat_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("serilog/2.0.0/serilog.2.0.0.nupkg").is_ok());
/// assert!(validate_path("dropped.nupkg").is_ok());
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../file.nupkg").is_err()); // no resolving, even inside the root
/// assert!(validate_path("/etc/passwd").is_err());
/// assert!(validate_path("a\0b").is_err());
/// // Separator noise is normalized
/// assert_eq!(
///     validate_path("serilog//2.0.0/./serilog.2.0.0.nupkg/").unwrap(),
///     Path::new("serilog/2.0.0/serilog.2.0.0.nupkg")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut normalized = PathBuf::new();
    let mut segments = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(segment) => {
                // NUL bytes survive Path::components() on Unix but truncate
                // in C-based syscalls — reject them explicitly.
                if segment.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
                normalized.push(segment);
                segments += 1;
            },
            // Bare "." segments are separator noise.
            Component::CurDir => {},
            // Nothing the engine derives ever carries these; refuse instead
            // of resolving.
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
            },
        }
    }
    if segments == 0 {
        exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
    }
    Ok(normalized)
}
