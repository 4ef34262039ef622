//! Cache Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The configured cache filename is not a bare, legal filename.
    #[display("invalid cache filename: {_0:?}")]
    InvalidFileName(#[error(not(source))] String),
    /// The catalog could not be serialized.
    #[display("failed to serialize cache document")]
    Serialize,
    /// Reading or writing the cache file failed.
    #[display("cache storage operation failed")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }
}
