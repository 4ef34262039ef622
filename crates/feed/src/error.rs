//! Feed Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. These are the kinds the HTTP layer maps onto wire
//! responses, so they describe what the caller should *do*.

use derive_more::{Display, Error};

/// A feed error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for feed operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Empty id, malformed version, or similar caller mistake.
    #[display("invalid argument: {_0}")]
    InvalidArgument(#[error(not(source))] String),
    /// The requested package does not exist.
    #[display("package {id} {version} does not exist")]
    NotFound {
        id: String,
        version: String,
    },
    /// Add of an existing package with overwrite disabled.
    #[display("package {id} {version} already exists")]
    AlreadyExists {
        id: String,
        version: String,
    },
    /// Add of a symbols archive under the ignore-symbols policy.
    #[display("symbols packages are not accepted: {_0}")]
    SymbolsRejected(#[error(not(source))] String),
    /// A configuration value is unusable.
    #[display("invalid configuration: {_0}")]
    InvalidConfiguration(#[error(not(source))] String),
    /// The uploaded bytes are not a readable package archive.
    #[display("package archive could not be read")]
    Archive,
    /// A store operation failed.
    #[display("storage operation failed")]
    Storage,
    /// A catalog/cache operation failed.
    #[display("cache operation failed")]
    Cache,
    /// The caller's cancellation token fired.
    #[display("operation cancelled")]
    Cancelled,
    /// An invariant failed during rebuild; logged and propagated.
    #[display("internal error: {_0}")]
    Internal(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Cache | Self::Cancelled)
    }
}
