//! Archive Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The file is not a readable zip container.
    #[display("not a valid package archive")]
    InvalidArchive,
    /// The archive carries no top-level `.nuspec` manifest.
    #[display("archive has no manifest")]
    MissingManifest,
    /// The manifest XML is malformed.
    #[display("malformed manifest: {_0}")]
    ManifestXml(#[error(not(source))] String),
    /// A required manifest field could not be found.
    #[display("missing required manifest field: {_0}")]
    MissingField(#[error(not(source))] &'static str),
    /// A version string could not be parsed.
    #[display("invalid version: {value}")]
    InvalidVersion {
        /// The offending input.
        value: String,
    },
    /// A version range string could not be parsed.
    #[display("invalid version range: {value}")]
    InvalidRange {
        /// The offending input.
        value: String,
    },
    /// An archive entry exceeds the size cap.
    #[display("archive entry too large: {_0}")]
    EntryTooLarge(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // An archive either parses or it doesn't.
        matches!(self, Self::Io(_))
    }
}
