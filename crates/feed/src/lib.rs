//! The package repository engine.
//!
//! [`PackageFeed`] keeps an in-memory catalog consistent with a directory of
//! package archives under concurrent reads, API pushes and deletes,
//! drop-folder ingestion, and external filesystem mutations. The catalog is
//! rebuilt from disk whenever it can't be trusted; a JSON cache file makes
//! restarts fast but is never the source of truth.
//!
//! The HTTP/OData layer is an external consumer of this crate: it talks to
//! [`PackageFeed`] and nothing else.

pub mod config;
mod engine;
pub mod error;
mod layout;
pub mod query;

pub use crate::config::FeedConfig;
pub use crate::engine::PackageFeed;
pub use crate::layout::{IngestedArchive, PackageLayout};
pub use crate::query::{ClientCompatibility, UpdateCandidate};

// The cancellation token every public engine operation takes.
pub use tokio_util::sync::CancellationToken;
