//! Store trait and implementations.
//!
//! This module defines the [`FileStore`] trait, a root-scoped filesystem
//! interface the repository engine is written against. The production
//! implementation is [`LocalStore`]; tests swap in [`MemoryStore`].

mod local;
#[cfg(any(test, feature = "memory"))]
mod memory;

pub use self::local::LocalStore;
#[cfg(any(test, feature = "memory"))]
pub use self::memory::MemoryStore;
use crate::error::Result;
use crate::file::FileMeta;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::io::Read;
use std::path::Path;
use std::pin::Pin;

pub type FileMetaStream<'a> = Pin<Box<dyn Stream<Item = Result<FileMeta>> + Send + 'a>>;
type BoxSyncRead = Box<dyn Read + Send + 'static>;

/// Root-scoped file storage.
///
/// All operations are asynchronous and take paths **relative to the store
/// root**; every implementation validates paths with
/// [`validate_path`](crate::validate_path) so nothing can escape the root.
///
/// The hidden attribute is the store's delisting primitive: callers only
/// ever speak [`set_hidden`](Self::set_hidden) / [`is_hidden`](Self::is_hidden),
/// and each implementation maps that onto whatever its platform offers.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use packrat_storage::{FileStore, error::Result};
///
/// async fn size_of(store: &dyn FileStore, path: &str) -> Result<u64> {
///     let path = PathBuf::from(path);
///     if store.exists(&path).await? {
///         Ok(store.stat(&path).await?.size)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Absolute root path this store is scoped to.
    ///
    /// Exposed to callers as the feed's source; never used to bypass the
    /// relative-path operations.
    fn root(&self) -> &Path;

    /// Stream file metadata under an optional prefix.
    ///
    /// Yields results incrementally. When `recursive` is `false`, only
    /// direct children of the prefix (or the root) are yielded; directories
    /// are never yielded in either mode.
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>, recursive: bool) -> FileMetaStream<'a>;

    /// Collect [`list_stream`](Self::list_stream) into a `Vec`.
    async fn list(&self, prefix: Option<&Path>, recursive: bool) -> Result<Vec<FileMeta>> {
        self.list_stream(prefix, recursive).try_collect().await
    }

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read complete file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Open a file for streaming reads.
    ///
    /// Returns a `'static` boxed [`Read`](std::io::Read) suitable for use
    /// inside [`spawn_blocking`](tokio::task::spawn_blocking); the async
    /// setup (opening the file) happens before returning.
    async fn reader(&self, path: &Path) -> Result<BoxSyncRead>;

    /// Write file contents, creating parent directories as needed.
    ///
    /// Overwrites an existing file at the same path.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Rename/move a file within the store.
    ///
    /// Creates parent directories as needed; an existing destination is
    /// overwritten. Returns [`NotFound`](crate::error::ErrorKind::NotFound)
    /// if the source does not exist.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Delete a directory and everything under it.
    ///
    /// Deleting a directory that doesn't exist is a no-op.
    async fn delete_dir(&self, path: &Path) -> Result<()>;

    /// Get file metadata without reading contents.
    async fn stat(&self, path: &Path) -> Result<FileMeta>;

    /// Set or clear the hidden attribute on a file.
    async fn set_hidden(&self, path: &Path, hidden: bool) -> Result<()>;

    /// Whether the hidden attribute is set on a file.
    async fn is_hidden(&self, path: &Path) -> Result<bool>;
}
