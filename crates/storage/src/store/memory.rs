//! In-memory store for testing.

use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::FileMetaStream;
use crate::error::{ErrorKind, Result};
use crate::file::FileMeta;
use crate::path::validate as validate_path;
use crate::store::FileStore;

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    created: OffsetDateTime,
    modified: OffsetDateTime,
    hidden: bool,
}

impl Entry {
    fn new(data: Vec<u8>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self { data, created: now, modified: now, hidden: false }
    }

    fn meta(&self, path: &Path) -> FileMeta {
        FileMeta {
            path: path.to_path_buf(),
            size: self.data.len() as u64,
            created: self.created,
            modified: self.modified,
            hidden: self.hidden,
        }
    }
}

/// In-memory store for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Ideal for unit
/// tests that need a [`FileStore`] without touching a real filesystem.
///
/// # Examples
///
/// ```
/// use packrat_storage::FileStore;
/// use packrat_storage::store::MemoryStore;
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryStore::with_files([
///     ("serilog/2.0.0/serilog.2.0.0.nupkg", b"PK..."),
/// ]);
/// assert!(store.exists(Path::new("serilog/2.0.0/serilog.2.0.0.nupkg")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MemoryStore {
    root: PathBuf,
    storage: RwLock<HashMap<PathBuf, Entry>>,
}

impl MemoryStore {
    /// Create a memory store pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, the test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                // The panic here is DELIBERATE. MemoryStore is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MemoryStore::with_files: invalid path {}", path.display());
            };
            map.insert(validated, Entry::new(data.into()));
        }
        Self {
            root: PathBuf::from("/memory"),
            storage: RwLock::new(map),
        }
    }

}

impl Default for MemoryStore {
    fn default() -> Self {
        let files: [(&str, &[u8]); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>, recursive: bool) -> FileMetaStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            // Snapshot matching entries under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let entries: Vec<FileMeta> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(path, _)| {
                        let in_prefix = match &validated_prefix {
                            Some(pfx) => path.starts_with(pfx),
                            None => true,
                        };
                        let depth_ok = recursive || {
                            let parent = match &validated_prefix {
                                Some(pfx) => path.strip_prefix(pfx).ok(),
                                None => Some(path.as_path()),
                            };
                            parent.is_some_and(|rest| rest.components().count() == 1)
                        };
                        in_prefix && depth_ok
                    })
                    .map(|(path, entry)| entry.meta(path))
                    .collect()
            };
            for meta in entries {
                yield Ok(meta);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let entry = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(entry.data.clone())
    }

    async fn reader(&self, path: &Path) -> Result<Box<dyn std::io::Read + Send + 'static>> {
        let data = self.read(path).await?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        let mut guard = self.storage.write().await;
        match guard.get_mut(&path) {
            Some(entry) => {
                entry.data = data.to_vec();
                entry.modified = OffsetDateTime::now_utc();
            },
            None => {
                guard.insert(path, Entry::new(data.to_vec()));
            },
        }
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = validate_path(from)?;
        let to = validate_path(to)?;
        let mut guard = self.storage.write().await;
        let entry = guard.remove(&from).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(from)))?;
        guard.insert(to, entry);
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        self.storage
            .write()
            .await
            .remove(&path)
            .map(|_| ())
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn delete_dir(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        self.storage.write().await.retain(|p, _| !p.starts_with(&path));
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileMeta> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let entry = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(entry.meta(&path))
    }

    async fn set_hidden(&self, path: &Path, hidden: bool) -> Result<()> {
        let path = validate_path(path)?;
        let mut guard = self.storage.write().await;
        let entry = guard.get_mut(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        entry.hidden = hidden;
        Ok(())
    }

    async fn is_hidden(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let entry = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(entry.hidden)
    }
}
