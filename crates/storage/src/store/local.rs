//! Local filesystem store.
//!
//! Files live in a configured root directory and are accessed with
//! `tokio::fs` for async I/O. The hidden attribute is represented by a
//! zero-byte `<file>.hidden` marker next to the file, which keeps the
//! behaviour identical across platforms; marker files never appear in
//! listings.

use async_stream::stream;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

use super::FileMetaStream;
use crate::error::{ErrorKind, Result};
use crate::file::FileMeta;
use crate::path::validate as validate_path;
use crate::store::FileStore;

/// Extension of hidden-attribute marker files.
const HIDDEN_MARKER_EXT: &str = "hidden";

/// Local filesystem store.
///
/// # Examples
///
/// ```no_run
/// use packrat_storage::store::LocalStore;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = LocalStore::new("/srv/packages")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalStore {
    /// Root directory of the package tree
    root: PathBuf,
}

impl LocalStore {
    /// Create a new local filesystem store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPath`](crate::error::ErrorKind::InvalidPath) if the
    /// path is not absolute.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root.to_path_buf()));
        }
        Ok(Self { root: root.to_path_buf() })
    }

    /// Get the absolute path for a relative store path.
    ///
    /// Validates the path and joins it with the root directory.
    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        Ok(self.root.join(validate_path(path)?))
    }

    /// Convert an absolute path back to a relative store path.
    fn relative_path(&self, absolute: impl AsRef<Path>) -> Result<PathBuf> {
        let absolute = absolute.as_ref();
        match absolute.strip_prefix(&self.root) {
            Ok(relative) => Ok(relative.to_path_buf()),
            Err(_) => exn::bail!(ErrorKind::InvalidPath(absolute.to_path_buf())),
        }
    }

    fn marker_path(absolute: &Path) -> PathBuf {
        let mut os = OsString::from(absolute.as_os_str());
        os.push(".");
        os.push(HIDDEN_MARKER_EXT);
        PathBuf::from(os)
    }

    fn is_marker(path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == HIDDEN_MARKER_EXT)
    }

    async fn file_meta(&self, absolute: &Path) -> Result<FileMeta> {
        let relative = self.relative_path(absolute)?;
        let meta = tokio::fs::metadata(absolute).await.map_err(|e| ErrorKind::io(&relative, e))?;
        let modified = meta
            .modified()
            .map(OffsetDateTime::from)
            .unwrap_or_else(|_| OffsetDateTime::UNIX_EPOCH);
        // Not every filesystem records creation time.
        let created = meta.created().map(OffsetDateTime::from).unwrap_or(modified);
        let hidden = tokio::fs::try_exists(Self::marker_path(absolute)).await.unwrap_or(false);
        Ok(FileMeta {
            path: relative,
            size: meta.len(),
            created,
            modified,
            hidden,
        })
    }

    async fn ensure_parent(&self, absolute: &Path, relative: &Path) -> Result<()> {
        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| ErrorKind::io(relative, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl FileStore for LocalStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>, recursive: bool) -> FileMetaStream<'a> {
        let start = match prefix.map(|p| self.absolute_path(p)).transpose() {
            Ok(p) => p.unwrap_or_else(|| self.root.clone()),
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        Box::pin(stream! {
            let mut pending = vec![start];
            while let Some(dir) = pending.pop() {
                let mut entries = match tokio::fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    // A missing prefix directory is an empty listing, not an error.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => {
                        yield Err(exn::Exn::from(ErrorKind::Io(e)));
                        continue;
                    },
                };
                loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        Err(e) => {
                            yield Err(exn::Exn::from(ErrorKind::Io(e)));
                            break;
                        },
                    };
                    let path = entry.path();
                    let file_type = match entry.file_type().await {
                        Ok(t) => t,
                        Err(e) => {
                            yield Err(exn::Exn::from(ErrorKind::Io(e)));
                            continue;
                        },
                    };
                    if file_type.is_dir() {
                        if recursive {
                            pending.push(path);
                        }
                        continue;
                    }
                    if Self::is_marker(&path) {
                        continue;
                    }
                    yield self.file_meta(&path).await;
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs = self.absolute_path(path)?;
        Ok(tokio::fs::try_exists(&abs).await.map_err(ErrorKind::Io)?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs = self.absolute_path(path)?;
        Ok(tokio::fs::read(&abs).await.map_err(|e| ErrorKind::io(path, e))?)
    }

    async fn reader(&self, path: &Path) -> Result<Box<dyn std::io::Read + Send + 'static>> {
        let abs = self.absolute_path(path)?;
        let file = std::fs::File::open(&abs).map_err(|e| ErrorKind::io(path, e))?;
        Ok(Box::new(file))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs = self.absolute_path(path)?;
        self.ensure_parent(&abs, path).await?;
        Ok(tokio::fs::write(&abs, data).await.map_err(|e| ErrorKind::io(path, e))?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let abs_from = self.absolute_path(from)?;
        let abs_to = self.absolute_path(to)?;
        self.ensure_parent(&abs_to, to).await?;
        Ok(tokio::fs::rename(&abs_from, &abs_to).await.map_err(|e| ErrorKind::io(from, e))?)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs = self.absolute_path(path)?;
        tokio::fs::remove_file(&abs).await.map_err(|e| ErrorKind::io(path, e))?;
        // Drop a stale hidden marker along with its file.
        _ = tokio::fs::remove_file(Self::marker_path(&abs)).await;
        Ok(())
    }

    async fn delete_dir(&self, path: &Path) -> Result<()> {
        let abs = self.absolute_path(path)?;
        match tokio::fs::remove_dir_all(&abs).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ErrorKind::io(path, e).into()),
        }
    }

    async fn stat(&self, path: &Path) -> Result<FileMeta> {
        let abs = self.absolute_path(path)?;
        self.file_meta(&abs).await
    }

    async fn set_hidden(&self, path: &Path, hidden: bool) -> Result<()> {
        let abs = self.absolute_path(path)?;
        if !tokio::fs::try_exists(&abs).await.map_err(ErrorKind::Io)? {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let marker = Self::marker_path(&abs);
        if hidden {
            tokio::fs::write(&marker, b"").await.map_err(|e| ErrorKind::io(path, e))?;
        } else {
            match tokio::fs::remove_file(&marker).await {
                Ok(()) => {},
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => return Err(ErrorKind::io(path, e).into()),
            }
        }
        Ok(())
    }

    async fn is_hidden(&self, path: &Path) -> Result<bool> {
        let abs = self.absolute_path(path)?;
        Ok(tokio::fs::try_exists(Self::marker_path(&abs)).await.map_err(ErrorKind::Io)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_absolute_path() {
        assert!(LocalStore::new("/absolute/path").is_ok());
        assert!(LocalStore::new("relative/path").is_err());
        assert!(LocalStore::new("./relative").is_err());
    }

    #[test]
    fn test_absolute_path() {
        let store = LocalStore::new("/packages").unwrap();
        assert_eq!(
            store.absolute_path(Path::new("serilog/2.0.0/serilog.2.0.0.nupkg")).unwrap(),
            PathBuf::from("/packages/serilog/2.0.0/serilog.2.0.0.nupkg")
        );
        // Path traversal is prevented
        assert!(store.absolute_path(Path::new("../etc/passwd")).is_err());
    }

    #[test]
    fn test_relative_path() {
        let store = LocalStore::new("/packages").unwrap();
        let abs = PathBuf::from("/packages/serilog/2.0.0/serilog.2.0.0.nupkg");
        assert_eq!(store.relative_path(&abs).unwrap(), Path::new("serilog/2.0.0/serilog.2.0.0.nupkg"));
        // Path outside root fails
        assert!(store.relative_path(PathBuf::from("/other/file.nupkg")).is_err());
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        let data = b"not actually a zip";
        store.write(Path::new("test.nupkg"), data).await.unwrap();
        let read_data = store.read(Path::new("test.nupkg")).await.unwrap();
        assert_eq!(read_data, data);
    }

    #[tokio::test]
    async fn test_write_creates_directories() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        store.write(Path::new("a/b/c/file.nupkg"), b"data").await.unwrap();
        assert!(store.exists(Path::new("a/b/c/file.nupkg")).await.unwrap());
    }

    #[tokio::test]
    async fn test_exists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        assert!(!store.exists(Path::new("nonexistent.nupkg")).await.unwrap());
        store.write(Path::new("exists.nupkg"), b"data").await.unwrap();
        assert!(store.exists(Path::new("exists.nupkg")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        store.write(Path::new("file.nupkg"), b"data").await.unwrap();
        store.delete(Path::new("file.nupkg")).await.unwrap();
        assert!(!store.exists(Path::new("file.nupkg")).await.unwrap());
        // Deleting nonexistent file returns error
        let err = store.delete(Path::new("nonexistent.nupkg")).await.unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_hidden_marker() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        store.write(Path::new("file.nupkg"), b"data").await.unwrap();
        store.set_hidden(Path::new("file.nupkg"), true).await.unwrap();
        store.delete(Path::new("file.nupkg")).await.unwrap();
        assert!(!temp_dir.path().join("file.nupkg.hidden").exists());
    }

    #[tokio::test]
    async fn test_delete_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        store.write(Path::new("pkg/1.0.0/pkg.1.0.0.nupkg"), b"data").await.unwrap();
        store.delete_dir(Path::new("pkg/1.0.0")).await.unwrap();
        assert!(!store.exists(Path::new("pkg/1.0.0/pkg.1.0.0.nupkg")).await.unwrap());
        // Deleting an absent directory is a no-op
        store.delete_dir(Path::new("pkg/1.0.0")).await.unwrap();
    }

    #[tokio::test]
    async fn test_rename() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        store.write(Path::new("old.nupkg"), b"data").await.unwrap();
        store.rename(Path::new("old.nupkg"), Path::new("a/b/new.nupkg")).await.unwrap();
        assert!(!store.exists(Path::new("old.nupkg")).await.unwrap());
        assert_eq!(store.read(Path::new("a/b/new.nupkg")).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_stat() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        let data = b"0123456789";
        store.write(Path::new("file.nupkg"), data).await.unwrap();
        let info = store.stat(Path::new("file.nupkg")).await.unwrap();
        assert_eq!(info.path, PathBuf::from("file.nupkg"));
        assert_eq!(info.size, data.len() as u64);
        assert!(!info.hidden);
    }

    #[tokio::test]
    async fn test_hidden_attribute() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        store.write(Path::new("file.nupkg"), b"data").await.unwrap();
        assert!(!store.is_hidden(Path::new("file.nupkg")).await.unwrap());
        store.set_hidden(Path::new("file.nupkg"), true).await.unwrap();
        assert!(store.is_hidden(Path::new("file.nupkg")).await.unwrap());
        assert!(store.stat(Path::new("file.nupkg")).await.unwrap().hidden);
        store.set_hidden(Path::new("file.nupkg"), false).await.unwrap();
        assert!(!store.is_hidden(Path::new("file.nupkg")).await.unwrap());
        // Hiding a file that doesn't exist fails
        let err = store.set_hidden(Path::new("missing.nupkg"), true).await.unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_skips_markers_and_directories() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        store.write(Path::new("a/one.nupkg"), b"1").await.unwrap();
        store.write(Path::new("a/two.nupkg"), b"2").await.unwrap();
        store.set_hidden(Path::new("a/one.nupkg"), true).await.unwrap();
        let files = store.list(None, true).await.unwrap();
        assert_eq!(files.len(), 2);
        let hidden = files.iter().find(|f| f.path == Path::new("a/one.nupkg")).unwrap();
        assert!(hidden.hidden);
    }

    #[tokio::test]
    async fn test_list_non_recursive() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        store.write(Path::new("root.nupkg"), b"1").await.unwrap();
        store.write(Path::new("pkg/1.0.0/pkg.1.0.0.nupkg"), b"2").await.unwrap();
        let files = store.list(None, false).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PathBuf::from("root.nupkg"));
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        store.write(Path::new("serilog/2.0.0/serilog.2.0.0.nupkg"), b"a").await.unwrap();
        store.write(Path::new("serilog/2.1.0/serilog.2.1.0.nupkg"), b"b").await.unwrap();
        store.write(Path::new("other/1.0.0/other.1.0.0.nupkg"), b"c").await.unwrap();
        let files = store.list(Some(Path::new("serilog")), true).await.unwrap();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn test_list_nonexistent_prefix() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        let files = store.list(Some(Path::new("nonexistent")), true).await.unwrap();
        assert_eq!(files.len(), 0);
    }

    #[tokio::test]
    async fn test_path_security() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        assert!(store.read(Path::new("../etc/passwd")).await.is_err());
        assert!(store.read(Path::new("etc/../../passwd")).await.is_err());
        assert!(store.write(Path::new("../etc/passwd"), b"data").await.is_err());
        assert!(store.delete(Path::new("../../file")).await.is_err());
    }
}
