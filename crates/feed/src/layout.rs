//! The expanded on-disk layout.
//!
//! Every package version owns one directory:
//!
//! ```text
//! <root>/<id-lower>/<normalized-version>/
//!   <id>.<normalized-version>.nupkg          (the archive)
//!   <id>.<normalized-version>.nupkg.sha512   (base64 hash sidecar)
//!   <id>.nuspec                              (manifest copy)
//! ```
//!
//! Ingest is atomic from the reader's point of view: the archive is written
//! to a temp name and renamed into place, so a concurrent rebuild never
//! observes a torn archive. The layout also provides the "known path"
//! predicate the watcher uses to recognize the engine's own writes.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use packrat_nupkg::models::PackageVersion;
use packrat_nupkg::{HashAlgorithm, PackageArchive};
use packrat_storage::error::ErrorKind as StorageErrorKind;
use packrat_storage::{FileMeta, StoreHandle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::instrument;

/// Extension of package archives, without the dot.
pub const ARCHIVE_EXT: &str = "nupkg";

/// Makes temp-file names unique within the process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Outcome of ingesting one archive.
#[derive(Debug)]
pub struct IngestedArchive {
    /// Relative path of the archive file.
    pub archive_path: PathBuf,
    /// Base64 content hash.
    pub hash: String,
}

/// Maps `(id, version)` onto canonical paths and moves archives in and out
/// of the expanded tree.
pub struct PackageLayout {
    store: StoreHandle,
    hash_algorithm: HashAlgorithm,
}

impl PackageLayout {
    pub fn new(store: StoreHandle) -> Self {
        Self { store, hash_algorithm: HashAlgorithm::default() }
    }

    /// Use a different digest algorithm for hash sidecars.
    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// Digest algorithm for archive hash sidecars.
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    /// `<id-lower>/<normalized-version>`
    pub fn package_dir(id: &str, version: &PackageVersion) -> PathBuf {
        PathBuf::from(id.to_lowercase()).join(version.to_normalized_string())
    }

    /// `<id-lower>/<normalized-version>/<id>.<normalized-version>.nupkg`
    pub fn archive_path(id: &str, version: &PackageVersion) -> PathBuf {
        Self::package_dir(id, version).join(format!("{id}.{}.{ARCHIVE_EXT}", version.to_normalized_string()))
    }

    /// The hash sidecar next to an archive.
    pub fn hash_path(&self, id: &str, version: &PackageVersion) -> PathBuf {
        Self::sidecar_for(&Self::archive_path(id, version), self.hash_algorithm)
    }

    /// `<id-lower>/<normalized-version>/<id>.nuspec`
    pub fn manifest_path(id: &str, version: &PackageVersion) -> PathBuf {
        Self::package_dir(id, version).join(format!("{id}.nuspec"))
    }

    fn sidecar_for(archive: &Path, algorithm: HashAlgorithm) -> PathBuf {
        let mut name = archive.as_os_str().to_os_string();
        name.push(".");
        name.push(algorithm.extension());
        PathBuf::from(name)
    }

    /// The "known path" predicate: parse a relative path back into the
    /// `(id, version)` whose canonical archive it is.
    ///
    /// Only exact archive paths match — sidecars, loose files and oddly
    /// named files yield `None`.
    pub fn parse(path: &Path) -> Option<(String, PackageVersion)> {
        let mut components = path.components().map(|c| c.as_os_str().to_str());
        let (Some(Some(id_dir)), Some(Some(version_dir)), Some(Some(file)), None) =
            (components.next(), components.next(), components.next(), components.next())
        else {
            return None;
        };
        let version: PackageVersion = version_dir.parse().ok()?;
        let normalized = version.to_normalized_string();
        if !version_dir.eq_ignore_ascii_case(&normalized) {
            return None;
        }
        let stem = file.strip_suffix(&format!(".{ARCHIVE_EXT}"))?;
        let id = stem.strip_suffix(&format!(".{normalized}"))?;
        if id.is_empty() || !id.eq_ignore_ascii_case(id_dir) {
            return None;
        }
        Some((id.to_string(), version))
    }

    /// Loose predicate for watcher filtering: any path *under* a package
    /// directory (archive, sidecar, temp file) maps to that directory's
    /// `(id, version)`.
    pub fn parse_dir(path: &Path) -> Option<(String, PackageVersion)> {
        let mut components = path.components().map(|c| c.as_os_str().to_str());
        let (Some(Some(id_dir)), Some(Some(version_dir)), Some(Some(_member))) =
            (components.next(), components.next(), components.next())
        else {
            return None;
        };
        let version: PackageVersion = version_dir.parse().ok()?;
        Some((id_dir.to_string(), version))
    }

    /// Whether the canonical archive for `(id, version)` is on disk.
    pub async fn exists(&self, id: &str, version: &PackageVersion) -> Result<bool> {
        self.store
            .exists(&Self::archive_path(id, version))
            .await
            .or_raise(|| ErrorKind::Storage)
    }

    /// Every archive file in the expanded tree (loose root files excluded).
    pub async fn archives(&self) -> Result<Vec<FileMeta>> {
        let all = self.store.list(None, true).await.or_raise(|| ErrorKind::Storage)?;
        Ok(all.into_iter().filter(|meta| Self::parse(&meta.path).is_some()).collect())
    }

    /// Ingest an archive into the expanded tree.
    ///
    /// Fails with [`AlreadyExists`](ErrorKind::AlreadyExists) when the
    /// target archive is present and `overwrite` is off; overwriting
    /// replaces the archive and both sidecars. A successful ingest always
    /// leaves the archive un-hidden, so re-pushing a delisted package
    /// relists it.
    #[instrument(skip(self, bytes, archive), fields(id = %archive.manifest().id, version = %archive.manifest().version))]
    pub async fn add(&self, bytes: &[u8], archive: &PackageArchive, overwrite: bool) -> Result<IngestedArchive> {
        let manifest = archive.manifest();
        let id = manifest.id.as_str();
        let version = &manifest.version;
        let archive_path = Self::archive_path(id, version);

        if self.store.exists(&archive_path).await.or_raise(|| ErrorKind::Storage)? && !overwrite {
            exn::bail!(ErrorKind::AlreadyExists {
                id: id.to_string(),
                version: version.original().to_string(),
            });
        }

        let hash = archive.content_hash(self.hash_algorithm);

        // Write-to-temp + rename keeps concurrent readers from ever seeing a
        // partially written archive.
        let temp = temp_name(&archive_path);
        self.store.write(&temp, bytes).await.or_raise(|| ErrorKind::Storage)?;
        if let Err(e) = self.store.rename(&temp, &archive_path).await {
            _ = self.store.delete(&temp).await;
            return Err(e).or_raise(|| ErrorKind::Storage);
        }

        self.store
            .write(&self.hash_path(id, version), hash.as_bytes())
            .await
            .or_raise(|| ErrorKind::Storage)?;
        self.store
            .write(&Self::manifest_path(id, version), archive.manifest_bytes())
            .await
            .or_raise(|| ErrorKind::Storage)?;
        self.store
            .set_hidden(&archive_path, false)
            .await
            .or_raise(|| ErrorKind::Storage)?;

        Ok(IngestedArchive { archive_path, hash })
    }

    /// Remove a package from the tree.
    ///
    /// With `delist` the archive's hidden attribute is flipped and the bytes
    /// stay; otherwise the whole `<id>/<version>` directory goes. Returns
    /// `false` when the archive wasn't there to begin with.
    #[instrument(skip(self, version), fields(version = %version))]
    pub async fn remove(&self, id: &str, version: &PackageVersion, delist: bool) -> Result<bool> {
        let archive_path = Self::archive_path(id, version);
        if !self.store.exists(&archive_path).await.or_raise(|| ErrorKind::Storage)? {
            return Ok(false);
        }
        if delist {
            self.store.set_hidden(&archive_path, true).await.or_raise(|| ErrorKind::Storage)?;
        } else {
            self.store
                .delete_dir(&Self::package_dir(id, version))
                .await
                .or_raise(|| ErrorKind::Storage)?;
        }
        Ok(true)
    }

    /// Read the hash sidecar, or compute it from `bytes` and write it back.
    pub async fn ensure_hash(&self, id: &str, version: &PackageVersion, bytes: &[u8]) -> Result<String> {
        let hash_path = self.hash_path(id, version);
        match self.store.read(&hash_path).await {
            Ok(existing) => {
                let hash = String::from_utf8_lossy(&existing).trim().to_string();
                if !hash.is_empty() {
                    return Ok(hash);
                }
            },
            Err(e) if matches!(e.current_value(), StorageErrorKind::NotFound(_)) => {},
            Err(e) => return Err(e).or_raise(|| ErrorKind::Storage),
        }
        let hash = self.hash_algorithm.digest(bytes);
        self.store.write(&hash_path, hash.as_bytes()).await.or_raise(|| ErrorKind::Storage)?;
        Ok(hash)
    }
}

fn temp_name(archive_path: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = archive_path.as_os_str().to_os_string();
    name.push(format!(".{n}.tmp"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use packrat_nupkg::testkit::NupkgBuilder;
    use packrat_storage::FileStore;
    use packrat_storage::store::MemoryStore;
    use std::sync::Arc;

    fn v(s: &str) -> PackageVersion {
        s.parse().unwrap()
    }

    fn layout() -> (Arc<MemoryStore>, PackageLayout) {
        let store = Arc::new(MemoryStore::default());
        (store.clone(), PackageLayout::new(store))
    }

    #[test]
    fn test_canonical_paths() {
        let version = v("2.0-Alpha");
        assert_eq!(
            PackageLayout::archive_path("MyPkg", &version),
            PathBuf::from("mypkg/2.0.0-Alpha/MyPkg.2.0.0-Alpha.nupkg")
        );
        assert_eq!(
            PackageLayout::manifest_path("MyPkg", &version),
            PathBuf::from("mypkg/2.0.0-Alpha/MyPkg.nuspec")
        );
    }

    #[test]
    fn test_parse_round_trips_canonical_paths() {
        for (id, version) in [("Test", "1.11"), ("NuGet.Versioning", "3.5.0-beta2"), ("a", "1.0.0.1")] {
            let version = v(version);
            let path = PackageLayout::archive_path(id, &version);
            let (parsed_id, parsed_version) = PackageLayout::parse(&path).unwrap();
            assert_eq!(parsed_id, id);
            assert_eq!(parsed_version, version);
        }
    }

    #[test]
    fn test_parse_rejects_non_canonical_paths() {
        for bad in [
            "loose.nupkg",
            "test/1.0.0/test.1.0.0.nuspec",
            "test/1.0.0/test.1.0.0.nupkg.sha512",
            "test/1.0.0/other.1.0.0.nupkg",
            "test/1.0.0/test.2.0.0.nupkg",
            "test/not-a-version/test.1.0.0.nupkg",
            "test/1.0.0/extra/test.1.0.0.nupkg",
        ] {
            assert!(PackageLayout::parse(Path::new(bad)).is_none(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_parse_dir_accepts_any_member() {
        let (id, version) = PackageLayout::parse_dir(Path::new("test/1.0.0/test.1.0.0.nupkg.sha512")).unwrap();
        assert_eq!(id, "test");
        assert_eq!(version, v("1.0.0"));
        assert!(PackageLayout::parse_dir(Path::new("loose.nupkg")).is_none());
    }

    #[tokio::test]
    async fn test_add_writes_archive_and_sidecars() {
        let (store, layout) = layout();
        let bytes = NupkgBuilder::new("Test", "1.0").build();
        let archive = PackageArchive::read(&bytes).unwrap();
        let ingested = layout.add(&bytes, &archive, false).await.unwrap();

        assert_eq!(ingested.archive_path, PathBuf::from("test/1.0.0/Test.1.0.0.nupkg"));
        assert!(store.exists(&ingested.archive_path).await.unwrap());
        let sidecar = store.read(Path::new("test/1.0.0/Test.1.0.0.nupkg.sha512")).await.unwrap();
        assert_eq!(String::from_utf8(sidecar).unwrap(), ingested.hash);
        assert!(store.exists(Path::new("test/1.0.0/Test.nuspec")).await.unwrap());
        // No temp files left behind
        let leftovers = store.list(None, true).await.unwrap();
        assert!(leftovers.iter().all(|meta| meta.extension().as_deref() != Some("tmp")));
    }

    #[tokio::test]
    async fn test_add_existing_fails_without_overwrite() {
        let (_store, layout) = layout();
        let bytes = NupkgBuilder::new("Test", "1.0").build();
        let archive = PackageArchive::read(&bytes).unwrap();
        layout.add(&bytes, &archive, false).await.unwrap();

        let err = layout.add(&bytes, &archive, false).await.unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::AlreadyExists { .. }));
        // Overwrite replaces instead.
        layout.add(&bytes, &archive, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_relists_a_delisted_package() {
        let (store, layout) = layout();
        let bytes = NupkgBuilder::new("Test", "1.0").build();
        let archive = PackageArchive::read(&bytes).unwrap();
        let ingested = layout.add(&bytes, &archive, false).await.unwrap();
        layout.remove("Test", &v("1.0"), true).await.unwrap();
        assert!(store.is_hidden(&ingested.archive_path).await.unwrap());

        layout.add(&bytes, &archive, true).await.unwrap();
        assert!(!store.is_hidden(&ingested.archive_path).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_delist_vs_delete() {
        let (store, layout) = layout();
        let bytes = NupkgBuilder::new("Test", "1.0").build();
        let archive = PackageArchive::read(&bytes).unwrap();
        let ingested = layout.add(&bytes, &archive, false).await.unwrap();

        assert!(layout.remove("Test", &v("1.0"), true).await.unwrap());
        assert!(store.exists(&ingested.archive_path).await.unwrap());
        assert!(store.is_hidden(&ingested.archive_path).await.unwrap());

        assert!(layout.remove("Test", &v("1.0"), false).await.unwrap());
        assert!(!store.exists(&ingested.archive_path).await.unwrap());
        assert!(!store.exists(Path::new("test/1.0.0/Test.nuspec")).await.unwrap());

        // Removing an absent package reports false.
        assert!(!layout.remove("Test", &v("1.0"), false).await.unwrap());
    }

    #[tokio::test]
    async fn test_archives_lists_only_canonical_files() {
        let (store, layout) = layout();
        let bytes = NupkgBuilder::new("Test", "1.0").build();
        let archive = PackageArchive::read(&bytes).unwrap();
        layout.add(&bytes, &archive, false).await.unwrap();
        store.write(Path::new("dropped.nupkg"), &bytes).await.unwrap();

        let archives = layout.archives().await.unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].path, PathBuf::from("test/1.0.0/Test.1.0.0.nupkg"));
    }

    #[tokio::test]
    async fn test_ensure_hash_reads_sidecar_or_recomputes() {
        let (store, layout) = layout();
        let bytes = NupkgBuilder::new("Test", "1.0").build();
        let archive = PackageArchive::read(&bytes).unwrap();
        let ingested = layout.add(&bytes, &archive, false).await.unwrap();

        // Existing sidecar wins, even if stale.
        store.write(Path::new("test/1.0.0/Test.1.0.0.nupkg.sha512"), b"c3RhbGU=").await.unwrap();
        assert_eq!(layout.ensure_hash("Test", &v("1.0"), &bytes).await.unwrap(), "c3RhbGU=");

        // Missing sidecar is recomputed and written back.
        store.delete(Path::new("test/1.0.0/Test.1.0.0.nupkg.sha512")).await.unwrap();
        let hash = layout.ensure_hash("Test", &v("1.0"), &bytes).await.unwrap();
        assert_eq!(hash, ingested.hash);
        assert!(store.exists(Path::new("test/1.0.0/Test.1.0.0.nupkg.sha512")).await.unwrap());
    }
}
