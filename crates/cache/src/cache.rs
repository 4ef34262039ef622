//! The in-memory catalog and its persistence.

use crate::error::{ErrorKind, Result};
use crate::name::CacheFileName;
use crate::record::{PackageRecord, SCHEMA_VERSION};
use exn::ResultExt;
use packrat_nupkg::models::PackageVersion;
use packrat_storage::StoreHandle;
use packrat_storage::error::ErrorKind as StorageErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{instrument, warn};

/// On-disk shape of the cache document.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CacheDocument {
    schema_version: String,
    packages: Vec<PackageRecord>,
}

/// In-memory catalog of [`PackageRecord`]s, keyed by case-insensitive id.
///
/// Reads hand out snapshots (copies), never live views, so callers can
/// iterate without holding any lock. Mutations set a dirty flag;
/// [`persist_if_dirty`](Self::persist_if_dirty) writes the catalog to a
/// single JSON document under the store root and is safe to call from a
/// background timer without external locking.
pub struct PackageCache {
    store: StoreHandle,
    file_name: CacheFileName,
    records: RwLock<HashMap<String, Vec<PackageRecord>>>,
    dirty: AtomicBool,
}

impl PackageCache {
    pub fn new(store: StoreHandle, file_name: CacheFileName) -> Self {
        Self {
            store,
            file_name,
            records: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Name of the cache file under the store root.
    pub fn file_name(&self) -> &CacheFileName {
        &self.file_name
    }

    /// Load the cache document from the store.
    ///
    /// A missing file yields an empty catalog. A file that doesn't parse, or
    /// parses with a schema version other than [`SCHEMA_VERSION`], is
    /// deleted and the catalog starts empty — disk is the source of truth
    /// and the next rebuild repopulates everything.
    #[instrument(skip(self), fields(file = %self.file_name))]
    pub async fn load(&self) -> Result<()> {
        let bytes = match self.store.read(self.file_name.as_path()).await {
            Ok(bytes) => bytes,
            Err(e) if matches!(e.current_value(), StorageErrorKind::NotFound(_)) => {
                self.replace_all(Vec::new()).await;
                self.dirty.store(false, Ordering::SeqCst);
                return Ok(());
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Storage),
        };

        let document = match serde_json::from_slice::<CacheDocument>(&bytes) {
            Ok(document) if document.schema_version == SCHEMA_VERSION => Some(document),
            Ok(document) => {
                warn!(schema = %document.schema_version, "cache file has unsupported schema; discarding");
                None
            },
            Err(e) => {
                warn!(error = %e, "cache file is corrupt; discarding");
                None
            },
        };

        let packages = match document {
            Some(document) => document.packages,
            None => {
                self.store.delete(self.file_name.as_path()).await.or_raise(|| ErrorKind::Storage)?;
                Vec::new()
            },
        };
        self.replace_all(packages).await;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Upsert a record.
    ///
    /// When delisting is disabled the catalog only holds listed packages,
    /// so an unlisted record removes any existing entry instead of being
    /// stored.
    pub async fn add(&self, record: PackageRecord, enable_delisting: bool) {
        let key = record.key_id();
        let mut guard = self.records.write().await;
        let versions = guard.entry(key.clone()).or_default();
        versions.retain(|existing| !existing.matches(&record.id, &record.version));
        if enable_delisting || record.listed {
            versions.push(record);
        } else if versions.is_empty() {
            guard.remove(&key);
        }
        drop(guard);
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Remove (or delist) a record. Absent entries are a no-op.
    pub async fn remove(&self, id: &str, version: &PackageVersion, enable_delisting: bool) {
        let key = id.to_lowercase();
        let mut guard = self.records.write().await;
        let Some(versions) = guard.get_mut(&key) else {
            return;
        };
        let mut changed = false;
        if enable_delisting {
            for record in versions.iter_mut() {
                if record.matches(id, version) && record.listed {
                    record.listed = false;
                    changed = true;
                }
            }
        } else {
            let before = versions.len();
            versions.retain(|record| !record.matches(id, version));
            changed = versions.len() != before;
            if versions.is_empty() {
                guard.remove(&key);
            }
        }
        drop(guard);
        if changed {
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    /// Whether a record with this identity exists.
    pub async fn exists(&self, id: &str, version: &PackageVersion) -> bool {
        let guard = self.records.read().await;
        guard
            .get(&id.to_lowercase())
            .is_some_and(|versions| versions.iter().any(|record| record.matches(id, version)))
    }

    /// Snapshot of every record.
    pub async fn get_all(&self) -> Vec<PackageRecord> {
        let guard = self.records.read().await;
        let mut all: Vec<PackageRecord> = guard.values().flatten().cloned().collect();
        // Deterministic order keeps persisted documents and query output stable.
        all.sort_by(|a, b| a.key_id().cmp(&b.key_id()).then_with(|| a.version.cmp(&b.version)));
        all
    }

    /// Snapshot of one id's records.
    pub async fn get_id(&self, id: &str) -> Vec<PackageRecord> {
        let guard = self.records.read().await;
        let mut records = guard.get(&id.to_lowercase()).cloned().unwrap_or_default();
        records.sort_by(|a, b| a.version.cmp(&b.version));
        records
    }

    /// Every distinct (case-folded) id in the catalog.
    pub async fn ids(&self) -> Vec<String> {
        self.records.read().await.keys().cloned().collect()
    }

    /// Mutate one id's records in place (e.g. latest-flag recomputation).
    pub async fn update_id<F>(&self, id: &str, f: F)
    where
        F: FnOnce(&mut Vec<PackageRecord>),
    {
        let mut guard = self.records.write().await;
        if let Some(versions) = guard.get_mut(&id.to_lowercase()) {
            f(versions);
            drop(guard);
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    /// Replace the whole catalog (rebuild-from-disk path).
    pub async fn replace_all(&self, records: Vec<PackageRecord>) {
        let mut index: HashMap<String, Vec<PackageRecord>> = HashMap::new();
        for record in records {
            let versions = index.entry(record.key_id()).or_default();
            // Last write wins on identity collisions.
            versions.retain(|existing| !existing.matches(&record.id, &record.version));
            versions.push(record);
        }
        *self.records.write().await = index;
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Drop every record.
    pub async fn clear(&self) {
        self.records.write().await.clear();
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Write the catalog to the cache file.
    ///
    /// The dirty flag is cleared *before* the snapshot is taken: a
    /// concurrent mutation after the snapshot re-marks the catalog dirty and
    /// gets picked up by the next persistence tick.
    #[instrument(skip(self), fields(file = %self.file_name))]
    pub async fn persist(&self) -> Result<()> {
        self.dirty.store(false, Ordering::SeqCst);
        let document = CacheDocument {
            schema_version: SCHEMA_VERSION.to_string(),
            packages: self.get_all().await,
        };
        let bytes = serde_json::to_vec(&document).or_raise(|| ErrorKind::Serialize)?;
        if let Err(e) = self.store.write(self.file_name.as_path(), &bytes).await {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e).or_raise(|| ErrorKind::Storage);
        }
        Ok(())
    }

    /// Persist only when something changed since the last persist.
    pub async fn persist_if_dirty(&self) -> Result<bool> {
        if !self.dirty.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.persist().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packrat_storage::FileStore;
    use packrat_storage::store::MemoryStore;
    use std::path::Path;
    use std::sync::Arc;

    fn v(s: &str) -> PackageVersion {
        s.parse().unwrap()
    }

    fn cache() -> PackageCache {
        PackageCache::new(Arc::new(MemoryStore::default()), CacheFileName::new("test").unwrap())
    }

    #[tokio::test]
    async fn test_add_and_exists_case_insensitive() {
        let cache = cache();
        cache.add(PackageRecord::new("NuGet.Versioning", v("3.5.0-beta2")), false).await;
        assert!(cache.exists("nuget.versioning", &v("3.5.0-BETA2")).await);
        assert!(cache.exists("NuGet.Versioning", &v("3.5.0-beta2+build")).await);
        assert!(!cache.exists("NuGet.Frameworks", &v("3.5.0-beta2")).await);
    }

    #[tokio::test]
    async fn test_add_is_upsert() {
        let cache = cache();
        let mut first = PackageRecord::new("A", v("1.0"));
        first.description = "old".to_string();
        cache.add(first, false).await;
        let mut second = PackageRecord::new("a", v("1.0.0"));
        second.description = "new".to_string();
        cache.add(second, false).await;
        let all = cache.get_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].description, "new");
    }

    #[tokio::test]
    async fn test_unlisted_add_is_dropped_when_delisting_disabled() {
        let cache = cache();
        let mut record = PackageRecord::new("A", v("1.0"));
        record.listed = false;
        cache.add(record.clone(), false).await;
        assert!(cache.is_empty().await);
        cache.add(record, true).await;
        assert_eq!(cache.get_all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_deletes_or_delists() {
        let cache = cache();
        cache.add(PackageRecord::new("A", v("1.0")), true).await;
        cache.remove("a", &v("1.0"), true).await;
        let all = cache.get_all().await;
        assert_eq!(all.len(), 1);
        assert!(!all[0].listed);

        cache.remove("A", &v("1.0"), false).await;
        assert!(cache.is_empty().await);
        // Removing an absent record is a no-op.
        cache.remove("A", &v("1.0"), false).await;
    }

    #[tokio::test]
    async fn test_get_id_sorted_by_version() {
        let cache = cache();
        for version in ["2.0.0", "1.9", "1.11"] {
            cache.add(PackageRecord::new("A", v(version)), false).await;
        }
        let versions: Vec<String> =
            cache.get_id("a").await.iter().map(|r| r.version.original().to_string()).collect();
        assert_eq!(versions, ["1.9", "1.11", "2.0.0"]);
    }

    #[tokio::test]
    async fn test_persist_round_trip() {
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let cache = PackageCache::new(store.clone(), CacheFileName::new("test").unwrap());
        let mut record = PackageRecord::new("Pkg", v("2.0.0-test+tag"));
        record.tags = Some("one two".to_string());
        record.package_hash = "aGFzaA==".to_string();
        cache.add(record, false).await;
        cache.add(PackageRecord::new("Other", v("1.0")), false).await;
        cache.persist().await.unwrap();

        let reloaded = PackageCache::new(store, CacheFileName::new("test").unwrap());
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.get_all().await, cache.get_all().await);
        let pkg = &reloaded.get_id("pkg").await[0];
        assert_eq!(pkg.version.original(), "2.0.0-test+tag");
    }

    #[tokio::test]
    async fn test_load_missing_file_starts_empty() {
        let cache = cache();
        cache.load().await.unwrap();
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_corrupt_cache_file_is_deleted() {
        let store: StoreHandle = Arc::new(MemoryStore::default());
        store.write(Path::new("test.cache.bin"), b"{ not json !").await.unwrap();
        let cache = PackageCache::new(store.clone(), CacheFileName::new("test").unwrap());
        cache.load().await.unwrap();
        assert!(cache.is_empty().await);
        assert!(!store.exists(Path::new("test.cache.bin")).await.unwrap());
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_deleted() {
        let store: StoreHandle = Arc::new(MemoryStore::default());
        store
            .write(Path::new("test.cache.bin"), br#"{"SchemaVersion":"2.0.0","Packages":[]}"#)
            .await
            .unwrap();
        let cache = PackageCache::new(store.clone(), CacheFileName::new("test").unwrap());
        cache.load().await.unwrap();
        assert!(cache.is_empty().await);
        assert!(!store.exists(Path::new("test.cache.bin")).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_required_fields_invalidate_the_file() {
        let store: StoreHandle = Arc::new(MemoryStore::default());
        store
            .write(
                Path::new("test.cache.bin"),
                br#"{"SchemaVersion":"3.0.0","Packages":[{"Version":"1.0"}]}"#,
            )
            .await
            .unwrap();
        let cache = PackageCache::new(store.clone(), CacheFileName::new("test").unwrap());
        cache.load().await.unwrap();
        assert!(cache.is_empty().await);
        assert!(!store.exists(Path::new("test.cache.bin")).await.unwrap());
    }

    #[tokio::test]
    async fn test_persist_if_dirty_tracks_mutations() {
        let cache = cache();
        cache.load().await.unwrap();
        assert!(!cache.persist_if_dirty().await.unwrap());
        cache.add(PackageRecord::new("A", v("1.0")), false).await;
        assert!(cache.persist_if_dirty().await.unwrap());
        assert!(!cache.persist_if_dirty().await.unwrap());
    }
}
