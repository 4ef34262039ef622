//! The repository engine.
//!
//! One [`PackageFeed`] owns a store root: the in-memory catalog, the
//! expanded on-disk layout, the writer lock serializing every mutation, the
//! background persistence/rebuild timers, and (optionally) the filesystem
//! watcher. Queries read catalog snapshots without the writer lock; the
//! first query after construction (and any query after an invalidation)
//! rebuilds the catalog from disk first.

mod watcher;

use crate::config::FeedConfig;
use crate::error::{ErrorKind, Result};
use crate::layout::{ARCHIVE_EXT, PackageLayout};
use crate::query::{self, ClientCompatibility, UpdateCandidate};
use exn::ResultExt;
use packrat_cache::{CacheFileName, DependencyRecord, DependencySet, PackageCache, PackageRecord};
use packrat_nupkg::PackageArchive;
use packrat_nupkg::models::{PackageVersion, TargetFramework};
use packrat_storage::{FileMeta, StoreHandle};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

/// The package repository engine.
///
/// Cheap to share behind an `Arc`; all operations take `&self` and are safe
/// for concurrent callers. Dropping the feed stops its background timers
/// and watcher.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use packrat_feed::{CancellationToken, ClientCompatibility, FeedConfig, PackageFeed};
/// use packrat_storage::store::LocalStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(LocalStore::new("/srv/packages")?);
/// let feed = PackageFeed::new(store, FeedConfig::default()).await?;
/// let token = CancellationToken::new();
/// let packages = feed.get_packages(ClientCompatibility::Max, &token).await?;
/// println!("{} packages", packages.len());
/// # Ok(())
/// # }
/// ```
pub struct PackageFeed {
    inner: Arc<FeedInner>,
    background: Vec<JoinHandle<()>>,
    // Behind a mutex only because OS watcher handles are Send but not Sync.
    _watcher: std::sync::Mutex<Option<watcher::RootWatcher>>,
}

pub(crate) struct FeedInner {
    pub(crate) store: StoreHandle,
    pub(crate) layout: PackageLayout,
    pub(crate) cache: PackageCache,
    pub(crate) config: FeedConfig,
    write_lock: Mutex<()>,
    needs_rebuild: AtomicBool,
    pub(crate) suppress_events: AtomicBool,
}

/// RAII pair of the writer lock and the watcher-suppression flag.
///
/// Every mutation of the cache or the on-disk layout holds one of these;
/// the suppression flag is released on every exit path along with the lock.
struct WriteGuard<'a> {
    _permit: MutexGuard<'a, ()>,
    suppress: &'a AtomicBool,
}

impl<'a> WriteGuard<'a> {
    async fn acquire(inner: &'a FeedInner, token: &CancellationToken) -> Result<WriteGuard<'a>> {
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => exn::bail!(ErrorKind::Cancelled),
            permit = inner.write_lock.lock() => permit,
        };
        inner.suppress_events.store(true, Ordering::SeqCst);
        Ok(Self { _permit: permit, suppress: &inner.suppress_events })
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.suppress.store(false, Ordering::SeqCst);
    }
}

impl PackageFeed {
    /// Construct a feed over a store root.
    ///
    /// Loads the persisted cache (a corrupt or mismatched cache file is
    /// discarded), starts the persistence and rebuild timers, and starts
    /// the filesystem watcher when monitoring is enabled and the root is a
    /// watchable directory.
    ///
    /// # Errors
    ///
    /// [`InvalidConfiguration`](ErrorKind::InvalidConfiguration) for an
    /// unusable cache filename or non-positive timer settings.
    pub async fn new(store: StoreHandle, config: FeedConfig) -> Result<Self> {
        config.validate()?;
        let cache_file_name = match &config.cache_file_name {
            Some(name) => {
                CacheFileName::new(name).map_err(|e| ErrorKind::InvalidConfiguration(format!("{e:?}")))?
            },
            None => CacheFileName::default_name(),
        };
        let cache = PackageCache::new(store.clone(), cache_file_name);
        cache.load().await.or_raise(|| ErrorKind::Cache)?;

        let inner = Arc::new(FeedInner {
            layout: PackageLayout::new(store.clone()),
            store,
            cache,
            config,
            write_lock: Mutex::new(()),
            needs_rebuild: AtomicBool::new(true),
            suppress_events: AtomicBool::new(false),
        });

        let background = vec![
            spawn_persist_timer(Arc::downgrade(&inner)),
            spawn_rebuild_timer(Arc::downgrade(&inner)),
        ];
        let watcher = match inner.config.enable_file_system_monitoring {
            true => watcher::RootWatcher::start(&inner),
            false => None,
        };

        Ok(Self { inner, background, _watcher: std::sync::Mutex::new(watcher) })
    }

    /// The feed's source: the absolute root of the package tree.
    pub fn source(&self) -> &Path {
        self.inner.store.root()
    }

    /// Snapshot of every package visible under `compatibility`.
    ///
    /// Includes unlisted packages; listed-only filtering is a search
    /// concern.
    pub async fn get_packages(
        &self,
        compatibility: ClientCompatibility,
        token: &CancellationToken,
    ) -> Result<Vec<PackageRecord>> {
        self.inner.ensure_fresh(token).await?;
        Ok(self
            .inner
            .cache
            .get_all()
            .await
            .into_iter()
            .filter(|record| compatibility.allows(record))
            .collect())
    }

    /// First record matching the identity, or `None`.
    pub async fn find_package(
        &self,
        id: &str,
        version: &str,
        token: &CancellationToken,
    ) -> Result<Option<PackageRecord>> {
        let (id, version) = parse_identity(id, version)?;
        self.inner.ensure_fresh(token).await?;
        Ok(self
            .inner
            .cache
            .get_id(&id)
            .await
            .into_iter()
            .find(|record| record.matches(&id, &version)))
    }

    /// All versions of one id visible under `compatibility`.
    pub async fn find_packages_by_id(
        &self,
        id: &str,
        compatibility: ClientCompatibility,
        token: &CancellationToken,
    ) -> Result<Vec<PackageRecord>> {
        if id.trim().is_empty() {
            exn::bail!(ErrorKind::InvalidArgument("package id must not be empty".to_string()));
        }
        self.inner.ensure_fresh(token).await?;
        Ok(self
            .inner
            .cache
            .get_id(id)
            .await
            .into_iter()
            .filter(|record| compatibility.allows(record))
            .collect())
    }

    /// Whether a package with this identity is in the catalog.
    pub async fn exists(&self, id: &str, version: &str, token: &CancellationToken) -> Result<bool> {
        let (id, version) = parse_identity(id, version)?;
        self.inner.ensure_fresh(token).await?;
        Ok(self.inner.cache.exists(&id, &version).await)
    }

    /// Tokenized search over the catalog.
    pub async fn search(
        &self,
        term: &str,
        target_frameworks: &[String],
        allow_prerelease: bool,
        allow_unlisted: bool,
        compatibility: ClientCompatibility,
        token: &CancellationToken,
    ) -> Result<Vec<PackageRecord>> {
        self.inner.ensure_fresh(token).await?;
        let config = &self.inner.config;
        let requested: Vec<TargetFramework> = match config.enable_framework_filtering {
            true => target_frameworks.iter().filter_map(|tfm| tfm.parse().ok()).collect(),
            false => Vec::new(),
        };
        Ok(self
            .inner
            .cache
            .get_all()
            .await
            .into_iter()
            .filter(|record| compatibility.allows(record))
            .filter(|record| query::matches_search_term(record, term))
            .filter(|record| allow_prerelease || !record.version.is_prerelease())
            .filter(|record| !config.enable_delisting || allow_unlisted || record.listed)
            .filter(|record| query::supports_any_framework(record, &requested))
            .collect())
    }

    /// Updates for a set of installed packages.
    ///
    /// For each candidate, every strictly-newer listed version passing the
    /// compatibility/prerelease/constraint/framework filters; with
    /// `include_all_versions` off, only the highest such version per
    /// candidate.
    pub async fn get_updates(
        &self,
        candidates: &[UpdateCandidate],
        include_prerelease: bool,
        include_all_versions: bool,
        target_frameworks: &[String],
        compatibility: ClientCompatibility,
        token: &CancellationToken,
    ) -> Result<Vec<PackageRecord>> {
        self.inner.ensure_fresh(token).await?;
        let requested: Vec<TargetFramework> =
            target_frameworks.iter().filter_map(|tfm| tfm.parse().ok()).collect();
        let mut updates = Vec::new();
        for candidate in candidates {
            let records = self.inner.cache.get_id(&candidate.id).await;
            let matching =
                query::filter_updates(&records, candidate, include_prerelease, &requested, compatibility);
            if include_all_versions {
                updates.extend(matching.into_iter().cloned());
            } else if let Some(best) = matching.into_iter().max_by(|a, b| a.version.cmp(&b.version)) {
                updates.push(best.clone());
            }
        }
        Ok(updates)
    }

    /// Push an archive into the feed.
    pub async fn add_package(&self, bytes: &[u8], token: &CancellationToken) -> Result<()> {
        self.inner.add_package(bytes, token).await
    }

    /// Remove (or delist) a package.
    pub async fn remove_package(&self, id: &str, version: &str, token: &CancellationToken) -> Result<()> {
        let (id, version) = parse_identity(id, version)?;
        let inner = &self.inner;
        let _guard = WriteGuard::acquire(inner, token).await?;
        // Removing an absent package is a no-op; both calls tolerate it.
        inner.layout.remove(&id, &version, inner.config.enable_delisting).await?;
        inner.cache.remove(&id, &version, inner.config.enable_delisting).await;
        inner.refresh_latest_flags(Some(&[id.to_lowercase()])).await;
        Ok(())
    }

    /// Open the archive of a cataloged package for streaming.
    pub async fn open_package(
        &self,
        id: &str,
        version: &str,
        token: &CancellationToken,
    ) -> Result<Box<dyn std::io::Read + Send + 'static>> {
        let Some(record) = self.find_package(id, version, token).await? else {
            exn::bail!(ErrorKind::NotFound { id: id.to_string(), version: version.to_string() });
        };
        let path = PackageLayout::archive_path(&record.id, &record.version);
        self.inner.store.reader(&path).await.or_raise(|| ErrorKind::Storage)
    }

    /// Empty the catalog, persist the empty state and force a rebuild on
    /// the next query.
    pub async fn clear_cache(&self, token: &CancellationToken) -> Result<()> {
        self.inner.clear_cache(token).await
    }

    /// Ingest loose archives dropped into the root directory.
    pub async fn add_packages_from_drop_folder(&self, token: &CancellationToken) -> Result<()> {
        self.inner.add_packages_from_drop_folder(token).await
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<FeedInner> {
        &self.inner
    }
}

impl Drop for PackageFeed {
    fn drop(&mut self) {
        for task in &self.background {
            task.abort();
        }
    }
}

impl FeedInner {
    /// Rebuild when the catalog can't be trusted: first query after
    /// construction, after a cache clear, or whenever the catalog is empty.
    async fn ensure_fresh(&self, token: &CancellationToken) -> Result<()> {
        if !self.needs_rebuild.load(Ordering::SeqCst) && !self.cache.is_empty().await {
            return Ok(());
        }
        let _guard = WriteGuard::acquire(self, token).await?;
        // Re-check: a concurrent caller may have rebuilt while we waited.
        if !self.needs_rebuild.load(Ordering::SeqCst) && !self.cache.is_empty().await {
            return Ok(());
        }
        self.rebuild_locked(token).await
    }

    /// Unconditional rebuild (timer path).
    pub(crate) async fn rebuild(&self, token: &CancellationToken) -> Result<()> {
        let _guard = WriteGuard::acquire(self, token).await?;
        self.rebuild_locked(token).await
    }

    /// The rebuild algorithm. Caller holds the writer lock.
    #[instrument(skip_all)]
    async fn rebuild_locked(&self, token: &CancellationToken) -> Result<()> {
        let archives = self.layout.archives().await?;
        let mut records = Vec::with_capacity(archives.len());
        for meta in archives {
            if token.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            match self.derive_record(&meta).await {
                Ok(record) => records.push(record),
                // One unreadable archive must not poison the whole catalog.
                Err(e) => warn!(path = %meta.path.display(), error = ?e, "skipping unreadable archive"),
            }
        }
        debug!(packages = records.len(), "catalog rebuilt from disk");
        self.cache.replace_all(records).await;
        self.ingest_drop_folder_locked(token).await?;
        self.refresh_latest_flags(None).await;
        self.cache.persist_if_dirty().await.or_raise(|| ErrorKind::Cache)?;
        self.needs_rebuild.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn add_package(&self, bytes: &[u8], token: &CancellationToken) -> Result<()> {
        let archive = PackageArchive::read(bytes).or_raise(|| ErrorKind::Archive)?;
        let manifest = archive.manifest();
        if self.config.ignore_symbols_packages && archive.is_symbols_package() {
            exn::bail!(ErrorKind::SymbolsRejected(manifest.id.clone()));
        }
        let id = manifest.id.clone();
        let version = manifest.version.clone();

        let _guard = WriteGuard::acquire(self, token).await?;
        let exists =
            self.cache.exists(&id, &version).await || self.layout.exists(&id, &version).await?;
        if exists && !self.config.allow_override_existing_package_on_push {
            exn::bail!(ErrorKind::AlreadyExists {
                id,
                version: version.original().to_string(),
            });
        }
        let ingested = self.layout.add(bytes, &archive, true).await?;
        let meta = self.store.stat(&ingested.archive_path).await.or_raise(|| ErrorKind::Storage)?;
        let record = self.build_record(&archive, &meta, ingested.hash, true);
        let key = record.key_id();
        self.cache.add(record, self.config.enable_delisting).await;
        self.refresh_latest_flags(Some(std::slice::from_ref(&key))).await;
        Ok(())
    }

    pub(crate) async fn clear_cache(&self, token: &CancellationToken) -> Result<()> {
        let _guard = WriteGuard::acquire(self, token).await?;
        self.cache.clear().await;
        self.cache.persist().await.or_raise(|| ErrorKind::Cache)?;
        self.needs_rebuild.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) async fn add_packages_from_drop_folder(&self, token: &CancellationToken) -> Result<()> {
        let _guard = WriteGuard::acquire(self, token).await?;
        self.ingest_drop_folder_locked(token).await
    }

    /// Scan the root (non-recursively) for loose archives and ingest each.
    /// Caller holds the writer lock.
    ///
    /// Per-file failures are logged and the file stays put — it may still
    /// be mid-copy by whatever dropped it. Policy skips (symbols, existing
    /// package with override off) also leave the file; only successfully
    /// ingested sources are deleted.
    #[instrument(skip_all)]
    async fn ingest_drop_folder_locked(&self, token: &CancellationToken) -> Result<()> {
        let loose = self.store.list(None, false).await.or_raise(|| ErrorKind::Storage)?;
        let mut affected: Vec<String> = Vec::new();
        for meta in loose {
            if meta.extension().as_deref() != Some(ARCHIVE_EXT) {
                continue;
            }
            if token.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            let bytes = match self.store.read(&meta.path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %meta.path.display(), error = ?e, "cannot read drop file; leaving in place");
                    continue;
                },
            };
            let archive = match PackageArchive::read(&bytes) {
                Ok(archive) => archive,
                Err(e) => {
                    warn!(path = %meta.path.display(), error = ?e, "drop file is not a readable package; leaving in place");
                    continue;
                },
            };
            let manifest = archive.manifest();
            if self.config.ignore_symbols_packages && archive.is_symbols_package() {
                debug!(path = %meta.path.display(), "skipping symbols package in drop folder");
                continue;
            }
            if !self.config.allow_override_existing_package_on_push
                && (self.cache.exists(&manifest.id, &manifest.version).await
                    || self.layout.exists(&manifest.id, &manifest.version).await?)
            {
                debug!(id = %manifest.id, version = %manifest.version, "package already exists; skipping drop file");
                continue;
            }
            let ingested = match self.layout.add(&bytes, &archive, true).await {
                Ok(ingested) => ingested,
                Err(e) => {
                    warn!(path = %meta.path.display(), error = ?e, "failed to ingest drop file");
                    continue;
                },
            };
            let stat = self.store.stat(&ingested.archive_path).await.or_raise(|| ErrorKind::Storage)?;
            let record = self.build_record(&archive, &stat, ingested.hash, true);
            affected.push(record.key_id());
            self.cache.add(record, self.config.enable_delisting).await;
            if let Err(e) = self.store.delete(&meta.path).await {
                warn!(path = %meta.path.display(), error = ?e, "could not remove ingested drop file");
            }
        }
        if !affected.is_empty() {
            affected.dedup();
            self.refresh_latest_flags(Some(&affected)).await;
        }
        Ok(())
    }

    /// Derive a catalog record from one on-disk archive.
    async fn derive_record(&self, meta: &FileMeta) -> Result<PackageRecord> {
        let bytes = self.store.read(&meta.path).await.or_raise(|| ErrorKind::Storage)?;
        let archive = PackageArchive::read(&bytes).or_raise(|| ErrorKind::Archive)?;
        let manifest = archive.manifest();
        let hash = self.layout.ensure_hash(&manifest.id, &manifest.version, &bytes).await?;
        // Without delisting, the hidden attribute means nothing.
        let listed = !self.config.enable_delisting || !meta.hidden;
        Ok(self.build_record(&archive, meta, hash, listed))
    }

    fn build_record(
        &self,
        archive: &PackageArchive,
        meta: &FileMeta,
        hash: String,
        listed: bool,
    ) -> PackageRecord {
        let manifest = archive.manifest();
        let mut record = PackageRecord::new(manifest.id.clone(), manifest.version.clone());
        record.is_semver2 = manifest.version.is_semver2() || manifest.has_semver2_dependency();
        record.full_path = self.store.root().join(&meta.path);
        record.package_size = meta.size;
        record.package_hash = hash;
        record.hash_algorithm = self.layout.hash_algorithm().name().to_string();
        record.listed = listed;
        record.created_utc = meta.created;
        record.last_updated_utc = meta.modified;
        record.supported_target_frameworks =
            archive.supported_frameworks().iter().map(|tfm| tfm.original().to_string()).collect();
        record.dependency_sets = manifest
            .dependency_groups
            .iter()
            .map(|group| DependencySet {
                target_framework: group.target_framework.as_ref().map(|tfm| tfm.original().to_string()),
                dependencies: group
                    .dependencies
                    .iter()
                    .map(|dep| DependencyRecord { id: dep.id.clone(), range: dep.range.clone() })
                    .collect(),
            })
            .collect();
        record.min_client_version = manifest.min_client_version.clone();
        record.authors = manifest.authors.clone();
        record.description = manifest.description.clone();
        record.title = manifest.title.clone();
        record.tags = manifest.tags.clone();
        record.summary = manifest.summary.clone();
        record.release_notes = manifest.release_notes.clone();
        record.copyright = manifest.copyright.clone();
        record.project_url = manifest.project_url.clone();
        record.license_url = manifest.license_url.clone();
        record.icon_url = manifest.icon_url.clone();
        record.require_license_acceptance = manifest.require_license_acceptance;
        record.development_dependency = manifest.development_dependency;
        record
    }

    /// Recompute the latest flags for the given (case-folded) ids, or every
    /// id when `None`.
    async fn refresh_latest_flags(&self, ids: Option<&[String]>) {
        let ids: Vec<String> = match ids {
            Some(ids) => ids.to_vec(),
            None => self.cache.ids().await,
        };
        for id in ids {
            self.cache.update_id(&id, |records| query::assign_latest_flags(records)).await;
        }
    }
}

fn parse_identity(id: &str, version: &str) -> Result<(String, PackageVersion)> {
    if id.trim().is_empty() {
        exn::bail!(ErrorKind::InvalidArgument("package id must not be empty".to_string()));
    }
    let version = version
        .parse::<PackageVersion>()
        .map_err(|_| exn::Exn::from(ErrorKind::InvalidArgument(format!("malformed version: {version:?}"))))?;
    Ok((id.to_string(), version))
}

fn spawn_persist_timer(weak: Weak<FeedInner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing to persist yet.
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            // Deliberately without the writer lock: persistence snapshots
            // its own view of the dirty catalog.
            if let Err(e) = inner.cache.persist_if_dirty().await {
                warn!(error = ?e, "background cache persistence failed");
            }
        }
    })
}

fn spawn_rebuild_timer(weak: Weak<FeedInner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(inner) = weak.upgrade() else { return };
        let initial = Duration::from_secs(u64::from(inner.config.initial_cache_rebuild_after_seconds));
        let period = Duration::from_secs(u64::from(inner.config.cache_rebuild_frequency_in_minutes) * 60);
        drop(inner);

        tokio::time::sleep(initial).await;
        loop {
            let Some(inner) = weak.upgrade() else { break };
            let token = CancellationToken::new();
            if let Err(e) = inner.rebuild(&token).await {
                error!(error = ?e, "background rebuild failed");
            }
            drop(inner);
            tokio::time::sleep(period).await;
        }
    })
}
