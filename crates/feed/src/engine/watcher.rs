//! Filesystem monitoring of the package root.
//!
//! External agents may mutate the tree at any time: drop archives into the
//! root for ingestion, delete package directories, or edit files in place.
//! The watcher funnels raw notify events through a bounded queue into one
//! drainer task; handlers are fire-and-forget and never propagate errors.
//!
//! Event filtering, in order:
//! 1. While the engine holds its writer lock the suppression flag is set
//!    and every event is discarded — those are our own writes.
//! 2. Events on the cache file are always discarded; the persistence timer
//!    writes it without the writer lock.
//! 3. A create/change under a package directory whose `(id, version)` is
//!    cataloged and whose file was created within the last minute is a
//!    stray echo of our own ingest — discarded.
//! 4. A `*.nupkg` appearing directly in the root schedules a drop-folder
//!    ingest.
//! 5. Anything else clears the catalog, forcing a rebuild on the next
//!    query. Coarse, but correct under lossy/coalesced OS watchers.

use super::FeedInner;
use notify::{Event, EventKind, RecursiveMode, Watcher as _};
use packrat_nupkg::models::PackageVersion;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::layout::{ARCHIVE_EXT, PackageLayout};

const EVENT_QUEUE_CAPACITY: usize = 1024;
const OVERFLOW_RETRY: Duration = Duration::from_secs(5);
/// How fresh a file must be to count as the engine's own write.
const SELF_EVENT_WINDOW: time::Duration = time::Duration::minutes(1);

/// Owns the OS watcher and the drainer task; dropping it stops both.
pub(crate) struct RootWatcher {
    _watcher: notify::RecommendedWatcher,
    drainer: JoinHandle<()>,
}

impl Drop for RootWatcher {
    fn drop(&mut self) {
        self.drainer.abort();
    }
}

impl RootWatcher {
    /// Start watching the store root recursively.
    ///
    /// Returns `None` (with a warning) when the root isn't a watchable
    /// local directory or the OS watcher can't be created — the feed still
    /// works, it just won't notice external mutations until the next timer
    /// rebuild.
    pub(crate) fn start(inner: &Arc<FeedInner>) -> Option<Self> {
        let root = inner.store.root().to_path_buf();
        if !root.is_dir() {
            warn!(root = %root.display(), "filesystem monitoring disabled: root is not a local directory");
            return None;
        }

        let (tx, rx) = mpsc::channel::<Event>(EVENT_QUEUE_CAPACITY);
        let overflowed = Arc::new(AtomicBool::new(false));

        let overflowed_cb = Arc::clone(&overflowed);
        let mut watcher = match notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if tx.try_send(event).is_err() {
                        // Queue full (or drainer gone): events were lost and
                        // the only safe recovery is a full invalidation.
                        overflowed_cb.store(true, Ordering::SeqCst);
                    }
                },
                Err(_) => overflowed_cb.store(true, Ordering::SeqCst),
            }
        }) {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!(error = %e, "could not create filesystem watcher");
                return None;
            },
        };
        if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
            warn!(root = %root.display(), error = %e, "could not watch package root");
            return None;
        }

        let drainer = tokio::spawn(drain(Arc::downgrade(inner), rx, overflowed));
        Some(Self { _watcher: watcher, drainer })
    }
}

async fn drain(weak: Weak<FeedInner>, mut rx: mpsc::Receiver<Event>, overflowed: Arc<AtomicBool>) {
    loop {
        let event = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => Some(event),
                None => break,
            },
            // Wake up to recover from overflow even when no events flow.
            _ = tokio::time::sleep(OVERFLOW_RETRY), if overflowed.load(Ordering::SeqCst) => None,
        };
        let Some(inner) = weak.upgrade() else { break };
        if overflowed.swap(false, Ordering::SeqCst) {
            info!("watcher queue overflowed; invalidating catalog");
            clear(&inner).await;
        }
        let Some(event) = event else { continue };
        if inner.suppress_events.load(Ordering::SeqCst) {
            continue;
        }
        handle(&inner, event).await;
    }
}

/// What to do about one event path.
#[derive(Debug, PartialEq)]
enum Classification {
    Ignore,
    IngestDropFolder,
    /// Looks like a package-directory write; keep only if it's a recent
    /// write of a cataloged package.
    MaybeSelfInduced {
        id: String,
        version: PackageVersion,
    },
    Clear,
}

fn classify(relative: &Path, cache_file: &Path, kind: &EventKind) -> Classification {
    if relative == cache_file {
        return Classification::Ignore;
    }
    if matches!(kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any) {
        let is_root_level = relative.components().count() == 1;
        let is_archive = relative
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXT));
        if is_root_level && is_archive {
            return Classification::IngestDropFolder;
        }
        if let Some((id, version)) = PackageLayout::parse_dir(relative) {
            return Classification::MaybeSelfInduced { id, version };
        }
    }
    Classification::Clear
}

async fn handle(inner: &Arc<FeedInner>, event: Event) {
    if matches!(event.kind, EventKind::Access(_)) {
        return;
    }
    let root = inner.store.root().to_path_buf();
    for path in &event.paths {
        let Ok(relative) = path.strip_prefix(&root) else { continue };
        match classify(relative, inner.cache.file_name().as_path(), &event.kind) {
            Classification::Ignore => {},
            Classification::IngestDropFolder => {
                debug!(path = %relative.display(), "archive dropped into root; ingesting");
                if let Err(e) = inner.add_packages_from_drop_folder(&CancellationToken::new()).await {
                    warn!(error = ?e, "drop-folder ingest triggered by watcher failed");
                }
                // One pass ingests every loose archive; other paths in this
                // event that are root-level archives are already handled.
            },
            Classification::MaybeSelfInduced { id, version } => {
                if is_recent_own_write(inner, relative, &id, &version).await {
                    debug!(path = %relative.display(), "ignoring event induced by own write");
                } else {
                    clear(inner).await;
                    return;
                }
            },
            Classification::Clear => {
                debug!(path = %relative.display(), kind = ?event.kind, "external mutation; invalidating catalog");
                clear(inner).await;
                return;
            },
        }
    }
}

/// A create/change inside a package directory is the engine's own doing
/// when that `(id, version)` is cataloged and the file is under a minute
/// old.
async fn is_recent_own_write(inner: &FeedInner, relative: &Path, id: &str, version: &PackageVersion) -> bool {
    if !inner.cache.exists(id, version).await {
        return false;
    }
    let Ok(meta) = inner.store.stat(relative).await else {
        return false;
    };
    OffsetDateTime::now_utc() - meta.created < SELF_EVENT_WINDOW
}

async fn clear(inner: &Arc<FeedInner>) {
    if let Err(e) = inner.clear_cache(&CancellationToken::new()).await {
        warn!(error = ?e, "catalog invalidation failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    fn cache_file() -> &'static Path {
        Path::new("host.cache.bin")
    }

    #[test]
    fn test_cache_file_events_are_ignored() {
        for kind in [
            EventKind::Create(CreateKind::File),
            EventKind::Modify(ModifyKind::Any),
            EventKind::Remove(RemoveKind::File),
        ] {
            assert_eq!(classify(cache_file(), cache_file(), &kind), Classification::Ignore);
        }
    }

    #[test]
    fn test_root_level_archive_triggers_drop_ingest() {
        let kind = EventKind::Create(CreateKind::File);
        assert_eq!(
            classify(Path::new("dropped.nupkg"), cache_file(), &kind),
            Classification::IngestDropFolder
        );
        // Root-level non-archives are external mutations.
        assert_eq!(classify(Path::new("notes.txt"), cache_file(), &kind), Classification::Clear);
    }

    #[test]
    fn test_package_dir_writes_are_self_induced_candidates() {
        let kind = EventKind::Modify(ModifyKind::Any);
        let classification = classify(Path::new("test/1.0.0/test.1.0.0.nupkg.sha512"), cache_file(), &kind);
        match classification {
            Classification::MaybeSelfInduced { id, version } => {
                assert_eq!(id, "test");
                assert_eq!(version, "1.0.0".parse().unwrap());
            },
            other => panic!("expected MaybeSelfInduced, got {other:?}"),
        }
    }

    #[test]
    fn test_removals_always_clear() {
        let kind = EventKind::Remove(RemoveKind::File);
        assert_eq!(
            classify(Path::new("test/1.0.0/test.1.0.0.nupkg"), cache_file(), &kind),
            Classification::Clear
        );
        assert_eq!(classify(Path::new("dropped.nupkg"), cache_file(), &kind), Classification::Clear);
    }

    #[test]
    fn test_unrecognized_paths_clear() {
        let kind = EventKind::Create(CreateKind::File);
        assert_eq!(
            classify(Path::new("test/not-a-version/file.nupkg"), cache_file(), &kind),
            Classification::Clear
        );
    }
}
