//! Reconciles directory scans with the catalog.
//!
//! `CatalogSync` is the only writer of collection and video rows. Scans run on the
//! blocking pool; writes go through [`Db`] one collection per transaction.

use crate::config::{Config, RefreshStrategy};
use crate::db::{CatalogEvent, Db};
use crate::error::{PineappleError, Result};
use crate::media::scanner::Scanner;
use crate::system::access::{FsAccess, StorageAccess};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// `(current, total, label)`. Called on the scanning thread; must return quickly.
pub type ProgressCallback = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RefreshStatus {
    Idle,
    Refreshing {
        current: usize,
        total: usize,
        label: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub collection_ids: Vec<i64>,
    pub videos: usize,
}

type StatusMap = Arc<Mutex<HashMap<i64, RefreshStatus>>>;

pub struct CatalogSync {
    db: Arc<Db>,
    scanner: Scanner,
    access: Arc<dyn StorageAccess>,
    strategy: RefreshStrategy,
    refresh_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
    status: StatusMap,
}

impl CatalogSync {
    pub fn new(db: Arc<Db>, scanner: Scanner) -> Self {
        Self {
            db,
            scanner,
            access: Arc::new(FsAccess),
            strategy: RefreshStrategy::default(),
            refresh_locks: Mutex::new(HashMap::new()),
            status: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(db: Arc<Db>, config: &Config) -> Self {
        Self::new(db, Scanner::from_config(config)).with_strategy(config.scanner.refresh_strategy)
    }

    pub fn with_access(mut self, access: Arc<dyn StorageAccess>) -> Self {
        self.access = access;
        self
    }

    pub fn with_strategy(mut self, strategy: RefreshStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub fn refresh_status(&self, collection_id: i64) -> RefreshStatus {
        match self.status.lock() {
            Ok(map) => map.get(&collection_id).cloned().unwrap_or(RefreshStatus::Idle),
            Err(e) => {
                error!("Failed to lock refresh status: {}", e);
                RefreshStatus::Idle
            }
        }
    }

    /// Scans `path` and adds every collection found. Collections already in the catalog
    /// (same path) keep their id and have their videos upserted by file path.
    pub async fn import_directory(
        &self,
        path: &Path,
        on_progress: Option<ProgressCallback>,
    ) -> Result<ImportSummary> {
        self.check_access(path)?;
        info!("Importing {:?}", path);

        let scanner = self.scanner.clone();
        let root = path.to_path_buf();
        let collections = run_blocking(move |abort| {
            let mut report = |current: usize, total: usize, label: &str| {
                if let Some(cb) = &on_progress {
                    cb(current, total, label);
                }
            };
            scanner.scan_abortable(&root, &mut report, abort)
        })
        .await?;

        let now = Utc::now();
        let mut summary = ImportSummary::default();
        for info in &collections {
            let id = self.db.import_collection(info, now).await?;
            summary.collection_ids.push(id);
            summary.videos += info.videos.len();
        }

        info!(
            "Imported {} collections ({} videos) from {:?}",
            summary.collection_ids.len(),
            summary.videos,
            path
        );
        Ok(summary)
    }

    /// Rescans the directory of an existing collection. Returns `false` without touching
    /// the catalog when no collection has that path.
    pub async fn refresh_collection(
        &self,
        collection_path: &Path,
        on_progress: Option<ProgressCallback>,
    ) -> Result<bool> {
        self.check_access(collection_path)?;

        let key = canonical_key(collection_path);
        let Some(collection) = self.db.get_collection_by_path(&key).await? else {
            debug!("No collection at {:?}; nothing to refresh", collection_path);
            return Ok(false);
        };
        let id = collection.id;

        let lock = self.refresh_lock(id);
        let _held = lock.lock().await;

        // A delete may have run while this call waited for the lock.
        let Some(collection) = self.db.get_collection(id).await? else {
            debug!("Collection #{} was deleted before its refresh started", id);
            return Ok(false);
        };
        let _status = StatusGuard::start(self.status.clone(), self.db.clone(), id);
        info!("Refreshing collection #{} ({})", id, collection.name);

        let scanner = self.scanner.clone();
        let dir = PathBuf::from(&collection.path);
        let status = self.status.clone();
        let db = self.db.clone();
        let info = run_blocking(move |abort| {
            let mut report = |current: usize, total: usize, label: &str| {
                if let Ok(mut map) = status.lock() {
                    map.insert(
                        id,
                        RefreshStatus::Refreshing {
                            current,
                            total,
                            label: label.to_string(),
                        },
                    );
                }
                db.emit(CatalogEvent::RefreshProgress {
                    collection_id: id,
                    current,
                    total,
                    label: label.to_string(),
                });
                if let Some(cb) = &on_progress {
                    cb(current, total, label);
                }
            };
            scanner.scan_collection_abortable(&dir, &mut report, abort)
        })
        .await?;

        let videos = info.map(|i| i.videos).unwrap_or_default();
        let now = Utc::now();
        match self.strategy {
            RefreshStrategy::Replace => self.db.replace_videos(id, &videos, now).await?,
            RefreshStrategy::Diff => self.db.reconcile_videos(id, &videos, now).await?,
        }

        info!("Refreshed collection #{}: {} videos", id, videos.len());
        Ok(true)
    }

    pub async fn refresh_collection_by_id(
        &self,
        id: i64,
        on_progress: Option<ProgressCallback>,
    ) -> Result<bool> {
        match self.db.get_collection(id).await? {
            Some(collection) => {
                self.refresh_collection(Path::new(&collection.path), on_progress)
                    .await
            }
            None => Ok(false),
        }
    }

    /// Removes the collection and its videos. Waits for an in-flight refresh of the same id.
    pub async fn delete_collection(&self, id: i64) -> Result<bool> {
        let lock = self.refresh_lock(id);
        let _held = lock.lock().await;

        let deleted = self.db.delete_collection(id).await?;
        if deleted {
            if let Ok(mut locks) = self.refresh_locks.lock() {
                locks.remove(&id);
            }
            info!("Deleted collection #{}", id);
        }
        Ok(deleted)
    }

    fn check_access(&self, path: &Path) -> Result<()> {
        if self.access.may_read(path) {
            Ok(())
        } else {
            Err(PineappleError::StorageDenied(path.to_path_buf()))
        }
    }

    fn refresh_lock(&self, id: i64) -> Arc<tokio::sync::Mutex<()>> {
        match self.refresh_locks.lock() {
            Ok(mut locks) => locks.entry(id).or_default().clone(),
            Err(e) => {
                error!("Failed to lock refresh registry: {}", e);
                Arc::new(tokio::sync::Mutex::new(()))
            }
        }
    }
}

/// Marks a collection as refreshing for as long as it lives.
struct StatusGuard {
    status: StatusMap,
    db: Arc<Db>,
    id: i64,
}

impl StatusGuard {
    fn start(status: StatusMap, db: Arc<Db>, id: i64) -> Self {
        if let Ok(mut map) = status.lock() {
            map.insert(
                id,
                RefreshStatus::Refreshing {
                    current: 0,
                    total: 0,
                    label: "starting refresh".to_string(),
                },
            );
        }
        Self { status, db, id }
    }
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        if let Ok(mut map) = self.status.lock() {
            map.remove(&self.id);
        }
        self.db.emit(CatalogEvent::RefreshFinished {
            collection_id: self.id,
        });
    }
}

/// Sets the flag when the awaiting future goes away, so the worker stops at the next file.
struct AbortOnDrop(Arc<AtomicBool>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

async fn run_blocking<T, F>(job: F) -> Result<T>
where
    F: FnOnce(&AtomicBool) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let abort = Arc::new(AtomicBool::new(false));
    let _guard = AbortOnDrop(abort.clone());

    tokio::task::spawn_blocking(move || job(&abort))
        .await
        .map_err(|e| PineappleError::Scan(format!("Scan worker failed: {}", e)))?
}

/// Stored collection paths are canonical. A folder that no longer exists cannot be
/// canonicalized, so it is made absolute and cleaned lexically instead; symlinks in such
/// a path are not resolved.
fn canonical_key(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| normalize_lexically(path))
        .to_string_lossy()
        .into_owned()
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::probe::{Frame, MetadataExtractor};
    use crate::media::scanner::{CollectionInfo, VideoFile};
    use std::time::Duration;

    struct NoMetadata;

    impl MetadataExtractor for NoMetadata {
        fn duration_ms(&self, _path: &Path) -> Result<u64> {
            Ok(0)
        }

        fn frame_at(&self, _path: &Path, _at: Duration) -> Result<Frame> {
            Err(PineappleError::Thumbnail("unused".into()))
        }
    }

    #[test]
    fn test_vanished_path_is_cleaned_lexically() {
        let key = canonical_key(Path::new("/no/such/media/./Show/../Films/"));
        assert_eq!(key, "/no/such/media/Films");
    }

    #[tokio::test]
    async fn test_delete_drops_refresh_lock() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::new(dir.path().join("catalog.db")).await.unwrap());
        let sync = CatalogSync::new(db.clone(), Scanner::new(Arc::new(NoMetadata)));

        let info = CollectionInfo {
            name: "Films".to_string(),
            path: PathBuf::from("/media/Films"),
            videos: vec![VideoFile {
                name: "a".to_string(),
                path: PathBuf::from("/media/Films/a.mp4"),
                size: 1,
                duration_ms: 0,
                thumbnail_path: None,
            }],
        };
        let id = db.import_collection(&info, Utc::now()).await.unwrap();

        // The path does not exist on disk, so the refresh clears the videos.
        assert!(sync.refresh_collection_by_id(id, None).await.unwrap());
        assert_eq!(sync.refresh_locks.lock().unwrap().len(), 1);

        assert!(sync.delete_collection(id).await.unwrap());
        assert!(sync.refresh_locks.lock().unwrap().is_empty());
    }
}
