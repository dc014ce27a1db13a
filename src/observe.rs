//! Push streams of full-list snapshots for observers of the catalog.
//!
//! Each stream yields the current list immediately, then re-queries after every
//! relevant [`CatalogEvent`]. A lagging receiver also triggers a re-query, so
//! observers only ever see committed state.

use crate::db::{CatalogEvent, Collection, Db, RecentPlayback, SearchResult, Video};
use crate::error::Result;
use futures::future::{self, Future};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Clone)]
pub struct CatalogWatch {
    db: Arc<Db>,
}

impl CatalogWatch {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn collections(&self) -> BoxStream<'static, Result<Vec<Collection>>> {
        self.snapshots(
            |event| matches!(event, CatalogEvent::CollectionsChanged),
            |db| async move { db.list_collections().await },
        )
    }

    pub fn videos(&self, collection_id: i64) -> BoxStream<'static, Result<Vec<Video>>> {
        self.snapshots(
            move |event| {
                matches!(event, CatalogEvent::VideosChanged { collection_id: id } if *id == collection_id)
            },
            move |db| async move { db.list_videos(collection_id).await },
        )
    }

    pub fn recent(&self, limit: i64) -> BoxStream<'static, Result<Vec<RecentPlayback>>> {
        self.snapshots(
            |event| {
                matches!(
                    event,
                    CatalogEvent::PlaybackChanged { .. }
                        | CatalogEvent::VideosChanged { .. }
                        | CatalogEvent::CollectionsChanged
                )
            },
            move |db| async move { db.recent_playback(limit).await },
        )
    }

    pub fn search(&self, query: &str) -> BoxStream<'static, Result<Vec<SearchResult>>> {
        let query = query.to_string();
        self.snapshots(
            |event| {
                matches!(
                    event,
                    CatalogEvent::VideosChanged { .. } | CatalogEvent::CollectionsChanged
                )
            },
            move |db| {
                let query = query.clone();
                async move { db.search_videos(&query).await }
            },
        )
    }

    fn snapshots<T, P, F, Fut>(&self, relevant: P, fetch: F) -> BoxStream<'static, Result<T>>
    where
        T: Send + 'static,
        P: Fn(&CatalogEvent) -> bool + Send + 'static,
        F: Fn(Arc<Db>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        // Subscribe before the first query so nothing committed in between is missed.
        let triggers = BroadcastStream::new(self.db.subscribe()).filter_map(move |event| {
            let fire = match event {
                Ok(event) => relevant(&event),
                Err(_lagged) => true,
            };
            future::ready(fire.then_some(()))
        });

        let db = self.db.clone();
        stream::once(future::ready(()))
            .chain(triggers)
            .then(move |()| fetch(db.clone()))
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::scanner::{CollectionInfo, VideoFile};
    use chrono::Utc;
    use std::path::PathBuf;

    fn info(dir: &str, names: &[&str]) -> CollectionInfo {
        CollectionInfo {
            name: dir.rsplit('/').next().unwrap_or(dir).to_string(),
            path: PathBuf::from(dir),
            videos: names
                .iter()
                .map(|n| VideoFile {
                    name: n.to_string(),
                    path: PathBuf::from(format!("{}/{}.mp4", dir, n)),
                    size: 1,
                    duration_ms: 0,
                    thumbnail_path: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_collections_stream_yields_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::new(dir.path().join("catalog.db")).await.unwrap());
        let watch = CatalogWatch::new(db.clone());

        let mut collections = watch.collections();
        assert!(collections.next().await.unwrap().unwrap().is_empty());

        db.import_collection(&info("/m/A", &["x"]), Utc::now())
            .await
            .unwrap();

        let snapshot = collections.next().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "A");
    }

    #[tokio::test]
    async fn test_videos_stream_ignores_other_collections() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::new(dir.path().join("catalog.db")).await.unwrap());
        let a = db
            .import_collection(&info("/m/A", &["x"]), Utc::now())
            .await
            .unwrap();
        let watch = CatalogWatch::new(db.clone());

        let mut videos = watch.videos(a);
        assert_eq!(videos.next().await.unwrap().unwrap().len(), 1);

        db.import_collection(&info("/m/B", &["y", "z"]), Utc::now())
            .await
            .unwrap();
        db.import_collection(&info("/m/A", &["x", "w"]), Utc::now())
            .await
            .unwrap();

        // The first re-query is triggered by A's own change, not B's.
        let snapshot = videos.next().await.unwrap().unwrap();
        let names: Vec<&str> = snapshot.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["w", "x"]);
    }
}
