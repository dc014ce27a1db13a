use crate::error::Result;
use crate::media::scanner::{CollectionInfo, VideoFile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 100;

/// Change notifications emitted after a write commits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum CatalogEvent {
    CollectionsChanged,
    VideosChanged {
        collection_id: i64,
    },
    PlaybackChanged {
        video_id: i64,
    },
    RefreshProgress {
        collection_id: i64,
        current: usize,
        total: usize,
        label: String,
    },
    RefreshFinished {
        collection_id: i64,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct Collection {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub cover_image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct Video {
    pub id: i64,
    pub collection_id: i64,
    pub name: String,
    pub file_path: String,
    pub cover_image: Option<String>,
    /// Milliseconds; 0 when the probe could not read it.
    pub duration: i64,
    pub file_size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct PlaybackHistory {
    pub video_id: i64,
    pub position: i64,
    pub duration: i64,
    pub last_played_at: DateTime<Utc>,
}

/// A playback history row joined with the video and collection it belongs to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct RecentPlayback {
    pub video_id: i64,
    pub video_name: String,
    pub file_path: String,
    pub cover_image: Option<String>,
    pub collection_id: i64,
    pub collection_name: String,
    pub position: i64,
    pub duration: i64,
    pub last_played_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct SearchResult {
    pub id: i64,
    pub collection_id: i64,
    pub name: String,
    pub file_path: String,
    pub cover_image: Option<String>,
    pub duration: i64,
    pub file_size: i64,
    pub collection_name: String,
}

pub struct Db {
    pool: SqlitePool,
    events: broadcast::Sender<CatalogEvent>,
}

impl Db {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self { pool, events })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: CatalogEvent) {
        // No receivers is fine; observers come and go.
        let _ = self.events.send(event);
    }

    /// Inserts the collection if its path is new, then upserts every video by file path.
    /// The whole batch commits in one transaction. Returns the collection id.
    pub async fn import_collection(
        &self,
        info: &CollectionInfo,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let path = info.path.to_string_lossy().into_owned();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO collections (name, path, cover_image, created_at, updated_at)
             VALUES (?, ?, NULL, ?, ?)
             ON CONFLICT(path) DO NOTHING",
        )
        .bind(&info.name)
        .bind(&path)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let collection_id: i64 = sqlx::query_scalar("SELECT id FROM collections WHERE path = ?")
            .bind(&path)
            .fetch_one(&mut *tx)
            .await?;

        for video in &info.videos {
            upsert_video(&mut tx, collection_id, video, now).await?;
        }

        tx.commit().await?;
        debug!(
            "Imported collection {} ({} videos) as #{}",
            info.name,
            info.videos.len(),
            collection_id
        );

        self.emit(CatalogEvent::CollectionsChanged);
        self.emit(CatalogEvent::VideosChanged { collection_id });
        Ok(collection_id)
    }

    /// Deletes every video of the collection and inserts `videos` in its place.
    pub async fn replace_videos(
        &self,
        collection_id: i64,
        videos: &[VideoFile],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM videos WHERE collection_id = ?")
            .bind(collection_id)
            .execute(&mut *tx)
            .await?;

        for video in videos {
            upsert_video(&mut tx, collection_id, video, now).await?;
        }
        touch_collection(&mut tx, collection_id, now).await?;

        tx.commit().await?;
        self.emit(CatalogEvent::CollectionsChanged);
        self.emit(CatalogEvent::VideosChanged { collection_id });
        Ok(())
    }

    /// Matches `videos` against the stored rows by file path. Existing rows keep their id,
    /// new paths are inserted and paths no longer on disk are removed.
    pub async fn reconcile_videos(
        &self,
        collection_id: i64,
        videos: &[VideoFile],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let existing: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, file_path FROM videos WHERE collection_id = ?")
                .bind(collection_id)
                .fetch_all(&mut *tx)
                .await?;

        let fresh: HashSet<String> = videos
            .iter()
            .map(|v| v.path.to_string_lossy().into_owned())
            .collect();

        for (id, file_path) in existing {
            if !fresh.contains(&file_path) {
                sqlx::query("DELETE FROM videos WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        for video in videos {
            upsert_video(&mut tx, collection_id, video, now).await?;
        }
        touch_collection(&mut tx, collection_id, now).await?;

        tx.commit().await?;
        self.emit(CatalogEvent::CollectionsChanged);
        self.emit(CatalogEvent::VideosChanged { collection_id });
        Ok(())
    }

    /// Deletes the collection's videos, then the collection. Returns false if it did not exist.
    pub async fn delete_collection(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM videos WHERE collection_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            self.emit(CatalogEvent::VideosChanged { collection_id: id });
            self.emit(CatalogEvent::CollectionsChanged);
        }
        Ok(deleted)
    }

    pub async fn update_collection_cover(
        &self,
        id: i64,
        cover_image: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE collections SET cover_image = ?, updated_at = ? WHERE id = ?")
            .bind(cover_image)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.emit(CatalogEvent::CollectionsChanged);
        Ok(())
    }

    pub async fn list_collections(&self) -> Result<Vec<Collection>> {
        let collections = sqlx::query_as::<_, Collection>(
            "SELECT id, name, path, cover_image, created_at, updated_at
             FROM collections
             ORDER BY updated_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(collections)
    }

    pub async fn get_collection(&self, id: i64) -> Result<Option<Collection>> {
        let collection = sqlx::query_as::<_, Collection>(
            "SELECT id, name, path, cover_image, created_at, updated_at
             FROM collections WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(collection)
    }

    pub async fn get_collection_by_path(&self, path: &str) -> Result<Option<Collection>> {
        let collection = sqlx::query_as::<_, Collection>(
            "SELECT id, name, path, cover_image, created_at, updated_at
             FROM collections WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(collection)
    }

    pub async fn list_videos(&self, collection_id: i64) -> Result<Vec<Video>> {
        let videos = sqlx::query_as::<_, Video>(
            "SELECT id, collection_id, name, file_path, cover_image, duration, file_size,
                    created_at, updated_at
             FROM videos
             WHERE collection_id = ?
             ORDER BY name ASC, id ASC",
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(videos)
    }

    pub async fn get_video(&self, id: i64) -> Result<Option<Video>> {
        let video = sqlx::query_as::<_, Video>(
            "SELECT id, collection_id, name, file_path, cover_image, duration, file_size,
                    created_at, updated_at
             FROM videos WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(video)
    }

    /// Case-insensitive substring match on video names. A blank query matches nothing.
    pub async fn search_videos(&self, query: &str) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let results = sqlx::query_as::<_, SearchResult>(
            "SELECT v.id, v.collection_id, v.name, v.file_path, v.cover_image,
                    v.duration, v.file_size, c.name AS collection_name
             FROM videos v
             JOIN collections c ON c.id = v.collection_id
             WHERE v.name LIKE '%' || ? || '%' ESCAPE '\\'
             ORDER BY v.name ASC, v.id ASC",
        )
        .bind(escape_like(query))
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    pub async fn count_collections(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collections")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_videos(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM videos")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Last write wins; one row per video.
    pub async fn save_playback(
        &self,
        video_id: i64,
        position: i64,
        duration: i64,
        played_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO playback_history (video_id, position, duration, last_played_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(video_id) DO UPDATE SET
             position = excluded.position,
             duration = excluded.duration,
             last_played_at = excluded.last_played_at",
        )
        .bind(video_id)
        .bind(position)
        .bind(duration)
        .bind(played_at)
        .execute(&self.pool)
        .await?;

        self.emit(CatalogEvent::PlaybackChanged { video_id });
        Ok(())
    }

    pub async fn get_playback(&self, video_id: i64) -> Result<Option<PlaybackHistory>> {
        let history = sqlx::query_as::<_, PlaybackHistory>(
            "SELECT video_id, position, duration, last_played_at
             FROM playback_history WHERE video_id = ?",
        )
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(history)
    }

    pub async fn delete_playback(&self, video_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM playback_history WHERE video_id = ?")
            .bind(video_id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            self.emit(CatalogEvent::PlaybackChanged { video_id });
        }
        Ok(deleted)
    }

    /// Most recently played first.
    pub async fn recent_playback(&self, limit: i64) -> Result<Vec<RecentPlayback>> {
        let rows = sqlx::query_as::<_, RecentPlayback>(
            "SELECT h.video_id, v.name AS video_name, v.file_path, v.cover_image,
                    c.id AS collection_id, c.name AS collection_name,
                    h.position, h.duration, h.last_played_at
             FROM playback_history h
             JOIN videos v ON v.id = h.video_id
             JOIN collections c ON c.id = v.collection_id
             ORDER BY h.last_played_at DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

async fn upsert_video(
    conn: &mut SqliteConnection,
    collection_id: i64,
    video: &VideoFile,
    now: DateTime<Utc>,
) -> Result<()> {
    let cover = video
        .thumbnail_path
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned());

    sqlx::query(
        "INSERT INTO videos
         (collection_id, name, file_path, cover_image, duration, file_size, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(collection_id, file_path) DO UPDATE SET
         name = excluded.name,
         cover_image = excluded.cover_image,
         duration = excluded.duration,
         file_size = excluded.file_size,
         updated_at = excluded.updated_at",
    )
    .bind(collection_id)
    .bind(&video.name)
    .bind(video.path.to_string_lossy().into_owned())
    .bind(cover)
    .bind(clamp_i64(video.duration_ms))
    .bind(clamp_i64(video.size))
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn touch_collection(
    conn: &mut SqliteConnection,
    collection_id: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE collections SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(collection_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
