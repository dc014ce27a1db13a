//! Resume positions and neighbour lookup for auto-advance.

use crate::db::{Db, PlaybackHistory, RecentPlayback, Video};
use crate::error::Result;
use chrono::Utc;
use std::sync::Arc;

pub struct PlaybackTracker {
    db: Arc<Db>,
}

impl PlaybackTracker {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Stores the position as given; clamping against `duration` is the player's job.
    pub async fn save(&self, video_id: i64, position: i64, duration: i64) -> Result<()> {
        self.db
            .save_playback(video_id, position, duration, Utc::now())
            .await
    }

    pub async fn get(&self, video_id: i64) -> Result<Option<PlaybackHistory>> {
        self.db.get_playback(video_id).await
    }

    pub async fn get_recent(&self, limit: i64) -> Result<Vec<RecentPlayback>> {
        self.db.recent_playback(limit).await
    }

    pub async fn delete(&self, video_id: i64) -> Result<bool> {
        self.db.delete_playback(video_id).await
    }

    pub async fn resume_position(&self, video_id: i64) -> Result<i64> {
        Ok(self.get(video_id).await?.map(|h| h.position).unwrap_or(0))
    }

    pub async fn next_video(&self, video_id: i64) -> Result<Option<Video>> {
        self.neighbour(video_id, 1).await
    }

    pub async fn previous_video(&self, video_id: i64) -> Result<Option<Video>> {
        self.neighbour(video_id, -1).await
    }

    async fn neighbour(&self, video_id: i64, step: isize) -> Result<Option<Video>> {
        let Some(current) = self.db.get_video(video_id).await? else {
            return Ok(None);
        };
        let mut playlist = self.db.list_videos(current.collection_id).await?;

        let Some(index) = playlist.iter().position(|v| v.id == video_id) else {
            return Ok(None);
        };
        let Some(target) = index.checked_add_signed(step) else {
            return Ok(None);
        };
        if target >= playlist.len() {
            return Ok(None);
        }
        Ok(Some(playlist.swap_remove(target)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::scanner::{CollectionInfo, VideoFile};
    use std::path::PathBuf;

    async fn seeded() -> (tempfile::TempDir, Arc<Db>, Vec<Video>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::new(dir.path().join("catalog.db")).await.unwrap());
        let info = CollectionInfo {
            name: "Series".to_string(),
            path: PathBuf::from("/media/Series"),
            videos: ["e1", "e2", "e3"]
                .iter()
                .map(|n| VideoFile {
                    name: n.to_string(),
                    path: PathBuf::from(format!("/media/Series/{}.mkv", n)),
                    size: 10,
                    duration_ms: 1000,
                    thumbnail_path: None,
                })
                .collect(),
        };
        let id = db.import_collection(&info, Utc::now()).await.unwrap();
        let videos = db.list_videos(id).await.unwrap();
        (dir, db, videos)
    }

    #[tokio::test]
    async fn test_resume_defaults_to_zero() {
        let (_dir, db, videos) = seeded().await;
        let tracker = PlaybackTracker::new(db);

        assert_eq!(tracker.resume_position(videos[0].id).await.unwrap(), 0);
        tracker.save(videos[0].id, 4200, 1000).await.unwrap();
        // Out-of-range positions are stored untouched.
        assert_eq!(tracker.resume_position(videos[0].id).await.unwrap(), 4200);
    }

    #[tokio::test]
    async fn test_recent_is_newest_first_and_bounded() {
        let (_dir, db, videos) = seeded().await;
        let tracker = PlaybackTracker::new(db);

        for video in &videos {
            tracker.save(video.id, 10, 1000).await.unwrap();
        }

        let recent = tracker.get_recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].video_id, videos[2].id);
        assert_eq!(recent[1].video_id, videos[1].id);
        assert_eq!(recent[0].collection_name, "Series");
    }

    #[tokio::test]
    async fn test_neighbours_stop_at_ends() {
        let (_dir, db, videos) = seeded().await;
        let tracker = PlaybackTracker::new(db);

        let next = tracker.next_video(videos[0].id).await.unwrap();
        assert_eq!(next.map(|v| v.name), Some("e2".to_string()));

        assert!(tracker.next_video(videos[2].id).await.unwrap().is_none());
        assert!(tracker.previous_video(videos[0].id).await.unwrap().is_none());
        assert!(tracker.next_video(9999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_history() {
        let (_dir, db, videos) = seeded().await;
        let tracker = PlaybackTracker::new(db);

        tracker.save(videos[1].id, 10, 1000).await.unwrap();
        assert!(tracker.delete(videos[1].id).await.unwrap());
        assert!(tracker.get(videos[1].id).await.unwrap().is_none());
        assert!(!tracker.delete(videos[1].id).await.unwrap());
    }
}
