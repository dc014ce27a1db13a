use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::media::VIDEO_EXTENSIONS;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub library: LibraryConfig,
    pub scanner: ScannerConfig,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LibraryConfig {
    pub database_path: PathBuf,
    pub thumbnail_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    pub extensions: Vec<String>,
    pub generate_thumbnails: bool,
    pub thumbnail_offset_secs: u64,
    pub ffprobe_path: String,
    pub ffmpeg_path: String,
    pub refresh_strategy: RefreshStrategy,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PlaybackConfig {
    pub recent_limit: i64,
}

/// How `refresh_collection` reconciles a rescanned directory with the catalog.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RefreshStrategy {
    /// Delete every video of the collection and insert the fresh scan.
    /// Video ids change, and playback history for those videos is dropped.
    #[default]
    Replace,
    /// Match videos by file path: update in place, insert new, delete missing.
    Diff,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("pineapple.db"),
            thumbnail_dir: PathBuf::from("thumbnails"),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            extensions: VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            generate_thumbnails: true,
            thumbnail_offset_secs: 1,
            ffprobe_path: "ffprobe".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            refresh_strategy: RefreshStrategy::Replace,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { recent_limit: 20 }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
