//! Collaborators the scanner uses to read per-file metadata and to store thumbnails.
//!
//! Both return `Result`; the scanner folds failures into default values so one bad
//! file never fails a scan.

use crate::config::ScannerConfig;
use crate::error::{PineappleError, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// A single encoded video frame (JPEG bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
}

/// What the scanner learned about one file. Always produced, never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResult {
    /// Milliseconds, or 0 when unknown.
    pub duration_ms: u64,
    pub thumbnail: Option<PathBuf>,
}

pub trait MetadataExtractor: Send + Sync {
    fn duration_ms(&self, path: &Path) -> Result<u64>;

    fn frame_at(&self, path: &Path, at: Duration) -> Result<Frame>;
}

pub trait ThumbnailSink: Send + Sync {
    fn write(&self, frame: &Frame, target: &Path) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Reads duration with `ffprobe` and grabs frames with `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfprobeExtractor {
    ffprobe: String,
    ffmpeg: String,
}

impl Default for FfprobeExtractor {
    fn default() -> Self {
        Self::new("ffprobe", "ffmpeg")
    }
}

impl FfprobeExtractor {
    pub fn new(ffprobe: impl Into<String>, ffmpeg: impl Into<String>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    pub fn from_config(config: &ScannerConfig) -> Self {
        Self::new(config.ffprobe_path.clone(), config.ffmpeg_path.clone())
    }

    pub fn parse_duration_ms(json: &[u8]) -> Result<u64> {
        let output: FfprobeOutput = serde_json::from_slice(json)
            .map_err(|e| PineappleError::Probe(format!("Failed to parse ffprobe JSON: {}", e)))?;

        let raw = output
            .format
            .duration
            .ok_or_else(|| PineappleError::Probe("No duration in container".to_string()))?;

        let secs: f64 = raw
            .trim()
            .parse()
            .map_err(|_| PineappleError::Probe(format!("Unparseable duration: {}", raw)))?;

        if !secs.is_finite() || secs < 0.0 {
            return Err(PineappleError::Probe(format!("Invalid duration: {}", raw)));
        }
        Ok((secs * 1000.0).round() as u64)
    }
}

impl MetadataExtractor for FfprobeExtractor {
    fn duration_ms(&self, path: &Path) -> Result<u64> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_entries",
                "format=duration",
            ])
            .arg(path)
            .output()
            .map_err(|e| PineappleError::Probe(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let err = String::from_utf8_lossy(&output.stderr);
            return Err(PineappleError::Probe(format!("ffprobe failed: {}", err)));
        }

        Self::parse_duration_ms(&output.stdout)
    }

    fn frame_at(&self, path: &Path, at: Duration) -> Result<Frame> {
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-ss"])
            .arg(format!("{:.3}", at.as_secs_f64()))
            .arg("-i")
            .arg(path)
            .args([
                "-frames:v",
                "1",
                "-f",
                "image2pipe",
                "-vcodec",
                "mjpeg",
                "-q:v",
                "5",
                "-",
            ])
            .output()
            .map_err(|e| PineappleError::Thumbnail(format!("Failed to run ffmpeg: {}", e)))?;

        if !output.status.success() {
            let err = String::from_utf8_lossy(&output.stderr);
            return Err(PineappleError::Thumbnail(format!("ffmpeg failed: {}", err)));
        }
        if output.stdout.is_empty() {
            return Err(PineappleError::Thumbnail(format!(
                "No frame at {:?} in {:?}",
                at, path
            )));
        }

        Ok(Frame {
            data: output.stdout,
        })
    }
}

/// Writes frames as files, creating the target directory on demand.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileThumbnailSink;

impl ThumbnailSink for FileThumbnailSink {
    fn write(&self, frame: &Frame, target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, &frame.data)?;
        Ok(())
    }
}

/// `<stem>_<8 hex digits of the path digest>_thumb.jpg`, stable across runs and distinct
/// for equally named files in different directories.
pub fn thumbnail_file_name(video_path: &Path) -> String {
    let stem = video_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());

    let digest = Sha256::digest(video_path.to_string_lossy().as_bytes());
    let short: String = digest[..4].iter().map(|b| format!("{:02x}", b)).collect();

    format!("{}_{}_thumb.jpg", stem, short)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_ms() {
        let json = br#"{"format": {"duration": "83.4567"}}"#;
        assert_eq!(FfprobeExtractor::parse_duration_ms(json).ok(), Some(83457));

        let missing = br#"{"format": {}}"#;
        assert!(FfprobeExtractor::parse_duration_ms(missing).is_err());

        let garbage = br#"{"format": {"duration": "N/A"}}"#;
        assert!(FfprobeExtractor::parse_duration_ms(garbage).is_err());

        assert!(FfprobeExtractor::parse_duration_ms(b"not json").is_err());
    }

    #[test]
    fn test_thumbnail_name_is_deterministic() {
        let a = thumbnail_file_name(Path::new("/media/A/episode.mkv"));
        let again = thumbnail_file_name(Path::new("/media/A/episode.mkv"));
        let b = thumbnail_file_name(Path::new("/media/B/episode.mkv"));

        assert_eq!(a, again);
        assert_ne!(a, b);
        assert!(a.starts_with("episode_"));
        assert!(a.ends_with("_thumb.jpg"));
    }

    #[test]
    fn test_missing_binary_is_probe_error() {
        let extractor = FfprobeExtractor::new("/nonexistent/ffprobe", "/nonexistent/ffmpeg");
        let path = Path::new("/tmp/whatever.mp4");

        assert!(matches!(
            extractor.duration_ms(path),
            Err(PineappleError::Probe(_))
        ));
        assert!(matches!(
            extractor.frame_at(path, Duration::from_secs(1)),
            Err(PineappleError::Thumbnail(_))
        ));
    }

    #[test]
    fn test_file_sink_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("thumb.jpg");
        let frame = Frame {
            data: vec![0xFF, 0xD8, 0xFF],
        };

        FileThumbnailSink.write(&frame, &target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), frame.data);
    }
}
