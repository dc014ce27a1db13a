use crate::config::Config;
use crate::error::{PineappleError, Result};
use crate::media::probe::{
    thumbnail_file_name, ExtractionResult, FfprobeExtractor, FileThumbnailSink,
    MetadataExtractor, ThumbnailSink,
};
use crate::media::{has_extension, VIDEO_EXTENSIONS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A video found on disk. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFile {
    /// File name without extension.
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    /// Milliseconds; 0 when unknown.
    pub duration_ms: u64,
    pub thumbnail_path: Option<PathBuf>,
}

/// One directory's worth of videos, sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub path: PathBuf,
    pub videos: Vec<VideoFile>,
}

#[derive(Clone)]
pub struct Scanner {
    pub extensions: Vec<String>,
    extractor: Arc<dyn MetadataExtractor>,
    thumbnails: Option<(PathBuf, Arc<dyn ThumbnailSink>)>,
    thumbnail_offset: Duration,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(Arc::new(FfprobeExtractor::default()))
    }
}

impl Scanner {
    pub fn new(extractor: Arc<dyn MetadataExtractor>) -> Self {
        Self {
            extensions: VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            extractor,
            thumbnails: None,
            thumbnail_offset: Duration::from_secs(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut scanner = Self::new(Arc::new(FfprobeExtractor::from_config(&config.scanner)))
            .with_extensions(config.scanner.extensions.clone())
            .with_thumbnail_offset(Duration::from_secs(config.scanner.thumbnail_offset_secs));

        if config.scanner.generate_thumbnails {
            scanner = scanner.with_thumbnails(
                config.library.thumbnail_dir.clone(),
                Arc::new(FileThumbnailSink),
            );
        }
        scanner
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_thumbnails(mut self, dir: PathBuf, sink: Arc<dyn ThumbnailSink>) -> Self {
        self.thumbnails = Some((dir, sink));
        self
    }

    pub fn with_thumbnail_offset(mut self, offset: Duration) -> Self {
        self.thumbnail_offset = offset;
        self
    }

    pub fn scan(&self, root: &Path) -> Result<Vec<CollectionInfo>> {
        self.scan_with_progress(root, |_, _, _| {})
    }

    /// Scans `root` and its immediate subdirectories. `on_progress(current, total, label)`
    /// fires once per directory and once per video, on the calling thread.
    pub fn scan_with_progress<F>(&self, root: &Path, mut on_progress: F) -> Result<Vec<CollectionInfo>>
    where
        F: FnMut(usize, usize, &str),
    {
        let never = AtomicBool::new(false);
        self.scan_abortable(root, &mut on_progress, &never)
    }

    /// Scans a single directory without descending into it. `None` if it is not a
    /// directory; the returned collection may have no videos.
    pub fn scan_collection<F>(&self, dir: &Path, mut on_progress: F) -> Result<Option<CollectionInfo>>
    where
        F: FnMut(usize, usize, &str),
    {
        let never = AtomicBool::new(false);
        self.scan_collection_abortable(dir, &mut on_progress, &never)
    }

    pub(crate) fn scan_abortable(
        &self,
        root: &Path,
        on_progress: &mut dyn FnMut(usize, usize, &str),
        abort: &AtomicBool,
    ) -> Result<Vec<CollectionInfo>> {
        let Some(root) = canonical_dir(root) else {
            debug!("Nothing to scan at {:?}", root);
            return Ok(Vec::new());
        };
        info!("Scanning directory: {:?}", root);

        let mut targets = Vec::new();
        let mut root_has_videos = false;
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(PineappleError::Scan(format!(
                        "Cannot list {:?}: {}",
                        root, e
                    )))
                }
                Err(e) => {
                    warn!("Skipping unreadable entry in {:?}: {}", root, e);
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                targets.push(entry.into_path());
            } else if entry.file_type().is_file() && has_extension(entry.path(), &self.extensions)
            {
                root_has_videos = true;
            }
        }
        if root_has_videos {
            targets.insert(0, root.clone());
        }

        let total = targets.len();
        let mut collections = Vec::new();
        for (index, dir) in targets.into_iter().enumerate() {
            let name = dir_name(&dir);
            on_progress(index, total, &format!("scanning folder: {}", name));

            let videos = self.scan_videos(&dir, index, total, on_progress, abort)?;
            if !videos.is_empty() {
                collections.push(CollectionInfo {
                    name,
                    path: dir,
                    videos,
                });
            }
        }

        info!(
            "Found {} collections ({} videos) under {:?}",
            collections.len(),
            collections.iter().map(|c| c.videos.len()).sum::<usize>(),
            root
        );
        Ok(collections)
    }

    pub(crate) fn scan_collection_abortable(
        &self,
        dir: &Path,
        on_progress: &mut dyn FnMut(usize, usize, &str),
        abort: &AtomicBool,
    ) -> Result<Option<CollectionInfo>> {
        let Some(dir) = canonical_dir(dir) else {
            return Ok(None);
        };

        let name = dir_name(&dir);
        on_progress(0, 1, &format!("scanning folder: {}", name));
        let videos = self.scan_videos(&dir, 0, 1, on_progress, abort)?;

        Ok(Some(CollectionInfo {
            name,
            path: dir,
            videos,
        }))
    }

    fn scan_videos(
        &self,
        dir: &Path,
        dir_index: usize,
        dir_total: usize,
        on_progress: &mut dyn FnMut(usize, usize, &str),
        abort: &AtomicBool,
    ) -> Result<Vec<VideoFile>> {
        let mut candidates: Vec<(String, PathBuf, u64)> = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
        {
            let entry = match entry {
                Ok(entry) => entry,
                // The folder itself could not be listed; an empty result would wipe its videos.
                Err(e) if e.depth() == 0 => {
                    return Err(PineappleError::Scan(format!("Cannot list {:?}: {}", dir, e)))
                }
                Err(e) => {
                    warn!("Skipping unreadable entry in {:?}: {}", dir, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !has_extension(entry.path(), &self.extensions) {
                continue;
            }
            let name = entry
                .path()
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            candidates.push((name, entry.into_path(), size));
        }

        // Ordinal by name; full path breaks ties between e.g. `a.mp4` and `a.mkv`.
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let count = candidates.len();
        let mut videos = Vec::with_capacity(count);
        for (i, (name, path, size)) in candidates.into_iter().enumerate() {
            if abort.load(Ordering::Relaxed) {
                return Err(PineappleError::Cancelled);
            }
            on_progress(
                dir_index,
                dir_total,
                &format!("processing video: {} ({}/{})", name, i + 1, count),
            );

            let ExtractionResult {
                duration_ms,
                thumbnail,
            } = self.extract(&path);
            debug!("Found media file: {:?} ({} ms)", path, duration_ms);

            videos.push(VideoFile {
                name,
                path,
                size,
                duration_ms,
                thumbnail_path: thumbnail,
            });
        }
        Ok(videos)
    }

    /// Never fails: a missing duration becomes 0 and a missing thumbnail stays absent.
    pub fn extract(&self, path: &Path) -> ExtractionResult {
        let duration_ms = match self.extractor.duration_ms(path) {
            Ok(ms) => ms,
            Err(e) => {
                debug!("No duration for {:?}: {}", path, e);
                0
            }
        };

        ExtractionResult {
            duration_ms,
            thumbnail: self.thumbnail_for(path),
        }
    }

    fn thumbnail_for(&self, path: &Path) -> Option<PathBuf> {
        let (dir, sink) = self.thumbnails.as_ref()?;
        let target = dir.join(thumbnail_file_name(path));

        let written = self
            .extractor
            .frame_at(path, self.thumbnail_offset)
            .and_then(|frame| sink.write(&frame, &target));

        match written {
            Ok(()) => Some(target),
            Err(e) => {
                warn!("Failed to generate thumbnail for {:?}: {}", path, e);
                None
            }
        }
    }
}

fn canonical_dir(path: &Path) -> Option<PathBuf> {
    let canonical = fs::canonicalize(path).ok()?;
    canonical.is_dir().then_some(canonical)
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::probe::Frame;

    struct FixedExtractor;

    impl MetadataExtractor for FixedExtractor {
        fn duration_ms(&self, path: &Path) -> Result<u64> {
            if path.to_string_lossy().contains("broken") {
                return Err(PineappleError::Probe("corrupt header".into()));
            }
            Ok(60_000)
        }

        fn frame_at(&self, path: &Path, _at: Duration) -> Result<Frame> {
            if path.to_string_lossy().contains("broken") {
                return Err(PineappleError::Thumbnail("no frame".into()));
            }
            Ok(Frame { data: vec![1, 2, 3] })
        }
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"data").unwrap();
    }

    fn scanner() -> Scanner {
        Scanner::new(Arc::new(FixedExtractor))
    }

    #[test]
    fn test_missing_root_is_empty() {
        let result = scanner().scan(Path::new("/no/such/dir/anywhere")).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_file_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("movie.mp4");
        touch(&file);
        assert!(scanner().scan(&file).unwrap().is_empty());
    }

    #[test]
    fn test_nested_directories_are_not_descended() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Show/Season1/e1.mp4"));

        // `Show` has no direct videos and `Season1` is two levels down.
        assert!(scanner().scan(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_root_with_videos_comes_first() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("root_clip.mp4"));
        touch(&dir.path().join("Alpha/a.mp4"));
        touch(&dir.path().join("Beta/b.mp4"));

        let collections = scanner().scan(dir.path()).unwrap();
        let names: Vec<&str> = collections.iter().map(|c| c.name.as_str()).collect();

        let root_name = dir_name(&fs::canonicalize(dir.path()).unwrap());
        assert_eq!(names, vec![root_name.as_str(), "Alpha", "Beta"]);
        assert_eq!(collections[0].videos[0].name, "root_clip");
    }

    #[test]
    fn test_videos_sorted_case_sensitively() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mp4", "B.mkv", "a.avi", "A.MOV"] {
            touch(&dir.path().join("Mixed").join(name));
        }

        let collections = scanner().scan(dir.path()).unwrap();
        let names: Vec<&str> = collections[0].videos.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "a", "b"]);
    }

    #[test]
    fn test_failed_extraction_degrades_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let thumbs = dir.path().join("thumbs");
        touch(&dir.path().join("Films/good.mp4"));
        touch(&dir.path().join("Films/broken.mp4"));

        let scanner = scanner().with_thumbnails(thumbs.clone(), Arc::new(FileThumbnailSink));
        let collections = scanner.scan(dir.path()).unwrap();
        assert_eq!(collections.len(), 1);
        let videos = &collections[0].videos;
        assert_eq!(videos.len(), 2);

        let broken = &videos[0];
        assert_eq!(broken.name, "broken");
        assert_eq!(broken.duration_ms, 0);
        assert!(broken.thumbnail_path.is_none());

        let good = &videos[1];
        assert_eq!(good.duration_ms, 60_000);
        let thumb = good.thumbnail_path.as_ref().unwrap();
        assert!(thumb.starts_with(&thumbs));
        assert!(thumb.exists());
    }

    #[test]
    fn test_progress_fires_per_directory_and_video() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("A/1.mp4"));
        touch(&dir.path().join("A/2.mp4"));
        touch(&dir.path().join("B/3.mp4"));
        touch(&dir.path().join("Empty/readme.txt"));

        let mut labels = Vec::new();
        scanner()
            .scan_with_progress(dir.path(), |current, total, label| {
                labels.push((current, total, label.to_string()));
            })
            .unwrap();

        assert_eq!(
            labels,
            vec![
                (0, 3, "scanning folder: A".to_string()),
                (0, 3, "processing video: 1 (1/2)".to_string()),
                (0, 3, "processing video: 2 (2/2)".to_string()),
                (1, 3, "scanning folder: B".to_string()),
                (1, 3, "processing video: 3 (1/1)".to_string()),
                (2, 3, "scanning folder: Empty".to_string()),
            ]
        );
    }

    #[test]
    fn test_abort_flag_stops_at_file_boundary() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("A/1.mp4"));

        let abort = AtomicBool::new(true);
        let result = scanner().scan_abortable(dir.path(), &mut |_, _, _| {}, &abort);
        assert!(matches!(result, Err(PineappleError::Cancelled)));
    }

    #[test]
    fn test_scan_collection_only_looks_at_one_directory() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Show/e1.mp4"));
        touch(&dir.path().join("Show/Extras/bonus.mp4"));

        let info = scanner()
            .scan_collection(&dir.path().join("Show"), |_, _, _| {})
            .unwrap()
            .unwrap();
        assert_eq!(info.name, "Show");
        assert_eq!(info.videos.len(), 1);

        let missing = scanner()
            .scan_collection(&dir.path().join("Gone"), |_, _, _| {})
            .unwrap();
        assert!(missing.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_unlistable_collection_is_scan_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let show = dir.path().join("Show");
        touch(&show.join("e1.mp4"));
        fs::set_permissions(&show, fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not apply to root.
        if fs::read_dir(&show).is_ok() {
            fs::set_permissions(&show, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = scanner().scan_collection(&show, |_, _, _| {});
        fs::set_permissions(&show, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(matches!(result, Err(PineappleError::Scan(_))));
    }
}
