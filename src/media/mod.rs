//! File-level media handling: recognizing video files, probing them and
//! grouping them into collections.

pub mod probe;
pub mod scanner;

use std::path::Path;

/// Extensions recognized as video files, compared case-insensitively.
pub const VIDEO_EXTENSIONS: [&str; 11] = [
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "3gp", "ts", "m2ts",
];

pub fn is_video_file(path: &Path) -> bool {
    has_extension(path, &VIDEO_EXTENSIONS)
}

pub(crate) fn has_extension<S: AsRef<str>>(path: &Path, extensions: &[S]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| extensions.iter().any(|known| known.as_ref().eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}
