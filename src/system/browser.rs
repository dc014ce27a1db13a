//! Lists folders a user can pick as an import root.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const SYSTEM_FOLDERS: [&str; 11] = [
    "Android",
    "android",
    "system",
    "System",
    "proc",
    "dev",
    "sys",
    "cache",
    "lost+found",
    ".android_secure",
    ".thumbnails",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub name: String,
    pub path: PathBuf,
}

pub fn is_system_folder(name: &str) -> bool {
    name.starts_with('.') || SYSTEM_FOLDERS.contains(&name)
}

/// Immediate, readable, non-hidden subdirectories of `path`, sorted by lowercase name.
/// A missing path or a file yields an empty list.
pub fn list_folders(path: &Path) -> Result<Vec<FolderEntry>> {
    if !path.is_dir() {
        return Ok(Vec::new());
    }

    let mut folders = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping entry in {:?}: {}", path, e);
                continue;
            }
        };
        let entry_path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        if !entry_path.is_dir() || is_system_folder(&name) {
            continue;
        }
        if fs::read_dir(&entry_path).is_err() {
            continue;
        }
        folders.push(FolderEntry {
            name,
            path: entry_path,
        });
    }

    folders.sort_by_key(|f| f.name.to_lowercase());
    Ok(folders)
}
