//! Gate checked before any scan touches the filesystem.

use std::fs;
use std::path::Path;

pub trait StorageAccess: Send + Sync {
    /// Whether the process may read `root`.
    fn may_read(&self, root: &Path) -> bool;
}

/// Probes the nearest existing ancestor of the path with `read_dir`.
///
/// A path that does not exist yet is allowed when its parent is readable; the scanner
/// then reports it as empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsAccess;

impl StorageAccess for FsAccess {
    fn may_read(&self, root: &Path) -> bool {
        let mut probe = Some(root);
        while let Some(path) = probe {
            if path.exists() {
                return if path.is_dir() {
                    fs::read_dir(path).is_ok()
                } else {
                    fs::metadata(path).is_ok()
                };
            }
            probe = path.parent();
        }
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl StorageAccess for AllowAll {
    fn may_read(&self, _root: &Path) -> bool {
        true
    }
}
