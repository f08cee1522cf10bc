pub mod bitcode_store;

use std::path::Path;

use crate::normalize::Normalized;

/// Cache of normalized input files.
///
/// Entries are keyed by file path and only count as fresh while the
/// file's mtime and size are unchanged.
pub trait Storage {
    /// Check if a file is cached and fresh (matching mtime + size).
    fn is_cached(&self, file_path: &Path, mtime: i64, size: u64) -> bool;

    /// Store the normalized contents of a file.
    fn insert(&mut self, file_path: &Path, mtime: i64, size: u64, normalized: Normalized);

    /// Cached contents of a file, fresh or not.
    fn get(&self, file_path: &Path) -> Option<&Normalized>;

    /// Remove entries for files that no longer exist on disk.
    fn prune(&mut self);

    /// Persist any pending changes to disk. No-op if nothing changed.
    fn flush(&self);
}

/// Keeps entries for the current run only (`--no-cache`).
#[derive(Default)]
pub struct MemoryStorage {
    files: std::collections::HashMap<std::path::PathBuf, Normalized>,
}

impl Storage for MemoryStorage {
    fn is_cached(&self, _file_path: &Path, _mtime: i64, _size: u64) -> bool {
        false
    }

    fn insert(&mut self, file_path: &Path, _mtime: i64, _size: u64, normalized: Normalized) {
        self.files.insert(file_path.to_path_buf(), normalized);
    }

    fn get(&self, file_path: &Path) -> Option<&Normalized> {
        self.files.get(file_path)
    }

    fn prune(&mut self) {}

    fn flush(&self) {}
}

pub fn default_storage(use_cache: bool) -> Box<dyn Storage> {
    if use_cache {
        Box::new(bitcode_store::BitcodeStorage::open())
    } else {
        Box::new(MemoryStorage::default())
    }
}
