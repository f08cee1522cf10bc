use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::Storage;
use crate::normalize::Normalized;

const CACHE_FILE: &str = "requests.bin";

/// All cached inputs in one file: `~/.cache/ptusim/requests.bin`
pub struct BitcodeStorage {
    dir: Option<PathBuf>,
    cache: InputCache,
}

#[derive(Serialize, Deserialize, Default)]
struct InputCache {
    files: HashMap<String, CachedFile>,
    #[serde(skip)]
    dirty: bool,
}

#[derive(Serialize, Deserialize)]
struct CachedFile {
    mtime_secs: i64,
    size: u64,
    normalized: Normalized,
}

fn cache_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "ptusim").map(|d| d.cache_dir().to_path_buf())
}

fn key(file_path: &Path) -> String {
    file_path.to_string_lossy().to_string()
}

impl BitcodeStorage {
    pub fn open() -> Self {
        Self::open_in(cache_dir())
    }

    /// Load the cache stored under `dir`; a missing or unreadable cache starts empty.
    pub fn open_in(dir: Option<PathBuf>) -> Self {
        let cache = dir
            .as_ref()
            .and_then(|d| fs::read(d.join(CACHE_FILE)).ok())
            .and_then(|data| match bitcode::deserialize(&data) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!("discarding unreadable input cache: {e}");
                    None
                }
            })
            .unwrap_or_default();
        Self { dir, cache }
    }
}

impl Storage for BitcodeStorage {
    fn is_cached(&self, file_path: &Path, mtime: i64, size: u64) -> bool {
        self.cache
            .files
            .get(&key(file_path))
            .is_some_and(|e| e.mtime_secs == mtime && e.size == size)
    }

    fn insert(&mut self, file_path: &Path, mtime: i64, size: u64, normalized: Normalized) {
        self.cache.files.insert(
            key(file_path),
            CachedFile {
                mtime_secs: mtime,
                size,
                normalized,
            },
        );
        self.cache.dirty = true;
    }

    fn get(&self, file_path: &Path) -> Option<&Normalized> {
        self.cache.files.get(&key(file_path)).map(|e| &e.normalized)
    }

    fn prune(&mut self) {
        let before = self.cache.files.len();
        self.cache.files.retain(|k, _| Path::new(k).exists());
        if self.cache.files.len() != before {
            debug!(removed = before - self.cache.files.len(), "pruned input cache");
            self.cache.dirty = true;
        }
    }

    fn flush(&self) {
        if !self.cache.dirty {
            return;
        }
        let Some(dir) = &self.dir else { return };
        if let Err(e) = fs::create_dir_all(dir) {
            warn!("failed to create cache dir: {e}");
            return;
        }

        let data = match bitcode::serialize(&self.cache) {
            Ok(d) => d,
            Err(e) => {
                warn!("failed to serialize input cache: {e}");
                return;
            }
        };
        if let Err(e) = fs::write(dir.join(CACHE_FILE), data) {
            warn!("failed to write input cache: {e}");
        }
    }
}
