use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::normalize::{self, Normalized};
use crate::storage::Storage;

pub struct DiscoveredFile {
    pub path: PathBuf,
    pub mtime: i64,
    pub size: u64,
}

/// The path is canonicalized so cache keys don't depend on the working
/// directory or on how the file was named on the command line.
fn discovered_file(path: &Path) -> Option<DiscoveredFile> {
    let path = std::fs::canonicalize(path).ok()?;
    let meta = std::fs::metadata(&path).ok()?;
    let mtime = meta
        .modified()
        .ok()?
        .duration_since(SystemTime::UNIX_EPOCH)
        .ok()?
        .as_secs() as i64;
    Some(DiscoveredFile {
        path,
        mtime,
        size: meta.len(),
    })
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// Expand input arguments: files are taken as given, directories are
/// walked for `*.csv`. Results are sorted by path.
pub fn discover_inputs(inputs: &[PathBuf]) -> Result<Vec<DiscoveredFile>> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() && is_csv(entry.path()) {
                    if let Some(df) = discovered_file(entry.path()) {
                        files.push(df);
                    }
                }
            }
        } else {
            let df = discovered_file(input)
                .with_context(|| format!("cannot read input {}", input.display()))?;
            files.push(df);
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files.dedup_by(|a, b| a.path == b.path);
    if files.is_empty() {
        bail!("no CSV input files found");
    }
    Ok(files)
}

pub fn parse_file(path: &Path) -> Result<Normalized> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let normalized = normalize::normalize_reader(BufReader::new(file))
        .with_context(|| format!("cannot use {}", path.display()))?;
    debug!(
        path = %path.display(),
        accepted = normalized.report.accepted,
        rejected = normalized.report.rejected_total(),
        "parsed input"
    );
    Ok(normalized)
}

/// Normalize every file, reusing cached results, and merge them into one
/// timestamp-ordered request sequence.
pub fn load_inputs(
    files: &[DiscoveredFile],
    storage: &mut dyn Storage,
    progress: Option<&dyn Fn(usize, usize)>,
) -> Result<Normalized> {
    let total = files.len();

    // Phase 1: filter out cached files; sequential, needs &mut storage
    let mut cached_count = 0;
    let mut uncached: Vec<&DiscoveredFile> = Vec::new();
    for file in files {
        if storage.is_cached(&file.path, file.mtime, file.size) {
            cached_count += 1;
            debug!(path = %file.path.display(), "input cache hit");
            if let Some(cb) = &progress {
                cb(cached_count, total);
            }
        } else {
            uncached.push(file);
        }
    }

    // Phase 2: parse uncached files in parallel
    let results: Vec<_> = uncached
        .par_iter()
        .map(|file| (*file, parse_file(&file.path)))
        .collect();

    // Phase 3: insert results; sequential, needs &mut storage
    for (i, (file, normalized)) in results.into_iter().enumerate() {
        if let Some(cb) = &progress {
            cb(cached_count + i + 1, total);
        }
        storage.insert(&file.path, file.mtime, file.size, normalized?);
    }

    storage.prune();

    let mut merged = Normalized::default();
    for file in files {
        let Some(n) = storage.get(&file.path) else {
            warn!(path = %file.path.display(), "input vanished from cache");
            continue;
        };
        merged.report.merge(&n.report);
        merged.requests.extend(n.requests.iter().cloned());
    }
    merged.requests.sort_by_key(|r| r.timestamp);

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::fs;

    #[test]
    fn directories_are_walked_for_csv() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("a.csv"), "").unwrap();
        fs::write(dir.path().join("nested").join("b.CSV"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let files = discover_inputs(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn paths_are_canonical_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("usage.csv");
        fs::write(&file, "").unwrap();
        let roundabout = dir.path().join("nested").join("..").join("usage.csv");
        fs::create_dir(dir.path().join("nested")).unwrap();

        let files = discover_inputs(&[file.clone(), roundabout, dir.path().join(".")]).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].path.is_absolute());
        assert_eq!(files[0].path, fs::canonicalize(&file).unwrap());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(discover_inputs(&[PathBuf::from("/definitely/not/here.csv")]).is_err());
    }

    #[test]
    fn merges_files_in_timestamp_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("late.csv"),
            "timestamp,input_tokens,output_tokens\n2025-08-18T10:05:00Z,1,1\nbad,1,1\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("early.csv"),
            "Timestamp [UTC],Input Tokens,Output Tokens\n2025-08-18T09:00:00Z,2,2\n",
        )
        .unwrap();

        let files = discover_inputs(&[dir.path().to_path_buf()]).unwrap();
        let mut storage = MemoryStorage::default();
        let merged = load_inputs(&files, &mut storage, None).unwrap();

        assert_eq!(merged.requests.len(), 2);
        assert_eq!(merged.requests[0].input_tokens, 2);
        assert_eq!(merged.report.accepted, 2);
        assert_eq!(merged.report.rejected_total(), 1);
    }

    #[test]
    fn schema_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wrong.csv");
        fs::write(&path, "when,how many\n1,2\n").unwrap();

        let files = discover_inputs(&[path]).unwrap();
        let mut storage = MemoryStorage::default();
        let err = load_inputs(&files, &mut storage, None).unwrap_err();
        assert!(format!("{err:#}").contains("wrong.csv"));
        assert!(err.chain().any(|e| e.downcast_ref::<crate::error::SimError>().is_some()));
    }
}
