//! Fingerprints of the project tree, the include graph inputs, and units.

use std::path::{Path, PathBuf};

use weld_common::{mtime_of, ContentHash, HashBuilder, Mtime};
use weld_deps::scan::is_ignored_dir;
use weld_deps::{DependencyGraph, ScanResult};

use crate::error::CacheError;

/// Fingerprint of every file under `root`, from `(path, mtime)` pairs in
/// path order.
///
/// Only directory entries and metadata are read, so this is much cheaper
/// than a full scan. Hidden directories are skipped the same way the scanner
/// skips them.
pub fn tree_fingerprint(root: &Path) -> Result<ContentHash, CacheError> {
    let mut entries = Vec::new();
    collect(root, root, &mut entries)?;
    entries.sort();
    let mut hasher = HashBuilder::new();
    for (path, mtime) in &entries {
        hasher.str(&path.to_string_lossy()).u64(mtime.0);
    }
    Ok(hasher.finish())
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, Mtime)>) -> Result<(), CacheError> {
    let io_err = |e| CacheError::Io {
        path: dir.to_path_buf(),
        source: e,
    };
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_dir() {
            if !is_ignored_dir(&path) {
                collect(root, &path, out)?;
            }
        } else {
            let mtime = mtime_of(&path).unwrap_or(Mtime::ZERO);
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            out.push((relative, mtime));
        }
    }
    Ok(())
}

/// Fingerprint of the inputs of dependency-graph construction: every tracked
/// file with its mtime, the include search path, and the flags the
/// preprocessor runs with (a `-D` can change which headers are included).
pub fn graph_fingerprint(
    scan: &ScanResult,
    include_dirs: &[PathBuf],
    flags: &[String],
) -> ContentHash {
    let mut hasher = HashBuilder::new();
    hasher.u64(scan.files.len() as u64);
    for file in &scan.files {
        hasher.str(&file.path.to_string_lossy()).u64(file.observed_mtime.0);
    }
    hasher.field(config_fingerprint(flags, include_dirs).as_bytes());
    hasher.finish()
}

/// Fingerprint of the compile configuration shared by every unit.
pub fn config_fingerprint(flags: &[String], include_dirs: &[PathBuf]) -> ContentHash {
    let mut hasher = HashBuilder::new();
    hasher.u64(flags.len() as u64);
    for flag in flags {
        hasher.str(flag);
    }
    hasher.u64(include_dirs.len() as u64);
    for dir in include_dirs {
        hasher.str(&dir.to_string_lossy());
    }
    hasher.finish()
}

/// Fingerprint of one compilation unit.
///
/// Combines the newest mtime among the source and every header it includes
/// transitively (read off the graph's reverse index) with the compile
/// configuration. Returns `None` if any input cannot be stat'ed, which makes
/// the unit stale.
pub fn unit_fingerprint(
    root: &Path,
    source: &Path,
    graph: &DependencyGraph,
    config: &ContentHash,
) -> Option<ContentHash> {
    let mut newest = mtime_of(&root.join(source))?;
    for header in graph.closure_of(source) {
        newest = newest.max(mtime_of(&root.join(&header))?);
    }
    let mut hasher = HashBuilder::new();
    hasher.u64(newest.0).field(config.as_bytes());
    Some(hasher.finish())
}
