//! Recursive project tree enumeration and file classification.

use std::path::{Path, PathBuf};

use weld_common::{mtime_of, Mtime};

use crate::error::DiscoveryError;

/// Extensions of compilable source files.
const SOURCE_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx", "c++"];

/// Extensions of header files.
const HEADER_EXTENSIONS: &[&str] = &["h", "hh", "hpp", "hxx", "inl", "ipp"];

/// Whether a file is compiled on its own or only included.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileKind {
    /// A compilation unit.
    Source,
    /// An included file.
    Header,
}

/// One tracked file observed by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path relative to the project root.
    pub path: PathBuf,
    /// Source or header.
    pub kind: FileKind,
    /// Modification time when scanned.
    pub observed_mtime: Mtime,
}

/// The tracked files of a project, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Every tracked file.
    pub files: Vec<FileRecord>,
}

impl ScanResult {
    /// Relative paths of source files.
    pub fn sources(&self) -> Vec<PathBuf> {
        self.of_kind(FileKind::Source)
    }

    /// Relative paths of header files.
    pub fn headers(&self) -> Vec<PathBuf> {
        self.of_kind(FileKind::Header)
    }

    fn of_kind(&self, kind: FileKind) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|f| f.kind == kind)
            .map(|f| f.path.clone())
            .collect()
    }
}

/// Classifies a path by its extension.
///
/// Returns `None` for files the build does not track.
pub fn classify(path: &Path) -> Option<FileKind> {
    let ext = path.extension()?.to_str()?;
    if SOURCE_EXTENSIONS.contains(&ext) {
        Some(FileKind::Source)
    } else if HEADER_EXTENSIONS.contains(&ext) {
        Some(FileKind::Header)
    } else {
        None
    }
}

/// Returns `true` for directories the walk never descends into.
///
/// Hidden directories hold VCS metadata and the build's own state.
pub fn is_ignored_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Recursively enumerates and classifies the tracked files under `root`.
pub fn scan_tree(root: &Path) -> Result<ScanResult, DiscoveryError> {
    let mut files = Vec::new();
    walk_dir(root, root, &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(ScanResult { files })
}

fn walk_dir(root: &Path, dir: &Path, files: &mut Vec<FileRecord>) -> Result<(), DiscoveryError> {
    let walk_err = |e| DiscoveryError::Walk {
        path: dir.to_path_buf(),
        source: e,
    };
    for entry in std::fs::read_dir(dir).map_err(walk_err)? {
        let path = entry.map_err(walk_err)?.path();
        if path.is_dir() {
            if !is_ignored_dir(&path) {
                walk_dir(root, &path, files)?;
            }
        } else if let Some(kind) = classify(&path) {
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            files.push(FileRecord {
                observed_mtime: mtime_of(&path).unwrap_or(Mtime::ZERO),
                path: relative,
                kind,
            });
        }
    }
    Ok(())
}
