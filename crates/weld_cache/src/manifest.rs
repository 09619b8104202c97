//! Persistent per-unit cache state.
//!
//! The manifest is stored as `units.json` in the cache directory. It maps
//! every compiled source to its emitted module and the fingerprint of the
//! inputs it was compiled from.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use weld_common::ContentHash;

use crate::discovery::CacheEntry;
use crate::error::CacheError;

/// Name of the manifest file within the cache directory.
const MANIFEST_FILE: &str = "units.json";

/// Manifest layout version. Manifests of any other version are ignored.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Compilation-unit cache: source path to emitted module and fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitManifest {
    /// Layout version that produced this manifest.
    pub format_version: u32,
    /// Per-unit entries keyed by project-relative source path.
    pub units: BTreeMap<PathBuf, CacheEntry<PathBuf>>,
}

impl Default for UnitManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitManifest {
    /// Creates an empty manifest.
    pub fn new() -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            units: BTreeMap::new(),
        }
    }

    /// Loads the manifest from the cache directory, returning `None` if the
    /// file doesn't exist, can't be parsed, or has another layout version.
    pub fn load(cache_dir: &Path) -> Option<Self> {
        let path = cache_dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).ok()?;
        let manifest: Self = serde_json::from_str(&content).ok()?;
        (manifest.format_version == MANIFEST_FORMAT_VERSION).then_some(manifest)
    }

    /// Loads the manifest or starts empty.
    pub fn load_or_default(cache_dir: &Path) -> Self {
        Self::load(cache_dir).unwrap_or_else(|| {
            debug!(dir = %cache_dir.display(), "no usable unit manifest; starting empty");
            Self::new()
        })
    }

    /// Saves the manifest to the cache directory, creating it if needed.
    pub fn save(&self, cache_dir: &Path) -> Result<(), CacheError> {
        std::fs::create_dir_all(cache_dir).map_err(|e| CacheError::Io {
            path: cache_dir.to_path_buf(),
            source: e,
        })?;
        let path = cache_dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        std::fs::write(&path, json).map_err(|e| CacheError::Io { path, source: e })
    }

    /// Returns the cached module of `source` if its recorded fingerprint
    /// equals `live` and the module file still exists under `root`.
    pub fn fresh_module(&self, root: &Path, source: &Path, live: &ContentHash) -> Option<&Path> {
        let entry = self.units.get(source)?;
        if !entry.is_valid_for(live) {
            return None;
        }
        let module = entry.value.as_path();
        root.join(module).is_file().then_some(module)
    }

    /// Records a successful compilation.
    pub fn record(&mut self, source: PathBuf, module: PathBuf, fingerprint: ContentHash) {
        self.units.insert(
            source,
            CacheEntry {
                value: module,
                fingerprint,
            },
        );
    }

    /// Forgets one unit.
    pub fn forget(&mut self, source: &Path) {
        self.units.remove(source);
    }

    /// Removes units whose source is no longer part of the project and
    /// returns their module paths.
    pub fn prune(&mut self, live_sources: &BTreeSet<PathBuf>) -> Vec<PathBuf> {
        let dead: Vec<PathBuf> = self
            .units
            .keys()
            .filter(|s| !live_sources.contains(*s))
            .cloned()
            .collect();
        dead.into_iter()
            .filter_map(|s| self.units.remove(&s).map(|e| e.value))
            .collect()
    }

    /// Drops every unit.
    pub fn clear(&mut self) {
        self.units.clear();
    }
}
