//! Process-wide toolchain executable resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, info};

use crate::error::ToolError;

/// Environment variable naming a bundled toolchain root.
pub const TOOLCHAIN_ROOT_ENV: &str = "WELD_TOOLCHAIN_ROOT";

/// A resolved toolchain executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPath {
    /// The tool name that was searched for.
    pub name: String,
    /// The absolute path of the executable.
    pub absolute_path: PathBuf,
}

#[derive(Debug)]
struct LocatorState {
    bundled_root: Option<PathBuf>,
    path_dirs: Vec<PathBuf>,
    resolved: HashMap<String, ToolPath>,
}

/// Resolves toolchain executables and caches the results.
///
/// A bundled toolchain root (`<root>/bin`, then `<root>`) is searched before
/// the ambient `PATH`, so that system toolchain upgrades do not change the
/// compiler used for an existing project. Resolved paths are cached until
/// [`clear`](Self::clear) is called; misses are not cached.
#[derive(Debug)]
pub struct ToolLocator {
    state: Mutex<LocatorState>,
}

impl ToolLocator {
    /// Creates a locator with explicit search locations.
    pub fn new(bundled_root: Option<PathBuf>, path_dirs: Vec<PathBuf>) -> Self {
        Self {
            state: Mutex::new(LocatorState {
                bundled_root,
                path_dirs,
                resolved: HashMap::new(),
            }),
        }
    }

    /// Creates a locator from `WELD_TOOLCHAIN_ROOT` and `PATH`.
    pub fn from_env() -> Self {
        let bundled_root = std::env::var_os(TOOLCHAIN_ROOT_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let path_dirs = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        Self::new(bundled_root, path_dirs)
    }

    /// The locator shared by the whole process, created from the environment
    /// on first use.
    pub fn shared() -> Arc<ToolLocator> {
        static SHARED: OnceLock<Arc<ToolLocator>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(ToolLocator::from_env())))
    }

    /// Sets the bundled root unless the environment already chose one.
    ///
    /// Changing the root drops every cached resolution.
    pub fn prefer_bundled_root(&self, root: &Path) {
        let mut state = self.state.lock().unwrap();
        if std::env::var_os(TOOLCHAIN_ROOT_ENV).is_some_and(|v| !v.is_empty()) {
            return;
        }
        if state.bundled_root.as_deref() != Some(root) {
            debug!(root = %root.display(), "bundled toolchain root configured");
            state.bundled_root = Some(root.to_path_buf());
            state.resolved.clear();
        }
    }

    /// Resolves one tool by executable name.
    pub fn resolve(&self, name: &str) -> Result<ToolPath, ToolError> {
        let mut state = self.state.lock().unwrap();
        if let Some(found) = state.resolved.get(name) {
            return Ok(found.clone());
        }
        let found = search(&state, name).ok_or_else(|| ToolError::NotFound {
            tools: vec![name.to_string()],
        })?;
        debug!(tool = name, path = %found.absolute_path.display(), "tool resolved");
        state.resolved.insert(name.to_string(), found.clone());
        Ok(found)
    }

    /// Resolves every named tool, reporting all missing ones together.
    pub fn discover_all<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<ToolPath>, ToolError> {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for name in names {
            match self.resolve(name) {
                Ok(path) => found.push(path),
                Err(_) => missing.push(name.to_string()),
            }
        }
        if missing.is_empty() {
            Ok(found)
        } else {
            info!(missing = %missing.join(", "), "toolchain incomplete");
            Err(ToolError::NotFound { tools: missing })
        }
    }

    /// Drops every cached resolution.
    pub fn clear(&self) {
        self.state.lock().unwrap().resolved.clear();
    }

    /// Number of cached resolutions.
    pub fn cached_count(&self) -> usize {
        self.state.lock().unwrap().resolved.len()
    }
}

fn search(state: &LocatorState, name: &str) -> Option<ToolPath> {
    let file_name = format!("{name}{}", std::env::consts::EXE_SUFFIX);
    let bundled = state
        .bundled_root
        .iter()
        .flat_map(|root| [root.join("bin"), root.clone()]);
    bundled
        .chain(state.path_dirs.iter().cloned())
        .map(|dir| dir.join(&file_name))
        .find(|candidate| is_executable(candidate))
        .map(|candidate| ToolPath {
            name: name.to_string(),
            absolute_path: std::fs::canonicalize(&candidate).unwrap_or(candidate),
        })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
