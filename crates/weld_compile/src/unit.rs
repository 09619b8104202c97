//! Compilation units and their per-build results.

use std::path::{Path, PathBuf};
use std::time::Duration;

use weld_cache::unit_fingerprint;
use weld_common::ContentHash;
use weld_deps::DependencyGraph;

use crate::advisor::FixSuggestion;

/// One source file mapped to its emitted intermediate module.
///
/// Units never depend on each other's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationUnit {
    /// Project-relative source path.
    pub source: PathBuf,
    /// Project-relative emitted module path.
    pub module: PathBuf,
    /// Live fingerprint of every input, or `None` if an input is missing.
    pub fingerprint: Option<ContentHash>,
}

/// Where the module of `source` is written: `<output_dir>/<source>.bc`.
pub fn module_path_for(output_dir: &Path, source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    name.push(".bc");
    output_dir.join(name)
}

/// Builds the units for `sources`, fingerprinting each against the graph.
pub fn plan_units(
    root: &Path,
    sources: &[PathBuf],
    output_dir: &Path,
    graph: &DependencyGraph,
    config: &ContentHash,
) -> Vec<CompilationUnit> {
    sources
        .iter()
        .map(|source| CompilationUnit {
            source: source.clone(),
            module: module_path_for(output_dir, source),
            fingerprint: unit_fingerprint(root, source, graph, config),
        })
        .collect()
}

/// Why a unit failed to compile.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFailure {
    /// Raw compiler output, or the spawn error.
    pub output: String,
    /// Compiler exit code, if it exited normally.
    pub exit_code: Option<i32>,
    /// Whether the compiler was killed for exceeding the unit timeout.
    pub timed_out: bool,
    /// Fix suggestions from the advisor for the last attempt.
    pub suggestions: Vec<FixSuggestion>,
    /// Advisor-authorized retries that were attempted.
    pub retries: u32,
}

/// The outcome for one unit.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitStatus {
    /// The cached module was still valid.
    Cached,
    /// Compiled successfully this build.
    Compiled {
        /// Wall-clock compile time.
        duration: Duration,
        /// Advisor-authorized retries needed.
        retries: u32,
    },
    /// Compilation failed.
    Failed(UnitFailure),
    /// Not dispatched, or its result was discarded, because the build was
    /// cancelled.
    Cancelled,
}

/// A unit paired with its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitResult {
    /// Project-relative source path.
    pub source: PathBuf,
    /// Project-relative module path.
    pub module: PathBuf,
    /// What happened.
    pub status: UnitStatus,
}

impl UnitResult {
    /// Returns `true` if the module is available for linking.
    pub fn is_usable(&self) -> bool {
        matches!(self.status, UnitStatus::Cached | UnitStatus::Compiled { .. })
    }

    /// The failure, if the unit failed.
    pub fn failure(&self) -> Option<&UnitFailure> {
        match &self.status {
            UnitStatus::Failed(f) => Some(f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use weld_cache::config_fingerprint;

    #[test]
    fn module_path_keeps_source_layout() {
        assert_eq!(
            module_path_for(Path::new(".weld/obj"), Path::new("src/vector.cpp")),
            PathBuf::from(".weld/obj/src/vector.cpp.bc")
        );
    }

    #[test]
    fn same_stem_sources_get_distinct_modules() {
        let a = module_path_for(Path::new("obj"), Path::new("src/util.c"));
        let b = module_path_for(Path::new("obj"), Path::new("src/util.cpp"));
        assert_ne!(a, b);
    }

    #[test]
    fn plan_marks_missing_sources_unknowable() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.cpp"), "").unwrap();
        let graph = DependencyGraph::new(BTreeMap::new());
        let cfg = config_fingerprint(&[], &[]);
        let units = plan_units(
            tmp.path(),
            &[PathBuf::from("a.cpp"), PathBuf::from("gone.cpp")],
            Path::new("obj"),
            &graph,
            &cfg,
        );
        assert!(units[0].fingerprint.is_some());
        assert!(units[1].fingerprint.is_none());
        assert_eq!(units[1].module, PathBuf::from("obj/gone.cpp.bc"));
    }
}
