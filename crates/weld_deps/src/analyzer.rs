//! Include extraction over a whole project tree.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info};
use weld_common::Mtime;
use weld_toolchain::ToolInvoker;

use crate::error::{DiscoveryError, ScanError};
use crate::graph::{DependencyGraph, GraphNode};
use crate::includes::{parse_depfile, parse_include_directives, project_relative, resolve_include};
use crate::scan::{classify, scan_tree, FileKind, FileRecord, ScanResult};

/// How the real preprocessor is run for include extraction.
#[derive(Debug, Clone)]
pub struct PreprocessorConfig {
    /// Absolute path of the compiler.
    pub compiler: PathBuf,
    /// Extra flags passed before the include directories.
    pub flags: Vec<String>,
    /// Wall-clock limit per file.
    pub timeout: Duration,
}

/// Scans a project and extracts its include graph.
///
/// Extraction runs the preprocessor when one is configured and falls back to
/// text parsing when it is absent or fails for a file.
pub struct DependencyAnalyzer<'a> {
    root: PathBuf,
    search_dirs: Vec<PathBuf>,
    preprocessor: Option<(PreprocessorConfig, &'a dyn ToolInvoker)>,
    workers: Option<usize>,
}

impl<'a> DependencyAnalyzer<'a> {
    /// Creates an analyzer for `root`.
    ///
    /// `include_dirs` are searched in order and may be relative to `root`.
    pub fn new(root: &Path, include_dirs: &[PathBuf]) -> Self {
        Self {
            root: root.to_path_buf(),
            search_dirs: include_dirs.iter().map(|d| root.join(d)).collect(),
            preprocessor: None,
            workers: None,
        }
    }

    /// Uses the real preprocessor for extraction.
    pub fn with_preprocessor(mut self, config: PreprocessorConfig, invoker: &'a dyn ToolInvoker) -> Self {
        self.preprocessor = Some((config, invoker));
        self
    }

    /// Bounds the number of files extracted concurrently.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    /// The project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerates and classifies the tracked files.
    pub fn scan(&self) -> Result<ScanResult, DiscoveryError> {
        scan_tree(&self.root)
    }

    /// Extracts the includes of every scanned file and builds the graph.
    ///
    /// A file whose extraction fails gets an empty include list and its error
    /// recorded on its node.
    pub fn build_graph(&self, scan: &ScanResult) -> Result<DependencyGraph, DiscoveryError> {
        self.update_graph(scan, &DependencyGraph::default())
    }

    /// Builds the graph for `scan`, reusing the nodes of `previous` whose
    /// file is unchanged.
    ///
    /// A node is reused when its file has the same mtime it was extracted at
    /// and its extraction did not fail. Only the remaining files are
    /// extracted. Adding or removing a header can change how any include
    /// resolves, so in that case nothing is reused.
    pub fn update_graph(
        &self,
        scan: &ScanResult,
        previous: &DependencyGraph,
    ) -> Result<DependencyGraph, DiscoveryError> {
        let start = Instant::now();
        let mut nodes = BTreeMap::new();
        let mut stale = Vec::new();
        if same_headers(scan, previous) {
            for file in &scan.files {
                match previous.nodes().get(&file.path) {
                    Some(node) if is_reusable(node, file) => {
                        nodes.insert(file.path.clone(), node.clone());
                    }
                    _ => stale.push(file),
                }
            }
        } else {
            stale.extend(&scan.files);
        }
        let reused = nodes.len();

        let extract_stale = || -> Vec<(PathBuf, GraphNode)> {
            stale
                .par_iter()
                .map(|file| (file.path.clone(), self.extract(file)))
                .collect()
        };
        let extracted = match self.workers {
            Some(n) if !stale.is_empty() => rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| DiscoveryError::Workers {
                    reason: e.to_string(),
                })?
                .install(extract_stale),
            _ => extract_stale(),
        };
        nodes.extend(extracted);

        let graph = DependencyGraph::new(nodes);
        let failed = graph.failures().count();
        info!(
            files = scan.files.len(),
            extracted = stale.len(),
            reused,
            edges = graph.edges().len(),
            failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "dependency graph built"
        );
        Ok(graph)
    }

    fn extract(&self, file: &FileRecord) -> GraphNode {
        let absolute = self.root.join(&file.path);
        if let Some(includes) = self.extract_with_preprocessor(&absolute) {
            return GraphNode {
                includes,
                error: None,
                mtime: file.observed_mtime,
            };
        }
        match std::fs::read(&absolute) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let includes: BTreeSet<PathBuf> = parse_include_directives(&text)
                    .iter()
                    .filter_map(|token| {
                        resolve_include(&self.root, &absolute, token, &self.search_dirs)
                    })
                    .filter(|p| p != &file.path)
                    .collect();
                GraphNode {
                    includes: includes.into_iter().collect(),
                    error: None,
                    mtime: file.observed_mtime,
                }
            }
            Err(source) => {
                let err = ScanError::Read {
                    path: file.path.clone(),
                    source,
                };
                debug!(file = %file.path.display(), error = %err, "include extraction failed");
                GraphNode {
                    includes: Vec::new(),
                    error: Some(err.to_string()),
                    mtime: file.observed_mtime,
                }
            }
        }
    }

    /// Returns `None` when no preprocessor is configured or it fails, so the
    /// caller falls back to text extraction.
    fn extract_with_preprocessor(&self, absolute: &Path) -> Option<Vec<PathBuf>> {
        let (config, invoker) = self.preprocessor.as_ref()?;
        let mut argv = vec!["-MM".to_string()];
        argv.extend(config.flags.iter().cloned());
        argv.extend(
            self.search_dirs
                .iter()
                .map(|d| format!("-I{}", d.display())),
        );
        argv.push(absolute.display().to_string());

        let out = match invoker.invoke(&config.compiler, &argv, Some(config.timeout)) {
            Ok(out) if out.success() => out,
            Ok(out) => {
                debug!(file = %absolute.display(), exit = ?out.exit_code, "preprocessor failed; using text fallback");
                return None;
            }
            Err(e) => {
                debug!(file = %absolute.display(), error = %e, "preprocessor unavailable; using text fallback");
                return None;
            }
        };
        let self_relative = project_relative(&self.root, absolute);
        let includes: BTreeSet<PathBuf> = parse_depfile(&out.output, absolute)
            .iter()
            .filter_map(|dep| project_relative(&self.root, dep))
            .filter(|rel| Some(rel) != self_relative.as_ref())
            .filter(|rel| self.root.join(rel).is_file())
            .collect();
        Some(includes.into_iter().collect())
    }
}

fn is_reusable(node: &GraphNode, file: &FileRecord) -> bool {
    node.error.is_none() && file.observed_mtime != Mtime::ZERO && node.mtime == file.observed_mtime
}

/// Returns `true` if `previous` tracked exactly the headers `scan` found.
fn same_headers(scan: &ScanResult, previous: &DependencyGraph) -> bool {
    let now: BTreeSet<&Path> = scan
        .files
        .iter()
        .filter(|f| f.kind == FileKind::Header)
        .map(|f| f.path.as_path())
        .collect();
    let before: BTreeSet<&Path> = previous
        .nodes()
        .keys()
        .filter(|p| classify(p) == Some(FileKind::Header))
        .map(PathBuf::as_path)
        .collect();
    now == before
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;
    use tempfile::TempDir;
    use weld_toolchain::{ToolError, ToolOutput};

    fn project() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("include")).unwrap();
        fs::write(
            root.join("include/vector.h"),
            "#ifndef VECTOR_H\n#define VECTOR_H\n#include \"common.h\"\n#endif\n",
        )
        .unwrap();
        fs::write(root.join("include/common.h"), "#pragma once\n#include <cmath>\n").unwrap();
        fs::write(
            root.join("src/vector.cpp"),
            "#include \"vector.h\"\n#include <vector>\nint len() { return 0; }\n",
        )
        .unwrap();
        fs::write(root.join("src/matrix.cpp"), "#include <common.h>\n").unwrap();
        fs::write(root.join("src/standalone.cpp"), "int main() {}\n").unwrap();
        tmp
    }

    fn analyzer(root: &Path) -> DependencyAnalyzer<'static> {
        DependencyAnalyzer::new(root, &[PathBuf::from("include")])
    }

    fn analyze(analyzer: &DependencyAnalyzer<'_>) -> (ScanResult, DependencyGraph) {
        let scan = analyzer.scan().unwrap();
        let graph = analyzer.build_graph(&scan).unwrap();
        (scan, graph)
    }

    fn touch(path: &Path) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(30))
            .unwrap();
    }

    #[test]
    fn text_extraction_resolves_project_includes_only() {
        let tmp = project();
        let (_, g) = analyze(&analyzer(tmp.path()));
        assert_eq!(
            g.includes_of(Path::new("src/vector.cpp")),
            &[PathBuf::from("include/vector.h")]
        );
        assert_eq!(
            g.includes_of(Path::new("src/matrix.cpp")),
            &[PathBuf::from("include/common.h")]
        );
        assert!(g.includes_of(Path::new("include/common.h")).is_empty());
        assert_eq!(g.failures().count(), 0);
    }

    #[test]
    fn header_change_reaches_transitive_includers() {
        let tmp = project();
        let (_, graph) = analyze(&analyzer(tmp.path()));
        let dependents: BTreeSet<_> = graph
            .dependents_of(Path::new("include/common.h"))
            .cloned()
            .collect();
        assert!(dependents.contains(Path::new("src/vector.cpp")));
        assert!(dependents.contains(Path::new("src/matrix.cpp")));
        assert!(!dependents.contains(Path::new("src/standalone.cpp")));
    }

    #[test]
    fn graph_construction_is_idempotent() {
        let tmp = project();
        let first = analyze(&analyzer(tmp.path()));
        let second = analyze(&analyzer(tmp.path()).with_workers(2));
        assert_eq!(first.1.edges(), second.1.edges());
        assert_eq!(first, second);
    }

    #[test]
    fn nodes_remember_extraction_mtime() {
        let tmp = project();
        let (scan, graph) = analyze(&analyzer(tmp.path()));
        for file in &scan.files {
            assert_eq!(graph.nodes()[&file.path].mtime, file.observed_mtime);
        }
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_is_recorded_not_fatal() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = project();
        let locked = tmp.path().join("src/locked.cpp");
        fs::write(&locked, "#include \"vector.h\"\n").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read(&locked).is_ok() {
            // Running as root; permissions are not enforced.
            return;
        }
        let (scan, graph) = analyze(&analyzer(tmp.path()));
        let failures: Vec<_> = graph.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, Path::new("src/locked.cpp"));
        assert_eq!(scan.sources().len(), 4);
    }

    struct DepfileInvoker {
        root: PathBuf,
        calls: AtomicUsize,
    }

    impl DepfileInvoker {
        fn new(root: &Path) -> Self {
            Self {
                root: root.to_path_buf(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ToolInvoker for DepfileInvoker {
        fn invoke(
            &self,
            _tool: &Path,
            argv: &[String],
            _timeout: Option<Duration>,
        ) -> Result<ToolOutput, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let file = argv.last().cloned().unwrap_or_default();
            if file.ends_with("vector.cpp") {
                Ok(ToolOutput::ok(format!(
                    "vector.o: {file} {root}/include/vector.h \\\n {root}/include/common.h /usr/include/c++/vector\n",
                    root = self.root.display()
                )))
            } else {
                Ok(ToolOutput::failed(1, "fatal error: unsupported"))
            }
        }
    }

    fn config() -> PreprocessorConfig {
        PreprocessorConfig {
            compiler: PathBuf::from("/fake/clang++"),
            flags: vec!["-std=c++17".to_string()],
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn preprocessor_output_preferred_with_text_fallback() {
        let tmp = project();
        let invoker = DepfileInvoker::new(tmp.path());
        let (_, graph) = analyze(&analyzer(tmp.path()).with_preprocessor(config(), &invoker));
        assert_eq!(invoker.calls(), 5);
        assert_eq!(
            graph.includes_of(Path::new("src/vector.cpp")),
            &[
                PathBuf::from("include/common.h"),
                PathBuf::from("include/vector.h")
            ]
        );
        // Preprocessor failed for matrix.cpp; text extraction still found it.
        assert_eq!(
            graph.includes_of(Path::new("src/matrix.cpp")),
            &[PathBuf::from("include/common.h")]
        );
    }

    #[test]
    fn update_extracts_only_touched_and_new_files() {
        let tmp = project();
        let invoker = DepfileInvoker::new(tmp.path());
        let analyzer = analyzer(tmp.path()).with_preprocessor(config(), &invoker);
        let (_, first) = analyze(&analyzer);
        assert_eq!(invoker.calls(), 5);

        touch(&tmp.path().join("src/matrix.cpp"));
        fs::write(tmp.path().join("src/extra.cpp"), "#include \"vector.h\"\n").unwrap();
        let scan = analyzer.scan().unwrap();
        let second = analyzer.update_graph(&scan, &first).unwrap();
        assert_eq!(invoker.calls(), 7);
        assert_eq!(
            second.includes_of(Path::new("src/extra.cpp")),
            &[PathBuf::from("include/vector.h")]
        );
        assert_eq!(
            second.includes_of(Path::new("src/vector.cpp")),
            first.includes_of(Path::new("src/vector.cpp"))
        );
        assert_eq!(second, analyzer.build_graph(&scan).unwrap());
    }

    #[test]
    fn update_drops_deleted_files() {
        let tmp = project();
        let analyzer = analyzer(tmp.path());
        let (_, first) = analyze(&analyzer);
        fs::remove_file(tmp.path().join("src/standalone.cpp")).unwrap();
        let scan = analyzer.scan().unwrap();
        let second = analyzer.update_graph(&scan, &first).unwrap();
        assert!(!second.nodes().contains_key(Path::new("src/standalone.cpp")));
        assert_eq!(second.nodes().len(), 4);
    }

    #[test]
    fn new_header_reextracts_everything() {
        let tmp = project();
        fs::write(tmp.path().join("src/late.cpp"), "#include \"late.h\"\n").unwrap();
        let invoker = DepfileInvoker::new(tmp.path());
        let analyzer = analyzer(tmp.path()).with_preprocessor(config(), &invoker);
        let (_, first) = analyze(&analyzer);
        assert!(first.includes_of(Path::new("src/late.cpp")).is_empty());
        let before = invoker.calls();

        fs::write(tmp.path().join("include/late.h"), "#pragma once\n").unwrap();
        let scan = analyzer.scan().unwrap();
        let second = analyzer.update_graph(&scan, &first).unwrap();
        assert_eq!(invoker.calls() - before, scan.files.len());
        assert_eq!(
            second.includes_of(Path::new("src/late.cpp")),
            &[PathBuf::from("include/late.h")]
        );
    }
}
