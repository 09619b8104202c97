//! The include-dependency graph and its transitive reverse index.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use weld_common::Mtime;
use weld_state::GraphNodeRecord;

/// Map from an included file to every file that includes it, directly or
/// transitively.
pub type ReverseDependencyIndex = BTreeMap<PathBuf, BTreeSet<PathBuf>>;

/// Include information for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphNode {
    /// Project-local files included by this file, sorted.
    pub includes: Vec<PathBuf>,
    /// Why extraction failed, if it did.
    pub error: Option<String>,
    /// Modification time of the file when it was extracted.
    pub mtime: Mtime,
}

/// Directed include graph (`includer -> included`) over project-relative paths.
///
/// The reverse index is recomputed on every construction, so it can never
/// disagree with the edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: BTreeMap<PathBuf, GraphNode>,
    reverse: ReverseDependencyIndex,
}

impl DependencyGraph {
    /// Builds the graph and its reverse index from per-file nodes.
    pub fn new(nodes: BTreeMap<PathBuf, GraphNode>) -> Self {
        let reverse = reverse_closure(&nodes);
        Self { nodes, reverse }
    }

    /// Rebuilds a graph from its persisted form.
    pub fn from_record(record: &BTreeMap<PathBuf, GraphNodeRecord>) -> Self {
        let nodes = record
            .iter()
            .map(|(path, node)| {
                (
                    path.clone(),
                    GraphNode {
                        includes: node.includes.clone(),
                        error: node.error.clone(),
                        mtime: node.mtime,
                    },
                )
            })
            .collect();
        Self::new(nodes)
    }

    /// The persisted form of this graph.
    pub fn to_record(&self) -> BTreeMap<PathBuf, GraphNodeRecord> {
        self.nodes
            .iter()
            .map(|(path, node)| {
                (
                    path.clone(),
                    GraphNodeRecord {
                        includes: node.includes.clone(),
                        error: node.error.clone(),
                        mtime: node.mtime,
                    },
                )
            })
            .collect()
    }

    /// Per-file nodes keyed by path.
    pub fn nodes(&self) -> &BTreeMap<PathBuf, GraphNode> {
        &self.nodes
    }

    /// The transitive reverse index.
    pub fn reverse_index(&self) -> &ReverseDependencyIndex {
        &self.reverse
    }

    /// Direct includes of `file`.
    pub fn includes_of(&self, file: &Path) -> &[PathBuf] {
        self.nodes
            .get(file)
            .map(|n| n.includes.as_slice())
            .unwrap_or(&[])
    }

    /// Every file that includes `file`, directly or transitively.
    pub fn dependents_of<'a>(&'a self, file: &Path) -> impl Iterator<Item = &'a PathBuf> + 'a {
        self.reverse.get(file).into_iter().flatten()
    }

    /// Every file `file` includes, directly or transitively, read off the
    /// reverse index.
    pub fn closure_of(&self, file: &Path) -> BTreeSet<PathBuf> {
        self.reverse
            .iter()
            .filter(|(_, includers)| includers.contains(file))
            .map(|(included, _)| included.clone())
            .collect()
    }

    /// Files whose extraction failed, with the recorded reason.
    pub fn failures(&self) -> impl Iterator<Item = (&PathBuf, &str)> {
        self.nodes
            .iter()
            .filter_map(|(p, n)| n.error.as_deref().map(|e| (p, e)))
    }

    /// All edges, sorted.
    pub fn edges(&self) -> Vec<(PathBuf, PathBuf)> {
        self.nodes
            .iter()
            .flat_map(|(from, node)| node.includes.iter().map(|to| (from.clone(), to.clone())))
            .collect()
    }

    /// Orders `sources` so that files come after everything they include.
    ///
    /// Units are independently compilable, so this is only a friendly
    /// sequential ordering; a cyclic graph falls back to path order.
    pub fn topological_order(&self, sources: &[PathBuf]) -> Vec<PathBuf> {
        let (graph, _) = self.to_petgraph();
        let wanted: BTreeSet<&PathBuf> = sources.iter().collect();
        match toposort(&graph, None) {
            Ok(order) => {
                let mut ordered: Vec<PathBuf> = order
                    .into_iter()
                    .rev()
                    .map(|idx| graph[idx].to_path_buf())
                    .filter(|p| wanted.contains(p))
                    .collect();
                let placed: BTreeSet<PathBuf> = ordered.iter().cloned().collect();
                let mut rest: Vec<PathBuf> = sources
                    .iter()
                    .filter(|s| !placed.contains(*s))
                    .cloned()
                    .collect();
                rest.sort();
                ordered.extend(rest);
                ordered
            }
            Err(_) => {
                let mut fallback = sources.to_vec();
                fallback.sort();
                fallback
            }
        }
    }

    fn to_petgraph(&self) -> (DiGraph<&Path, ()>, BTreeMap<&Path, NodeIndex>) {
        petgraph_of(&self.nodes)
    }
}

fn petgraph_of(
    nodes: &BTreeMap<PathBuf, GraphNode>,
) -> (DiGraph<&Path, ()>, BTreeMap<&Path, NodeIndex>) {
    let mut graph = DiGraph::new();
    let mut index: BTreeMap<&Path, NodeIndex> = BTreeMap::new();
    for path in nodes.keys() {
        index.insert(path.as_path(), graph.add_node(path.as_path()));
    }
    for (from, node) in nodes {
        let from_idx = index[from.as_path()];
        for to in &node.includes {
            let to_idx = *index
                .entry(to.as_path())
                .or_insert_with(|| graph.add_node(to.as_path()));
            graph.add_edge(from_idx, to_idx, ());
        }
    }
    (graph, index)
}

fn reverse_closure(nodes: &BTreeMap<PathBuf, GraphNode>) -> ReverseDependencyIndex {
    let (graph, index) = petgraph_of(nodes);
    let mut reverse = ReverseDependencyIndex::new();
    for includer in nodes.keys() {
        let start = index[includer.as_path()];
        let mut dfs = Dfs::new(&graph, start);
        while let Some(reached) = dfs.next(&graph) {
            if reached != start {
                reverse
                    .entry(graph[reached].to_path_buf())
                    .or_default()
                    .insert(includer.clone());
            }
        }
    }
    reverse
}
