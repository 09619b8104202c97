//! Source tree scanning and include-dependency analysis.
//!
//! The analyzer walks the project tree, classifies files into sources and
//! headers, extracts each file's project-local includes (through the real
//! preprocessor when available, with a text fallback), and builds a
//! [`DependencyGraph`] whose transitive reverse index tells which sources a
//! header change makes stale.

#![warn(missing_docs)]

pub mod analyzer;
pub mod error;
pub mod graph;
pub mod includes;
pub mod scan;

pub use analyzer::{DependencyAnalyzer, PreprocessorConfig};
pub use error::{DiscoveryError, ScanError};
pub use graph::{DependencyGraph, GraphNode, ReverseDependencyIndex};
pub use includes::IncludeToken;
pub use scan::{classify, scan_tree, FileKind, FileRecord, ScanResult};
