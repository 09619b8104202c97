//! Typed per-stage records.
//!
//! Each pipeline stage owns exactly one record. [`StageRecord`] is the tagged
//! union over all of them; the [`StageData`] trait gives typed access to a
//! single variant. Merging a partial record replaces every field that is
//! non-empty in the partial and keeps the rest (last writer wins per key).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use weld_common::Mtime;

use crate::settings::{LibraryKind, OptLevel};
use crate::stage::Stage;

/// Source and header files found by the discovery scan, relative to the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSets {
    /// Compilable source files.
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    /// Header files.
    #[serde(default)]
    pub headers: Vec<PathBuf>,
}

impl FileSets {
    /// Returns `true` if no file was recorded.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.headers.is_empty()
    }
}

/// One node of the persisted dependency graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphNodeRecord {
    /// Project-local files included by this file.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<PathBuf>,
    /// Why include extraction failed for this file, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Modification time of the file when its includes were extracted.
    #[serde(default)]
    pub mtime: Mtime,
}

/// Output of the discovery stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DiscoveryRecord {
    /// Ordered include search directories, relative to the root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_dirs: Vec<PathBuf>,
    /// Classified files.
    #[serde(default, skip_serializing_if = "FileSets::is_empty")]
    pub files: FileSets,
    /// Compiler flags the preprocessor ran with during extraction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preprocessor_flags: Vec<String>,
    /// Direct include edges keyed by includer.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependency_graph: BTreeMap<PathBuf, GraphNodeRecord>,
}

/// Inputs and outputs of the compile stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CompileRecord {
    /// Directory receiving emitted modules, relative to the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Extra compiler flags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    /// Include directories passed to the compiler, relative to the root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_dirs: Vec<PathBuf>,
    /// Every unit's emitted module, sorted by source path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emitted_modules: Vec<PathBuf>,
}

/// Inputs and outputs of the link stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LinkRecord {
    /// Whether the optimizer runs. Defaults to `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimize: Option<bool>,
    /// Optimization level. Defaults to `O2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opt_level: Option<OptLevel>,
    /// The merged module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_module_path: Option<PathBuf>,
    /// The optimized module (equal to the merged module when not optimizing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized_module_path: Option<PathBuf>,
    /// Hash of the settings the optimized module was produced with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_hash: Option<String>,
}

/// Inputs and outputs of the binary stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BinaryRecord {
    /// The produced library.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_path: Option<PathBuf>,
    /// Shared or static. Defaults to shared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_kind: Option<LibraryKind>,
    /// Hash of the settings the library was packaged with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_hash: Option<String>,
}

/// Classification of an exported symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    /// Executable code.
    Function,
    /// Initialized data.
    Data,
    /// Zero-initialized data.
    Bss,
    /// Read-only data.
    Readonly,
    /// Anything else the symbol dumper reports.
    Other,
}

/// Linkage visibility of an exported symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// A strong global definition.
    Global,
    /// A weak definition.
    Weak,
}

/// One entry of the exported symbol table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportedSymbol {
    /// Symbol name as it appears in the library.
    pub name: String,
    /// What the symbol refers to.
    pub kind: SymbolKind,
    /// Strong or weak linkage.
    pub visibility: Visibility,
}

/// Output of the symbols stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SymbolsRecord {
    /// Exported symbols sorted by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exported: Vec<ExportedSymbol>,
}

/// A stage record tagged with the stage that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageRecord {
    /// See [`DiscoveryRecord`].
    Discovery(DiscoveryRecord),
    /// See [`CompileRecord`].
    Compile(CompileRecord),
    /// See [`LinkRecord`].
    Link(LinkRecord),
    /// See [`BinaryRecord`].
    Binary(BinaryRecord),
    /// See [`SymbolsRecord`].
    Symbols(SymbolsRecord),
}

impl StageRecord {
    /// The empty record for `stage`.
    pub fn empty(stage: Stage) -> Self {
        match stage {
            Stage::Discovery => StageRecord::Discovery(DiscoveryRecord::default()),
            Stage::Compile => StageRecord::Compile(CompileRecord::default()),
            Stage::Link => StageRecord::Link(LinkRecord::default()),
            Stage::Binary => StageRecord::Binary(BinaryRecord::default()),
            Stage::Symbols => StageRecord::Symbols(SymbolsRecord::default()),
        }
    }

    /// The stage owning this record.
    pub fn stage(&self) -> Stage {
        match self {
            StageRecord::Discovery(_) => Stage::Discovery,
            StageRecord::Compile(_) => Stage::Compile,
            StageRecord::Link(_) => Stage::Link,
            StageRecord::Binary(_) => Stage::Binary,
            StageRecord::Symbols(_) => Stage::Symbols,
        }
    }

    /// Returns `true` if no field is populated.
    pub fn is_empty(&self) -> bool {
        match self {
            StageRecord::Discovery(r) => r.is_empty(),
            StageRecord::Compile(r) => r.is_empty(),
            StageRecord::Link(r) => r.is_empty(),
            StageRecord::Binary(r) => r.is_empty(),
            StageRecord::Symbols(r) => r.is_empty(),
        }
    }

    /// Merges `partial` into `self`. Records of different stages are not
    /// merged; `partial` replaces `self` in that case.
    pub fn merge(&mut self, partial: StageRecord) {
        match (self, partial) {
            (StageRecord::Discovery(a), StageRecord::Discovery(b)) => a.merge(b),
            (StageRecord::Compile(a), StageRecord::Compile(b)) => a.merge(b),
            (StageRecord::Link(a), StageRecord::Link(b)) => a.merge(b),
            (StageRecord::Binary(a), StageRecord::Binary(b)) => a.merge(b),
            (StageRecord::Symbols(a), StageRecord::Symbols(b)) => a.merge(b),
            (this, other) => *this = other,
        }
    }
}

/// Typed access to one variant of [`StageRecord`].
pub trait StageData: Default + Clone + Sized {
    /// The stage owning records of this type.
    const STAGE: Stage;

    /// Wraps the record in the union.
    fn into_record(self) -> StageRecord;

    /// Extracts the record from the union if the variant matches.
    fn from_record(record: StageRecord) -> Option<Self>;

    /// Returns `true` if no field is populated.
    fn is_empty(&self) -> bool;

    /// Replaces every field that is populated in `partial`.
    fn merge(&mut self, partial: Self);
}

fn replace_vec<T>(dst: &mut Vec<T>, src: Vec<T>) {
    if !src.is_empty() {
        *dst = src;
    }
}

fn replace_opt<T>(dst: &mut Option<T>, src: Option<T>) {
    if src.is_some() {
        *dst = src;
    }
}

impl StageData for DiscoveryRecord {
    const STAGE: Stage = Stage::Discovery;

    fn into_record(self) -> StageRecord {
        StageRecord::Discovery(self)
    }

    fn from_record(record: StageRecord) -> Option<Self> {
        match record {
            StageRecord::Discovery(r) => Some(r),
            _ => None,
        }
    }

    fn is_empty(&self) -> bool {
        self.include_dirs.is_empty()
            && self.files.is_empty()
            && self.preprocessor_flags.is_empty()
            && self.dependency_graph.is_empty()
    }

    fn merge(&mut self, partial: Self) {
        replace_vec(&mut self.include_dirs, partial.include_dirs);
        replace_vec(&mut self.preprocessor_flags, partial.preprocessor_flags);
        if !partial.files.is_empty() {
            self.files = partial.files;
        }
        if !partial.dependency_graph.is_empty() {
            self.dependency_graph = partial.dependency_graph;
        }
    }
}

impl StageData for CompileRecord {
    const STAGE: Stage = Stage::Compile;

    fn into_record(self) -> StageRecord {
        StageRecord::Compile(self)
    }

    fn from_record(record: StageRecord) -> Option<Self> {
        match record {
            StageRecord::Compile(r) => Some(r),
            _ => None,
        }
    }

    fn is_empty(&self) -> bool {
        self.output_dir.is_none()
            && self.flags.is_empty()
            && self.include_dirs.is_empty()
            && self.emitted_modules.is_empty()
    }

    fn merge(&mut self, partial: Self) {
        replace_opt(&mut self.output_dir, partial.output_dir);
        replace_vec(&mut self.flags, partial.flags);
        replace_vec(&mut self.include_dirs, partial.include_dirs);
        replace_vec(&mut self.emitted_modules, partial.emitted_modules);
    }
}

impl StageData for LinkRecord {
    const STAGE: Stage = Stage::Link;

    fn into_record(self) -> StageRecord {
        StageRecord::Link(self)
    }

    fn from_record(record: StageRecord) -> Option<Self> {
        match record {
            StageRecord::Link(r) => Some(r),
            _ => None,
        }
    }

    fn is_empty(&self) -> bool {
        self.optimize.is_none()
            && self.opt_level.is_none()
            && self.linked_module_path.is_none()
            && self.optimized_module_path.is_none()
            && self.settings_hash.is_none()
    }

    fn merge(&mut self, partial: Self) {
        replace_opt(&mut self.optimize, partial.optimize);
        replace_opt(&mut self.opt_level, partial.opt_level);
        replace_opt(&mut self.linked_module_path, partial.linked_module_path);
        replace_opt(&mut self.optimized_module_path, partial.optimized_module_path);
        replace_opt(&mut self.settings_hash, partial.settings_hash);
    }
}

impl StageData for BinaryRecord {
    const STAGE: Stage = Stage::Binary;

    fn into_record(self) -> StageRecord {
        StageRecord::Binary(self)
    }

    fn from_record(record: StageRecord) -> Option<Self> {
        match record {
            StageRecord::Binary(r) => Some(r),
            _ => None,
        }
    }

    fn is_empty(&self) -> bool {
        self.library_path.is_none() && self.library_kind.is_none() && self.settings_hash.is_none()
    }

    fn merge(&mut self, partial: Self) {
        replace_opt(&mut self.library_path, partial.library_path);
        replace_opt(&mut self.library_kind, partial.library_kind);
        replace_opt(&mut self.settings_hash, partial.settings_hash);
    }
}

impl StageData for SymbolsRecord {
    const STAGE: Stage = Stage::Symbols;

    fn into_record(self) -> StageRecord {
        StageRecord::Symbols(self)
    }

    fn from_record(record: StageRecord) -> Option<Self> {
        match record {
            StageRecord::Symbols(r) => Some(r),
            _ => None,
        }
    }

    fn is_empty(&self) -> bool {
        self.exported.is_empty()
    }

    fn merge(&mut self, partial: Self) {
        replace_vec(&mut self.exported, partial.exported);
    }
}

impl From<DiscoveryRecord> for StageRecord {
    fn from(r: DiscoveryRecord) -> Self {
        r.into_record()
    }
}

impl From<CompileRecord> for StageRecord {
    fn from(r: CompileRecord) -> Self {
        r.into_record()
    }
}

impl From<LinkRecord> for StageRecord {
    fn from(r: LinkRecord) -> Self {
        r.into_record()
    }
}

impl From<BinaryRecord> for StageRecord {
    fn from(r: BinaryRecord) -> Self {
        r.into_record()
    }
}

impl From<SymbolsRecord> for StageRecord {
    fn from(r: SymbolsRecord) -> Self {
        r.into_record()
    }
}
