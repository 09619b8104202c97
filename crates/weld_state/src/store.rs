//! Loading, querying and atomically persisting the project state file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StateError;
use crate::records::{
    BinaryRecord, CompileRecord, DiscoveryRecord, LinkRecord, StageData, StageRecord,
    SymbolsRecord,
};
use crate::settings::PipelineSettings;
use crate::stage::Stage;

/// Directory under the project root holding state and build products.
pub const STATE_DIR: &str = ".weld";

/// Name of the state file within [`STATE_DIR`].
pub const STATE_FILE: &str = "state.toml";

/// Current state file format version.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// The `[project]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectMeta {
    /// Project name, used as the default library name.
    pub name: String,
    /// Absolute project root.
    pub root: PathBuf,
}

/// The complete in-memory build state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildState {
    /// Project identity.
    pub project: ProjectMeta,
    /// Pipeline-wide settings.
    pub pipeline: PipelineSettings,
    /// Unix seconds of the last stage merge, if any.
    pub last_modified: Option<u64>,
    records: BTreeMap<Stage, StageRecord>,
}

impl BuildState {
    /// A fresh state with no stage records.
    pub fn new(project: ProjectMeta) -> Self {
        Self {
            project,
            pipeline: PipelineSettings::default(),
            last_modified: None,
            records: BTreeMap::new(),
        }
    }

    /// The stages that currently hold a non-empty record.
    pub fn populated_stages(&self) -> Vec<Stage> {
        self.records
            .iter()
            .filter(|(_, r)| !r.is_empty())
            .map(|(s, _)| *s)
            .collect()
    }
}

/// On-disk shape of the state file.
///
/// Scalars precede tables so the TOML writer never has to reorder them.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StateDocument {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_modified: Option<u64>,
    project: ProjectMeta,
    #[serde(default, skip_serializing_if = "PipelineSettings::is_default")]
    pipeline: PipelineSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    discovery: Option<DiscoveryRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compile: Option<CompileRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    link: Option<LinkRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    binary: Option<BinaryRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    symbols: Option<SymbolsRecord>,
}

fn non_empty<T: StageData>(records: &BTreeMap<Stage, StageRecord>) -> Option<T> {
    records
        .get(&T::STAGE)
        .cloned()
        .and_then(T::from_record)
        .filter(|r| !r.is_empty())
}

impl StateDocument {
    fn from_state(state: &BuildState) -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            last_modified: state.last_modified,
            project: state.project.clone(),
            pipeline: state.pipeline.clone(),
            discovery: non_empty(&state.records),
            compile: non_empty(&state.records),
            link: non_empty(&state.records),
            binary: non_empty(&state.records),
            symbols: non_empty(&state.records),
        }
    }

    fn into_state(self) -> BuildState {
        let mut records = BTreeMap::new();
        let populated = [
            self.discovery.map(StageRecord::from),
            self.compile.map(StageRecord::from),
            self.link.map(StageRecord::from),
            self.binary.map(StageRecord::from),
            self.symbols.map(StageRecord::from),
        ];
        for record in populated.into_iter().flatten() {
            if !record.is_empty() {
                records.insert(record.stage(), record);
            }
        }
        BuildState {
            project: self.project,
            pipeline: self.pipeline,
            last_modified: self.last_modified,
            records,
        }
    }
}

/// Parses and validates state file content.
pub fn parse_state(content: &str, path: &Path) -> Result<BuildState, StateError> {
    let doc: StateDocument = toml::from_str(content).map_err(|e| StateError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    validate(&doc)?;
    Ok(doc.into_state())
}

/// Renders a state into its canonical TOML text.
pub fn render_state(state: &BuildState) -> Result<String, StateError> {
    toml::to_string(&StateDocument::from_state(state)).map_err(|e| StateError::Serialize {
        reason: e.to_string(),
    })
}

fn validate(doc: &StateDocument) -> Result<(), StateError> {
    if doc.version != STATE_FORMAT_VERSION {
        return Err(StateError::UnsupportedVersion {
            found: doc.version,
            expected: STATE_FORMAT_VERSION,
        });
    }
    if doc.project.name.is_empty() {
        return Err(StateError::MissingField("project.name".to_string()));
    }
    if doc.pipeline.workers == Some(0) {
        return Err(StateError::Validation(
            "pipeline.workers must be at least 1".to_string(),
        ));
    }
    if doc.pipeline.unit_timeout_secs == 0 {
        return Err(StateError::Validation(
            "pipeline.unitTimeoutSecs must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Owner of the build state and its backing file.
///
/// Every component reads and writes build state exclusively through this
/// store. [`persist`](Self::persist) must be called after each stage
/// transition so an interrupted pipeline resumes from the last completed stage.
#[derive(Debug)]
pub struct StateStore {
    state: BuildState,
    path: PathBuf,
}

impl StateStore {
    /// The state file location for a project root.
    pub fn state_path(project_root: &Path) -> PathBuf {
        project_root.join(STATE_DIR).join(STATE_FILE)
    }

    /// Loads the state file for `project_root`, or creates default state if
    /// none exists. A present but malformed file is an error.
    pub fn load(project_root: &Path) -> Result<Self, StateError> {
        let path = Self::state_path(project_root);
        Self::load_from(&path, project_root)
    }

    /// Loads state from an explicit file path.
    pub fn load_from(path: &Path, project_root: &Path) -> Result<Self, StateError> {
        let state = match std::fs::read_to_string(path) {
            Ok(content) => {
                let mut state = parse_state(&content, path)?;
                if state.project.root != project_root {
                    debug!(
                        recorded = %state.project.root.display(),
                        actual = %project_root.display(),
                        "project root moved"
                    );
                    state.project.root = project_root.to_path_buf();
                }
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                BuildState::new(default_project(project_root))
            }
            Err(e) => {
                return Err(StateError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Ok(Self {
            state,
            path: path.to_path_buf(),
        })
    }

    /// Wraps an in-memory state that persists to `path`.
    pub fn from_state(state: BuildState, path: PathBuf) -> Self {
        Self { state, path }
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The full in-memory state.
    pub fn state(&self) -> &BuildState {
        &self.state
    }

    /// Project identity.
    pub fn project(&self) -> &ProjectMeta {
        &self.state.project
    }

    /// Pipeline settings.
    pub fn settings(&self) -> &PipelineSettings {
        &self.state.pipeline
    }

    /// Mutable pipeline settings.
    pub fn settings_mut(&mut self) -> &mut PipelineSettings {
        &mut self.state.pipeline
    }

    /// The record for `stage`, or an empty record if none exists.
    pub fn get_stage(&self, stage: Stage) -> StageRecord {
        self.state
            .records
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| StageRecord::empty(stage))
    }

    /// Typed variant of [`get_stage`](Self::get_stage).
    pub fn record<T: StageData>(&self) -> T {
        T::from_record(self.get_stage(T::STAGE)).unwrap_or_default()
    }

    /// Merges a partial record into its stage's record.
    pub fn merge_stage(&mut self, partial: impl Into<StageRecord>) {
        let partial = partial.into();
        let stage = partial.stage();
        self.state
            .records
            .entry(stage)
            .or_insert_with(|| StageRecord::empty(stage))
            .merge(partial);
        self.touch();
    }

    /// Replaces a stage's record wholesale.
    pub fn put_stage(&mut self, record: impl Into<StageRecord>) {
        let record = record.into();
        self.state.records.insert(record.stage(), record);
        self.touch();
    }

    /// Removes a stage's record.
    pub fn clear_stage(&mut self, stage: Stage) {
        if self.state.records.remove(&stage).is_some() {
            self.touch();
        }
    }

    fn touch(&mut self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.state.last_modified = Some(now);
    }

    /// Atomically writes the full state to the backing file.
    ///
    /// The document is written to a sibling temporary file which is then
    /// renamed over the state file, so readers never observe a partial write.
    pub fn persist(&self) -> Result<(), StateError> {
        let text = render_state(&self.state)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| StateError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, text).map_err(|e| StateError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StateError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        debug!(path = %self.path.display(), "state persisted");
        Ok(())
    }
}

fn default_project(root: &Path) -> ProjectMeta {
    let name = root
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("project")
        .to_string();
    ProjectMeta {
        name,
        root: root.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ExportedSymbol, FileSets, GraphNodeRecord, SymbolKind, Visibility};
    use crate::settings::{LibraryKind, OptLevel};
    use weld_common::Mtime;

    fn populated_store(root: &Path) -> StateStore {
        let mut store = StateStore::load(root).unwrap();
        let mut graph = BTreeMap::new();
        graph.insert(
            PathBuf::from("src/vector.cpp"),
            GraphNodeRecord {
                includes: vec![PathBuf::from("include/vector.h")],
                error: None,
                mtime: Mtime(1_700_000_000_000_000_000),
            },
        );
        graph.insert(
            PathBuf::from("src/broken.cpp"),
            GraphNodeRecord {
                includes: vec![],
                error: Some("unreadable".to_string()),
                mtime: Mtime::ZERO,
            },
        );
        store.merge_stage(DiscoveryRecord {
            include_dirs: vec![PathBuf::from("include")],
            files: FileSets {
                sources: vec![PathBuf::from("src/vector.cpp")],
                headers: vec![PathBuf::from("include/vector.h")],
            },
            preprocessor_flags: vec!["-std=c++17".to_string()],
            dependency_graph: graph,
        });
        store.merge_stage(CompileRecord {
            output_dir: Some(PathBuf::from(".weld/obj")),
            flags: vec!["-std=c++17".to_string()],
            include_dirs: vec![PathBuf::from("include")],
            emitted_modules: vec![PathBuf::from(".weld/obj/src/vector.cpp.bc")],
        });
        store.merge_stage(LinkRecord {
            optimize: Some(true),
            opt_level: Some(OptLevel::O3),
            linked_module_path: Some(PathBuf::from(".weld/out/linked.bc")),
            optimized_module_path: Some(PathBuf::from(".weld/out/optimized.bc")),
            settings_hash: Some("9f2c41d07ab3e615".to_string()),
        });
        store.merge_stage(BinaryRecord {
            library_path: Some(PathBuf::from(".weld/out/libmathlib.so")),
            library_kind: Some(LibraryKind::Shared),
            settings_hash: None,
        });
        store.merge_stage(SymbolsRecord {
            exported: vec![ExportedSymbol {
                name: "vector_dot".to_string(),
                kind: SymbolKind::Function,
                visibility: Visibility::Global,
            }],
        });
        store
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load(dir.path()).unwrap();
        assert_eq!(store.project().root, dir.path());
        assert!(!store.project().name.is_empty());
        assert!(store.state().populated_stages().is_empty());
        assert!(store.get_stage(Stage::Compile).is_empty());
    }

    #[test]
    fn persist_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = populated_store(dir.path());
        store.persist().unwrap();

        let loaded = StateStore::load(dir.path()).unwrap();
        assert_eq!(loaded.state(), store.state());
        assert_eq!(loaded.state().populated_stages(), Stage::ALL.to_vec());
    }

    #[test]
    fn persist_of_loaded_state_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        populated_store(dir.path()).persist().unwrap();
        let path = StateStore::state_path(dir.path());

        StateStore::load(dir.path()).unwrap().persist().unwrap();
        let first = std::fs::read(&path).unwrap();
        StateStore::load(dir.path()).unwrap().persist().unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn only_populated_tables_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StateStore::load(dir.path()).unwrap();
        store.merge_stage(BinaryRecord {
            library_path: Some(PathBuf::from("libx.so")),
            library_kind: None,
            settings_hash: None,
        });
        store.merge_stage(SymbolsRecord::default());
        let text = render_state(store.state()).unwrap();
        assert!(text.contains("[binary]"));
        assert!(text.contains("libraryPath"));
        assert!(!text.contains("[symbols]"));
        assert!(!text.contains("[discovery]"));
        assert!(!text.contains("[pipeline]"));
    }

    #[test]
    fn missing_stage_reads_as_empty_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load(dir.path()).unwrap();
        let link: LinkRecord = store.record();
        assert_eq!(link, LinkRecord::default());
    }

    #[test]
    fn malformed_file_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = StateStore::state_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        let err = StateStore::load(dir.path()).unwrap_err();
        assert!(matches!(err, StateError::Parse { .. }));
    }

    #[test]
    fn unknown_stage_table_is_rejected() {
        let content = r#"
version = 1

[project]
name = "mathlib"
root = "/tmp/mathlib"

[package]
format = "wheel"
"#;
        let err = parse_state(content, Path::new("state.toml")).unwrap_err();
        assert!(matches!(err, StateError::Parse { .. }));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let content = r#"
version = 7

[project]
name = "mathlib"
root = "/tmp/mathlib"
"#;
        let err = parse_state(content, Path::new("state.toml")).unwrap_err();
        assert!(matches!(
            err,
            StateError::UnsupportedVersion { found: 7, .. }
        ));
    }

    #[test]
    fn empty_project_name_is_rejected() {
        let content = r#"
version = 1

[project]
name = ""
root = "/tmp/mathlib"
"#;
        let err = parse_state(content, Path::new("state.toml")).unwrap_err();
        assert!(matches!(err, StateError::MissingField(_)));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let content = r#"
version = 1

[project]
name = "mathlib"
root = "/tmp/mathlib"

[pipeline]
workers = 0
"#;
        let err = parse_state(content, Path::new("state.toml")).unwrap_err();
        assert!(matches!(err, StateError::Validation(_)));
    }

    #[test]
    fn pipeline_settings_parse() {
        let content = r#"
version = 1

[project]
name = "mathlib"
root = "/tmp/mathlib"

[pipeline]
stopOnError = false
disabledStages = ["symbols"]
workers = 4
unitTimeoutSecs = 60

[link]
optimize = true
optLevel = "O3"

[binary]
libraryKind = "static"
"#;
        let state = parse_state(content, Path::new("state.toml")).unwrap();
        assert!(!state.pipeline.stop_on_error);
        assert_eq!(state.pipeline.disabled_stages, vec![Stage::Symbols]);
        assert_eq!(state.pipeline.workers, Some(4));
        assert_eq!(state.pipeline.unit_timeout_secs, 60);
        let store = StateStore::from_state(state, PathBuf::from("state.toml"));
        let link: LinkRecord = store.record();
        assert_eq!(link.opt_level, Some(OptLevel::O3));
        let binary: BinaryRecord = store.record();
        assert_eq!(binary.library_kind, Some(LibraryKind::Static));
    }

    #[test]
    fn merge_updates_last_modified_but_persist_does_not() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StateStore::load(dir.path()).unwrap();
        assert!(store.state().last_modified.is_none());
        store.merge_stage(CompileRecord {
            flags: vec!["-O1".to_string()],
            ..Default::default()
        });
        let stamp = store.state().last_modified;
        assert!(stamp.is_some());
        store.persist().unwrap();
        assert_eq!(store.state().last_modified, stamp);
    }

    #[test]
    fn clear_stage_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = populated_store(dir.path());
        store.clear_stage(Stage::Symbols);
        assert!(store.get_stage(Stage::Symbols).is_empty());
        assert!(!store.get_stage(Stage::Binary).is_empty());
    }

    #[test]
    fn persist_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = populated_store(dir.path());
        store.persist().unwrap();
        let tmp = store.path().with_extension("toml.tmp");
        assert!(store.path().exists());
        assert!(!tmp.exists());
    }
}
