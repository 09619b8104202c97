//! End-to-end builds against a scripted toolchain.

use std::fs::File;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use weld_driver::{BuildReport, FailureKind, Session, Stage, StageStatus};
use weld_state::{
    BinaryRecord, CompileRecord, LibraryKind, LinkRecord, OptLevel, StateStore, SymbolsRecord,
};
use weld_toolchain::{ToolError, ToolInvoker, ToolLocator, ToolOutput};

const ALL_TOOLS: [&str; 6] = ["clang++", "llvm-link", "opt", "llc", "llvm-ar", "llvm-nm"];

const DEFAULT_SYMBOLS: &str =
    "0000000000001120 T vec_dot\n0000000000001200 T mat_mul\n0000000000004010 D unit_scale\n";

/// Writes every `-o` target and records which sources were compiled.
#[derive(Default)]
struct ScriptedToolchain {
    compiled: Mutex<Vec<PathBuf>>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
    depfile_requests: AtomicUsize,
    symbols: Mutex<Option<String>>,
    failing: Mutex<Option<String>>,
}

impl ScriptedToolchain {
    fn compiled(&self) -> Vec<PathBuf> {
        let mut units = self.compiled.lock().unwrap().clone();
        units.sort();
        units
    }

    fn compile_count(&self) -> usize {
        self.compiled.lock().unwrap().len()
    }

    fn reset(&self) {
        self.compiled.lock().unwrap().clear();
        self.calls.lock().unwrap().clear();
        self.depfile_requests.store(0, Ordering::SeqCst);
    }

    fn called(&self, tool: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|(name, _)| name == tool)
    }

    fn argv_of(&self, tool: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == tool)
            .map(|(_, argv)| argv.clone())
            .collect()
    }

    fn depfile_requests(&self) -> usize {
        self.depfile_requests.load(Ordering::SeqCst)
    }

    /// Makes every invocation of `tool` fail, or none with `None`.
    fn fail_tool(&self, tool: Option<&str>) {
        *self.failing.lock().unwrap() = tool.map(str::to_string);
    }

    fn export_symbols(&self, table: &str) {
        *self.symbols.lock().unwrap() = Some(table.to_string());
    }
}

impl ToolInvoker for ScriptedToolchain {
    fn invoke(
        &self,
        tool: &Path,
        argv: &[String],
        _timeout: Option<Duration>,
    ) -> Result<ToolOutput, ToolError> {
        let name = tool.file_stem().unwrap().to_string_lossy().into_owned();
        if argv.first().map(String::as_str) == Some("-MM") {
            self.depfile_requests.fetch_add(1, Ordering::SeqCst);
            return Ok(ToolOutput::failed(1, "no depfile support"));
        }
        self.calls.lock().unwrap().push((name.clone(), argv.to_vec()));
        if self.failing.lock().unwrap().as_deref() == Some(name.as_str()) {
            return Ok(ToolOutput::failed(1, format!("{name}: error: unreadable input")));
        }
        if name == "llvm-nm" {
            let table = self.symbols.lock().unwrap().clone();
            return Ok(ToolOutput::ok(table.unwrap_or_else(|| DEFAULT_SYMBOLS.to_string())));
        }
        if name == "clang++" && argv[0] == "-c" {
            let i = argv.iter().position(|a| a == "-o").unwrap();
            let source = PathBuf::from(&argv[i - 1]);
            self.compiled.lock().unwrap().push(source.clone());
            if source.to_string_lossy().contains("broken") {
                return Ok(ToolOutput::failed(1, "broken.cpp:3:1: error: expected ';'"));
            }
        }
        let out = if name == "llvm-ar" {
            &argv[1]
        } else {
            let i = argv.iter().position(|a| a == "-o").unwrap();
            &argv[i + 1]
        };
        std::fs::write(out, name.as_bytes()).unwrap();
        Ok(ToolOutput::ok(""))
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Moves a file's mtime forward so every touch is observable regardless of
/// filesystem timestamp granularity.
fn touch(path: &Path) {
    static STEP: AtomicU64 = AtomicU64::new(1);
    let ahead = Duration::from_secs(10 * STEP.fetch_add(1, Ordering::SeqCst));
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() + ahead)
        .unwrap();
}

fn tool_dir(dir: &Path, tools: &[&str]) -> PathBuf {
    let bin = dir.join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    for tool in tools {
        let path = bin.join(format!("{tool}{}", std::env::consts::EXE_SUFFIX));
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
    }
    bin
}

struct Fixture {
    project: tempfile::TempDir,
    tool_root: tempfile::TempDir,
    toolchain: Arc<ScriptedToolchain>,
    session: Session,
}

impl Fixture {
    fn new() -> Self {
        Self::with_tools(&ALL_TOOLS)
    }

    fn with_tools(tools: &[&str]) -> Self {
        let project = tempfile::tempdir().unwrap();
        let root = project.path();
        write(root, "include/vec.h", "#pragma once\nfloat vec_dot(const float*, const float*);\n");
        write(root, "include/mat.h", "#pragma once\n#include \"vec.h\"\n");
        write(root, "src/vec.cpp", "#include \"vec.h\"\nfloat vec_dot(const float*, const float*) { return 0; }\n");
        write(root, "src/mat.cpp", "#include \"mat.h\"\nvoid mat_mul() {}\n");
        write(root, "src/scale.cpp", "#include <cmath>\nfloat unit_scale = 1.0f;\n");

        let tool_root = tempfile::tempdir().unwrap();
        let bin = tool_dir(tool_root.path(), tools);
        let toolchain = Arc::new(ScriptedToolchain::default());
        let session = Session::open(root)
            .unwrap()
            .with_invoker(toolchain.clone())
            .with_locator(Arc::new(ToolLocator::new(None, vec![bin])));
        session
            .configure(|store| {
                let settings = store.settings_mut();
                settings.library_name = Some("mathlib".to_string());
                settings.workers = Some(2);
            })
            .unwrap();
        Self {
            project,
            tool_root,
            toolchain,
            session,
        }
    }

    fn root(&self) -> &Path {
        self.session.root()
    }

    fn build(&self) -> BuildReport {
        self.session.run_pipeline(&[], false).unwrap()
    }

    fn library(&self) -> PathBuf {
        PathBuf::from(".weld/out").join(LibraryKind::Shared.file_name("mathlib"))
    }
}

fn skipped(reason: &str) -> StageStatus {
    StageStatus::Skipped {
        reason: reason.to_string(),
    }
}

#[test]
fn full_build_produces_library_and_symbols() {
    let fx = Fixture::new();
    let report = fx.build();

    assert!(report.success, "{:?}", report.errors);
    for stage in Stage::ALL {
        assert_eq!(report.status(stage), Some(&StageStatus::Completed), "{stage}");
    }
    assert_eq!(report.compiled_units, 3);
    assert_eq!(report.cached_units, 0);
    assert_eq!(report.artifact, Some(fx.library()));
    assert!(fx.root().join(fx.library()).is_file());

    let store = StateStore::load(fx.root()).unwrap();
    let symbols: SymbolsRecord = store.record();
    let names: Vec<&str> = symbols.exported.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["mat_mul", "unit_scale", "vec_dot"]);
    let compile: CompileRecord = store.record();
    assert_eq!(compile.emitted_modules.len(), 3);
    let binary: BinaryRecord = store.record();
    assert_eq!(binary.library_path, Some(fx.library()));
}

#[test]
fn unchanged_rebuild_compiles_nothing() {
    let fx = Fixture::new();
    let first = fx.build();
    let state_before = std::fs::read_to_string(fx.root().join(".weld/state.toml")).unwrap();
    fx.toolchain.reset();

    let second = fx.build();
    assert!(second.success);
    assert_eq!(fx.toolchain.compile_count(), 0);
    assert_eq!(second.compiled_units, 0);
    assert_eq!(second.cached_units, 3);
    assert_eq!(second.status(Stage::Link), Some(&skipped("up to date")));
    assert_eq!(second.status(Stage::Binary), Some(&skipped("up to date")));
    assert_eq!(second.status(Stage::Symbols), Some(&skipped("up to date")));
    assert_eq!(second.artifact, first.artifact);
    assert!(!fx.toolchain.called("llvm-link"));

    let state_after = std::fs::read_to_string(fx.root().join(".weld/state.toml")).unwrap();
    assert_eq!(state_before, state_after);
}

#[test]
fn touching_one_source_recompiles_only_that_unit() {
    let fx = Fixture::new();
    fx.build();
    fx.toolchain.reset();

    touch(&fx.root().join("src/scale.cpp"));
    let report = fx.build();
    assert!(report.success);
    assert_eq!(fx.toolchain.compiled(), [fx.root().join("src/scale.cpp")]);
    assert_eq!(report.cached_units, 2);
    assert_eq!(report.status(Stage::Link), Some(&StageStatus::Completed));
    assert!(fx.toolchain.called("llvm-link"));
}

#[test]
fn touching_a_header_recompiles_every_includer() {
    let fx = Fixture::new();
    fx.build();
    fx.toolchain.reset();

    touch(&fx.root().join("include/vec.h"));
    let report = fx.build();
    assert!(report.success);
    assert_eq!(
        fx.toolchain.compiled(),
        [fx.root().join("src/mat.cpp"), fx.root().join("src/vec.cpp")]
    );
    assert_eq!(report.cached_units, 1);
}

#[test]
fn compile_failure_skips_linking_but_not_siblings() {
    let fx = Fixture::new();
    write(fx.root(), "src/broken.cpp", "int x\n");
    let report = fx.build();

    assert!(!report.success);
    assert_eq!(report.status(Stage::Compile), Some(&StageStatus::Failed));
    for stage in [Stage::Link, Stage::Binary, Stage::Symbols] {
        assert_eq!(report.status(stage), Some(&skipped("incomplete unit set")));
    }
    assert_eq!(report.compiled_units, 3);
    let failures: Vec<_> = report.failures_of(FailureKind::Compilation).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].stage, Stage::Compile);
    assert_eq!(failures[0].unit, Some(PathBuf::from("src/broken.cpp")));
    assert!(failures[0].output.as_deref().unwrap().contains("expected ';'"));
    assert!(report.artifact.is_none());
    assert!(!fx.toolchain.called("llvm-link"));
}

#[test]
fn continuing_past_errors_reports_every_failed_unit() {
    let fx = Fixture::new();
    fx.session
        .configure(|store| store.settings_mut().stop_on_error = false)
        .unwrap();
    write(fx.root(), "src/broken.cpp", "int x\n");
    write(fx.root(), "src/broken_too.cpp", "int y\n");
    let report = fx.build();

    assert!(!report.success);
    assert_eq!(report.status(Stage::Discovery), Some(&StageStatus::Completed));
    assert_eq!(report.status(Stage::Compile), Some(&StageStatus::Failed));
    for stage in [Stage::Link, Stage::Binary, Stage::Symbols] {
        assert_eq!(report.status(stage), Some(&skipped("incomplete unit set")));
    }
    assert_eq!(report.compiled_units, 3);
    let mut units: Vec<_> = report
        .failures_of(FailureKind::Compilation)
        .filter_map(|f| f.unit.clone())
        .collect();
    units.sort();
    assert_eq!(
        units,
        [PathBuf::from("src/broken.cpp"), PathBuf::from("src/broken_too.cpp")]
    );
    assert!(!fx.toolchain.called("llvm-link"));

    std::fs::remove_file(fx.root().join("src/broken.cpp")).unwrap();
    std::fs::remove_file(fx.root().join("src/broken_too.cpp")).unwrap();
    let fixed = fx.session.quick_build().unwrap();
    assert!(fixed.success, "{:?}", fixed.errors);
    assert_eq!(fixed.compiled_units, 0);
    assert_eq!(fixed.status(Stage::Link), Some(&StageStatus::Completed));
}

#[test]
fn fixed_unit_is_retried_and_others_stay_cached() {
    let fx = Fixture::new();
    write(fx.root(), "src/broken.cpp", "int x\n");
    fx.build();
    fx.toolchain.reset();

    std::fs::rename(fx.root().join("src/broken.cpp"), fx.root().join("src/fixed.cpp")).unwrap();
    let report = fx.session.quick_build().unwrap();
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(fx.toolchain.compiled(), [fx.root().join("src/fixed.cpp")]);
    assert_eq!(report.cached_units, 3);
    assert_eq!(report.status(Stage::Link), Some(&StageStatus::Completed));
}

#[test]
fn missing_tool_stops_before_compiling() {
    let fx = Fixture::with_tools(&["clang++", "llvm-link", "opt"]);
    let report = fx.build();

    assert!(!report.success);
    assert_eq!(fx.toolchain.compile_count(), 0);
    let failures: Vec<_> = report.failures_of(FailureKind::ToolNotFound).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].stage, Stage::Symbols);
    assert!(failures[0].message.contains("llvm-nm"));
    assert!(matches!(
        report.status(Stage::Compile),
        Some(StageStatus::NotRun { .. })
    ));
}

#[test]
fn disabled_stage_needs_no_tool() {
    let fx = Fixture::with_tools(&["clang++", "llvm-link", "opt"]);
    fx.session
        .configure(|store| store.settings_mut().disabled_stages = vec![Stage::Symbols])
        .unwrap();
    let report = fx.build();

    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.status(Stage::Symbols), Some(&StageStatus::Disabled));
    assert_eq!(report.status(Stage::Binary), Some(&StageStatus::Completed));
}

#[test]
fn explicit_stage_list_runs_only_those_stages() {
    let fx = Fixture::new();
    let report = fx.session.run_pipeline(&[Stage::Discovery], false).unwrap();
    assert!(report.success);
    assert_eq!(report.stages.len(), 1);
    assert_eq!(fx.toolchain.compile_count(), 0);

    let store = StateStore::load(fx.root()).unwrap();
    assert_eq!(store.state().populated_stages(), [Stage::Discovery]);
}

#[test]
fn compile_without_discovery_is_a_config_failure() {
    let fx = Fixture::new();
    let report = fx.session.run_pipeline(&[Stage::Compile], false).unwrap();
    assert!(!report.success);
    assert_eq!(report.failures_of(FailureKind::Config).count(), 1);
}

#[test]
fn force_recompiles_everything() {
    let fx = Fixture::new();
    fx.build();
    fx.toolchain.reset();

    let report = fx.session.run_pipeline(&[], true).unwrap();
    assert!(report.success);
    assert_eq!(report.compiled_units, 3);
    assert_eq!(report.status(Stage::Link), Some(&StageStatus::Completed));
}

#[test]
fn changing_opt_level_relinks_without_recompiling() {
    let fx = Fixture::new();
    fx.build();
    fx.toolchain.reset();

    fx.session
        .configure(|store| {
            store.merge_stage(LinkRecord {
                opt_level: Some(OptLevel::O3),
                ..Default::default()
            })
        })
        .unwrap();
    let report = fx.build();
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.compiled_units, 0);
    assert_eq!(report.status(Stage::Link), Some(&StageStatus::Completed));
    assert_eq!(report.status(Stage::Binary), Some(&StageStatus::Completed));
    let opt = fx.toolchain.argv_of("opt");
    assert_eq!(opt.len(), 1);
    assert!(opt[0].iter().any(|a| a == "-O3"), "{:?}", opt[0]);

    fx.toolchain.reset();
    let again = fx.build();
    assert_eq!(again.status(Stage::Link), Some(&skipped("up to date")));
    assert!(!fx.toolchain.called("opt"));
}

#[test]
fn changing_library_kind_repackages() {
    let fx = Fixture::new();
    fx.build();
    fx.toolchain.reset();

    let set_kind = |kind: LibraryKind| {
        fx.session
            .configure(|store| {
                store.merge_stage(BinaryRecord {
                    library_kind: Some(kind),
                    ..Default::default()
                })
            })
            .unwrap();
    };
    set_kind(LibraryKind::Static);
    let archive = PathBuf::from(".weld/out").join(LibraryKind::Static.file_name("mathlib"));
    let report = fx.build();
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.status(Stage::Binary), Some(&StageStatus::Completed));
    assert_eq!(report.artifact, Some(archive.clone()));
    assert!(fx.toolchain.called("llvm-ar"));
    assert!(fx.root().join(&archive).is_file());

    // The shared library from the first build is still on disk and current.
    set_kind(LibraryKind::Shared);
    fx.toolchain.reset();
    let back = fx.build();
    assert!(back.success, "{:?}", back.errors);
    assert_eq!(back.status(Stage::Link), Some(&skipped("up to date")));
    assert_eq!(back.status(Stage::Binary), Some(&StageStatus::Completed));
    assert_eq!(back.artifact, Some(fx.library()));
    let binary: BinaryRecord = StateStore::load(fx.root()).unwrap().record();
    assert_eq!(binary.library_kind, Some(LibraryKind::Shared));
}

#[test]
fn quick_build_on_fresh_project_runs_discovery() {
    let fx = Fixture::new();
    let report = fx.session.quick_build().unwrap();
    assert!(report.success);
    assert_eq!(report.status(Stage::Discovery), Some(&StageStatus::Completed));
    assert_eq!(report.compiled_units, 3);
}

#[test]
fn quick_build_picks_up_new_sources() {
    let fx = Fixture::new();
    fx.build();
    fx.toolchain.reset();

    write(fx.root(), "src/norm.cpp", "#include \"vec.h\"\n");
    let report = fx.session.quick_build().unwrap();
    assert!(report.success);
    assert_eq!(report.status(Stage::Discovery), None);
    assert_eq!(fx.toolchain.compiled(), [fx.root().join("src/norm.cpp")]);
    assert_eq!(report.cached_units, 3);
}

#[test]
fn removed_source_is_pruned_and_relinked() {
    let fx = Fixture::new();
    fx.build();
    let module = fx.root().join(".weld/obj/src/scale.cpp.bc");
    assert!(module.is_file());

    std::fs::remove_file(fx.root().join("src/scale.cpp")).unwrap();
    let report = fx.session.quick_build().unwrap();
    assert!(report.success);
    assert_eq!(report.compiled_units, 0);
    assert_eq!(report.status(Stage::Link), Some(&StageStatus::Completed));
    assert!(!module.exists());
}

#[test]
fn symbols_are_reextracted_after_a_failed_listing() {
    let fx = Fixture::new();
    fx.build();

    touch(&fx.root().join("src/scale.cpp"));
    fx.toolchain.fail_tool(Some("llvm-nm"));
    let failed = fx.build();
    assert!(!failed.success);
    assert_eq!(failed.status(Stage::Binary), Some(&StageStatus::Completed));
    assert_eq!(failed.status(Stage::Symbols), Some(&StageStatus::Failed));
    let symbols: SymbolsRecord = StateStore::load(fx.root()).unwrap().record();
    assert!(symbols.exported.is_empty());

    fx.toolchain.fail_tool(None);
    fx.toolchain
        .export_symbols("0000000000001120 T vec_dot\n0000000000001300 T vec_norm\n");
    fx.toolchain.reset();
    let report = fx.build();
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.status(Stage::Binary), Some(&skipped("up to date")));
    assert_eq!(report.status(Stage::Symbols), Some(&StageStatus::Completed));
    assert!(fx.toolchain.called("llvm-nm"));

    let symbols: SymbolsRecord = StateStore::load(fx.root()).unwrap().record();
    let names: Vec<&str> = symbols.exported.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["vec_dot", "vec_norm"]);
}

#[test]
fn quick_build_extracts_includes_only_for_touched_files() {
    let fx = Fixture::new();
    for i in 0..17 {
        write(fx.root(), &format!("src/kernels/k{i}.cpp"), "#include \"vec.h\"\n");
    }
    fx.build();
    fx.toolchain.reset();

    touch(&fx.root().join("src/kernels/k7.cpp"));
    let report = fx.session.quick_build().unwrap();
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(fx.toolchain.depfile_requests(), 1);
    assert_eq!(fx.toolchain.compiled(), [fx.root().join("src/kernels/k7.cpp")]);

    fx.toolchain.reset();
    let unchanged = fx.session.quick_build().unwrap();
    assert!(unchanged.success);
    assert_eq!(fx.toolchain.depfile_requests(), 0);
}

#[test]
fn cancelled_session_runs_nothing() {
    let fx = Fixture::new();
    fx.session.cancel_token().cancel();
    let report = fx.build();

    assert!(!report.success);
    assert_eq!(report.failures_of(FailureKind::Cancelled).count(), 1);
    assert_eq!(fx.toolchain.compile_count(), 0);
    for stage in Stage::ALL {
        assert!(matches!(report.status(stage), Some(StageStatus::NotRun { .. })));
    }
}

#[test]
fn build_after_a_cancelled_one_runs_normally() {
    let fx = Fixture::new();
    fx.session.cancel_token().cancel();
    assert!(!fx.build().success);

    let report = fx.build();
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.compiled_units, 3);
    assert!(!fx.session.cancel_token().is_cancelled());
}

#[test]
fn state_survives_a_new_session() {
    let fx = Fixture::new();
    fx.build();
    fx.toolchain.reset();

    let reopened = Session::open(fx.project.path())
        .unwrap()
        .with_invoker(fx.toolchain.clone())
        .with_locator(Arc::new(ToolLocator::new(
            None,
            vec![fx.tool_root.path().join("bin")],
        )));
    let report = reopened.quick_build().unwrap();
    assert!(report.success);
    assert_eq!(report.compiled_units, 0);
    assert_eq!(report.cached_units, 3);
}

#[test]
fn new_session_reuses_the_recorded_include_graph() {
    let fx = Fixture::new();
    fx.build();
    fx.toolchain.reset();

    touch(&fx.root().join("src/mat.cpp"));
    let reopened = Session::open(fx.project.path())
        .unwrap()
        .with_invoker(fx.toolchain.clone())
        .with_locator(Arc::new(ToolLocator::new(
            None,
            vec![fx.tool_root.path().join("bin")],
        )));
    let report = reopened.quick_build().unwrap();
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(fx.toolchain.depfile_requests(), 1);
    assert_eq!(fx.toolchain.compiled(), [fx.root().join("src/mat.cpp")]);
}

#[test]
fn watch_rebuilds_on_change_and_stops_on_break() {
    let fx = Fixture::new();
    let mut reports = Vec::new();
    fx.session
        .watch(Duration::from_millis(10), |report| {
            reports.push(report.clone());
            if reports.len() == 1 {
                touch(&fx.root().join("src/vec.cpp"));
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(())
            }
        })
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].compiled_units, 3);
    assert_eq!(reports[1].compiled_units, 1);
    assert!(reports.iter().all(|r| r.success));
}

#[test]
fn watch_returns_when_cancelled() {
    let fx = Fixture::new();
    let token = fx.session.cancel_token();
    let mut builds = 0;
    fx.session
        .watch(Duration::from_secs(60), |_| {
            builds += 1;
            token.cancel();
            ControlFlow::Continue(())
        })
        .unwrap();
    assert_eq!(builds, 1);
    assert!(!token.is_cancelled());
    assert!(fx.session.quick_build().unwrap().success);
}

#[test]
fn report_serializes_to_json() {
    let fx = Fixture::new();
    write(fx.root(), "src/broken.cpp", "int x\n");
    let report = fx.build();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["success"], false);
    assert_eq!(json["perStageStatus"]["compile"]["status"], "failed");
    assert_eq!(json["perStageStatus"]["link"]["status"], "skipped");
    assert_eq!(json["errors"][0]["kind"], "compilation");
    assert_eq!(json["errors"][0]["unit"], "src/broken.cpp");
    assert_eq!(json["compiledUnits"], 3);
}

#[test]
fn many_units_on_a_small_pool_all_complete() {
    let fx = Fixture::new();
    for i in 0..10 {
        write(fx.root(), &format!("src/kernels/k{i}.cpp"), "#include \"vec.h\"\n");
    }
    fx.session
        .configure(|store| store.settings_mut().workers = Some(4))
        .unwrap();
    let report = fx.build();

    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.compiled_units, 13);
    let store = StateStore::load(fx.root()).unwrap();
    let compile: CompileRecord = store.record();
    let mut sorted = compile.emitted_modules.clone();
    sorted.sort();
    assert_eq!(compile.emitted_modules, sorted);
}

#[test]
fn single_worker_build_completes() {
    let fx = Fixture::new();
    fx.session
        .configure(|store| store.settings_mut().workers = Some(1))
        .unwrap();
    let report = fx.build();

    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.compiled_units, 3);
    assert_eq!(fx.toolchain.compile_count(), 3);
}
