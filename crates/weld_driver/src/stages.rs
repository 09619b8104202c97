//! Stage sequencing and the body of each stage.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use weld_cache::{config_fingerprint, graph_fingerprint, tree_fingerprint, UnitManifest};
use weld_common::{mtime_of, HashBuilder};
use weld_compile::{plan_units, CompileOptions, Scheduler};
use weld_deps::{DependencyAnalyzer, DependencyGraph, PreprocessorConfig};
use weld_link::{LinkOptions, Linker};
use weld_state::{
    BinaryRecord, CompileRecord, DiscoveryRecord, FileSets, LinkRecord, PipelineSettings, Stage,
    StageData, StateStore, SymbolsRecord, STATE_DIR,
};
use weld_toolchain::{required_tools, Tool, ToolError, Toolset};

use crate::error::DriverError;
use crate::report::{BuildReport, FailureKind, StageFailure, StageStatus};
use crate::session::{Session, SessionState};

/// Reason given to link stages when some unit has no module.
const INCOMPLETE: &str = "incomplete unit set";

/// Reason given to stages whose outputs are current.
const UP_TO_DATE: &str = "up to date";

enum StageOutcome {
    Completed,
    Skipped(String),
    /// Failures are already in the report. A fatal failure stops the build
    /// regardless of `stopOnError`.
    Failed { fatal: bool },
}

/// Runs `stages` (every stage if empty) in pipeline order.
///
/// With `refresh_discovery`, discovery runs first without being reported
/// as a stage.
pub(crate) fn execute(
    session: &Session,
    state: &mut SessionState,
    stages: &[Stage],
    force: bool,
    refresh_discovery: bool,
) -> Result<BuildReport, DriverError> {
    let start = Instant::now();
    let settings = state.store.settings().clone();
    let mut report = BuildReport::new();

    let mut enabled = Vec::new();
    for stage in Stage::ALL {
        if !stages.is_empty() && !stages.contains(&stage) {
            continue;
        }
        if settings.is_enabled(stage) {
            enabled.push(stage);
        } else {
            report.set(stage, StageStatus::Disabled);
        }
    }
    info!(
        target: "pipeline",
        project = %state.store.project().name,
        stages = enabled.len(),
        force,
        "build started"
    );

    if force {
        state.scans.invalidate();
        state.graphs.invalidate();
    }

    if let Some(root) = &settings.toolchain_root {
        session.locator.prefer_bundled_root(&session.root.join(root));
    }
    let link_cfg: LinkRecord = state.store.record();
    let binary_cfg: BinaryRecord = state.store.record();
    let optimize = link_cfg.optimize.unwrap_or(true);
    let kind = binary_cfg.library_kind.unwrap_or_default();
    let tools = match Toolset::discover(&session.locator, &required_tools(&enabled, optimize, kind)) {
        Ok(tools) => tools,
        Err(err) => {
            let missing = match &err {
                ToolError::NotFound { tools } => tools.clone(),
                _ => Vec::new(),
            };
            let stage = enabled
                .iter()
                .copied()
                .find(|s| {
                    required_tools(&[*s], optimize, kind)
                        .iter()
                        .any(|t| missing.iter().any(|m| m == t.executable()))
                })
                .unwrap_or(Stage::Compile);
            warn!(target: "pipeline", error = %err, "toolchain incomplete; nothing was built");
            report.fail(StageFailure::new(stage, FailureKind::ToolNotFound, err.to_string()));
            for s in &enabled {
                report.set(
                    *s,
                    StageStatus::NotRun {
                        reason: "required tools missing".to_string(),
                    },
                );
            }
            return Ok(report.finish(start.elapsed()));
        }
    };

    let mut build = Build {
        session,
        state,
        settings,
        tools,
        force,
        report,
        compile_ran: false,
        units_changed: false,
        incomplete: false,
        up_to_date: false,
    };

    let mut stop: Option<StageStatus> = None;
    if refresh_discovery && build.settings.is_enabled(Stage::Discovery) {
        let outcome = build.discovery();
        build.state.store.persist()?;
        if let StageOutcome::Failed { .. } = outcome {
            stop = Some(StageStatus::NotRun {
                reason: "discovery failed".to_string(),
            });
        }
    }

    for stage in enabled {
        if let Some(status) = &stop {
            build.report.set(stage, status.clone());
            continue;
        }
        if session.cancel.is_cancelled() {
            build.report.fail(StageFailure::new(
                stage,
                FailureKind::Cancelled,
                "build cancelled",
            ));
            let status = StageStatus::NotRun {
                reason: "build cancelled".to_string(),
            };
            build.report.set(stage, status.clone());
            stop = Some(status);
            continue;
        }

        let stage_start = Instant::now();
        let outcome = build.run(stage);
        build.state.store.persist()?;
        let status = match outcome {
            StageOutcome::Completed => StageStatus::Completed,
            StageOutcome::Skipped(reason) => StageStatus::Skipped { reason },
            StageOutcome::Failed { fatal } => {
                if build.incomplete && !fatal {
                    if build.settings.stop_on_error {
                        stop = Some(StageStatus::Skipped {
                            reason: INCOMPLETE.to_string(),
                        });
                    }
                } else if fatal || build.settings.stop_on_error {
                    stop = Some(StageStatus::NotRun {
                        reason: format!("{stage} failed"),
                    });
                }
                StageStatus::Failed
            }
        };
        info!(
            target: "pipeline",
            stage = stage.name(),
            status = ?status,
            elapsed_ms = stage_start.elapsed().as_millis() as u64,
            "stage finished"
        );
        build.report.set(stage, status);
    }

    let mut report = build.report;
    if report.success {
        let binary: BinaryRecord = build.state.store.record();
        report.artifact = binary
            .library_path
            .filter(|p| session.root.join(p).is_file());
    }
    let report = report.finish(start.elapsed());
    info!(
        target: "pipeline",
        success = report.success,
        compiled = report.compiled_units,
        cached = report.cached_units,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "build finished"
    );
    Ok(report)
}

/// Everything one build needs while running stages.
struct Build<'a> {
    session: &'a Session,
    state: &'a mut SessionState,
    settings: PipelineSettings,
    tools: Toolset,
    force: bool,
    report: BuildReport,
    /// The compile stage ran during this build.
    compile_ran: bool,
    /// Some unit was recompiled or pruned during this build.
    units_changed: bool,
    /// Some unit has no usable module.
    incomplete: bool,
    /// The link stage found the library current.
    up_to_date: bool,
}

impl Build<'_> {
    fn run(&mut self, stage: Stage) -> StageOutcome {
        match stage {
            Stage::Discovery => self.discovery(),
            Stage::Compile => self.compile(),
            Stage::Link => self.link(),
            Stage::Binary => self.binary(),
            Stage::Symbols => self.symbols(),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.unit_timeout_secs)
    }

    fn fail(&mut self, stage: Stage, kind: FailureKind, message: impl Into<String>) -> StageOutcome {
        let failure = StageFailure::new(stage, kind, message);
        warn!(target: "pipeline", stage = stage.name(), kind = ?failure.kind, "{}", failure.message);
        self.report.fail(failure);
        StageOutcome::Failed { fatal: true }
    }

    /// Include directories: configured on the compile stage, else those used
    /// by the last discovery, else `include/` when it exists.
    fn include_dirs(&self) -> Vec<PathBuf> {
        let compile: CompileRecord = self.state.store.record();
        if !compile.include_dirs.is_empty() {
            return compile.include_dirs;
        }
        let discovery: DiscoveryRecord = self.state.store.record();
        if !discovery.include_dirs.is_empty() {
            return discovery.include_dirs;
        }
        if self.session.root.join("include").is_dir() {
            vec![PathBuf::from("include")]
        } else {
            Vec::new()
        }
    }

    fn discovery(&mut self) -> StageOutcome {
        let session = self.session;
        let root = session.root.as_path();
        let include_dirs = self.include_dirs();

        let scan_fp = match tree_fingerprint(root) {
            Ok(fp) => fp,
            Err(e) => return self.fail(Stage::Discovery, FailureKind::Discovery, e.to_string()),
        };

        let flags = self.state.store.record::<CompileRecord>().flags;
        let mut analyzer = DependencyAnalyzer::new(root, &include_dirs)
            .with_workers(self.settings.effective_workers());
        let compiler = self
            .tools
            .get(Tool::Compiler)
            .map(Path::to_path_buf)
            .or_else(|| {
                session
                    .locator
                    .resolve(Tool::Compiler.executable())
                    .ok()
                    .map(|t| t.absolute_path)
            });
        if let Some(compiler) = compiler {
            analyzer = analyzer.with_preprocessor(
                PreprocessorConfig {
                    compiler,
                    flags: flags.clone(),
                    timeout: self.timeout(),
                },
                session.invoker.as_ref(),
            );
        }

        let scan = match self.state.scans.get_or_compute(scan_fp, || analyzer.scan()) {
            Ok(scan) => scan,
            Err(e) => return self.fail(Stage::Discovery, FailureKind::Discovery, e.to_string()),
        };
        // Nodes of the recorded graph are reused per file while the search
        // path and flags match the ones they were extracted with.
        let recorded: DiscoveryRecord = self.state.store.record();
        let previous = if !self.force
            && recorded.include_dirs == include_dirs
            && recorded.preprocessor_flags == flags
        {
            DependencyGraph::from_record(&recorded.dependency_graph)
        } else {
            DependencyGraph::default()
        };
        let graph_fp = graph_fingerprint(&scan, &include_dirs, &flags);
        let graph = match self
            .state
            .graphs
            .get_or_compute(graph_fp, || analyzer.update_graph(&scan, &previous))
        {
            Ok(graph) => graph,
            Err(e) => return self.fail(Stage::Discovery, FailureKind::Discovery, e.to_string()),
        };
        for (file, error) in graph.failures() {
            self.report
                .warnings
                .push(format!("{}: {error}", file.display()));
        }

        update_record(
            &mut self.state.store,
            DiscoveryRecord {
                include_dirs,
                files: FileSets {
                    sources: scan.sources(),
                    headers: scan.headers(),
                },
                preprocessor_flags: flags,
                dependency_graph: graph.to_record(),
            },
        );
        debug!(
            sources = scan.sources().len(),
            headers = scan.headers().len(),
            "discovery recorded"
        );
        StageOutcome::Completed
    }

    fn compile(&mut self) -> StageOutcome {
        let session = self.session;
        let root = session.root.as_path();
        let discovery: DiscoveryRecord = self.state.store.record();
        if discovery.is_empty() {
            return self.fail(
                Stage::Compile,
                FailureKind::Config,
                "discovery has not run for this project",
            );
        }
        let compiler = match self.tools.require(Tool::Compiler).map(Path::to_path_buf) {
            Ok(path) => path,
            Err(e) => return self.fail(Stage::Compile, FailureKind::ToolNotFound, e.to_string()),
        };

        let config: CompileRecord = self.state.store.record();
        let output_dir = config
            .output_dir
            .clone()
            .unwrap_or_else(|| Path::new(STATE_DIR).join("obj"));
        let include_dirs = self.include_dirs();
        let graph = DependencyGraph::from_record(&discovery.dependency_graph);
        let sources = graph.topological_order(&discovery.files.sources);
        let config_fp = config_fingerprint(&config.flags, &include_dirs);
        let units = plan_units(
            root,
            &sources,
            &output_dir,
            &graph,
            &config_fp,
        );

        let cache_dir = root.join(STATE_DIR).join("cache");
        let mut manifest = if self.force {
            UnitManifest::new()
        } else {
            UnitManifest::load_or_default(&cache_dir)
        };
        let options = CompileOptions {
            compiler,
            flags: config.flags.clone(),
            include_dirs,
            timeout: self.timeout(),
            workers: self.settings.effective_workers(),
        };
        let scheduler = Scheduler::new(
            root,
            session.invoker.as_ref(),
            session.advisor.as_ref(),
            session.cancel.clone(),
        );
        let outcome = match scheduler.compile(&units, &mut manifest, &options) {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(Stage::Compile, FailureKind::Io, e.to_string()),
        };
        if let Err(e) = manifest.save(&cache_dir) {
            return self.fail(Stage::Compile, FailureKind::Io, e.to_string());
        }

        self.compile_ran = true;
        self.units_changed = outcome.changed();
        self.incomplete = !outcome.is_complete();
        self.report.compiled_units += outcome.compiled_count();
        self.report.cached_units += outcome.cached_count();

        update_record(
            &mut self.state.store,
            CompileRecord {
                output_dir: Some(output_dir),
                emitted_modules: outcome.modules(),
                ..config
            },
        );

        if outcome.cancelled_count() > 0 {
            return self.fail(
                Stage::Compile,
                FailureKind::Cancelled,
                format!("build cancelled; {} unit(s) discarded", outcome.cancelled_count()),
            );
        }
        let failures: Vec<StageFailure> = outcome
            .failures()
            .map(|(unit, failure)| StageFailure {
                unit: Some(unit.source.clone()),
                output: Some(failure.output.clone()),
                suggestions: failure.suggestions.clone(),
                ..StageFailure::new(
                    Stage::Compile,
                    FailureKind::Compilation,
                    if failure.timed_out {
                        format!("{} timed out", unit.source.display())
                    } else {
                        format!("{} failed to compile", unit.source.display())
                    },
                )
            })
            .collect();
        if failures.is_empty() {
            return StageOutcome::Completed;
        }
        for failure in failures {
            self.report.fail(failure);
        }
        StageOutcome::Failed { fatal: false }
    }

    fn link_options(&self) -> LinkOptions {
        let link: LinkRecord = self.state.store.record();
        let binary: BinaryRecord = self.state.store.record();
        LinkOptions {
            library_name: self
                .settings
                .library_name
                .clone()
                .unwrap_or_else(|| self.state.store.project().name.clone()),
            output_dir: Path::new(STATE_DIR).join("out"),
            optimize: link.optimize.unwrap_or(true),
            opt_level: link.opt_level.unwrap_or_default(),
            library_kind: binary.library_kind.unwrap_or_default(),
            timeout: self.timeout(),
        }
    }

    fn link(&mut self) -> StageOutcome {
        if self.incomplete {
            return StageOutcome::Skipped(INCOMPLETE.to_string());
        }
        let root = self.session.root.as_path();
        let compile: CompileRecord = self.state.store.record();
        let previous: LinkRecord = self.state.store.record();
        let options = self.link_options();
        let settings_hash = link_settings_hash(&options);
        let relink = self.force
            || self.units_changed
            || !self.compile_ran
            || previous.settings_hash.as_deref() != Some(settings_hash.as_str())
            || artifact_is_stale(root, &compile.emitted_modules, &options.library_path());
        if !relink {
            self.up_to_date = true;
            return StageOutcome::Skipped(UP_TO_DATE.to_string());
        }

        let linker = Linker::new(root, self.session.invoker.as_ref(), &self.tools);
        let linked = linker
            .merge(&compile.emitted_modules, &options)
            .and_then(|linked| {
                let optimized = linker.optimize(&linked, &options)?;
                Ok((linked, optimized))
            });
        let (linked, optimized) = match linked {
            Ok(paths) => paths,
            Err(e) => {
                self.report.fail(StageFailure::from_link(Stage::Link, &e));
                return StageOutcome::Failed { fatal: true };
            }
        };
        update_record(
            &mut self.state.store,
            LinkRecord {
                optimize: Some(options.optimize),
                opt_level: Some(options.opt_level),
                linked_module_path: Some(linked),
                optimized_module_path: Some(optimized),
                settings_hash: Some(settings_hash),
            },
        );
        StageOutcome::Completed
    }

    fn binary(&mut self) -> StageOutcome {
        if self.incomplete {
            return StageOutcome::Skipped(INCOMPLETE.to_string());
        }
        let root = self.session.root.as_path();
        let options = self.link_options();
        let settings_hash = binary_settings_hash(&options);
        let previous: BinaryRecord = self.state.store.record();
        if self.up_to_date
            && previous.settings_hash.as_deref() == Some(settings_hash.as_str())
            && root.join(options.library_path()).is_file()
        {
            return StageOutcome::Skipped(UP_TO_DATE.to_string());
        }
        let link: LinkRecord = self.state.store.record();
        let Some(module) = link.optimized_module_path.or(link.linked_module_path) else {
            return self.fail(
                Stage::Binary,
                FailureKind::Config,
                "the link stage has not produced a module",
            );
        };
        let linker = Linker::new(root, self.session.invoker.as_ref(), &self.tools);
        match linker.package(&module, &options) {
            Ok(library) => {
                update_record(
                    &mut self.state.store,
                    BinaryRecord {
                        library_path: Some(library),
                        library_kind: Some(options.library_kind),
                        settings_hash: Some(settings_hash),
                    },
                );
                // Symbols of the previous library no longer describe this one.
                self.state.store.clear_stage(Stage::Symbols);
                StageOutcome::Completed
            }
            Err(e) => {
                self.report.fail(StageFailure::from_link(Stage::Binary, &e));
                StageOutcome::Failed { fatal: true }
            }
        }
    }

    fn symbols(&mut self) -> StageOutcome {
        if self.incomplete {
            return StageOutcome::Skipped(INCOMPLETE.to_string());
        }
        let existing: SymbolsRecord = self.state.store.record();
        if self.up_to_date && !existing.is_empty() {
            return StageOutcome::Skipped(UP_TO_DATE.to_string());
        }
        let binary: BinaryRecord = self.state.store.record();
        let Some(library) = binary.library_path else {
            return self.fail(
                Stage::Symbols,
                FailureKind::Config,
                "the binary stage has not produced a library",
            );
        };
        let options = self.link_options();
        let linker = Linker::new(
            &self.session.root,
            self.session.invoker.as_ref(),
            &self.tools,
        );
        match linker.extract_symbols(&library, &options) {
            Ok(exported) => {
                update_record(&mut self.state.store, SymbolsRecord { exported });
                StageOutcome::Completed
            }
            Err(e) => {
                self.report.fail(StageFailure::from_link(Stage::Symbols, &e));
                StageOutcome::Failed { fatal: true }
            }
        }
    }
}

/// Replaces a stage record only when it changed, so an unchanged build
/// leaves the state file byte-identical.
fn update_record<T: StageData + PartialEq>(store: &mut StateStore, record: T) -> bool {
    if store.record::<T>() == record {
        return false;
    }
    store.put_stage(record.into_record());
    true
}

/// Hash of the settings the optimized module depends on.
fn link_settings_hash(options: &LinkOptions) -> String {
    let mut hasher = HashBuilder::new();
    hasher
        .str(&options.library_name)
        .u64(u64::from(options.optimize))
        .str(options.opt_level.flag());
    hasher.finish().to_string()
}

/// Hash of the settings the packaged library depends on.
fn binary_settings_hash(options: &LinkOptions) -> String {
    let mut hasher = HashBuilder::new();
    hasher
        .str(&link_settings_hash(options))
        .str(&options.library_path().to_string_lossy());
    hasher.finish().to_string()
}

/// The library is stale if it is missing or older than any unit module.
fn artifact_is_stale(root: &Path, modules: &[PathBuf], library: &Path) -> bool {
    let Some(built) = mtime_of(&root.join(library)) else {
        return true;
    };
    let distinct: BTreeSet<&PathBuf> = modules.iter().collect();
    distinct
        .into_iter()
        .any(|m| mtime_of(&root.join(m)).map_or(true, |t| t > built))
}
