//! Dispatch of stale units to a fixed-size worker pool.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info, warn};
use weld_cache::UnitManifest;
use weld_toolchain::{ToolInvoker, ToolOutput};

use crate::advisor::{FixAdvisor, MAX_FIX_RETRIES};
use crate::cancel::CancelToken;
use crate::error::CompileError;
use crate::unit::{CompilationUnit, UnitFailure, UnitResult, UnitStatus};

/// Compiler configuration shared by every unit of a build.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Absolute path of the compiler.
    pub compiler: PathBuf,
    /// Flags passed to every unit.
    pub flags: Vec<String>,
    /// Include search directories, relative to the project root or absolute.
    pub include_dirs: Vec<PathBuf>,
    /// Wall-clock limit per compiler invocation.
    pub timeout: Duration,
    /// Size of the worker pool.
    pub workers: usize,
}

/// Aggregated results of one scheduler run, sorted by source path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileOutcome {
    /// One result per unit.
    pub results: Vec<UnitResult>,
    /// Modules of sources that disappeared from the project.
    pub pruned: Vec<PathBuf>,
}

impl CompileOutcome {
    /// Number of units compiled this build.
    pub fn compiled_count(&self) -> usize {
        self.count(|s| matches!(s, UnitStatus::Compiled { .. }))
    }

    /// Number of units served from the cache.
    pub fn cached_count(&self) -> usize {
        self.count(|s| matches!(s, UnitStatus::Cached))
    }

    /// Number of units not run or discarded because of cancellation.
    pub fn cancelled_count(&self) -> usize {
        self.count(|s| matches!(s, UnitStatus::Cancelled))
    }

    /// Failed units.
    pub fn failures(&self) -> impl Iterator<Item = (&UnitResult, &UnitFailure)> {
        self.results
            .iter()
            .filter_map(|r| r.failure().map(|f| (r, f)))
    }

    /// Returns `true` if every unit has a usable module.
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(UnitResult::is_usable)
    }

    /// Returns `true` if anything changed since the last build.
    pub fn changed(&self) -> bool {
        self.compiled_count() > 0 || !self.pruned.is_empty()
    }

    /// Usable modules in source path order.
    pub fn modules(&self) -> Vec<PathBuf> {
        self.results
            .iter()
            .filter(|r| r.is_usable())
            .map(|r| r.module.clone())
            .collect()
    }

    fn count(&self, pred: impl Fn(&UnitStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }
}

/// Compiles units in parallel against a unit manifest.
///
/// Each worker runs one compiler invocation for one unit and returns a
/// self-contained result; workers share nothing mutable. The manifest is
/// updated only after every dispatched unit has finished.
pub struct Scheduler<'a> {
    root: PathBuf,
    invoker: &'a dyn ToolInvoker,
    advisor: &'a dyn FixAdvisor,
    cancel: CancelToken,
}

impl<'a> Scheduler<'a> {
    /// Creates a scheduler for the project at `root`.
    pub fn new(
        root: &Path,
        invoker: &'a dyn ToolInvoker,
        advisor: &'a dyn FixAdvisor,
        cancel: CancelToken,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            invoker,
            advisor,
            cancel,
        }
    }

    /// Compiles every stale unit among `units`.
    ///
    /// `units` must be the full unit set of the project: manifest entries of
    /// any other source are pruned and their modules deleted. With a single
    /// worker, stale units compile one at a time in the order given.
    pub fn compile(
        &self,
        units: &[CompilationUnit],
        manifest: &mut UnitManifest,
        options: &CompileOptions,
    ) -> Result<CompileOutcome, CompileError> {
        let start = Instant::now();
        let live: BTreeSet<PathBuf> = units.iter().map(|u| u.source.clone()).collect();
        let pruned = manifest.prune(&live);
        for module in &pruned {
            let _ = std::fs::remove_file(self.root.join(module));
        }

        let mut results = Vec::with_capacity(units.len());
        let mut stale = Vec::new();
        for unit in units {
            let fresh = unit
                .fingerprint
                .as_ref()
                .and_then(|fp| manifest.fresh_module(&self.root, &unit.source, fp))
                .is_some();
            if fresh {
                results.push(UnitResult {
                    source: unit.source.clone(),
                    module: unit.module.clone(),
                    status: UnitStatus::Cached,
                });
            } else {
                stale.push(unit);
            }
        }
        debug!(
            cached = results.len(),
            stale = stale.len(),
            workers = options.workers,
            "compile plan"
        );

        if !stale.is_empty() {
            let compiled: Vec<UnitResult> = if options.workers <= 1 {
                stale
                    .iter()
                    .map(|unit| self.compile_unit(unit, options))
                    .collect()
            } else {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(options.workers)
                    .build()
                    .map_err(|e| CompileError::Workers {
                        reason: e.to_string(),
                    })?;
                pool.install(|| {
                    stale
                        .par_iter()
                        .map(|unit| self.compile_unit(unit, options))
                        .collect()
                })
            };

            for (unit, result) in stale.iter().zip(&compiled) {
                match &result.status {
                    UnitStatus::Compiled { retries: 0, .. } => {
                        if let Some(fp) = unit.fingerprint {
                            manifest.record(unit.source.clone(), unit.module.clone(), fp);
                        }
                    }
                    UnitStatus::Cancelled => {}
                    _ => manifest.forget(&unit.source),
                }
            }
            results.extend(compiled);
        }

        results.sort_by(|a, b| a.source.cmp(&b.source));
        let outcome = CompileOutcome { results, pruned };
        info!(
            target: "pipeline",
            compiled = outcome.compiled_count(),
            cached = outcome.cached_count(),
            failed = outcome.failures().count(),
            cancelled = outcome.cancelled_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "compilation finished"
        );
        Ok(outcome)
    }

    /// Runs one unit to completion inside a worker.
    fn compile_unit(&self, unit: &CompilationUnit, options: &CompileOptions) -> UnitResult {
        let result = |status| UnitResult {
            source: unit.source.clone(),
            module: unit.module.clone(),
            status,
        };
        if self.cancel.is_cancelled() {
            return result(UnitStatus::Cancelled);
        }

        let module_abs = self.root.join(&unit.module);
        if let Some(parent) = module_abs.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return result(UnitStatus::Failed(UnitFailure {
                    output: format!("failed to create {}: {e}", parent.display()),
                    exit_code: None,
                    timed_out: false,
                    suggestions: Vec::new(),
                    retries: 0,
                }));
            }
        }

        let start = Instant::now();
        let mut flags = options.flags.clone();
        let mut retries = 0;
        loop {
            let argv = self.compile_argv(unit, &module_abs, &flags, &options.include_dirs);
            let out = match self.invoker.invoke(&options.compiler, &argv, Some(options.timeout)) {
                Ok(out) => out,
                Err(e) => ToolOutput {
                    output: e.to_string(),
                    exit_code: None,
                    timed_out: false,
                    duration: start.elapsed(),
                },
            };
            if self.cancel.is_cancelled() {
                debug!(unit = %unit.source.display(), "discarding result of cancelled build");
                return result(UnitStatus::Cancelled);
            }
            if out.success() {
                debug!(unit = %unit.source.display(), retries, "unit compiled");
                return result(UnitStatus::Compiled {
                    duration: start.elapsed(),
                    retries,
                });
            }

            let suggestions = self.advisor.suggest_fix(&out.output);
            warn!(
                unit = %unit.source.display(),
                exit = ?out.exit_code,
                timed_out = out.timed_out,
                suggestions = suggestions.len(),
                "unit failed to compile"
            );
            if retries < MAX_FIX_RETRIES {
                if let Some(new_flags) =
                    self.advisor.approve_retry(&unit.source, &suggestions, &flags)
                {
                    retries += 1;
                    info!(unit = %unit.source.display(), attempt = retries, "retrying with approved flags");
                    flags = new_flags;
                    continue;
                }
            }
            return result(UnitStatus::Failed(UnitFailure {
                output: out.output,
                exit_code: out.exit_code,
                timed_out: out.timed_out,
                suggestions,
                retries,
            }));
        }
    }

    fn compile_argv(
        &self,
        unit: &CompilationUnit,
        module_abs: &Path,
        flags: &[String],
        include_dirs: &[PathBuf],
    ) -> Vec<String> {
        let mut argv = vec!["-c".to_string(), "-emit-llvm".to_string()];
        argv.extend(flags.iter().cloned());
        argv.extend(
            include_dirs
                .iter()
                .map(|d| format!("-I{}", self.root.join(d).display())),
        );
        argv.push(self.root.join(&unit.source).display().to_string());
        argv.push("-o".to_string());
        argv.push(module_abs.display().to_string());
        argv
    }
}
