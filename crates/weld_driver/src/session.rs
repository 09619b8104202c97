//! One project's build session.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use weld_cache::DiscoveryCache;
use weld_compile::{CancelToken, FixAdvisor, NoAdvisor};
use weld_deps::{DependencyGraph, ScanResult};
use weld_state::{BuildState, Stage, StateError, StateStore};
use weld_toolchain::{ProcessInvoker, ToolInvoker, ToolLocator};

use crate::error::DriverError;
use crate::report::BuildReport;
use crate::stages;

/// The stages a quick build runs after refreshing discovery.
const QUICK_STAGES: [Stage; 4] = [Stage::Compile, Stage::Link, Stage::Binary, Stage::Symbols];

/// Mutable per-project state; only one build may hold it at a time.
pub(crate) struct SessionState {
    pub(crate) store: StateStore,
    pub(crate) scans: DiscoveryCache<ScanResult>,
    pub(crate) graphs: DiscoveryCache<DependencyGraph>,
}

/// Owns a project's state store and in-memory caches, and runs builds.
///
/// Builds on one session never interleave: a build requested while another
/// is running fails with [`DriverError::BuildBusy`].
pub struct Session {
    pub(crate) root: PathBuf,
    pub(crate) invoker: Arc<dyn ToolInvoker>,
    pub(crate) advisor: Arc<dyn FixAdvisor>,
    pub(crate) locator: Arc<ToolLocator>,
    pub(crate) cancel: CancelToken,
    inner: Mutex<SessionState>,
}

impl Session {
    /// Opens the project at `root`, loading `.weld/state.toml` or starting
    /// from defaults.
    ///
    /// Tools run as child processes, resolved through the process-wide
    /// locator.
    pub fn open(root: &Path) -> Result<Self, DriverError> {
        let root = std::fs::canonicalize(root).map_err(|e| StateError::Io {
            path: root.to_path_buf(),
            source: e,
        })?;
        let store = StateStore::load(&root)?;
        Ok(Self {
            invoker: Arc::new(ProcessInvoker::in_dir(&root)),
            advisor: Arc::new(NoAdvisor),
            locator: ToolLocator::shared(),
            cancel: CancelToken::new(),
            inner: Mutex::new(SessionState {
                store,
                scans: DiscoveryCache::new("scan"),
                graphs: DiscoveryCache::new("graph"),
            }),
            root,
        })
    }

    /// Runs tools through `invoker` instead of child processes.
    pub fn with_invoker(mut self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    /// Consults `advisor` when a unit fails to compile.
    pub fn with_advisor(mut self, advisor: Arc<dyn FixAdvisor>) -> Self {
        self.advisor = advisor;
        self
    }

    /// Resolves tools through `locator` instead of the process-wide one.
    pub fn with_locator(mut self, locator: Arc<ToolLocator>) -> Self {
        self.locator = locator;
        self
    }

    /// The canonical project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A handle that cancels the running build, or stops a watch loop.
    ///
    /// A request made while no build runs cancels the next one. The build
    /// or watch loop that observes a request clears it when it returns, so
    /// later builds on this session run normally.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// A snapshot of the current build state.
    pub fn state(&self) -> Result<BuildState, DriverError> {
        Ok(self.lock()?.store.state().clone())
    }

    /// Edits the state store (settings or stage configuration) and persists it.
    pub fn configure(&self, edit: impl FnOnce(&mut StateStore)) -> Result<(), DriverError> {
        let mut guard = self.lock()?;
        edit(&mut guard.store);
        guard.store.persist()?;
        Ok(())
    }

    /// Runs `stages` in pipeline order; an empty list means every stage.
    ///
    /// With `force`, every unit is recompiled and the library relinked.
    pub fn run_pipeline(&self, stages: &[Stage], force: bool) -> Result<BuildReport, DriverError> {
        let mut guard = self.lock()?;
        let report = stages::execute(self, &mut guard, stages, force, false);
        self.cancel.reset();
        report
    }

    /// Recompiles stale units and relinks, reusing the persisted discovery.
    ///
    /// Discovery is refreshed against the recorded include graph: an
    /// unchanged tree costs a directory walk, and only new or modified files
    /// have their includes extracted again. A project that has never been
    /// discovered gets a full pipeline run instead.
    pub fn quick_build(&self) -> Result<BuildReport, DriverError> {
        let report = self.quick_build_keeping_cancel();
        self.cancel.reset();
        report
    }

    /// A quick build that leaves a cancellation request in place for the
    /// caller to observe.
    pub(crate) fn quick_build_keeping_cancel(&self) -> Result<BuildReport, DriverError> {
        let mut guard = self.lock()?;
        if guard.store.get_stage(Stage::Discovery).is_empty() {
            return stages::execute(self, &mut guard, &[], false, false);
        }
        stages::execute(self, &mut guard, &QUICK_STAGES, false, true)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionState>, DriverError> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(DriverError::BuildBusy),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        }
    }
}
