//! The build orchestrator.
//!
//! A [`Session`] owns one project's state store and in-memory caches and
//! runs the fixed stage sequence (discovery, compile, link, binary, symbols)
//! strictly in order, persisting the state after every stage. The free
//! functions below are one-shot conveniences over a fresh session.

#![warn(missing_docs)]

pub mod error;
pub mod report;
pub mod session;
mod stages;
pub mod watch;

use std::ops::ControlFlow;
use std::path::Path;
use std::time::Duration;

pub use error::DriverError;
pub use report::{BuildReport, FailureKind, StageFailure, StageStatus};
pub use session::Session;
pub use weld_state::Stage;

/// Runs `stages` (all stages if empty) for the project at `root`.
pub fn run_pipeline(root: &Path, stages: &[Stage], force: bool) -> Result<BuildReport, DriverError> {
    Session::open(root)?.run_pipeline(stages, force)
}

/// Recompiles and relinks the project at `root` from its persisted discovery.
pub fn quick_build(root: &Path) -> Result<BuildReport, DriverError> {
    Session::open(root)?.quick_build()
}

/// Rebuilds the project at `root` whenever its tree changes.
pub fn watch(
    root: &Path,
    interval: Duration,
    on_build: impl FnMut(&BuildReport) -> ControlFlow<()>,
) -> Result<(), DriverError> {
    Session::open(root)?.watch(interval, on_build)
}
