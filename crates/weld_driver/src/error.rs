//! Errors that stop the orchestrator before it can produce a report.
//!
//! Anything that goes wrong inside a stage is reported as a
//! [`StageFailure`](crate::StageFailure) instead.

use weld_cache::CacheError;
use weld_state::StateError;

/// A failure outside any single stage.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The state file is malformed or could not be written.
    #[error(transparent)]
    State(#[from] StateError),

    /// The project tree could not be fingerprinted.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Another build is already running on this session.
    #[error("a build is already in progress for this project")]
    BuildBusy,
}
