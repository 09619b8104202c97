//! Error types for the compilation scheduler.
//!
//! A unit that fails to compile is not an error here: it is reported as
//! [`UnitStatus::Failed`](crate::UnitStatus::Failed). These variants cover
//! failures that prevent scheduling altogether.

use std::path::PathBuf;

use weld_cache::CacheError;

/// Errors that stop the scheduler from running.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The worker pool could not be started.
    #[error("failed to start compile workers: {reason}")]
    Workers {
        /// Description of the failure.
        reason: String,
    },

    /// The output directory could not be created.
    #[error("failed to create output directory {}: {source}", .path.display())]
    OutputDir {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The unit manifest could not be written.
    #[error(transparent)]
    Cache(#[from] CacheError),
}
