//! Error types for scanning and include extraction.

use std::path::PathBuf;

/// A failure confined to one file.
///
/// Never aborts a scan: the message is recorded on the file's graph node.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The file could not be read for text extraction.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// A failure that prevents discovery from producing any result.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// A directory of the project tree could not be listed.
    #[error("failed to walk {}: {source}", .path.display())]
    Walk {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The parallel extraction pool could not be started.
    #[error("failed to start extraction workers: {reason}")]
    Workers {
        /// Description of the failure.
        reason: String,
    },
}
