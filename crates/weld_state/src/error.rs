//! Error types for loading and persisting the project state file.

use std::path::PathBuf;

/// Errors that can occur when loading, validating or persisting build state.
///
/// A malformed state file is always an error: the store never falls back to
/// defaults when a file exists but cannot be understood.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// An I/O error occurred while reading or writing the state file.
    #[error("state file I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The state file is not valid TOML or does not match the schema.
    #[error("malformed state file {path}: {reason}")]
    Parse {
        /// The state file path.
        path: PathBuf,
        /// Description of the parse failure.
        reason: String,
    },

    /// The in-memory state could not be serialized.
    #[error("failed to serialize state: {reason}")]
    Serialize {
        /// Description of the serialization failure.
        reason: String,
    },

    /// The state file was written by an incompatible format version.
    #[error("unsupported state format version {found} (expected {expected})")]
    UnsupportedVersion {
        /// The version found in the file.
        found: u32,
        /// The version this build understands.
        expected: u32,
    },

    /// A required field is missing or empty.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A value failed validation.
    #[error("validation error: {0}")]
    Validation(String),
}
