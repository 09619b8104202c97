//! Error types for the link stage.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use weld_toolchain::ToolError;

/// A step of the link stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStep {
    /// Merging unit modules into one.
    Merge,
    /// Running optimization passes.
    Optimize,
    /// Lowering and linking into the library.
    Package,
    /// Extracting the exported symbol table.
    Symbols,
}

impl LinkStep {
    /// Lowercase step name.
    pub fn name(self) -> &'static str {
        match self {
            LinkStep::Merge => "merge",
            LinkStep::Optimize => "optimize",
            LinkStep::Package => "package",
            LinkStep::Symbols => "symbols",
        }
    }
}

impl fmt::Display for LinkStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure of one link step; the remaining steps do not run.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// There was nothing to link.
    #[error("{step} failed: no unit modules to link")]
    NoModules {
        /// Always [`LinkStep::Merge`].
        step: LinkStep,
    },

    /// A tool could not be found or started.
    #[error("{step} failed: {source}")]
    Tool {
        /// The failing step.
        step: LinkStep,
        /// The underlying tool error.
        source: ToolError,
    },

    /// A tool ran and reported failure.
    #[error("{step} failed ({}): {}", exit_summary(.exit_code, .timed_out), .output.trim())]
    Failed {
        /// The failing step.
        step: LinkStep,
        /// Tool exit code, if it exited normally.
        exit_code: Option<i32>,
        /// Whether the tool was killed for exceeding its timeout.
        timed_out: bool,
        /// Raw tool output.
        output: String,
    },

    /// An output file could not be placed.
    #[error("{step} failed: I/O error at {}: {source}", .path.display())]
    Io {
        /// The failing step.
        step: LinkStep,
        /// The path involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

impl LinkError {
    /// The step that failed.
    pub fn step(&self) -> LinkStep {
        match self {
            LinkError::NoModules { step }
            | LinkError::Tool { step, .. }
            | LinkError::Failed { step, .. }
            | LinkError::Io { step, .. } => *step,
        }
    }

    /// Raw tool output, when a tool produced any.
    pub fn output(&self) -> Option<&str> {
        match self {
            LinkError::Failed { output, .. } => Some(output),
            _ => None,
        }
    }
}

fn exit_summary(exit_code: &Option<i32>, timed_out: &bool) -> String {
    match (*timed_out, *exit_code) {
        (true, _) => "timed out".to_string(),
        (false, Some(code)) => format!("exit code {code}"),
        (false, None) => "terminated".to_string(),
    }
}
