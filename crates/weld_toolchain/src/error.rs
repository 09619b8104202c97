//! Error types for tool discovery and invocation.

use std::path::PathBuf;

/// Errors raised while locating or launching toolchain executables.
///
/// A tool that runs and exits non-zero is not an error; see
/// [`ToolOutput`](crate::ToolOutput).
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// One or more required tools are not installed in any searched location.
    #[error("required tool(s) not found: {}", .tools.join(", "))]
    NotFound {
        /// Names of the missing tools.
        tools: Vec<String>,
    },

    /// The tool exists but could not be started.
    #[error("failed to launch {}: {source}", .tool.display())]
    Spawn {
        /// The executable path.
        tool: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Waiting on or collecting output from a running tool failed.
    #[error("I/O error while running {}: {source}", .tool.display())]
    Io {
        /// The executable path.
        tool: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_lists_tools() {
        let err = ToolError::NotFound {
            tools: vec!["clang++".to_string(), "llvm-link".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "required tool(s) not found: clang++, llvm-link"
        );
    }

    #[test]
    fn spawn_display() {
        let err = ToolError::Spawn {
            tool: PathBuf::from("/opt/llvm/bin/opt"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("failed to launch /opt/llvm/bin/opt"));
    }
}
