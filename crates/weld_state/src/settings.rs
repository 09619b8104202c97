//! Pipeline-wide settings and the enumerated option types used by stage records.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::stage::Stage;

/// Default wall-clock limit for a single compiler invocation.
pub const DEFAULT_UNIT_TIMEOUT_SECS: u64 = 300;

/// The `[pipeline]` table of the state file.
///
/// Controls which stages run, how failures propagate, and how the compile
/// stage is parallelized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PipelineSettings {
    /// Abort the remaining stages on the first stage failure.
    #[serde(default = "default_true")]
    pub stop_on_error: bool,
    /// Stages that are skipped entirely.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_stages: Vec<Stage>,
    /// Size of the compile worker pool. Defaults to the available parallelism.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Wall-clock limit for one unit's compilation, in seconds.
    #[serde(default = "default_unit_timeout")]
    pub unit_timeout_secs: u64,
    /// Root of a bundled toolchain preferred over `PATH`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolchain_root: Option<PathBuf>,
    /// Base name of the produced library. Defaults to the project name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_name: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_unit_timeout() -> u64 {
    DEFAULT_UNIT_TIMEOUT_SECS
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stop_on_error: true,
            disabled_stages: Vec::new(),
            workers: None,
            unit_timeout_secs: DEFAULT_UNIT_TIMEOUT_SECS,
            toolchain_root: None,
            library_name: None,
        }
    }
}

impl PipelineSettings {
    /// Returns `true` if every field has its default value.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Returns `true` unless the stage is listed in `disabledStages`.
    pub fn is_enabled(&self, stage: Stage) -> bool {
        !self.disabled_stages.contains(&stage)
    }

    /// The effective worker count, never zero.
    pub fn effective_workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// Optimization level passed to the optimizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptLevel {
    /// No optimization.
    O0,
    /// Light optimization.
    O1,
    /// Standard optimization (default).
    #[default]
    O2,
    /// Aggressive optimization.
    O3,
    /// Optimize for size.
    Os,
    /// Optimize aggressively for size.
    Oz,
}

impl OptLevel {
    /// The optimizer flag for this level, e.g. `-O2`.
    pub fn flag(self) -> &'static str {
        match self {
            OptLevel::O0 => "-O0",
            OptLevel::O1 => "-O1",
            OptLevel::O2 => "-O2",
            OptLevel::O3 => "-O3",
            OptLevel::Os => "-Os",
            OptLevel::Oz => "-Oz",
        }
    }
}

/// The kind of library produced by the binary stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryKind {
    /// A dynamically loadable shared library (default).
    #[default]
    Shared,
    /// A static archive.
    Static,
}

impl LibraryKind {
    /// The platform file name for a library called `name`.
    pub fn file_name(self, name: &str) -> String {
        match self {
            LibraryKind::Shared if cfg!(target_os = "windows") => format!("{name}.dll"),
            LibraryKind::Shared if cfg!(target_os = "macos") => format!("lib{name}.dylib"),
            LibraryKind::Shared => format!("lib{name}.so"),
            LibraryKind::Static if cfg!(target_os = "windows") => format!("{name}.lib"),
            LibraryKind::Static => format!("lib{name}.a"),
        }
    }
}
