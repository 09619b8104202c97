//! The summary returned to callers after every build.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use weld_compile::FixSuggestion;
use weld_link::{LinkError, LinkStep};
use weld_state::Stage;

/// What happened to one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StageStatus {
    /// Ran and succeeded.
    Completed,
    /// Not needed this build.
    Skipped {
        /// Why it was not needed.
        reason: String,
    },
    /// Disabled in the pipeline settings.
    Disabled,
    /// Ran and failed.
    Failed,
    /// Not reached because the build stopped earlier.
    NotRun {
        /// Why the build stopped.
        reason: String,
    },
}

/// Classification of a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// A required tool is not installed.
    ToolNotFound,
    /// The project tree could not be scanned.
    Discovery,
    /// One unit failed to compile.
    Compilation,
    /// Merging unit modules failed.
    LinkFailure,
    /// The optimizer failed.
    OptimizeFailure,
    /// Lowering or packaging the library failed.
    PackageFailure,
    /// Symbol extraction failed.
    SymbolsFailure,
    /// A stage's inputs are missing from the state.
    Config,
    /// Reading or writing build products failed.
    Io,
    /// The build was cancelled.
    Cancelled,
}

impl From<LinkStep> for FailureKind {
    fn from(step: LinkStep) -> Self {
        match step {
            LinkStep::Merge => FailureKind::LinkFailure,
            LinkStep::Optimize => FailureKind::OptimizeFailure,
            LinkStep::Package => FailureKind::PackageFailure,
            LinkStep::Symbols => FailureKind::SymbolsFailure,
        }
    }
}

/// One reported failure: where it came from and the raw tool output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFailure {
    /// The stage that failed.
    pub stage: Stage,
    /// What kind of failure.
    pub kind: FailureKind,
    /// The failing unit, for compilation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<PathBuf>,
    /// Human-readable summary.
    pub message: String,
    /// Raw tool output, when a tool produced any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Fix suggestions surfaced for a compilation failure.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<FixSuggestion>,
}

impl StageFailure {
    /// A failure with only a message.
    pub fn new(stage: Stage, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            unit: None,
            message: message.into(),
            output: None,
            suggestions: Vec::new(),
        }
    }

    /// A failure of one link step.
    pub fn from_link(stage: Stage, err: &LinkError) -> Self {
        Self {
            output: err.output().map(str::to_string),
            ..Self::new(stage, err.step().into(), err.to_string())
        }
    }
}

/// The result of one build.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    /// `true` if no stage failed.
    pub success: bool,
    /// Status of every stage, in pipeline order.
    #[serde(rename = "perStageStatus")]
    pub stages: BTreeMap<Stage, StageStatus>,
    /// Wall-clock duration of the whole build.
    pub duration_seconds: f64,
    /// Every failure, in the order they occurred.
    pub errors: Vec<StageFailure>,
    /// Non-fatal problems, such as files whose includes could not be read.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Units compiled this build.
    pub compiled_units: usize,
    /// Units served from the unit cache.
    pub cached_units: usize,
    /// The library, when the build produced or kept one.
    pub artifact: Option<PathBuf>,
}

impl BuildReport {
    pub(crate) fn new() -> Self {
        Self {
            success: true,
            stages: BTreeMap::new(),
            duration_seconds: 0.0,
            errors: Vec::new(),
            warnings: Vec::new(),
            compiled_units: 0,
            cached_units: 0,
            artifact: None,
        }
    }

    pub(crate) fn set(&mut self, stage: Stage, status: StageStatus) {
        if status == StageStatus::Failed {
            self.success = false;
        }
        self.stages.insert(stage, status);
    }

    pub(crate) fn fail(&mut self, failure: StageFailure) {
        self.success = false;
        self.errors.push(failure);
    }

    pub(crate) fn finish(mut self, elapsed: Duration) -> Self {
        self.duration_seconds = elapsed.as_secs_f64();
        self
    }

    /// Status of `stage`, if it was part of the build.
    pub fn status(&self, stage: Stage) -> Option<&StageStatus> {
        self.stages.get(&stage)
    }

    /// Failures of the given kind.
    pub fn failures_of(&self, kind: FailureKind) -> impl Iterator<Item = &StageFailure> {
        self.errors.iter().filter(move |f| f.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_marks_report_unsuccessful() {
        let mut report = BuildReport::new();
        report.set(Stage::Discovery, StageStatus::Completed);
        assert!(report.success);
        report.set(Stage::Compile, StageStatus::Failed);
        report.fail(StageFailure::new(Stage::Compile, FailureKind::Compilation, "boom"));
        assert!(!report.success);
        assert_eq!(report.failures_of(FailureKind::Compilation).count(), 1);
    }

    #[test]
    fn link_steps_map_to_failure_kinds() {
        let err = LinkError::Failed {
            step: LinkStep::Package,
            exit_code: Some(1),
            timed_out: false,
            output: "ld: undefined symbol".to_string(),
        };
        let failure = StageFailure::from_link(Stage::Binary, &err);
        assert_eq!(failure.kind, FailureKind::PackageFailure);
        assert_eq!(failure.output.as_deref(), Some("ld: undefined symbol"));
    }

    #[test]
    fn json_shape() {
        let mut report = BuildReport::new();
        report.set(Stage::Compile, StageStatus::Completed);
        report.set(
            Stage::Link,
            StageStatus::Skipped {
                reason: "up to date".to_string(),
            },
        );
        let json = serde_json::to_value(report.finish(Duration::from_millis(1500))).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["durationSeconds"], 1.5);
        assert_eq!(json["perStageStatus"]["compile"]["status"], "completed");
        assert_eq!(json["perStageStatus"]["link"]["reason"], "up to date");
        assert!(json["errors"].as_array().unwrap().is_empty());
    }
}
