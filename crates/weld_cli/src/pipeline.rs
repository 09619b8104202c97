//! Shared helpers for CLI commands: logging setup, project root resolution,
//! and report rendering.

use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;
use weld_driver::{BuildReport, StageStatus};
use weld_state::STATE_DIR;

use crate::GlobalArgs;

/// Installs the global `tracing` subscriber, writing to stderr.
///
/// `RUST_LOG` overrides the level chosen by `--verbose`/`--quiet`.
pub fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

/// Walks up from `start` looking for the nearest directory containing `.weld`.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(STATE_DIR).is_dir())
        .map(Path::to_path_buf)
}

/// Resolves the project root from global CLI args.
///
/// `--project` wins; otherwise the nearest directory holding `.weld`, falling
/// back to the current directory for a project that was never built.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(project) = &global.project {
        return Ok(project.clone());
    }
    let cwd = std::env::current_dir()?;
    Ok(find_project_root(&cwd).unwrap_or(cwd))
}

/// Prints `report` as pretty JSON on stdout, or as text on stderr.
pub fn print_report(
    report: &BuildReport,
    json: bool,
    global: &GlobalArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for failure in &report.errors {
        match &failure.unit {
            Some(unit) => eprintln!("error[{}]: {}: {}", failure.stage, unit.display(), failure.message),
            None => eprintln!("error[{}]: {}", failure.stage, failure.message),
        }
        if let Some(output) = failure.output.as_deref().filter(|o| !o.trim().is_empty()) {
            for line in output.lines() {
                eprintln!("    {line}");
            }
        }
        for suggestion in &failure.suggestions {
            eprintln!("    help: {} ({:.0}%)", suggestion.action, suggestion.confidence * 100.0);
        }
    }
    if global.quiet {
        return Ok(());
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    if global.verbose {
        for (stage, status) in &report.stages {
            eprintln!("{:>12} {}", stage.name(), describe(status));
        }
    }
    eprintln!("{}", summary_line(report));
    Ok(())
}

/// One-line summary of a build.
pub fn summary_line(report: &BuildReport) -> String {
    let verdict = if report.success { "Finished" } else { "Failed" };
    let mut line = format!(
        "{verdict} in {:.2}s: {} compiled, {} cached",
        report.duration_seconds, report.compiled_units, report.cached_units
    );
    if let Some(artifact) = &report.artifact {
        line.push_str(&format!(" -> {}", artifact.display()));
    }
    line
}

fn describe(status: &StageStatus) -> String {
    match status {
        StageStatus::Completed => "completed".to_string(),
        StageStatus::Skipped { reason } => format!("skipped ({reason})"),
        StageStatus::Disabled => "disabled".to_string(),
        StageStatus::Failed => "failed".to_string(),
        StageStatus::NotRun { reason } => format!("not run ({reason})"),
    }
}
