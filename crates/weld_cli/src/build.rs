//! `weld build` and `weld quick`.

use weld_driver::Session;

use crate::pipeline::{print_report, resolve_project_root};
use crate::{BuildArgs, GlobalArgs, QuickArgs};

/// Runs the `weld build` command.
///
/// Returns exit code 0 if every stage succeeded, 1 otherwise.
pub fn run(args: &BuildArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global)?;
    let session = Session::open(&project_dir)?;
    if !global.quiet && !args.json {
        eprintln!("   Building {}", session.root().display());
    }
    let report = session.run_pipeline(&args.stage, args.force)?;
    print_report(&report, args.json, global)?;
    Ok(if report.success { 0 } else { 1 })
}

/// Runs the `weld quick` command.
pub fn run_quick(args: &QuickArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global)?;
    let report = Session::open(&project_dir)?.quick_build()?;
    print_report(&report, args.json, global)?;
    Ok(if report.success { 0 } else { 1 })
}
