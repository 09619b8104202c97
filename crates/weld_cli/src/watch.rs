//! `weld watch`: rebuild on every change until interrupted.

use std::ops::ControlFlow;
use std::time::Duration;

use weld_driver::Session;

use crate::pipeline::{print_report, resolve_project_root};
use crate::{GlobalArgs, WatchArgs};

/// Runs the `weld watch` command. Only returns on error.
pub fn run(args: &WatchArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    if !args.interval.is_finite() || args.interval <= 0.0 {
        return Err(format!(
            "invalid interval '{}': must be a positive number of seconds",
            args.interval
        )
        .into());
    }
    let project_dir = resolve_project_root(global)?;
    let session = Session::open(&project_dir)?;
    if !global.quiet {
        eprintln!("    Watching {} (every {}s)", session.root().display(), args.interval);
    }

    let mut print_error = None;
    session.watch(Duration::from_secs_f64(args.interval), |report| {
        match print_report(report, false, global) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                print_error = Some(e);
                ControlFlow::Break(())
            }
        }
    })?;
    match print_error {
        Some(e) => Err(e),
        None => Ok(0),
    }
}
