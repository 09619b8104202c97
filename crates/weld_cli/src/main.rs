//! Weld CLI, the command-line front end of the build orchestrator.
//!
//! Provides `weld build` for a full pipeline run, `weld quick` for an
//! incremental rebuild from the persisted discovery, and `weld watch` for a
//! polling rebuild loop.

#![warn(missing_docs)]

mod build;
mod pipeline;
mod watch;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use weld_state::Stage;

/// Weld, an incremental C/C++ library builder.
#[derive(Parser, Debug)]
#[command(name = "weld", version, about = "Incremental C/C++ library builds")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output: stage progress and per-stage status.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory. Defaults to the nearest directory holding `.weld`,
    /// or the current directory.
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the build pipeline.
    Build(BuildArgs),
    /// Recompile stale units and relink.
    Quick(QuickArgs),
    /// Rebuild whenever the project tree changes.
    Watch(WatchArgs),
}

/// Arguments for the `weld build` subcommand.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Stages to run (e.g., `--stage discovery compile`). Defaults to all.
    #[arg(long, num_args = 1..)]
    pub stage: Vec<Stage>,

    /// Recompile every unit and relink, ignoring the caches.
    #[arg(short, long)]
    pub force: bool,

    /// Print the build report as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `weld quick` subcommand.
#[derive(Parser, Debug)]
pub struct QuickArgs {
    /// Print the build report as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `weld watch` subcommand.
#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Seconds between checks of the project tree.
    #[arg(long, default_value_t = 1.0)]
    pub interval: f64,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Explicit project directory.
    pub project: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    pipeline::init_logging(cli.verbose, cli.quiet);

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        project: cli.project,
    };

    let result = match cli.command {
        Command::Build(ref args) => build::run(args, &global),
        Command::Quick(ref args) => build::run_quick(args, &global),
        Command::Watch(ref args) => watch::run(args, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_build_default() {
        let cli = Cli::parse_from(["weld", "build"]);
        match cli.command {
            Command::Build(ref args) => {
                assert!(args.stage.is_empty());
                assert!(!args.force);
                assert!(!args.json);
            }
            _ => panic!("expected Build command"),
        }
    }

    #[test]
    fn parse_build_with_stages() {
        let cli = Cli::parse_from([
            "weld", "build", "--stage", "discovery", "compile", "--force", "--json",
        ]);
        match cli.command {
            Command::Build(ref args) => {
                assert_eq!(args.stage, vec![Stage::Discovery, Stage::Compile]);
                assert!(args.force);
                assert!(args.json);
            }
            _ => panic!("expected Build command"),
        }
    }

    #[test]
    fn parse_unknown_stage_fails() {
        assert!(Cli::try_parse_from(["weld", "build", "--stage", "deploy"]).is_err());
    }

    #[test]
    fn parse_quick_json() {
        let cli = Cli::parse_from(["weld", "quick", "--json"]);
        match cli.command {
            Command::Quick(ref args) => assert!(args.json),
            _ => panic!("expected Quick command"),
        }
    }

    #[test]
    fn parse_watch_interval() {
        let cli = Cli::parse_from(["weld", "watch", "--interval", "0.5"]);
        match cli.command {
            Command::Watch(ref args) => assert_eq!(args.interval, 0.5),
            _ => panic!("expected Watch command"),
        }
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::parse_from(["weld", "--quiet", "--project", "/src/mathlib", "quick"]);
        assert!(cli.quiet);
        assert!(!cli.verbose);
        assert_eq!(cli.project, Some(PathBuf::from("/src/mathlib")));
    }

    #[test]
    fn parse_verbose_after_subcommand() {
        let cli = Cli::parse_from(["weld", "build", "--verbose"]);
        assert!(cli.verbose);
    }
}
