//! Parallel compilation of stale units.
//!
//! [`plan_units`] maps every source to its emitted module and live
//! fingerprint. [`Scheduler::compile`] skips units whose fingerprint matches
//! the [`UnitManifest`](weld_cache::UnitManifest), dispatches the rest to a
//! fixed-size worker pool, and aggregates every result, failures included.

#![warn(missing_docs)]

pub mod advisor;
pub mod cancel;
pub mod error;
pub mod scheduler;
pub mod unit;

pub use advisor::{FixAdvisor, FixSuggestion, NoAdvisor, MAX_FIX_RETRIES};
pub use cancel::CancelToken;
pub use error::CompileError;
pub use scheduler::{CompileOptions, CompileOutcome, Scheduler};
pub use unit::{module_path_for, plan_units, CompilationUnit, UnitFailure, UnitResult, UnitStatus};
