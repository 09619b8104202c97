//! The seam to an external fix-suggestion service.

use std::path::Path;

use serde::Serialize;

/// Upper bound on advisor-authorized retries of one unit within one build.
pub const MAX_FIX_RETRIES: u32 = 3;

/// A remedy proposed for a compiler failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixSuggestion {
    /// What to change, in the advisor's words.
    pub action: String,
    /// Advisor confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Consulted when a unit fails to compile.
///
/// The scheduler never applies a fix itself. Suggestions are surfaced in the
/// unit's failure; a retry happens only when [`approve_retry`] returns the
/// flags to retry with.
///
/// [`approve_retry`]: FixAdvisor::approve_retry
pub trait FixAdvisor: Send + Sync {
    /// Proposes fixes for the given compiler output.
    fn suggest_fix(&self, error_output: &str) -> Vec<FixSuggestion>;

    /// Returns the flags to retry `unit` with, or `None` to give up.
    fn approve_retry(
        &self,
        _unit: &Path,
        _suggestions: &[FixSuggestion],
        _current_flags: &[String],
    ) -> Option<Vec<String>> {
        None
    }
}

/// An advisor that never has anything to say.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAdvisor;

impl FixAdvisor for NoAdvisor {
    fn suggest_fix(&self, _error_output: &str) -> Vec<FixSuggestion> {
        Vec::new()
    }
}
