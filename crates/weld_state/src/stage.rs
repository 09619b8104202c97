//! The fixed, ordered enumeration of pipeline stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named phase of the build pipeline.
///
/// The declaration order is the execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Source tree scan and include-graph construction.
    Discovery,
    /// Parallel compilation of stale units into intermediate modules.
    Compile,
    /// Merging and optimizing the unit modules.
    Link,
    /// Lowering the optimized module into the final library.
    Binary,
    /// Extracting the exported symbol table from the library.
    Symbols,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Discovery,
        Stage::Compile,
        Stage::Link,
        Stage::Binary,
        Stage::Symbols,
    ];

    /// The stage's name as it appears in the state file.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Discovery => "discovery",
            Stage::Compile => "compile",
            Stage::Link => "link",
            Stage::Binary => "binary",
            Stage::Symbols => "symbols",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}
