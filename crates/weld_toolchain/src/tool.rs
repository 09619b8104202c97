//! The fixed set of toolchain roles used by the pipeline.

use std::collections::BTreeSet;
use std::fmt;

use weld_state::{LibraryKind, Stage};

/// A toolchain executable role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tool {
    /// C/C++ compiler emitting intermediate modules; also the preprocessor.
    Compiler,
    /// Merges intermediate modules into one.
    ModuleLinker,
    /// Runs optimization passes over a module.
    Optimizer,
    /// Lowers a module to a native object.
    Lowering,
    /// Bundles native objects into a static archive.
    Archiver,
    /// Lists the symbols defined by a library.
    SymbolDumper,
}

impl Tool {
    /// Every tool role.
    pub const ALL: [Tool; 6] = [
        Tool::Compiler,
        Tool::ModuleLinker,
        Tool::Optimizer,
        Tool::Lowering,
        Tool::Archiver,
        Tool::SymbolDumper,
    ];

    /// The executable name searched for, without platform suffix.
    pub fn executable(self) -> &'static str {
        match self {
            Tool::Compiler => "clang++",
            Tool::ModuleLinker => "llvm-link",
            Tool::Optimizer => "opt",
            Tool::Lowering => "llc",
            Tool::Archiver => "llvm-ar",
            Tool::SymbolDumper => "llvm-nm",
        }
    }

    /// The earliest pipeline stage that needs this tool.
    pub fn first_needed_by(self) -> Stage {
        match self {
            Tool::Compiler => Stage::Compile,
            Tool::ModuleLinker | Tool::Optimizer => Stage::Link,
            Tool::Lowering | Tool::Archiver => Stage::Binary,
            Tool::SymbolDumper => Stage::Symbols,
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.executable())
    }
}

/// The tools required to run `stages`.
///
/// Discovery uses the compiler as a preprocessor only opportunistically, so
/// it requires nothing by itself.
pub fn required_tools(stages: &[Stage], optimize: bool, kind: LibraryKind) -> BTreeSet<Tool> {
    let mut tools = BTreeSet::new();
    for stage in stages {
        match stage {
            Stage::Discovery => {}
            Stage::Compile => {
                tools.insert(Tool::Compiler);
            }
            Stage::Link => {
                tools.insert(Tool::ModuleLinker);
                if optimize {
                    tools.insert(Tool::Optimizer);
                }
            }
            Stage::Binary => match kind {
                LibraryKind::Shared => {
                    tools.insert(Tool::Compiler);
                }
                LibraryKind::Static => {
                    tools.insert(Tool::Lowering);
                    tools.insert(Tool::Archiver);
                }
            },
            Stage::Symbols => {
                tools.insert(Tool::SymbolDumper);
            }
        }
    }
    tools
}
