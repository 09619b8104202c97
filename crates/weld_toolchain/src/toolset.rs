//! The resolved tool paths of one build.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::ToolError;
use crate::locator::ToolLocator;
use crate::tool::Tool;

/// The resolved executables of one build, keyed by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toolset {
    paths: BTreeMap<Tool, PathBuf>,
}

impl Toolset {
    /// Resolves every tool in `tools`, failing with all missing names at once.
    pub fn discover(locator: &ToolLocator, tools: &BTreeSet<Tool>) -> Result<Self, ToolError> {
        let found = locator.discover_all(tools.iter().map(|t| t.executable()))?;
        let paths = tools
            .iter()
            .copied()
            .zip(found.into_iter().map(|p| p.absolute_path))
            .collect();
        Ok(Self { paths })
    }

    /// Builds a toolset from explicit paths.
    pub fn from_paths(paths: impl IntoIterator<Item = (Tool, PathBuf)>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }

    /// The path of `tool`, if it was resolved.
    pub fn get(&self, tool: Tool) -> Option<&Path> {
        self.paths.get(&tool).map(PathBuf::as_path)
    }

    /// The path of `tool`, or `NotFound` naming it.
    pub fn require(&self, tool: Tool) -> Result<&Path, ToolError> {
        self.get(tool).ok_or_else(|| ToolError::NotFound {
            tools: vec![tool.executable().to_string()],
        })
    }

    /// Adds tools from `other` that are not present yet.
    pub fn extend(&mut self, other: Toolset) {
        for (tool, path) in other.paths {
            self.paths.entry(tool).or_insert(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn discover_maps_roles_to_paths() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        for name in ["clang++", "llvm-link"] {
            let path = tmp.path().join(name);
            std::fs::write(&path, "#!/bin/sh\n").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let locator = ToolLocator::new(None, vec![tmp.path().to_path_buf()]);
        let wanted: BTreeSet<Tool> = [Tool::Compiler, Tool::ModuleLinker].into_iter().collect();
        let set = Toolset::discover(&locator, &wanted).unwrap();
        assert!(set.require(Tool::Compiler).unwrap().ends_with("clang++"));
        assert!(set.require(Tool::ModuleLinker).unwrap().ends_with("llvm-link"));
        assert!(set.get(Tool::Optimizer).is_none());
    }

    #[test]
    fn require_missing_tool_names_it() {
        let set = Toolset::default();
        match set.require(Tool::SymbolDumper) {
            Err(ToolError::NotFound { tools }) => assert_eq!(tools, vec!["llvm-nm"]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn extend_keeps_existing_entries() {
        let mut set = Toolset::from_paths([(Tool::Compiler, PathBuf::from("/a/clang++"))]);
        set.extend(Toolset::from_paths([
            (Tool::Compiler, PathBuf::from("/b/clang++")),
            (Tool::Optimizer, PathBuf::from("/b/opt")),
        ]));
        assert_eq!(set.get(Tool::Compiler), Some(Path::new("/a/clang++")));
        assert_eq!(set.get(Tool::Optimizer), Some(Path::new("/b/opt")));
    }
}
