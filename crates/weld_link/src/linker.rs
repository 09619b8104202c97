//! The ordered merge, optimize, package, and symbol steps.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info};
use weld_state::{ExportedSymbol, LibraryKind, OptLevel};
use weld_toolchain::{Tool, ToolInvoker, Toolset};

use crate::error::{LinkError, LinkStep};
use crate::symbols::parse_symbol_table;

/// Settings of one link run.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Library base name, e.g. `mathlib` for `libmathlib.so`.
    pub library_name: String,
    /// Project-relative directory receiving every product.
    pub output_dir: PathBuf,
    /// Whether to run the optimizer.
    pub optimize: bool,
    /// Optimization level when `optimize` is set.
    pub opt_level: OptLevel,
    /// Shared or static library.
    pub library_kind: LibraryKind,
    /// Wall-clock limit per tool invocation.
    pub timeout: Duration,
}

impl LinkOptions {
    /// Project-relative path of the merged module.
    pub fn linked_module(&self) -> PathBuf {
        self.output_dir.join(format!("{}.linked.bc", self.library_name))
    }

    /// Project-relative path of the optimized module.
    pub fn optimized_module(&self) -> PathBuf {
        self.output_dir.join(format!("{}.opt.bc", self.library_name))
    }

    /// Project-relative path of the library.
    pub fn library_path(&self) -> PathBuf {
        self.output_dir
            .join(self.library_kind.file_name(&self.library_name))
    }

    fn object_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.o", self.library_name))
    }
}

/// Runs the link steps for a project.
pub struct Linker<'a> {
    root: PathBuf,
    invoker: &'a dyn ToolInvoker,
    tools: &'a Toolset,
}

impl<'a> Linker<'a> {
    /// Creates a linker for the project at `root`.
    pub fn new(root: &Path, invoker: &'a dyn ToolInvoker, tools: &'a Toolset) -> Self {
        Self {
            root: root.to_path_buf(),
            invoker,
            tools,
        }
    }

    /// Merges unit modules, in path order, into one module.
    pub fn merge(&self, modules: &[PathBuf], options: &LinkOptions) -> Result<PathBuf, LinkError> {
        if modules.is_empty() {
            return Err(LinkError::NoModules {
                step: LinkStep::Merge,
            });
        }
        let mut sorted = modules.to_vec();
        sorted.sort();
        let target = options.linked_module();
        let tmp = self.prepare(LinkStep::Merge, &target)?;
        let mut argv: Vec<String> = sorted.iter().map(|m| self.abs(m)).collect();
        argv.push("-o".to_string());
        argv.push(tmp.display().to_string());
        self.run(LinkStep::Merge, Tool::ModuleLinker, &argv, options.timeout)?;
        self.commit(LinkStep::Merge, &tmp, &target)?;
        Ok(target)
    }

    /// Optimizes the merged module; returns it unchanged when optimization is off.
    pub fn optimize(&self, linked: &Path, options: &LinkOptions) -> Result<PathBuf, LinkError> {
        if !options.optimize {
            debug!("optimization disabled");
            return Ok(linked.to_path_buf());
        }
        let target = options.optimized_module();
        let tmp = self.prepare(LinkStep::Optimize, &target)?;
        let argv = vec![
            options.opt_level.flag().to_string(),
            self.abs(linked),
            "-o".to_string(),
            tmp.display().to_string(),
        ];
        self.run(LinkStep::Optimize, Tool::Optimizer, &argv, options.timeout)?;
        self.commit(LinkStep::Optimize, &tmp, &target)?;
        Ok(target)
    }

    /// Lowers and links the module into the configured library kind.
    pub fn package(&self, module: &Path, options: &LinkOptions) -> Result<PathBuf, LinkError> {
        let target = options.library_path();
        let tmp = self.prepare(LinkStep::Package, &target)?;
        match options.library_kind {
            LibraryKind::Shared => {
                let argv = vec![
                    "-shared".to_string(),
                    "-fPIC".to_string(),
                    self.abs(module),
                    "-o".to_string(),
                    tmp.display().to_string(),
                ];
                self.run(LinkStep::Package, Tool::Compiler, &argv, options.timeout)?;
            }
            LibraryKind::Static => {
                let object = options.object_path();
                let object_tmp = self.prepare(LinkStep::Package, &object)?;
                let lower = vec![
                    "-filetype=obj".to_string(),
                    "-relocation-model=pic".to_string(),
                    self.abs(module),
                    "-o".to_string(),
                    object_tmp.display().to_string(),
                ];
                self.run(LinkStep::Package, Tool::Lowering, &lower, options.timeout)?;
                self.commit(LinkStep::Package, &object_tmp, &object)?;
                let archive = vec![
                    "rcs".to_string(),
                    tmp.display().to_string(),
                    self.abs(&object),
                ];
                self.run(LinkStep::Package, Tool::Archiver, &archive, options.timeout)?;
            }
        }
        self.commit(LinkStep::Package, &tmp, &target)?;
        Ok(target)
    }

    /// Lists the symbols the library exports.
    pub fn extract_symbols(
        &self,
        library: &Path,
        options: &LinkOptions,
    ) -> Result<Vec<ExportedSymbol>, LinkError> {
        let argv = vec![
            "--defined-only".to_string(),
            "--extern-only".to_string(),
            self.abs(library),
        ];
        let output = self.run(LinkStep::Symbols, Tool::SymbolDumper, &argv, options.timeout)?;
        let symbols = parse_symbol_table(&output);
        debug!(count = symbols.len(), "symbols extracted");
        Ok(symbols)
    }

    fn abs(&self, path: &Path) -> String {
        self.root.join(path).display().to_string()
    }

    /// Creates the parent directory of `target` and returns a fresh
    /// temporary path next to it.
    fn prepare(&self, step: LinkStep, target: &Path) -> Result<PathBuf, LinkError> {
        let target = self.root.join(target);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LinkError::Io {
                step,
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let mut name = target.as_os_str().to_os_string();
        name.push(".tmp");
        let tmp = PathBuf::from(name);
        // The archiver appends to an existing file.
        let _ = std::fs::remove_file(&tmp);
        Ok(tmp)
    }

    fn commit(&self, step: LinkStep, tmp: &Path, target: &Path) -> Result<(), LinkError> {
        let target = self.root.join(target);
        std::fs::rename(tmp, &target).map_err(|e| LinkError::Io {
            step,
            path: target,
            source: e,
        })
    }

    fn run(
        &self,
        step: LinkStep,
        tool: Tool,
        argv: &[String],
        timeout: Duration,
    ) -> Result<String, LinkError> {
        let start = Instant::now();
        let path = self
            .tools
            .require(tool)
            .map_err(|source| LinkError::Tool { step, source })?;
        let out = self
            .invoker
            .invoke(path, argv, Some(timeout))
            .map_err(|source| LinkError::Tool { step, source })?;
        if !out.success() {
            return Err(LinkError::Failed {
                step,
                exit_code: out.exit_code,
                timed_out: out.timed_out,
                output: out.output,
            });
        }
        info!(
            target: "pipeline",
            step = step.name(),
            tool = tool.executable(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "link step finished"
        );
        Ok(out.output)
    }
}
