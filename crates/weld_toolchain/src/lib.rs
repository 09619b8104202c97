//! Toolchain discovery and invocation.
//!
//! [`ToolLocator`] resolves toolchain executables once per process, preferring
//! a bundled toolchain root over `PATH`. [`ToolInvoker`] is the seam through
//! which every other component runs a tool; [`ProcessInvoker`] is the real
//! implementation with a bounded wall-clock timeout.

#![warn(missing_docs)]

pub mod error;
pub mod invoker;
pub mod locator;
pub mod tool;
pub mod toolset;

pub use error::ToolError;
pub use invoker::{ProcessInvoker, ToolInvoker, ToolOutput};
pub use locator::{ToolLocator, ToolPath, TOOLCHAIN_ROOT_ENV};
pub use tool::{required_tools, Tool};
pub use toolset::Toolset;
