//! Merging, optimizing, and packaging unit modules into a library.
//!
//! The steps run strictly in order and each one gates the next. Every step
//! writes to a temporary file that is renamed into place only on success, so
//! a failed step leaves the previous build's artifacts intact.

#![warn(missing_docs)]

pub mod error;
pub mod linker;
pub mod symbols;

pub use error::{LinkError, LinkStep};
pub use linker::{LinkOptions, Linker};
pub use symbols::parse_symbol_table;
