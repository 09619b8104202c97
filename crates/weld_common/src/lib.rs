//! Shared foundational types used across the Weld build engine.
//!
//! This crate provides content hashing for cache keys and modification-time
//! fingerprints for staleness checks.

#![warn(missing_docs)]

pub mod hash;
pub mod mtime;

pub use hash::{ContentHash, HashBuilder};
pub use mtime::{mtime_of, Mtime};
