//! Incremental build caches.
//!
//! [`DiscoveryCache`] memoizes the tree scan and the dependency graph in
//! memory, keyed by a fingerprint of the project tree. [`UnitManifest`]
//! records per-unit fingerprints on disk so that compilation cache hits
//! survive a process restart.

#![warn(missing_docs)]

pub mod discovery;
pub mod error;
pub mod fingerprint;
pub mod manifest;

pub use discovery::{CacheEntry, DiscoveryCache};
pub use error::CacheError;
pub use fingerprint::{config_fingerprint, graph_fingerprint, tree_fingerprint, unit_fingerprint};
pub use manifest::{UnitManifest, MANIFEST_FORMAT_VERSION};
