//! In-memory memoization of discovery results.

use tracing::debug;
use weld_common::ContentHash;

/// A cached value together with the fingerprint of the inputs that produced it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CacheEntry<T> {
    /// The cached value.
    pub value: T,
    /// Fingerprint of every input of `value`.
    pub fingerprint: ContentHash,
}

impl<T> CacheEntry<T> {
    /// Returns `true` if the entry was produced from inputs with `live` as
    /// their fingerprint.
    pub fn is_valid_for(&self, live: &ContentHash) -> bool {
        self.fingerprint == *live
    }
}

/// Remembers the last computation of one discovery step.
///
/// Process-scoped and owned by one session; it is not persisted, so a new
/// process always recomputes once.
#[derive(Debug)]
pub struct DiscoveryCache<T> {
    name: &'static str,
    entry: Option<CacheEntry<T>>,
    hits: u64,
    misses: u64,
}

impl<T: Clone> DiscoveryCache<T> {
    /// Creates an empty cache; `name` appears in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entry: None,
            hits: 0,
            misses: 0,
        }
    }

    /// Returns the cached value if `fingerprint` matches the last
    /// computation, otherwise computes, stores, and returns a new value.
    ///
    /// A failed computation leaves the previous entry in place.
    pub fn get_or_compute<E>(
        &mut self,
        fingerprint: ContentHash,
        compute: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        if let Some(entry) = &self.entry {
            if entry.is_valid_for(&fingerprint) {
                self.hits += 1;
                debug!(cache = self.name, %fingerprint, "discovery cache hit");
                return Ok(entry.value.clone());
            }
        }
        self.misses += 1;
        debug!(cache = self.name, %fingerprint, "discovery cache miss");
        let value = compute()?;
        self.entry = Some(CacheEntry {
            value: value.clone(),
            fingerprint,
        });
        Ok(value)
    }

    /// Stores a value computed elsewhere.
    pub fn seed(&mut self, fingerprint: ContentHash, value: T) {
        self.entry = Some(CacheEntry { value, fingerprint });
    }

    /// The current entry, if any.
    pub fn peek(&self) -> Option<&CacheEntry<T>> {
        self.entry.as_ref()
    }

    /// Drops the cached entry.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    /// Number of lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Number of lookups that recomputed.
    pub fn misses(&self) -> u64 {
        self.misses
    }
}
