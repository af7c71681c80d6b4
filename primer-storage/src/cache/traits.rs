//! Storage backend and attribute index traits.
//!
//! This module defines the traits the cache consumes from its backends.
//! Both in-tree backends implement the two traits on the same type, so a
//! single handle serves values and relations.

use async_trait::async_trait;
use primer_core::{Attribute, CacheKey, PrimerResult};
use std::collections::BTreeSet;

/// Key/value storage backend.
///
/// Implementations must provide read-your-write consistency within one
/// process. Backends shared between processes have to serialize writers per
/// key themselves, otherwise the cache's per-key exclusivity only holds
/// within a process.
#[async_trait]
pub trait CacheStore<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    /// Returns true if a value is stored under `key`.
    async fn has_key(&self, key: &CacheKey) -> PrimerResult<bool>;

    /// Get the value stored under `key`.
    async fn get(&self, key: &CacheKey) -> PrimerResult<Option<V>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &CacheKey, value: V) -> PrimerResult<()>;

    /// Remove the value stored under `key`. Removing a missing key is not
    /// an error.
    async fn invalidate(&self, key: &CacheKey) -> PrimerResult<()>;
}

/// Reverse index from attribute descriptors to the keys whose last
/// computation touched them.
///
/// # Atomicity
///
/// `relate` must replace a key's relation in one step: a concurrent
/// `keys_for_attribute` sees either the old set or the new one, never a mix.
#[async_trait]
pub trait AttributeIndex: Send + Sync {
    /// Replace the full dependency set of `key` with `attributes`.
    async fn relate(&self, key: &CacheKey, attributes: &[Attribute]) -> PrimerResult<()>;

    /// Keys currently related to `attribute` (exact structural match).
    async fn keys_for_attribute(&self, attribute: &Attribute) -> PrimerResult<BTreeSet<CacheKey>>;

    /// Attributes currently related to `key`.
    async fn attributes_for_key(&self, key: &CacheKey) -> PrimerResult<BTreeSet<Attribute>>;

    /// Remove every relation entry for `key`.
    async fn forget(&self, key: &CacheKey) -> PrimerResult<()>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// `compute` calls answered from storage.
    pub hits: u64,
    /// `compute` calls that had to run a computation.
    pub misses: u64,
    /// Computations that produced a value and were stored.
    pub computations: u64,
    /// Computations that produced no value.
    pub empty_results: u64,
    /// Keys evicted, explicitly or by a change notification.
    pub invalidations: u64,
    /// Regenerations that stored a value.
    pub regenerations: u64,
    /// Regenerations that failed.
    pub regeneration_failures: u64,
    /// Change notifications ignored because the key was already
    /// regenerated earlier in the same cascade.
    pub cascade_skips: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
