//! PRIMER Storage - Cache Engine and Backends
//!
//! The self-invalidating computation cache: storage backends and the
//! attribute index (in-memory and LMDB), per-key locking, key-pattern routes
//! and the invalidation/regeneration controller.
//!
//! Keys, attributes and call recording live in `primer-core`; the change bus
//! lives in `primer-events`.

pub mod cache;
pub mod routes;

pub use cache::{
    AttributeIndex, Cache, CacheStats, CacheStore, InMemoryStore, LmdbStore, LmdbStoreError,
    Regeneration, WeakCache,
};
pub use routes::{RouteParams, RouteSet};
