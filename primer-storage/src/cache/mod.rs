//! Cache layer: storage backends, the attribute index and the computation
//! cache built on them.
//!
//! # Overview
//!
//! [`Cache::compute_with`] runs a computation inside a recording scope. The
//! calls it makes through [`Observable`](primer_core::Observable)
//! collaborators become [`Attribute`](primer_core::Attribute)s, and the
//! [`AttributeIndex`] relates the key to them. When one of those attributes
//! changes, [`Cache::changed`] evicts every related key and regenerates it
//! through the configured routes.
//!
//! # Backends
//!
//! - [`InMemoryStore`]: process-local, `tokio::sync::RwLock` maps
//! - [`LmdbStore`]: persistent, values and relations in one LMDB environment
//!
//! # Example
//!
//! ```ignore
//! let cache = Cache::in_memory(CacheConfig::default())?
//!     .with_routes(RouteSet::new().get("users/{id}", load_user)?)?;
//! let _bus_task = cache.bind_to_bus();
//!
//! let user = cache.compute("users/1").await?;
//! ```

mod controller;
mod engine;
pub mod keyspace;
pub mod lmdb_backend;
mod locks;
pub mod memory;
pub mod traits;

pub use controller::Regeneration;
pub use engine::{Cache, WeakCache};
pub use lmdb_backend::{LmdbStore, LmdbStoreError};
pub use locks::{KeyGuard, KeyLocks};
pub use memory::InMemoryStore;
pub use traits::{AttributeIndex, CacheStats, CacheStore};
