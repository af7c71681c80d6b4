//! The computation cache.
//!
//! [`Cache`] runs computations inside a recording scope, stores their
//! results and relates each key to the attributes its computation read.
//! Invalidation and regeneration live in [`controller`](super::controller).

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use primer_core::{
    watching, Attribute, CacheConfig, CacheKey, ComputationError, Observable, PrimerError,
    PrimerResult, RouteError, StorageError, Token,
};
use primer_events::{ChangeBus, InMemoryChangeBus, Topic, GET_OPERATION};
use tracing::{debug, warn};

use super::locks::{KeyGuard, KeyLocks};
use super::memory::InMemoryStore;
use super::traits::{AttributeIndex, CacheStats, CacheStore};
use crate::routes::RouteSet;

tokio::task_local! {
    /// Keys being computed by the current task, outermost first.
    static COMPUTING: Vec<CacheKey>;

    /// Change attributes of the keys regenerated in the cascade the current
    /// task is serving.
    pub(super) static CASCADE: BTreeSet<Attribute>;
}

#[derive(Debug, Default)]
pub(super) struct Counters {
    pub(super) hits: AtomicU64,
    pub(super) misses: AtomicU64,
    pub(super) computations: AtomicU64,
    pub(super) empty_results: AtomicU64,
    pub(super) invalidations: AtomicU64,
    pub(super) regenerations: AtomicU64,
    pub(super) regeneration_failures: AtomicU64,
    pub(super) cascade_skips: AtomicU64,
}

impl Counters {
    pub(super) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            empty_results: self.empty_results.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            regenerations: self.regenerations.load(Ordering::Relaxed),
            regeneration_failures: self.regeneration_failures.load(Ordering::Relaxed),
            cascade_skips: self.cascade_skips.load(Ordering::Relaxed),
        }
    }
}

/// State shared by every handle to one cache.
pub(super) struct CacheInner<V, S> {
    pub(super) store: S,
    pub(super) bus: Arc<dyn ChangeBus>,
    routes: RwLock<Option<Arc<RouteSet<V>>>>,
    pub(super) config: CacheConfig,
    locks: KeyLocks,
    /// Keys waiting for their throttle window to elapse.
    pub(super) pending: Mutex<HashSet<CacheKey>>,
    pub(super) counters: Counters,
}

/// Self-invalidating computation cache.
///
/// Cloning is cheap; every clone shares the same store, routes and counters.
///
/// # Type Parameters
///
/// - `V`: The cached value type
/// - `S`: The storage backend, which also holds the dependency relation
///
/// # Example
///
/// ```ignore
/// let cache = Cache::in_memory(CacheConfig::default())?;
///
/// let name = cache
///     .compute_with("users/1/name", || async {
///         Ok(users.find(1).map(|u| u.name))
///     })
///     .await?;
///
/// // Later, after the row changes:
/// cache.changed(&users.attribute_for("find", &[1.into()])).await?;
/// ```
pub struct Cache<V, S> {
    pub(super) inner: Arc<CacheInner<V, S>>,
}

impl<V, S> Clone for Cache<V, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, S> std::fmt::Debug for Cache<V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.inner.config)
            .field("stats", &self.inner.counters.snapshot())
            .finish_non_exhaustive()
    }
}

/// Non-owning handle to a [`Cache`].
///
/// Route handlers that compute other keys of their own cache should capture
/// one of these instead of a `Cache` clone. The route table is owned by the
/// cache, so a strong handle inside it would keep the cache alive forever.
pub struct WeakCache<V, S> {
    inner: Weak<CacheInner<V, S>>,
}

impl<V, S> Clone for WeakCache<V, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<V, S> std::fmt::Debug for WeakCache<V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakCache")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl<V, S> WeakCache<V, S> {
    /// The cache, if any strong handle to it still exists.
    pub fn upgrade(&self) -> Option<Cache<V, S>> {
        self.inner.upgrade().map(|inner| Cache { inner })
    }

    /// Like [`upgrade`](Self::upgrade), failing the computation when the
    /// cache is gone.
    pub fn try_upgrade(&self) -> PrimerResult<Cache<V, S>> {
        self.upgrade()
            .ok_or_else(|| PrimerError::computation("cache has been dropped"))
    }
}

impl<V> Cache<V, InMemoryStore<V>>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache with an in-memory store and its own in-process bus.
    pub fn in_memory(config: CacheConfig) -> PrimerResult<Self> {
        let bus = Arc::new(InMemoryChangeBus::new(config.bus_capacity));
        Self::new(InMemoryStore::new(), bus, config)
    }
}

impl<V, S> Cache<V, S>
where
    V: Clone + Send + Sync + 'static,
    S: CacheStore<V> + AttributeIndex + 'static,
{
    /// Create a new cache.
    ///
    /// Fails if `config` does not validate.
    pub fn new(store: S, bus: Arc<dyn ChangeBus>, config: CacheConfig) -> PrimerResult<Self> {
        config.validate()?;
        Ok(Self::build(store, bus, config))
    }

    /// Create a cache with the default configuration and an in-process bus.
    pub fn with_defaults(store: S) -> Self {
        let config = CacheConfig::default();
        let bus = Arc::new(InMemoryChangeBus::new(config.bus_capacity));
        Self::build(store, bus, config)
    }

    fn build(store: S, bus: Arc<dyn ChangeBus>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                bus,
                routes: RwLock::new(None),
                config,
                locks: KeyLocks::new(),
                pending: Mutex::new(HashSet::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// Install routes, builder style.
    pub fn with_routes(self, routes: RouteSet<V>) -> PrimerResult<Self> {
        self.set_routes(routes)?;
        Ok(self)
    }

    /// Replace the route table used by [`compute`](Self::compute) and by
    /// regeneration.
    pub fn set_routes(&self, routes: RouteSet<V>) -> PrimerResult<()> {
        let mut slot = self
            .inner
            .routes
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        *slot = Some(Arc::new(routes));
        Ok(())
    }

    fn current_routes(&self) -> PrimerResult<Option<Arc<RouteSet<V>>>> {
        let slot = self
            .inner
            .routes
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(slot.clone())
    }

    /// A handle that does not keep the cache alive.
    pub fn downgrade(&self) -> WeakCache<V, S> {
        WeakCache {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Get a reference to the storage backend.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Get a reference to the change bus.
    pub fn bus(&self) -> &Arc<dyn ChangeBus> {
        &self.inner.bus
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.counters.snapshot()
    }

    /// Compute `key` with the configured routes.
    ///
    /// Returns the stored value if there is one. Otherwise the first route
    /// matching `key` runs; without routes, or without a matching route, this
    /// fails with `RouteError::NotFound`.
    pub async fn compute(&self, key: impl AsRef<str>) -> PrimerResult<Option<V>> {
        let key = CacheKey::parse(key.as_ref())?;
        self.compute_routed(key).await
    }

    pub(super) async fn compute_routed(&self, key: CacheKey) -> PrimerResult<Option<V>> {
        let routes = self.current_routes()?;
        let target = key.clone();
        self.compute_key(key, move || async move {
            match routes {
                Some(routes) => routes.evaluate(&target).await,
                None => Err(RouteError::NotFound {
                    key: target.to_string(),
                    reason: "no routes have been configured".to_string(),
                }
                .into()),
            }
        })
        .await
    }

    /// Compute `key` with an explicit computation.
    ///
    /// `computation` only runs on a miss. Every tracked call it makes, and
    /// every cache key it reads, becomes a dependency of `key`. A `None`
    /// result is returned but not stored.
    ///
    /// Calls made from tasks the computation spawns are not recorded unless
    /// the spawned future is wrapped with
    /// [`carry_scope`](primer_core::recorder::carry_scope).
    ///
    /// Storing or invalidating `key` from inside its own computation fails
    /// with `ComputationError::Recursive`.
    pub async fn compute_with<F, Fut>(&self, key: impl AsRef<str>, computation: F) -> PrimerResult<Option<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PrimerResult<Option<V>>>,
    {
        let key = CacheKey::parse(key.as_ref())?;
        self.compute_key(key, computation).await
    }

    async fn compute_key<F, Fut>(&self, key: CacheKey, computation: F) -> PrimerResult<Option<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PrimerResult<Option<V>>>,
    {
        let mut chain = computing_chain();
        reject_reentry(&key, &chain)?;

        // The enclosing computation, if any, now depends on this key.
        self.observe_call(GET_OPERATION, vec![Token::from(&key)], None);

        let guard = self.lock(&key).await;
        if let Some(value) = self.inner.store.get(&key).await? {
            Counters::bump(&self.inner.counters.hits);
            debug!(%key, "Cache hit");
            return Ok(Some(value));
        }
        Counters::bump(&self.inner.counters.misses);
        debug!(%key, "Cache miss, computing");

        chain.push(key.clone());
        let (result, calls) = COMPUTING
            .scope(chain, watching(async move { computation().await }))
            .await;

        let Some(value) = result? else {
            Counters::bump(&self.inner.counters.empty_results);
            debug!(%key, "Computation produced no value");
            return Ok(None);
        };

        let attributes: Vec<Attribute> = calls.iter().map(Attribute::from_call).collect();
        debug!(%key, dependencies = attributes.len(), "Computation finished");
        self.inner.store.relate(&key, &attributes).await?;
        self.inner.store.put(&key, value.clone()).await?;
        Counters::bump(&self.inner.counters.computations);
        drop(guard);

        self.announce(&key).await;
        Ok(Some(value))
    }

    /// Read the stored value of `key` without computing it.
    ///
    /// The read is reported as a `get` call, so a computation that reads
    /// `key` this way depends on it.
    pub async fn get(&self, key: impl AsRef<str>) -> PrimerResult<Option<V>> {
        let key = CacheKey::parse(key.as_ref())?;
        self.observe_call(GET_OPERATION, vec![Token::from(&key)], None);
        self.inner.store.get(&key).await
    }

    /// Returns true if a value is stored under `key`.
    pub async fn has_key(&self, key: impl AsRef<str>) -> PrimerResult<bool> {
        let key = CacheKey::parse(key.as_ref())?;
        self.inner.store.has_key(&key).await
    }

    /// Store `value` under `key` and announce the change.
    pub async fn put(&self, key: impl AsRef<str>, value: V) -> PrimerResult<()> {
        let key = CacheKey::parse(key.as_ref())?;
        reject_reentry(&key, &computing_chain())?;
        {
            let _guard = self.lock(&key).await;
            self.inner.store.put(&key, value).await?;
        }
        self.announce(&key).await;
        Ok(())
    }

    /// Evict `key` and forget its dependencies.
    pub async fn invalidate(&self, key: impl AsRef<str>) -> PrimerResult<()> {
        let key = CacheKey::parse(key.as_ref())?;
        self.evict(&key).await
    }

    pub(super) async fn evict(&self, key: &CacheKey) -> PrimerResult<()> {
        reject_reentry(key, &computing_chain())?;
        let _guard = self.lock(key).await;
        self.inner.store.invalidate(key).await?;
        self.inner.store.forget(key).await?;
        Counters::bump(&self.inner.counters.invalidations);
        debug!(%key, "Invalidated");
        Ok(())
    }

    /// The attribute a computation records when it reads `key` from this
    /// cache; also the attribute of the key's change topic.
    pub fn key_attribute(&self, key: &CacheKey) -> Attribute {
        self.attribute_for(GET_OPERATION, &[Token::from(key)])
    }

    /// Publish the change topic of `key`: `identifier ++ ["get", key]`.
    ///
    /// Inside a regeneration the topic carries the current cascade.
    pub async fn publish_change(&self, key: &CacheKey) -> PrimerResult<usize> {
        let cascade = CASCADE.try_with(Clone::clone).unwrap_or_default();
        let topic = Topic::for_key(&self.inner.config.identifier, key).with_cascade(cascade);
        self.inner.bus.publish(topic).await
    }

    async fn announce(&self, key: &CacheKey) {
        if let Err(e) = self.publish_change(key).await {
            warn!(%key, error = %e, "Failed to publish change");
        }
    }

    async fn lock(&self, key: &CacheKey) -> Option<KeyGuard<'_>> {
        if self.inner.config.exclusive {
            Some(self.inner.locks.lock(key).await)
        } else {
            None
        }
    }

    /// Keys waiting for their throttle window to elapse.
    pub fn pending_keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

fn computing_chain() -> Vec<CacheKey> {
    COMPUTING.try_with(Clone::clone).unwrap_or_default()
}

/// Fail when `key` is already being computed by this task. Waiting on its
/// lock would never return.
fn reject_reentry(key: &CacheKey, chain: &[CacheKey]) -> PrimerResult<()> {
    if chain.contains(key) {
        return Err(ComputationError::Recursive {
            key: key.to_string(),
            chain: chain.iter().map(ToString::to_string).collect(),
        }
        .into());
    }
    Ok(())
}

impl<V, S> Observable for Cache<V, S> {
    fn primer_identifier(&self) -> Vec<String> {
        self.inner.config.identifier.clone()
    }

    fn tracked_operations(&self) -> &'static [&'static str] {
        &[GET_OPERATION]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primer_core::{PrimerError, DEFAULT_IDENTIFIER};
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicUsize;

    struct Rows {
        calls: AtomicUsize,
    }

    impl Rows {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn find(&self, id: i64) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.observe("find", vec![id.into()], Some(format!("row-{id}")))
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Observable for Rows {
        fn primer_identifier(&self) -> Vec<String> {
            vec!["rows".to_string()]
        }

        fn tracked_operations(&self) -> &'static [&'static str] {
            &["find"]
        }
    }

    fn cache() -> Cache<String, InMemoryStore<String>> {
        Cache::in_memory(CacheConfig::default()).expect("default config should validate")
    }

    fn key(s: &str) -> CacheKey {
        CacheKey::parse(s).expect("test key should parse")
    }

    #[tokio::test]
    async fn test_compute_stores_value_and_relation() {
        let cache = cache();
        let rows = Rows::new();

        let value = cache
            .compute_with("rows/1", || async { Ok(rows.find(1)) })
            .await
            .expect("compute should succeed");
        assert_eq!(value.as_deref(), Some("row-1"));

        let attributes = cache
            .store()
            .attributes_for_key(&key("rows/1"))
            .await
            .expect("lookup should succeed");
        assert!(attributes.contains(&Attribute::new(["rows", "find", "1"])));
        assert_eq!(cache.stats().computations, 1);
    }

    #[tokio::test]
    async fn test_second_compute_is_a_hit() {
        let cache = cache();
        let rows = Rows::new();

        for _ in 0..3 {
            cache
                .compute_with("rows/1", || async { Ok(rows.find(1)) })
                .await
                .expect("compute should succeed");
        }
        assert_eq!(rows.calls(), 1);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
    }

    #[tokio::test]
    async fn test_none_is_not_stored() {
        let cache = cache();
        let rows = Rows::new();

        let value = cache
            .compute_with("rows/none", || async {
                rows.find(1);
                Ok(None)
            })
            .await
            .expect("compute should succeed");
        assert!(value.is_none());
        assert!(!cache.has_key("rows/none").await.expect("has_key should succeed"));
        assert!(cache
            .store()
            .keys_for_attribute(&Attribute::new(["rows", "find", "1"]))
            .await
            .expect("lookup should succeed")
            .is_empty());
        assert_eq!(cache.stats().empty_results, 1);
    }

    #[tokio::test]
    async fn test_failed_computation_stores_nothing() {
        let cache = cache();
        let rows = Rows::new();

        let err = cache
            .compute_with("rows/1", || async {
                rows.find(1);
                Err(PrimerError::computation("database unavailable"))
            })
            .await
            .expect_err("computation error should propagate");
        assert!(matches!(err, PrimerError::Computation(ComputationError::Failed { .. })));
        assert!(!cache.has_key("rows/1").await.expect("has_key should succeed"));
        assert!(cache
            .store()
            .attributes_for_key(&key("rows/1"))
            .await
            .expect("lookup should succeed")
            .is_empty());
    }

    #[tokio::test]
    async fn test_invalid_key_is_rejected_before_computing() {
        let cache = cache();
        let ran = AtomicUsize::new(0);

        for bad in ["", "a//b", "a/", "users/*", "has space"] {
            let err = cache
                .compute_with(bad, || async {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("x".to_string()))
                })
                .await
                .expect_err("invalid key should be rejected");
            assert!(err.is_invalid_key(), "{bad:?}");
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(cache.put("a b", "x".to_string()).await.is_err());
        assert!(cache.invalidate("a b").await.is_err());
    }

    #[tokio::test]
    async fn test_compute_without_routes() {
        let cache = cache();
        let err = cache.compute("rows/1").await.expect_err("no routes configured");
        assert!(err.is_route_not_found());

        // A stored value is served even without routes.
        cache.put("rows/1", "stored".to_string()).await.expect("put should succeed");
        assert_eq!(
            cache.compute("rows/1").await.expect("stored value should be returned").as_deref(),
            Some("stored")
        );
    }

    #[tokio::test]
    async fn test_compute_with_routes() {
        let rows = Arc::new(Rows::new());
        let routes = {
            let rows = Arc::clone(&rows);
            RouteSet::new()
                .get("rows/{id}", move |params| {
                    let rows = Arc::clone(&rows);
                    async move {
                        let id = params.get("id").and_then(|id| id.parse().ok()).unwrap_or(0);
                        Ok(rows.find(id))
                    }
                })
                .expect("route should register")
        };
        let cache = cache().with_routes(routes).expect("routes should install");

        let value = cache.compute("rows/7").await.expect("compute should succeed");
        assert_eq!(value.as_deref(), Some("row-7"));
        assert_eq!(
            cache
                .store()
                .keys_for_attribute(&Attribute::new(["rows", "find", "7"]))
                .await
                .expect("lookup should succeed"),
            BTreeSet::from([key("rows/7")])
        );

        let err = cache.compute("other/7").await.expect_err("no route should match");
        assert!(err.is_route_not_found());
    }

    #[tokio::test]
    async fn test_nested_compute_records_cache_dependency() {
        let cache = cache();
        let rows = Rows::new();

        cache
            .compute_with("outer", || async {
                let inner = cache
                    .compute_with("inner", || async { Ok(rows.find(1)) })
                    .await?;
                Ok(inner.map(|v| format!("outer({v})")))
            })
            .await
            .expect("compute should succeed");

        let outer = cache
            .store()
            .attributes_for_key(&key("outer"))
            .await
            .expect("lookup should succeed");
        assert_eq!(
            outer.into_iter().collect::<Vec<_>>(),
            vec![Attribute::new([DEFAULT_IDENTIFIER, "get", "inner"])]
        );
        let inner = cache
            .store()
            .attributes_for_key(&key("inner"))
            .await
            .expect("lookup should succeed");
        assert!(inner.contains(&Attribute::new(["rows", "find", "1"])));
    }

    #[tokio::test]
    async fn test_recursive_compute_is_rejected() {
        let cache = cache();
        let err = cache
            .compute_with("loop", || async {
                cache
                    .compute_with("loop", || async { Ok(Some("never".to_string())) })
                    .await
            })
            .await
            .expect_err("recursion should be rejected");
        assert!(matches!(err, PrimerError::Computation(ComputationError::Recursive { .. })));
        assert!(!cache.has_key("loop").await.expect("has_key should succeed"));
    }

    #[tokio::test]
    async fn test_invalidate_own_key_while_computing_is_rejected() {
        let cache = cache();
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            cache.compute_with("self", || async {
                cache.invalidate("self").await?;
                Ok(Some("value".to_string()))
            }),
        )
        .await
        .expect("invalidating the key being computed should not block");

        let err = result.expect_err("self invalidation should be rejected");
        assert!(matches!(err, PrimerError::Computation(ComputationError::Recursive { .. })));
        assert!(!cache.has_key("self").await.expect("has_key should succeed"));
        assert_eq!(cache.stats().invalidations, 0);
    }

    #[tokio::test]
    async fn test_put_own_key_while_computing_is_rejected() {
        let cache = cache();
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            cache.compute_with("self", || async {
                cache.put("self", "early".to_string()).await?;
                Ok(Some("value".to_string()))
            }),
        )
        .await
        .expect("storing the key being computed should not block");

        let err = result.expect_err("self store should be rejected");
        assert!(matches!(err, PrimerError::Computation(ComputationError::Recursive { .. })));
        assert!(!cache.has_key("self").await.expect("has_key should succeed"));

        // Other keys can still be written from inside a computation.
        cache
            .compute_with("writer", || async {
                cache.put("side", "effect".to_string()).await?;
                Ok(Some("done".to_string()))
            })
            .await
            .expect("writing another key should succeed");
        assert!(cache.has_key("side").await.expect("has_key should succeed"));
    }

    #[tokio::test]
    async fn test_weak_handle_in_routes_does_not_keep_cache_alive() {
        let cache = cache();
        let weak = cache.downgrade();
        let routes = {
            let weak = weak.clone();
            RouteSet::new()
                .get("mirror/{key}", move |params| {
                    let weak = weak.clone();
                    async move {
                        let cache = weak.try_upgrade()?;
                        cache.get(params.get("key").unwrap_or_default()).await
                    }
                })
                .expect("route should register")
        };
        cache.set_routes(routes).expect("routes should install");
        cache.put("source", "v".to_string()).await.expect("put should succeed");

        let value = cache.compute("mirror/source").await.expect("compute should succeed");
        assert_eq!(value.as_deref(), Some("v"));
        assert!(weak.upgrade().is_some());

        drop(cache);
        assert!(weak.upgrade().is_none());
        assert!(weak.try_upgrade().is_err());
    }

    #[tokio::test]
    async fn test_invalidate_evicts_value_and_relation() {
        let cache = cache();
        let rows = Rows::new();
        cache
            .compute_with("rows/1", || async { Ok(rows.find(1)) })
            .await
            .expect("compute should succeed");

        cache.invalidate("rows/1").await.expect("invalidate should succeed");
        assert!(!cache.has_key("rows/1").await.expect("has_key should succeed"));
        assert!(cache
            .store()
            .attributes_for_key(&key("rows/1"))
            .await
            .expect("lookup should succeed")
            .is_empty());
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_put_publishes_change_topic() {
        let cache = cache();
        let mut receiver = cache.bus().subscribe();

        cache.put("user:1", "alice".to_string()).await.expect("put should succeed");
        let topic = receiver.recv().await.expect("topic should arrive");
        assert_eq!(topic.segments(), [DEFAULT_IDENTIFIER, "get", "user:1"]);
        assert_eq!(
            cache.get("user:1").await.expect("get should succeed").as_deref(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn test_get_inside_computation_is_recorded() {
        let cache = cache();
        cache.put("config", "on".to_string()).await.expect("put should succeed");

        cache
            .compute_with("derived", || async {
                Ok(cache.get("config").await?.map(|v| format!("derived-{v}")))
            })
            .await
            .expect("compute should succeed");

        let attributes = cache
            .store()
            .attributes_for_key(&key("derived"))
            .await
            .expect("lookup should succeed");
        assert!(attributes.contains(&Attribute::new([DEFAULT_IDENTIFIER, "get", "config"])));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = CacheConfig::default().with_bus_capacity(0);
        assert!(Cache::<String, _>::in_memory(config).is_err());
    }
}
