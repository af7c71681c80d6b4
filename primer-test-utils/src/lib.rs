//! PRIMER Test Utilities
//!
//! Centralized test infrastructure for the PRIMER workspace:
//! - A fake observable database and a failing change bus
//! - Proptest generators for keys, tokens and attributes
//! - Test fixtures for common cache setups
//! - Custom assertions for PRIMER-specific validation

// Re-export core types for convenience
pub use primer_core::{
    Attribute, CacheConfig, CacheKey, ComputationError, KeyError, Observable, PrimerError,
    PrimerResult, RouteError, Token, DEFAULT_IDENTIFIER, MAX_KEY_LEN,
};
pub use primer_events::{ChangeBus, InMemoryChangeBus, Topic};
pub use primer_storage::{
    AttributeIndex, Cache, CacheStats, CacheStore, InMemoryStore, LmdbStore, Regeneration,
    RouteParams, RouteSet, WeakCache,
};

use async_trait::async_trait;
use primer_core::BusError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

// ============================================================================
// FAKE COLLABORATORS
// ============================================================================

/// In-memory table store that reports its reads.
///
/// Identity `["db"]`, tracked operation `find`. A read of `(table, id)`
/// produces the attribute `[db, find, table, id]`.
#[derive(Debug, Default)]
pub struct FakeDb {
    rows: Mutex<HashMap<(String, i64), String>>,
    failing: Mutex<HashSet<String>>,
    finds: AtomicUsize,
}

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row without announcing it.
    pub fn insert(&self, table: &str, id: i64, value: impl Into<String>) {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((table.to_string(), id), value.into());
    }

    /// Overwrite a row and return the topic announcing the change.
    pub fn update(&self, table: &str, id: i64, value: impl Into<String>) -> Topic {
        self.insert(table, id, value);
        self.change_topic(table, id)
    }

    /// Tracked read.
    pub fn find(&self, table: &str, id: i64) -> Option<String> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        let row = self
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(table.to_string(), id))
            .cloned();
        self.observe("find", vec![table.into(), id.into()], row)
    }

    /// Tracked read that fails for tables marked with [`fail_table`](Self::fail_table).
    pub fn try_find(&self, table: &str, id: i64) -> PrimerResult<Option<String>> {
        let row = self.find(table, id);
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(table);
        if failing {
            return Err(PrimerError::computation(format!("table {table} is unavailable")));
        }
        Ok(row)
    }

    pub fn fail_table(&self, table: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_string());
    }

    pub fn heal_table(&self, table: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(table);
    }

    /// Number of `find` calls so far.
    pub fn find_count(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    /// Attribute produced by reading `(table, id)`.
    pub fn row_attribute(&self, table: &str, id: i64) -> Attribute {
        self.attribute_for("find", &[table.into(), id.into()])
    }

    pub fn change_topic(&self, table: &str, id: i64) -> Topic {
        Topic::from(self.row_attribute(table, id))
    }
}

impl Observable for FakeDb {
    fn primer_identifier(&self) -> Vec<String> {
        vec!["db".to_string()]
    }

    fn tracked_operations(&self) -> &'static [&'static str] {
        &["find"]
    }
}

/// Change bus whose `publish` always fails.
#[derive(Debug)]
pub struct FailingBus {
    tx: broadcast::Sender<Topic>,
}

impl Default for FailingBus {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(16);
        Self { tx }
    }
}

#[async_trait]
impl ChangeBus for FailingBus {
    async fn publish(&self, topic: Topic) -> PrimerResult<usize> {
        Err(BusError::PublishFailed {
            topic: topic.to_string(),
            reason: "bus unavailable".to_string(),
        }
        .into())
    }

    fn subscribe(&self) -> broadcast::Receiver<Topic> {
        self.tx.subscribe()
    }
}

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("primer_storage=debug,warn"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for PRIMER types.

    use super::*;
    use proptest::prelude::*;

    const SEGMENT: &str = "[A-Za-z0-9_!~()$@.:-]{1,8}";

    /// Generate one valid key segment.
    pub fn arb_segment() -> impl Strategy<Value = String> {
        proptest::string::string_regex(SEGMENT).expect("segment regex is valid")
    }

    /// Generate a valid cache key string, with or without a leading `/`.
    pub fn arb_key_string() -> impl Strategy<Value = String> {
        (any::<bool>(), prop::collection::vec(arb_segment(), 1..5)).prop_map(|(rooted, segments)| {
            let body = segments.join("/");
            if rooted {
                format!("/{body}")
            } else {
                body
            }
        })
    }

    /// Generate a valid CacheKey.
    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        arb_key_string().prop_map(|key| CacheKey::parse(key).expect("generated key is valid"))
    }

    /// Generate a string the key grammar rejects.
    pub fn arb_invalid_key() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            Just("/".to_string()),
            (arb_segment(), arb_segment()).prop_map(|(a, b)| format!("{a}//{b}")),
            arb_segment().prop_map(|a| format!("{a}/")),
            (arb_segment(), "[*]{1,2}").prop_map(|(a, star)| format!("{a}/{star}")),
            (arb_segment(), arb_segment()).prop_map(|(a, b)| format!("{a} {b}")),
            (arb_segment(), "[#%^&=+?,;]").prop_map(|(a, bad)| format!("{a}{bad}")),
            (1..64usize).prop_map(|extra| "k".repeat(MAX_KEY_LEN + extra)),
        ]
    }

    /// Generate a call argument.
    pub fn arb_token() -> impl Strategy<Value = Token> {
        prop_oneof![
            Just(Token::Null),
            any::<bool>().prop_map(Token::Bool),
            any::<i64>().prop_map(Token::Int),
            "[a-z0-9]{0,8}".prop_map(Token::Str),
        ]
    }

    /// Generate an attribute descriptor with identity `["db"]`.
    pub fn arb_attribute() -> impl Strategy<Value = Attribute> {
        ("[a-z]{1,6}", prop::collection::vec(arb_token(), 0..4)).prop_map(|(operation, args)| {
            Attribute::for_operation(&["db".to_string()], &operation, &args)
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built caches and routes for common testing scenarios.

    use super::*;
    use std::time::Duration;

    pub type TestCache = Cache<String, InMemoryStore<String>>;

    /// Route `user:{id}` to `db.try_find("user", id)` and `post:{id}` to
    /// `db.try_find("post", id)`.
    pub fn db_routes(db: &Arc<FakeDb>) -> RouteSet<String> {
        let mut routes = RouteSet::new();
        for table in ["user", "post"] {
            let db = Arc::clone(db);
            routes
                .add(&format!("{table}:{{id}}"), move |params: RouteParams| {
                    let db = Arc::clone(&db);
                    async move {
                        let id = params
                            .get("id")
                            .and_then(|id| id.parse::<i64>().ok())
                            .ok_or_else(|| PrimerError::computation("id is not numeric"))?;
                        db.try_find(table, id)
                    }
                })
                .expect("fixture route pattern is valid");
        }
        routes
    }

    /// In-memory cache with no routes.
    pub fn in_memory_cache() -> TestCache {
        Cache::in_memory(CacheConfig::default()).expect("default config is valid")
    }

    /// In-memory cache routed to `db`.
    pub fn db_cache(db: &Arc<FakeDb>, config: CacheConfig) -> TestCache {
        Cache::in_memory(config)
            .and_then(|cache| cache.with_routes(db_routes(db)))
            .expect("fixture cache should build")
    }

    /// In-memory cache routed to `db`, throttled with `window`.
    pub fn throttled_cache(db: &Arc<FakeDb>, window: Duration) -> TestCache {
        db_cache(db, CacheConfig::default().with_throttle(window))
    }

    /// Database seeded with users 1..=3 and posts 1..=3.
    pub fn seeded_db() -> Arc<FakeDb> {
        let db = FakeDb::new();
        for id in 1..=3 {
            db.insert("user", id, format!("user-{id}"));
            db.insert("post", id, format!("post-{id}"));
        }
        Arc::new(db)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for PRIMER-specific validation.

    use super::*;

    /// Assert that a PrimerResult is an InvalidKey error.
    #[track_caller]
    pub fn assert_invalid_key<T: std::fmt::Debug>(result: &PrimerResult<T>) {
        match result {
            Err(PrimerError::Key(KeyError::InvalidKey { .. })) => {}
            other => panic!("Expected InvalidKey error, got: {:?}", other),
        }
    }

    /// Assert that a PrimerResult is a RouteNotFound error.
    #[track_caller]
    pub fn assert_route_not_found<T: std::fmt::Debug>(result: &PrimerResult<T>) {
        match result {
            Err(PrimerError::Route(RouteError::NotFound { .. })) => {}
            other => panic!("Expected RouteNotFound error, got: {:?}", other),
        }
    }

    /// Assert that a PrimerResult is a recursive computation error.
    #[track_caller]
    pub fn assert_recursive<T: std::fmt::Debug>(result: &PrimerResult<T>) {
        match result {
            Err(PrimerError::Computation(ComputationError::Recursive { .. })) => {}
            other => panic!("Expected Recursive computation error, got: {:?}", other),
        }
    }

    /// Assert that `key` is related to `attribute` in both directions.
    pub async fn assert_related<V, S>(cache: &Cache<V, S>, key: &str, attribute: &Attribute)
    where
        V: Clone + Send + Sync + 'static,
        S: CacheStore<V> + AttributeIndex + 'static,
    {
        let key = CacheKey::parse(key).expect("assertion key should parse");
        let keys = cache
            .store()
            .keys_for_attribute(attribute)
            .await
            .expect("reverse lookup should succeed");
        assert!(keys.contains(&key), "{attribute} should relate to {key}, got {keys:?}");
        let attributes = cache
            .store()
            .attributes_for_key(&key)
            .await
            .expect("forward lookup should succeed");
        assert!(
            attributes.contains(attribute),
            "{key} should depend on {attribute}, got {attributes:?}"
        );
    }

    /// Assert that `key` is not related to `attribute`.
    pub async fn assert_not_related<V, S>(cache: &Cache<V, S>, key: &str, attribute: &Attribute)
    where
        V: Clone + Send + Sync + 'static,
        S: CacheStore<V> + AttributeIndex + 'static,
    {
        let key = CacheKey::parse(key).expect("assertion key should parse");
        let keys = cache
            .store()
            .keys_for_attribute(attribute)
            .await
            .expect("reverse lookup should succeed");
        assert!(!keys.contains(&key), "{attribute} should not relate to {key}");
    }

    /// Assert whether a value is stored under `key`.
    pub async fn assert_cached<V, S>(cache: &Cache<V, S>, key: &str, expected: bool)
    where
        V: Clone + Send + Sync + 'static,
        S: CacheStore<V> + AttributeIndex + 'static,
    {
        let stored = cache.has_key(key).await.expect("has_key should succeed");
        assert_eq!(stored, expected, "has_key({key}) mismatch");
    }
}
