//! In-process storage backend.
//!
//! Values and relations live in two maps guarded by `tokio::sync::RwLock`.
//! `relate` and `forget` rewrite both directions of the relation under a
//! single write lock, so lookups never observe a half-replaced relation.

use async_trait::async_trait;
use primer_core::{Attribute, CacheKey, PrimerResult};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

use super::traits::{AttributeIndex, CacheStore};

/// Both directions of the dependency relation.
#[derive(Debug, Default)]
struct Relations {
    by_key: HashMap<CacheKey, BTreeSet<Attribute>>,
    by_attribute: HashMap<Attribute, BTreeSet<CacheKey>>,
}

impl Relations {
    fn remove(&mut self, key: &CacheKey) {
        let Some(attributes) = self.by_key.remove(key) else {
            return;
        };
        for attribute in attributes {
            if let Some(keys) = self.by_attribute.get_mut(&attribute) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_attribute.remove(&attribute);
                }
            }
        }
    }

    fn replace(&mut self, key: &CacheKey, attributes: &[Attribute]) {
        self.remove(key);
        let attributes: BTreeSet<Attribute> = attributes.iter().cloned().collect();
        if attributes.is_empty() {
            return;
        }
        for attribute in &attributes {
            self.by_attribute
                .entry(attribute.clone())
                .or_default()
                .insert(key.clone());
        }
        self.by_key.insert(key.clone(), attributes);
    }
}

/// In-memory storage backend and attribute index.
#[derive(Debug)]
pub struct InMemoryStore<V> {
    values: RwLock<HashMap<CacheKey, V>>,
    relations: RwLock<Relations>,
}

impl<V> Default for InMemoryStore<V> {
    fn default() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            relations: RwLock::new(Relations::default()),
        }
    }
}

impl<V> InMemoryStore<V> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values.
    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }

    /// Number of distinct attributes with at least one related key.
    pub async fn attribute_count(&self) -> usize {
        self.relations.read().await.by_attribute.len()
    }
}

#[async_trait]
impl<V> CacheStore<V> for InMemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn has_key(&self, key: &CacheKey) -> PrimerResult<bool> {
        Ok(self.values.read().await.contains_key(key))
    }

    async fn get(&self, key: &CacheKey) -> PrimerResult<Option<V>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, value: V) -> PrimerResult<()> {
        self.values.write().await.insert(key.clone(), value);
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> PrimerResult<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

#[async_trait]
impl<V> AttributeIndex for InMemoryStore<V>
where
    V: Send + Sync + 'static,
{
    async fn relate(&self, key: &CacheKey, attributes: &[Attribute]) -> PrimerResult<()> {
        self.relations.write().await.replace(key, attributes);
        Ok(())
    }

    async fn keys_for_attribute(&self, attribute: &Attribute) -> PrimerResult<BTreeSet<CacheKey>> {
        Ok(self
            .relations
            .read()
            .await
            .by_attribute
            .get(attribute)
            .cloned()
            .unwrap_or_default())
    }

    async fn attributes_for_key(&self, key: &CacheKey) -> PrimerResult<BTreeSet<Attribute>> {
        Ok(self
            .relations
            .read()
            .await
            .by_key
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn forget(&self, key: &CacheKey) -> PrimerResult<()> {
        self.relations.write().await.remove(key);
        Ok(())
    }
}
