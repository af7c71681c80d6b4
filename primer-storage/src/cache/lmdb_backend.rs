//! LMDB-backed storage and attribute index.
//!
//! Uses the heed crate (Rust bindings for LMDB) so cached values and their
//! dependency relations survive a restart and can be shared by processes on
//! one host.
//!
//! # Layout
//!
//! Values and both directions of the relation share one unnamed database;
//! see [`keyspace`](super::keyspace) for the byte layout. Values are stored
//! as JSON. Oversized attributes are indexed by digest, so any valid key and
//! attribute fits LMDB's key size limit.
//!
//! # Transactions
//!
//! - Read transactions for `get`, `has_key` and the index lookups
//! - One write transaction per `put`/`invalidate`
//! - `relate` and `forget` rewrite both relation directions in a single
//!   write transaction, so readers see the old relation or the new one
//!
//! No transaction is held across an await point.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use primer_core::{Attribute, CacheKey, PrimerError, PrimerResult, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::keyspace::{self, Namespace};
use super::traits::{AttributeIndex, CacheStore};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A relation record could not be decoded.
    #[error("Corrupt relation record for {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<heed::Error> for LmdbStoreError {
    fn from(e: heed::Error) -> Self {
        LmdbStoreError::Transaction(e.to_string())
    }
}

/// Convert LmdbStoreError to PrimerError.
impl From<LmdbStoreError> for PrimerError {
    fn from(e: LmdbStoreError) -> Self {
        PrimerError::Storage(StorageError::TransactionFailed {
            reason: e.to_string(),
        })
    }
}

/// LMDB-backed store for values of type `V`.
///
/// # Example
///
/// ```ignore
/// use primer_storage::{Cache, LmdbStore};
///
/// let store = LmdbStore::<User>::open("/var/lib/app/cache", 64)?;
/// let cache = Cache::with_defaults(store);
/// ```
pub struct LmdbStore<V> {
    env: Env,
    db: Database<Bytes, Bytes>,
    _value: PhantomData<fn() -> V>,
}

impl<V> std::fmt::Debug for LmdbStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbStore")
            .field("path", &self.env.path())
            .finish_non_exhaustive()
    }
}

impl<V> LmdbStore<V> {
    /// Open (or create) a store in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn()?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit()?;

        debug!(path = %path.as_ref().display(), "Opened LMDB store");
        Ok(Self {
            env,
            db,
            _value: PhantomData,
        })
    }

    /// Number of stored values.
    pub fn value_count(&self) -> Result<usize, LmdbStoreError> {
        let rtxn = self.env.read_txn()?;
        let mut count = 0;
        for entry in self.db.prefix_iter(&rtxn, &Namespace::Value.prefix())? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    fn read_dependencies(&self, txn: &RoTxn, key: &CacheKey) -> Result<Vec<Attribute>, LmdbStoreError> {
        match self.db.get(txn, &keyspace::dependencies_key(key))? {
            Some(bytes) => keyspace::decode_attributes(bytes)
                .ok_or_else(|| LmdbStoreError::Corrupt(key.to_string())),
            None => Ok(Vec::new()),
        }
    }

    fn clear_relation(&self, wtxn: &mut RwTxn, key: &CacheKey) -> Result<(), LmdbStoreError> {
        let previous = self.read_dependencies(&*wtxn, key)?;
        for attribute in &previous {
            self.db.delete(wtxn, &keyspace::dependent_key(attribute, key))?;
        }
        self.db.delete(wtxn, &keyspace::dependencies_key(key))?;
        Ok(())
    }
}

#[async_trait]
impl<V> CacheStore<V> for LmdbStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn has_key(&self, key: &CacheKey) -> PrimerResult<bool> {
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
        let found = self
            .db
            .get(&rtxn, &keyspace::value_key(key))
            .map_err(LmdbStoreError::from)?
            .is_some();
        Ok(found)
    }

    async fn get(&self, key: &CacheKey) -> PrimerResult<Option<V>> {
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
        match self
            .db
            .get(&rtxn, &keyspace::value_key(key))
            .map_err(LmdbStoreError::from)?
        {
            Some(bytes) => {
                let value = serde_json::from_slice(bytes).map_err(|e| {
                    StorageError::Serialization {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, value: V) -> PrimerResult<()> {
        let bytes = serde_json::to_vec(&value).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        self.db
            .put(&mut wtxn, &keyspace::value_key(key), &bytes)
            .map_err(LmdbStoreError::from)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> PrimerResult<()> {
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        self.db
            .delete(&mut wtxn, &keyspace::value_key(key))
            .map_err(LmdbStoreError::from)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(())
    }
}

#[async_trait]
impl<V> AttributeIndex for LmdbStore<V>
where
    V: Send + Sync + 'static,
{
    async fn relate(&self, key: &CacheKey, attributes: &[Attribute]) -> PrimerResult<()> {
        let attributes: BTreeSet<&Attribute> = attributes.iter().collect();

        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        self.clear_relation(&mut wtxn, key)?;
        if !attributes.is_empty() {
            let encoded = keyspace::encode_attributes(attributes.iter().copied());
            self.db
                .put(&mut wtxn, &keyspace::dependencies_key(key), &encoded)
                .map_err(LmdbStoreError::from)?;
            for attribute in &attributes {
                self.db
                    .put(&mut wtxn, &keyspace::dependent_key(attribute, key), &[])
                    .map_err(LmdbStoreError::from)?;
            }
        }
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(())
    }

    async fn keys_for_attribute(&self, attribute: &Attribute) -> PrimerResult<BTreeSet<CacheKey>> {
        let prefix = keyspace::dependents_prefix(attribute);
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
        let mut keys = BTreeSet::new();
        for entry in self
            .db
            .prefix_iter(&rtxn, &prefix)
            .map_err(LmdbStoreError::from)?
        {
            let (entry, _) = entry.map_err(LmdbStoreError::from)?;
            match keyspace::key_from_dependent(&prefix, entry) {
                Some(key) => {
                    keys.insert(key);
                }
                None => return Err(LmdbStoreError::Corrupt(attribute.to_string()).into()),
            }
        }

        if keyspace::is_digested(attribute) {
            let mut confirmed = BTreeSet::new();
            for key in keys {
                if self.read_dependencies(&rtxn, &key)?.contains(attribute) {
                    confirmed.insert(key);
                }
            }
            return Ok(confirmed);
        }
        Ok(keys)
    }

    async fn attributes_for_key(&self, key: &CacheKey) -> PrimerResult<BTreeSet<Attribute>> {
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
        Ok(self.read_dependencies(&rtxn, key)?.into_iter().collect())
    }

    async fn forget(&self, key: &CacheKey) -> PrimerResult<()> {
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        self.clear_relation(&mut wtxn, key)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(())
    }
}
