//! Invalidation and regeneration.
//!
//! When an attribute changes, every key related to it is evicted and
//! recomputed through the configured routes. With a throttle window set,
//! notifications for a key are coalesced: the first one schedules a single
//! refresh after the window, later ones are absorbed until it runs.
//!
//! ```text
//! IDLE --changed--> PENDING --window elapsed--> IDLE (evict + regenerate)
//!                      |
//!                      +--changed--> PENDING (coalesced)
//! ```
//!
//! A regeneration publishes the key's change topic together with the set of
//! keys already regenerated in the same cascade. A notification whose cascade
//! already contains a dependent key is not acted on for that key, so keys
//! that read each other settle instead of regenerating forever.

use std::collections::BTreeSet;
use std::time::Duration;

use primer_core::{Attribute, CacheKey, PrimerError, PrimerResult};
use primer_events::{RecvError, Topic};
use std::sync::PoisonError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::{Cache, Counters, CASCADE};
use super::traits::{AttributeIndex, CacheStore};

/// Outcome of regenerating one key.
#[derive(Debug)]
pub enum Regeneration {
    /// A value was computed and stored.
    Regenerated,
    /// The computation produced no value; the key stays empty.
    Empty,
    /// Eviction or computation failed. The key stays empty until the next
    /// successful compute.
    Failed(PrimerError),
}

impl Regeneration {
    pub fn is_failed(&self) -> bool {
        matches!(self, Regeneration::Failed(_))
    }
}

impl<V, S> Cache<V, S>
where
    V: Clone + Send + Sync + 'static,
    S: CacheStore<V> + AttributeIndex + 'static,
{
    /// Handle a change of `attribute`.
    ///
    /// Returns the keys that depended on it. Without a throttle window each
    /// of them is evicted and regenerated before this returns; with one, the
    /// refresh is scheduled. Regeneration failures are logged and counted,
    /// never returned.
    pub async fn changed(&self, attribute: &Attribute) -> PrimerResult<Vec<CacheKey>> {
        self.changed_within(attribute, &BTreeSet::new()).await
    }

    /// Handle a change topic received from the bus.
    ///
    /// Like [`changed`](Self::changed), except that keys already regenerated
    /// in the topic's cascade are skipped and left out of the result.
    pub async fn changed_topic(&self, topic: &Topic) -> PrimerResult<Vec<CacheKey>> {
        self.changed_within(&topic.to_attribute(), topic.cascade()).await
    }

    async fn changed_within(
        &self,
        attribute: &Attribute,
        cascade: &BTreeSet<Attribute>,
    ) -> PrimerResult<Vec<CacheKey>> {
        let keys = self.inner.store.keys_for_attribute(attribute).await?;
        debug!(%attribute, affected = keys.len(), "Attribute changed");

        let mut affected = Vec::with_capacity(keys.len());
        for key in keys {
            if cascade.contains(&self.key_attribute(&key)) {
                Counters::bump(&self.inner.counters.cascade_skips);
                debug!(%key, "Key already regenerated in this cascade");
                continue;
            }
            match self.inner.config.throttle {
                Some(window) => self.schedule(key.clone(), window, cascade.clone()),
                None => {
                    self.refresh_within(&key, cascade).await;
                }
            }
            affected.push(key);
        }
        Ok(affected)
    }

    /// Evict `key` and compute it again through the routes.
    pub async fn refresh(&self, key: &CacheKey) -> Regeneration {
        self.refresh_within(key, &BTreeSet::new()).await
    }

    async fn refresh_within(&self, key: &CacheKey, cascade: &BTreeSet<Attribute>) -> Regeneration {
        let mut cascade = cascade.clone();
        cascade.insert(self.key_attribute(key));

        let outcome = CASCADE
            .scope(cascade, async {
                match self.evict(key).await {
                    Err(e) => Regeneration::Failed(e),
                    Ok(()) => match self.compute_routed(key.clone()).await {
                        Ok(Some(_)) => Regeneration::Regenerated,
                        Ok(None) => Regeneration::Empty,
                        Err(e) => Regeneration::Failed(e),
                    },
                }
            })
            .await;

        match &outcome {
            Regeneration::Regenerated => {
                Counters::bump(&self.inner.counters.regenerations);
                debug!(%key, outcome = "regenerated", "Refreshed key");
            }
            Regeneration::Empty => {
                debug!(%key, outcome = "empty", "Refreshed key");
            }
            Regeneration::Failed(e) => {
                Counters::bump(&self.inner.counters.regeneration_failures);
                warn!(%key, outcome = "failed", error = %e, "Regeneration failed");
            }
        }
        outcome
    }

    fn schedule(&self, key: CacheKey, window: Duration, cascade: BTreeSet<Attribute>) {
        let first = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        if !first {
            debug!(%key, "Change coalesced into pending refresh");
            return;
        }

        debug!(%key, window_ms = window.as_millis() as u64, "Refresh scheduled");
        let cache = self.downgrade();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let Some(cache) = cache.upgrade() else {
                return;
            };
            cache
                .inner
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            cache.refresh_within(&key, &cascade).await;
        });
    }

    /// Subscribe to the change bus and feed every topic to
    /// [`changed_topic`](Self::changed_topic).
    ///
    /// The subscription is taken before this returns, so topics published
    /// afterwards are never missed. The task holds no strong handle to the
    /// cache; it ends when the bus closes or the cache is dropped.
    pub fn bind_to_bus(&self) -> JoinHandle<()> {
        let mut receiver = self.inner.bus.subscribe();
        let cache = self.downgrade();
        info!(identifier = ?self.inner.config.identifier, "Binding cache to change bus");

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(topic) => {
                        let Some(cache) = cache.upgrade() else {
                            debug!("Cache dropped; leaving change bus");
                            break;
                        };
                        if let Err(e) = cache.changed_topic(&topic).await {
                            warn!(%topic, error = %e, "Failed to handle change");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Change bus subscriber lagged; changes were dropped");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Change bus closed");
                        break;
                    }
                }
            }
        })
    }
}
