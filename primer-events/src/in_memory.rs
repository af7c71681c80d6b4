//! In-process change bus backed by a tokio broadcast channel.

use async_trait::async_trait;
use primer_core::{PrimerResult, DEFAULT_BUS_CAPACITY};
use tokio::sync::broadcast;
use tracing::debug;

use crate::bus::{ChangeBus, Topic};

/// In-process change bus.
///
/// Publishing never blocks. With no subscribers the topic is dropped; a
/// subscriber whose buffer is full misses topics (lagged).
#[derive(Debug, Clone)]
pub struct InMemoryChangeBus {
    tx: broadcast::Sender<Topic>,
}

impl InMemoryChangeBus {
    /// Create a bus buffering up to `capacity` topics per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for InMemoryChangeBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

#[async_trait]
impl ChangeBus for InMemoryChangeBus {
    async fn publish(&self, topic: Topic) -> PrimerResult<usize> {
        match self.tx.send(topic) {
            Ok(receivers) => {
                debug!(receivers, "Published change");
                Ok(receivers)
            }
            Err(broadcast::error::SendError(topic)) => {
                // No subscribers - this is fine
                debug!(%topic, "No subscribers for change");
                Ok(0)
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Topic> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = InMemoryChangeBus::new(8);
        let receivers = bus
            .publish(Topic::new(["db", "find", "user", "1"]))
            .await
            .expect("publish should succeed");
        assert_eq!(receivers, 0);
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = InMemoryChangeBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.receiver_count(), 2);

        let topic = Topic::new(["db", "find", "user", "1"]);
        let receivers = bus.publish(topic.clone()).await.expect("publish should succeed");
        assert_eq!(receivers, 2);

        assert_eq!(first.recv().await.expect("first should receive"), topic);
        assert_eq!(second.recv().await.expect("second should receive"), topic);
    }

    #[tokio::test]
    async fn test_subscribers_only_see_later_topics() {
        let bus = InMemoryChangeBus::new(8);
        bus.publish(Topic::new(["early"])).await.expect("publish should succeed");

        let mut receiver = bus.subscribe();
        bus.publish(Topic::new(["late"])).await.expect("publish should succeed");

        assert_eq!(receiver.recv().await.expect("should receive"), Topic::new(["late"]));
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags() {
        let bus = InMemoryChangeBus::new(2);
        let mut receiver = bus.subscribe();
        for i in 0..5 {
            bus.publish(Topic::new([format!("t{i}")]))
                .await
                .expect("publish should succeed");
        }
        assert!(matches!(
            receiver.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }
}
