//! Change bus trait and topic type.
//!
//! The bus carries "this attribute changed" notifications. A message is a
//! sequence of string segments; inbound topics map segment-for-segment onto
//! an [`Attribute`], so a collaborator announces a change by publishing the
//! same segments its reads produce.

use async_trait::async_trait;
use primer_core::{Attribute, CacheKey, PrimerResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tokio::sync::broadcast;

/// Operation segment used in a cache's own change topics.
pub const GET_OPERATION: &str = "get";

/// A change-bus topic.
///
/// Besides its segments a topic carries the *cascade* it belongs to: the
/// change attributes (`identifier ++ ["get", key]`) of every cache key that
/// was regenerated on the way to this topic. Caches skip keys already in the
/// cascade, so a dependency cycle between keys settles after one pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    segments: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    cascade: BTreeSet<Attribute>,
}

impl Topic {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_segments(segments.into_iter().map(Into::into).collect())
    }

    fn from_segments(segments: Vec<String>) -> Self {
        Self {
            segments,
            cascade: BTreeSet::new(),
        }
    }

    /// Topic announcing that `key` changed in the cache named `identifier`:
    /// `identifier ++ ["get", key]`.
    pub fn for_key(identifier: &[String], key: &CacheKey) -> Self {
        let mut segments = identifier.to_vec();
        segments.push(GET_OPERATION.to_string());
        segments.push(key.as_str().to_string());
        Self::from_segments(segments)
    }

    /// Attach the cascade this topic is published from.
    pub fn with_cascade(mut self, cascade: BTreeSet<Attribute>) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn cascade(&self) -> &BTreeSet<Attribute> {
        &self.cascade
    }

    /// The attribute this topic announces a change for.
    pub fn to_attribute(&self) -> Attribute {
        Attribute::new(self.segments.iter().cloned())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.segments.join(", "))
    }
}

impl From<Topic> for Attribute {
    fn from(topic: Topic) -> Self {
        Attribute::new(topic.segments)
    }
}

impl From<Attribute> for Topic {
    fn from(attribute: Attribute) -> Self {
        Self::from_segments(attribute.into_segments())
    }
}

impl From<&Attribute> for Topic {
    fn from(attribute: &Attribute) -> Self {
        Self::from_segments(attribute.segments().to_vec())
    }
}

/// Topic-based publish/subscribe transport.
///
/// Implementations deliver every published topic to every live subscriber.
/// Remote transports are expected to forward inbound messages into the
/// receiver returned by [`subscribe`](ChangeBus::subscribe).
#[async_trait]
pub trait ChangeBus: Send + Sync {
    /// Publish a topic. Returns the number of subscribers it reached.
    async fn publish(&self, topic: Topic) -> PrimerResult<usize>;

    /// Subscribe to all topics published from now on.
    fn subscribe(&self) -> broadcast::Receiver<Topic>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_for_key() {
        let identifier = vec!["Primer::Cache".to_string()];
        let key = CacheKey::parse("user:1").expect("key should parse");
        let topic = Topic::for_key(&identifier, &key);
        assert_eq!(topic.segments(), ["Primer::Cache", "get", "user:1"]);
    }

    #[test]
    fn test_topic_maps_to_attribute_segment_for_segment() {
        let topic = Topic::new(["db", "find", "user", "1"]);
        assert_eq!(topic.to_attribute(), Attribute::new(["db", "find", "user", "1"]));
        assert_eq!(Attribute::from(topic.clone()), topic.to_attribute());
        assert_eq!(Topic::from(topic.to_attribute()), topic);
    }

    #[test]
    fn test_cascade_travels_with_topic() {
        let key = CacheKey::parse("a").expect("key should parse");
        let seen = Attribute::new(["Primer::Cache", "get", "b"]);
        let topic = Topic::for_key(&["Primer::Cache".to_string()], &key)
            .with_cascade(BTreeSet::from([seen.clone()]));

        assert!(topic.cascade().contains(&seen));
        assert_eq!(topic.to_attribute(), Attribute::new(["Primer::Cache", "get", "a"]));
        assert_eq!(topic.to_string(), "[Primer::Cache, get, a]");

        let json = serde_json::to_string(&topic).expect("topic should serialize");
        let back: Topic = serde_json::from_str(&json).expect("topic should deserialize");
        assert_eq!(back, topic);
    }

    #[test]
    fn test_plain_topic_serializes_without_cascade() {
        let json = serde_json::to_string(&Topic::new(["db", "find", "1"])).expect("topic should serialize");
        assert_eq!(json, r#"{"segments":["db","find","1"]}"#);
    }
}
