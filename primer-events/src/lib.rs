//! PRIMER Events - Change Bus
//!
//! This crate defines the [`ChangeBus`] trait the cache consumes to publish
//! and receive "attribute changed" notifications, and an in-process
//! implementation built on a tokio broadcast channel.
//!
//! # Topics
//!
//! ```text
//! collaborator change:  [db, find, user, 1]
//! cache key change:     [Primer::Cache, get, user:1]
//! ```
//!
//! Both map segment-for-segment onto an `Attribute`, which is how the cache
//! finds the keys depending on them.

mod bus;
mod in_memory;

pub use bus::{ChangeBus, Topic, GET_OPERATION};
pub use in_memory::InMemoryChangeBus;

// Re-export the broadcast types subscribers deal with
pub use tokio::sync::broadcast::{error::RecvError, Receiver};
