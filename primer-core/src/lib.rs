//! PRIMER Core - Keys, Attributes and Call Recording
//!
//! Shared vocabulary for the PRIMER self-invalidating cache:
//!
//! - [`CacheKey`]: validated key, doubles as a change-bus topic segment
//! - [`Attribute`] / [`Token`]: dependency fingerprint of one data access
//! - [`recorder`]: task-local scopes that capture the calls a computation makes
//! - [`Observable`]: the contract a collaborator implements to become trackable
//! - [`PrimerError`] / [`CacheConfig`]: error and configuration types
//!
//! This crate has no storage or bus logic; see `primer-storage` and
//! `primer-events`.

pub mod attribute;
pub mod config;
pub mod error;
pub mod identity;
pub mod key;
pub mod recorder;

pub use attribute::{Attribute, Token};
pub use config::{CacheConfig, DEFAULT_BUS_CAPACITY, DEFAULT_IDENTIFIER};
pub use error::{
    BusError, ComputationError, ConfigError, KeyError, PrimerError, PrimerResult, RouteError,
    StorageError,
};
pub use identity::Observable;
pub use key::{CacheKey, MAX_KEY_LEN, SEGMENT_SEPARATOR};
pub use recorder::{carry_scope, watching, Call};
