//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConfigError, PrimerResult};
use crate::key::SEGMENT_SEPARATOR;

/// Identifier the cache uses when no other is configured.
pub const DEFAULT_IDENTIFIER: &str = "Primer::Cache";

/// Default buffer size of the in-process change bus.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Identity path of the cache. Prefixes the topic published when a key
    /// changes and the attributes recorded when one cache key is read while
    /// computing another.
    pub identifier: Vec<String>,
    /// Throttle window. When set, change notifications for a key are
    /// coalesced and the key is regenerated once after the window elapses.
    pub throttle: Option<Duration>,
    /// Per-key mutual exclusion for `compute`. When false, concurrent
    /// computations of one key may both run and the last write wins.
    pub exclusive: bool,
    /// Buffer size used when the cache builds its own in-process bus.
    pub bus_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            identifier: vec![DEFAULT_IDENTIFIER.to_string()],
            throttle: None,
            exclusive: true,
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the identity path.
    pub fn with_identifier<I, S>(mut self, identifier: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identifier = identifier.into_iter().map(Into::into).collect();
        self
    }

    /// Enable throttling with the given window.
    pub fn with_throttle(mut self, window: Duration) -> Self {
        self.throttle = Some(window);
        self
    }

    /// Disable throttling.
    pub fn without_throttle(mut self) -> Self {
        self.throttle = None;
        self
    }

    /// Switch to the relaxed (last-write-wins) concurrency mode.
    pub fn relaxed(mut self) -> Self {
        self.exclusive = false;
        self
    }

    /// Set the bus capacity.
    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `PRIMER_CACHE_IDENTIFIER`: `/`-separated identity path (default: `Primer::Cache`)
    /// - `PRIMER_THROTTLE_MS`: throttle window in milliseconds, `0` disables (default: disabled)
    /// - `PRIMER_EXCLUSIVE`: `true`/`false` (default: true)
    /// - `PRIMER_BUS_CAPACITY`: in-process bus capacity (default: 1024)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            identifier: std::env::var("PRIMER_CACHE_IDENTIFIER")
                .ok()
                .map(|s| {
                    s.split(SEGMENT_SEPARATOR)
                        .filter(|segment| !segment.is_empty())
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .filter(|identifier| !identifier.is_empty())
                .unwrap_or(defaults.identifier),
            throttle: std::env::var("PRIMER_THROTTLE_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(|ms| (ms > 0).then(|| Duration::from_millis(ms)))
                .unwrap_or(defaults.throttle),
            exclusive: std::env::var("PRIMER_EXCLUSIVE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.exclusive),
            bus_capacity: std::env::var("PRIMER_BUS_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.bus_capacity),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - identifier is non-empty and has no empty segments
    /// - throttle, when set, is positive
    /// - bus_capacity > 0
    pub fn validate(&self) -> PrimerResult<()> {
        if self.identifier.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "identifier".to_string(),
            }
            .into());
        }

        if self.identifier.iter().any(|segment| segment.is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "identifier".to_string(),
                value: format!("{:?}", self.identifier),
                reason: "identifier segments must be non-empty".to_string(),
            }
            .into());
        }

        if let Some(window) = self.throttle {
            if window.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: "throttle".to_string(),
                    value: format!("{:?}", window),
                    reason: "throttle must be positive; use without_throttle to disable".to_string(),
                }
                .into());
            }
        }

        if self.bus_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bus_capacity".to_string(),
                value: self.bus_capacity.to_string(),
                reason: "bus_capacity must be greater than 0".to_string(),
            }
            .into());
        }

        Ok(())
    }
}
