//! Error types for PRIMER operations

use thiserror::Error;

/// Cache key validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid cache key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },
}

/// Route table errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("No route for {key}: {reason}")]
    NotFound { key: String, reason: String },

    #[error("Invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Errors raised by or around a computation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComputationError {
    #[error("Computation failed: {reason}")]
    Failed { reason: String },

    #[error("Recursive computation of {key} (chain: {chain:?})")]
    Recursive { key: String, chain: Vec<String> },
}

/// Storage backend errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Change bus errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("Publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all PRIMER errors.
#[derive(Debug, Clone, Error)]
pub enum PrimerError {
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    #[error("Computation error: {0}")]
    Computation(#[from] ComputationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl PrimerError {
    /// Shorthand for a failed computation, for use inside user computations.
    pub fn computation(reason: impl Into<String>) -> Self {
        PrimerError::Computation(ComputationError::Failed {
            reason: reason.into(),
        })
    }

    /// Returns true for `InvalidKey` errors.
    pub fn is_invalid_key(&self) -> bool {
        matches!(self, PrimerError::Key(KeyError::InvalidKey { .. }))
    }

    /// Returns true for `RouteNotFound` errors.
    pub fn is_route_not_found(&self) -> bool {
        matches!(self, PrimerError::Route(RouteError::NotFound { .. }))
    }
}

/// Result type alias for PRIMER operations.
pub type PrimerResult<T> = Result<T, PrimerError>;

// =============================================================================
// TESTS
// =============================================================================
