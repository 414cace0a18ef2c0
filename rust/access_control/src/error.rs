//! Error types for the access-control core.

use thiserror::Error;

/// Access-control errors.
///
/// Lookup and index failures are produced by the collaborator caches and
/// absorbed by the resolver as "grants nothing"; only configuration errors
/// reach callers of the public API.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Object not present in the cache.
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// Query against an indexer that was never registered.
    #[error("index not registered: {0}")]
    IndexNotFound(String),

    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),

    /// JSON deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AccessError {
    pub(crate) fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        AccessError::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Check if error indicates a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for access-control operations.
pub type Result<T> = std::result::Result<T, AccessError>;
