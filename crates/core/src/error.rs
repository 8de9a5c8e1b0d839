//! Error types for Sandboxer.

use thiserror::Error;

/// Result type alias using Sandboxer's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Sandboxer.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Sessions
    // =========================================================================
    #[error("Sandbox session not found: {0}")]
    SessionNotFound(String),

    #[error("Sandbox session expired: {0}")]
    SessionExpired(String),

    // =========================================================================
    // Operation log
    // =========================================================================
    #[error("Sequence conflict for {table}/{record}")]
    SequenceConflict { table: String, record: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt operation record: {0}")]
    CorruptRecord(String),

    // =========================================================================
    // Cache
    // =========================================================================
    #[error("Cache error: {0}")]
    Cache(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a session-not-found error.
    pub fn session_not_found(token: impl Into<String>) -> Self {
        Self::SessionNotFound(token.into())
    }

    /// Create a session-expired error.
    pub fn session_expired(id: impl Into<String>) -> Self {
        Self::SessionExpired(id.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a corrupt-record error.
    pub fn corrupt_record(msg: impl Into<String>) -> Self {
        Self::CorruptRecord(msg.into())
    }

    /// Create a cache error.
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
