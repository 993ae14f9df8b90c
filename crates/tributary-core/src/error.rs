// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Tributary aggregator.

use thiserror::Error;

/// The primary error type used across all Tributary crates.
#[derive(Debug, Error)]
pub enum TributaryError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A document or message body could not be encoded or decoded.
    #[error("serialization error: {source}")]
    Serialization { source: serde_json::Error },

    /// Optimistic-concurrency mismatch on a versioned document.
    #[error("document update conflict: {id}")]
    Conflict { id: String },

    /// The requested document does not exist.
    #[error("document not found: {id}")]
    NotFound { id: String },

    /// Broker errors (queue unavailable, publish or receive failure).
    #[error("broker error: {message}")]
    Broker {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A mandatory publish found no queue bound to its message type.
    #[error("no queue bound for message type `{message_type}`")]
    Unroutable { message_type: String },

    /// A message violated the wire contract (missing or mistyped field).
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// A filter could not be constructed from its configuration.
    #[error("filter error: {0}")]
    Filter(String),

    /// Requested adapter was not found in a registry.
    #[error("adapter not found: {adapter_type}/{name}")]
    AdapterNotFound { adapter_type: String, name: String },

    /// Adapter health check failed.
    #[error("health check failed for {name}: {source}")]
    HealthCheckFailed {
        name: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TributaryError {
    /// Returns true for optimistic-concurrency conflicts, which callers may retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TributaryError::Conflict { .. })
    }

    /// Wraps a JSON error.
    pub fn serialization(source: serde_json::Error) -> Self {
        TributaryError::Serialization { source }
    }

    /// Builds a broker error without an underlying cause.
    pub fn broker(message: impl Into<String>) -> Self {
        TributaryError::Broker {
            message: message.into(),
            source: None,
        }
    }

    /// Builds a malformed-message error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        TributaryError::MalformedMessage {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for TributaryError {
    fn from(source: serde_json::Error) -> Self {
        TributaryError::Serialization { source }
    }
}
