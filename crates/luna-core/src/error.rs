// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Luna controller daemon.

use thiserror::Error;

/// The primary error type used across the queue, journal and HTTP layers.
#[derive(Debug, Error)]
pub enum LunaError {
    /// Configuration errors (invalid TOML, missing required fields, bad topology).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A task could not be queued, expanded or found.
    #[error("queue error: {0}")]
    Queue(String),

    /// Journal bookkeeping errors (bad payload encoding, unknown row).
    #[error("journal error: {message}")]
    Journal {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Another coordinator holds the subsystem.
    #[error("busy: {0}")]
    Busy(String),

    /// A sibling controller could not be reached or rejected a batch.
    #[error("replication to {host} failed: {message}")]
    Replication { host: String, message: String },

    /// This controller cannot confirm it is in sync and refuses to originate changes.
    #[error("controller out of sync: {0}")]
    OutOfSync(String),

    /// A journal function key that was never registered.
    #[error("unregistered journal function `{0}`")]
    UnknownFunction(String),

    /// A task descriptor that cannot be parsed or does not belong anywhere.
    #[error("invalid task descriptor: {0}")]
    InvalidTask(String),

    /// A leaf operation (pack, build, power...) reported failure.
    #[error("{0}")]
    Operation(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LunaError {
    /// Shorthand for a journal error without an underlying cause.
    pub fn journal(message: impl Into<String>) -> Self {
        LunaError::Journal {
            message: message.into(),
            source: None,
        }
    }

    /// Returns true for storage errors.
    pub fn is_storage(&self) -> bool {
        matches!(self, LunaError::Storage { .. })
    }
}
