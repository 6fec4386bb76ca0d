//! Error types for tablesync-core

use serde_json::Value;
use thiserror::Error;

use crate::models::{ErrorKind, ItemId, OperationId, OperationKind, OperationState, RawResponse};

/// Result type alias using tablesync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tablesync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation, error entry or item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Transport could not be initialized
    #[error("Transport error: {0}")]
    Transport(String),

    /// A new mutation collides with an operation already queued for the item
    #[error(
        "Cannot queue {requested} for {table}/{item_id}: a {existing} operation ({state}) is already queued"
    )]
    ConflictingOperation {
        table: String,
        item_id: ItemId,
        existing: OperationKind,
        state: OperationState,
        requested: OperationKind,
    },

    /// The operation is not in a state that allows the requested action
    #[error("Operation {operation_id} is {state}, which does not allow {action}")]
    InvalidState {
        operation_id: OperationId,
        state: OperationState,
        action: String,
    },
}

/// Failure of a single queued operation against the remote service.
///
/// `kind` decides what the executor does next: conflicts wait for the caller,
/// transient failures are retried, permanent failures are parked.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} failure: {message}")]
pub struct SyncError {
    pub kind: ErrorKind,
    pub message: String,
    /// Server copy of the item, populated for conflicts
    pub server_value: Option<Value>,
    pub raw_response: Option<RawResponse>,
}

impl SyncError {
    pub fn conflict(
        message: impl Into<String>,
        server_value: Option<Value>,
        raw_response: RawResponse,
    ) -> Self {
        Self {
            kind: ErrorKind::Conflict,
            message: message.into(),
            server_value,
            raw_response: Some(raw_response),
        }
    }

    pub fn transient(message: impl Into<String>, raw_response: Option<RawResponse>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
            server_value: None,
            raw_response,
        }
    }

    pub fn permanent(message: impl Into<String>, raw_response: Option<RawResponse>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
            server_value: None,
            raw_response,
        }
    }

    pub const fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient)
    }
}
