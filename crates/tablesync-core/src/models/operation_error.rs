//! Failed operation model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::{ItemId, OperationId, OperationKind};
use crate::error::Error;

/// Classification of a failed remote attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// HTTP 409/412: the remote row changed since the local snapshot
    Conflict,
    /// Network failure, timeout or 5xx after the retry budget ran out
    Transient,
    /// Any other rejection; retrying unchanged cannot succeed
    Permanent,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conflict" => Ok(Self::Conflict),
            "transient" => Ok(Self::Transient),
            "permanent" => Ok(Self::Permanent),
            other => Err(Error::Database(format!("unknown error kind '{other}'"))),
        }
    }
}

/// Status and body of the response that failed an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Error log entry for a failed operation, kept until the caller resolves it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationError {
    pub operation_id: OperationId,
    pub table_name: String,
    pub item_id: ItemId,
    pub kind: OperationKind,
    pub error_kind: ErrorKind,
    pub message: String,
    /// Server copy of the item (conflicts only)
    pub server_value: Option<Value>,
    /// Local copy of the item when the operation failed
    pub client_value: Value,
    pub raw_response: Option<RawResponse>,
    /// Recording timestamp (Unix ms)
    pub recorded_at: i64,
}

impl OperationError {
    /// Version token of the server copy, if the server sent one
    pub fn server_version(&self) -> Option<String> {
        self.server_value.as_ref().and_then(super::version_of)
    }
}
