//! Queued table operation model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// A unique identifier for a queued operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Primary key of a remote row.
///
/// Servers accept string or numeric keys; numeric keys are kept in their
/// decimal form so both share one storage column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Kind of mutation recorded in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    /// Restores a soft-deleted row; sent without a body
    Undelete,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Undelete => "undelete",
        }
    }

    /// Kind that results from queueing `next` on top of `self`.
    ///
    /// Returns `None` when the pair cannot be collapsed and the new mutation
    /// must be rejected.
    pub const fn collapse(self, next: Self) -> Option<Self> {
        match (self, next) {
            // An undelete carries no body, so field edits cannot ride along
            (Self::Delete, _)
            | (Self::Insert, Self::Insert | Self::Undelete)
            | (Self::Update | Self::Undelete, Self::Insert)
            | (Self::Update, Self::Undelete)
            | (Self::Undelete, Self::Update) => None,
            (_, Self::Delete) => Some(Self::Delete),
            (Self::Insert, Self::Update) => Some(Self::Insert),
            (Self::Update, Self::Update) => Some(Self::Update),
            (Self::Undelete, Self::Undelete) => Some(Self::Undelete),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "undelete" => Ok(Self::Undelete),
            other => Err(Error::Database(format!("unknown operation kind '{other}'"))),
        }
    }
}

/// Lifecycle state of a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Pending,
    Attempted,
    Completed,
    Failed,
}

impl OperationState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Attempted => "attempted",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Completed` and `Failed` are only reachable through `Attempted`.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Attempted)
                | (
                    Self::Attempted,
                    Self::Pending | Self::Completed | Self::Failed
                )
                | (Self::Failed, Self::Pending)
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "attempted" => Ok(Self::Attempted),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Database(format!("unknown operation state '{other}'"))),
        }
    }
}

/// A pending mutation of one remote row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableOperation {
    /// Unique identifier
    pub id: OperationId,
    /// Logical table the item belongs to
    pub table_name: String,
    /// Primary key of the item
    pub item_id: ItemId,
    pub kind: OperationKind,
    pub state: OperationState,
    /// Last-known local snapshot of the item
    pub item: Value,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Store-assigned queue position, strictly increasing
    pub sequence: i64,
    /// Remote attempts made so far
    pub attempts: u32,
}

impl TableOperation {
    /// Create a new pending operation; `sequence` is assigned when stored
    #[must_use]
    pub fn new(
        table_name: impl Into<String>,
        item_id: ItemId,
        kind: OperationKind,
        item: Value,
    ) -> Self {
        Self {
            id: OperationId::new(),
            table_name: table_name.into(),
            item_id,
            kind,
            state: OperationState::Pending,
            item,
            created_at: chrono::Utc::now().timestamp_millis(),
            sequence: 0,
            attempts: 0,
        }
    }
}
