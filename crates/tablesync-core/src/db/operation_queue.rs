//! Operation queue repository implementation

use libsql::{Connection, Row};
use serde_json::Value;

use crate::config::PushMode;
use crate::error::{Error, Result};
use crate::models::{
    merge_documents, ItemId, OperationId, OperationKind, OperationState, TableOperation,
};

const OPERATION_COLUMNS: &str =
    "sequence, id, table_name, item_id, kind, state, item, created_at, attempts";

/// Trait for the durable, ordered operation queue (async)
///
/// Implementations are not synchronized; callers serialize access per queue.
#[allow(async_fn_in_trait)]
pub trait OperationQueue {
    /// Queue a mutation, collapsing it into the item's existing operation
    /// when the pair allows it
    async fn enqueue(
        &self,
        table_name: &str,
        item_id: &ItemId,
        kind: OperationKind,
        item: Value,
    ) -> Result<TableOperation>;

    /// Take the oldest pending operation and mark it attempted
    async fn dequeue_next(
        &self,
        mode: PushMode,
        table_name: Option<&str>,
    ) -> Result<Option<TableOperation>>;

    /// Delete an operation; deleting an absent operation is a no-op
    async fn remove(&self, id: &OperationId) -> Result<()>;

    /// The queued operation for an item, if any
    async fn peek_by_item(&self, table_name: &str, item_id: &ItemId)
        -> Result<Option<TableOperation>>;

    /// Get an operation by ID
    async fn get(&self, id: &OperationId) -> Result<Option<TableOperation>>;

    /// All queued operations in queue order
    async fn list_all(&self) -> Result<Vec<TableOperation>>;

    /// Number of operations waiting to be pushed
    async fn pending_count(&self) -> Result<usize>;

    /// Move an operation to `state`, enforcing the state machine
    async fn set_state(&self, id: &OperationId, state: OperationState) -> Result<TableOperation>;

    /// Replace the kind and snapshot of an operation in place
    async fn rewrite(&self, id: &OperationId, kind: OperationKind, item: &Value) -> Result<()>;

    /// Reset operations left `Attempted` by an interrupted push back to `Pending`
    async fn recover_interrupted(&self) -> Result<usize>;
}

/// libSQL implementation of `OperationQueue`
pub struct LibSqlOperationQueue<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlOperationQueue<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an operation from a database row
    fn parse_operation(row: &Row) -> Result<TableOperation> {
        let id: String = row.get(1)?;
        let kind: String = row.get(4)?;
        let state: String = row.get(5)?;
        let item: String = row.get(6)?;
        let attempts: i64 = row.get(8)?;

        Ok(TableOperation {
            sequence: row.get(0)?,
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid operation id '{id}'")))?,
            table_name: row.get(2)?,
            item_id: ItemId::new(row.get::<String>(3)?),
            kind: kind.parse()?,
            state: state.parse()?,
            item: serde_json::from_str(&item)?,
            created_at: row.get(7)?,
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        })
    }

    async fn query_one(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Option<TableOperation>> {
        let mut rows = self.conn.query(sql, params).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_operation(&row)?)),
            None => Ok(None),
        }
    }

    async fn require(&self, id: &OperationId) -> Result<TableOperation> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("operation {id}")))
    }

    /// Oldest operation that has not completed, optionally within one table
    async fn head(&self, table_name: Option<&str>) -> Result<Option<TableOperation>> {
        match table_name {
            Some(table) => {
                self.query_one(
                    &format!(
                        "SELECT {OPERATION_COLUMNS} FROM operations
                         WHERE table_name = ?
                         ORDER BY sequence ASC LIMIT 1"
                    ),
                    [table],
                )
                .await
            }
            None => {
                self.query_one(
                    &format!(
                        "SELECT {OPERATION_COLUMNS} FROM operations
                         ORDER BY sequence ASC LIMIT 1"
                    ),
                    (),
                )
                .await
            }
        }
    }

    async fn oldest_pending(&self, table_name: Option<&str>) -> Result<Option<TableOperation>> {
        match table_name {
            Some(table) => {
                self.query_one(
                    &format!(
                        "SELECT {OPERATION_COLUMNS} FROM operations
                         WHERE state = 'pending' AND table_name = ?
                         ORDER BY sequence ASC LIMIT 1"
                    ),
                    [table],
                )
                .await
            }
            None => {
                self.query_one(
                    &format!(
                        "SELECT {OPERATION_COLUMNS} FROM operations
                         WHERE state = 'pending'
                         ORDER BY sequence ASC LIMIT 1"
                    ),
                    (),
                )
                .await
            }
        }
    }
}

impl OperationQueue for LibSqlOperationQueue<'_> {
    async fn enqueue(
        &self,
        table_name: &str,
        item_id: &ItemId,
        kind: OperationKind,
        item: Value,
    ) -> Result<TableOperation> {
        let Some(existing) = self.peek_by_item(table_name, item_id).await? else {
            let mut operation = TableOperation::new(table_name, item_id.clone(), kind, item);
            self.conn
                .execute(
                    "INSERT INTO operations (id, table_name, item_id, kind, state, item, created_at, attempts)
                     VALUES (?, ?, ?, ?, ?, ?, ?, 0)",
                    libsql::params![
                        operation.id.as_str(),
                        operation.table_name.clone(),
                        operation.item_id.as_str(),
                        operation.kind.as_str(),
                        operation.state.as_str(),
                        serde_json::to_string(&operation.item)?,
                        operation.created_at
                    ],
                )
                .await?;
            operation.sequence = self.conn.last_insert_rowid();

            tracing::debug!(
                operation_id = %operation.id,
                table = table_name,
                item_id = %item_id,
                kind = %kind,
                "Queued operation"
            );
            return Ok(operation);
        };

        let conflicting = || Error::ConflictingOperation {
            table: table_name.to_string(),
            item_id: item_id.clone(),
            existing: existing.kind,
            state: existing.state,
            requested: kind,
        };

        if existing.state != OperationState::Pending {
            return Err(conflicting());
        }
        let collapsed_kind = existing.kind.collapse(kind).ok_or_else(conflicting)?;

        let collapsed_item = if collapsed_kind == OperationKind::Delete {
            item
        } else {
            merge_documents(&existing.item, &item)
        };

        self.rewrite(&existing.id, collapsed_kind, &collapsed_item)
            .await?;

        tracing::debug!(
            operation_id = %existing.id,
            table = table_name,
            item_id = %item_id,
            existing = %existing.kind,
            requested = %kind,
            collapsed = %collapsed_kind,
            "Collapsed operation"
        );

        Ok(TableOperation {
            kind: collapsed_kind,
            item: collapsed_item,
            ..existing
        })
    }

    async fn dequeue_next(
        &self,
        mode: PushMode,
        table_name: Option<&str>,
    ) -> Result<Option<TableOperation>> {
        if mode == PushMode::StopOnFirstError {
            if let Some(head) = self.head(table_name).await? {
                if head.state == OperationState::Failed {
                    tracing::debug!(
                        operation_id = %head.id,
                        "Queue head failed; waiting for resolution"
                    );
                    return Ok(None);
                }
            }
        }

        let Some(operation) = self.oldest_pending(table_name).await? else {
            return Ok(None);
        };

        self.conn
            .execute(
                "UPDATE operations SET state = 'attempted', attempts = attempts + 1
                 WHERE id = ? AND state = 'pending'",
                [operation.id.as_str()],
            )
            .await?;

        Ok(Some(TableOperation {
            state: OperationState::Attempted,
            attempts: operation.attempts.saturating_add(1),
            ..operation
        }))
    }

    async fn remove(&self, id: &OperationId) -> Result<()> {
        self.conn
            .execute("DELETE FROM operations WHERE id = ?", [id.as_str()])
            .await?;
        Ok(())
    }

    async fn peek_by_item(
        &self,
        table_name: &str,
        item_id: &ItemId,
    ) -> Result<Option<TableOperation>> {
        self.query_one(
            &format!(
                "SELECT {OPERATION_COLUMNS} FROM operations WHERE table_name = ? AND item_id = ?"
            ),
            [table_name, item_id.as_str()],
        )
        .await
    }

    async fn get(&self, id: &OperationId) -> Result<Option<TableOperation>> {
        self.query_one(
            &format!("SELECT {OPERATION_COLUMNS} FROM operations WHERE id = ?"),
            [id.as_str()],
        )
        .await
    }

    async fn list_all(&self) -> Result<Vec<TableOperation>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {OPERATION_COLUMNS} FROM operations ORDER BY sequence ASC"),
                (),
            )
            .await?;

        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(Self::parse_operation(&row)?);
        }
        Ok(operations)
    }

    async fn pending_count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM operations WHERE state = 'pending'",
                (),
            )
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn set_state(&self, id: &OperationId, state: OperationState) -> Result<TableOperation> {
        let operation = self.require(id).await?;
        if !operation.state.can_transition_to(state) {
            return Err(Error::InvalidState {
                operation_id: *id,
                state: operation.state,
                action: format!("moving to {state}"),
            });
        }

        // Every move into `Attempted` is one more remote attempt
        let attempted = state == OperationState::Attempted;
        self.conn
            .execute(
                "UPDATE operations SET state = ?, attempts = attempts + ? WHERE id = ?",
                libsql::params![state.as_str(), i64::from(attempted), id.as_str()],
            )
            .await?;

        Ok(TableOperation {
            state,
            attempts: operation.attempts.saturating_add(u32::from(attempted)),
            ..operation
        })
    }

    async fn rewrite(&self, id: &OperationId, kind: OperationKind, item: &Value) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE operations SET kind = ?, item = ? WHERE id = ?",
                libsql::params![kind.as_str(), serde_json::to_string(item)?, id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("operation {id}")));
        }
        Ok(())
    }

    async fn recover_interrupted(&self) -> Result<usize> {
        let rows = self
            .conn
            .execute(
                "UPDATE operations SET state = 'pending' WHERE state = 'attempted'",
                (),
            )
            .await?;

        if rows > 0 {
            tracing::warn!(
                count = rows,
                "Reset operations interrupted mid-push back to pending"
            );
        }
        Ok(usize::try_from(rows).unwrap_or(usize::MAX))
    }
}
