//! Operation error log repository implementation

use libsql::{Connection, Row, Value as SqlValue};

use crate::error::{Error, Result};
use crate::models::{ItemId, OperationError, OperationId, RawResponse};

const ERROR_COLUMNS: &str = "operation_id, table_name, item_id, kind, error_kind, message, \
     server_value, client_value, status, body, recorded_at";

/// Trait for the durable log of failed operations (async)
#[allow(async_fn_in_trait)]
pub trait OperationErrorLog {
    /// Record a failure; recording again for the same operation overwrites
    async fn record(&self, error: &OperationError) -> Result<()>;

    /// Get the entry for an operation
    async fn get(&self, operation_id: &OperationId) -> Result<Option<OperationError>>;

    /// Remove the entry for an operation
    async fn clear(&self, operation_id: &OperationId) -> Result<()>;

    /// All entries in the order they were first recorded
    async fn list_all(&self) -> Result<Vec<OperationError>>;
}

/// libSQL implementation of `OperationErrorLog`
pub struct LibSqlOperationErrorLog<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlOperationErrorLog<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_error(row: &Row) -> Result<OperationError> {
        let operation_id: String = row.get(0)?;
        let kind: String = row.get(3)?;
        let error_kind: String = row.get(4)?;
        let client_value: String = row.get(7)?;

        let server_value = match row.get_value(6)? {
            SqlValue::Text(text) => Some(serde_json::from_str(&text)?),
            _ => None,
        };
        let raw_response = match (row.get_value(8)?, row.get_value(9)?) {
            (SqlValue::Integer(status), body) => Some(RawResponse {
                status: u16::try_from(status).unwrap_or(0),
                body: match body {
                    SqlValue::Text(text) => text,
                    _ => String::new(),
                },
            }),
            _ => None,
        };

        Ok(OperationError {
            operation_id: operation_id.parse().map_err(|_| {
                Error::Database(format!("invalid operation id '{operation_id}'"))
            })?,
            table_name: row.get(1)?,
            item_id: ItemId::new(row.get::<String>(2)?),
            kind: kind.parse()?,
            error_kind: error_kind.parse()?,
            message: row.get(5)?,
            server_value,
            client_value: serde_json::from_str(&client_value)?,
            raw_response,
            recorded_at: row.get(10)?,
        })
    }
}

impl OperationErrorLog for LibSqlOperationErrorLog<'_> {
    async fn record(&self, error: &OperationError) -> Result<()> {
        let server_value = match &error.server_value {
            Some(value) => SqlValue::Text(serde_json::to_string(value)?),
            None => SqlValue::Null,
        };
        let (status, body) = match &error.raw_response {
            Some(raw) => (
                SqlValue::Integer(i64::from(raw.status)),
                SqlValue::Text(raw.body.clone()),
            ),
            None => (SqlValue::Null, SqlValue::Null),
        };

        // Upsert keeps the row's position so listing order stays stable
        self.conn
            .execute(
                "INSERT INTO operation_errors (
                    operation_id, table_name, item_id, kind, error_kind, message,
                    server_value, client_value, status, body, recorded_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(operation_id) DO UPDATE SET
                    kind = excluded.kind,
                    error_kind = excluded.error_kind,
                    message = excluded.message,
                    server_value = excluded.server_value,
                    client_value = excluded.client_value,
                    status = excluded.status,
                    body = excluded.body,
                    recorded_at = excluded.recorded_at",
                libsql::params![
                    error.operation_id.as_str(),
                    error.table_name.clone(),
                    error.item_id.as_str(),
                    error.kind.as_str(),
                    error.error_kind.as_str(),
                    error.message.clone(),
                    server_value,
                    serde_json::to_string(&error.client_value)?,
                    status,
                    body,
                    error.recorded_at
                ],
            )
            .await?;

        tracing::debug!(
            operation_id = %error.operation_id,
            error_kind = %error.error_kind,
            "Recorded operation error"
        );
        Ok(())
    }

    async fn get(&self, operation_id: &OperationId) -> Result<Option<OperationError>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ERROR_COLUMNS} FROM operation_errors WHERE operation_id = ?"),
                [operation_id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_error(&row)?)),
            None => Ok(None),
        }
    }

    async fn clear(&self, operation_id: &OperationId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM operation_errors WHERE operation_id = ?",
                [operation_id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<OperationError>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ERROR_COLUMNS} FROM operation_errors ORDER BY position ASC"),
                (),
            )
            .await?;

        let mut errors = Vec::new();
        while let Some(row) = rows.next().await? {
            errors.push(Self::parse_error(&row)?);
        }
        Ok(errors)
    }
}
