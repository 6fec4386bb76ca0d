//! Local item store implementation

use libsql::Connection;
use serde_json::Value;

use crate::error::Result;
use crate::models::ItemId;
use crate::util::unix_millis_now;

/// Trait for the local copy of synced rows (async)
#[allow(async_fn_in_trait)]
pub trait LocalStore {
    /// Get the local copy of an item
    async fn get(&self, table_name: &str, item_id: &ItemId) -> Result<Option<Value>>;

    /// Insert or replace the local copy of an item
    async fn upsert(&self, table_name: &str, item_id: &ItemId, item: &Value) -> Result<()>;

    /// Delete the local copy of an item
    async fn delete(&self, table_name: &str, item_id: &ItemId) -> Result<()>;

    /// All local items of a table, most recently written first
    async fn list(&self, table_name: &str) -> Result<Vec<Value>>;
}

/// libSQL implementation of `LocalStore`
pub struct LibSqlLocalStore<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlLocalStore<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl LocalStore for LibSqlLocalStore<'_> {
    async fn get(&self, table_name: &str, item_id: &ItemId) -> Result<Option<Value>> {
        let mut rows = self
            .conn
            .query(
                "SELECT item FROM items WHERE table_name = ? AND item_id = ?",
                [table_name, item_id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let item: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&item)?))
            }
            None => Ok(None),
        }
    }

    async fn upsert(&self, table_name: &str, item_id: &ItemId, item: &Value) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO items (table_name, item_id, item, updated_at) VALUES (?, ?, ?, ?)",
                libsql::params![
                    table_name,
                    item_id.as_str(),
                    serde_json::to_string(item)?,
                    unix_millis_now()
                ],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, table_name: &str, item_id: &ItemId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM items WHERE table_name = ? AND item_id = ?",
                [table_name, item_id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn list(&self, table_name: &str) -> Result<Vec<Value>> {
        let mut rows = self
            .conn
            .query(
                "SELECT item FROM items WHERE table_name = ? ORDER BY updated_at DESC, item_id ASC",
                [table_name],
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            let item: String = row.get(0)?;
            items.push(serde_json::from_str(&item)?);
        }
        Ok(items)
    }
}
