//! Caller-driven resolution of failed operations

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{
    Database, LibSqlLocalStore, LibSqlOperationErrorLog, LibSqlOperationQueue, LocalStore,
    OperationErrorLog, OperationQueue,
};
use crate::error::{Error, Result};
use crate::models::{
    as_object, item_id_of, set_version, ErrorKind, ItemId, OperationError, OperationId,
    OperationKind, OperationState, TableOperation, ID_PROPERTY,
};

/// How to settle a failed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "resolution", content = "item")]
pub enum Resolution {
    /// Resend the local snapshot, overwriting the server copy
    KeepLocal,
    /// Drop the operation and adopt the server copy locally
    KeepRemote,
    /// Resend a caller-merged item against the server's version
    Merge(Value),
    /// Drop the operation and leave the local copy as it is
    CancelAndDiscard,
    /// Drop the operation and overwrite the local copy with the given item,
    /// or with the server copy recorded for the failure when `None`
    CancelAndUpdate(Option<Value>),
    /// Requeue the operation unchanged
    Retry,
}

impl Resolution {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
            Self::Merge(_) => "merge",
            Self::CancelAndDiscard => "cancel_and_discard",
            Self::CancelAndUpdate(_) => "cancel_and_update",
            Self::Retry => "retry",
        }
    }
}

/// Apply `resolution` to the failed operation `id` in one transaction
pub(crate) async fn resolve(db: &Database, id: &OperationId, resolution: Resolution) -> Result<()> {
    let conn = db.connection();
    let queue = LibSqlOperationQueue::new(conn);

    let operation = queue
        .get(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("operation {id}")))?;
    if operation.state != OperationState::Failed {
        return Err(Error::InvalidState {
            operation_id: *id,
            state: operation.state,
            action: format!("resolution {}", resolution.as_str()),
        });
    }

    let action = resolution.as_str();
    db.begin().await?;
    let result = Resolver {
        queue,
        errors: LibSqlOperationErrorLog::new(conn),
        store: LibSqlLocalStore::new(conn),
    }
    .apply(&operation, resolution)
    .await;
    db.finish(result).await?;

    tracing::info!(
        operation_id = %id,
        table = %operation.table_name,
        item_id = %operation.item_id,
        resolution = action,
        "Resolved failed operation"
    );
    Ok(())
}

struct Resolver<'a> {
    queue: LibSqlOperationQueue<'a>,
    errors: LibSqlOperationErrorLog<'a>,
    store: LibSqlLocalStore<'a>,
}

impl Resolver<'_> {
    async fn apply(&self, operation: &TableOperation, resolution: Resolution) -> Result<()> {
        let entry = self.errors.get(&operation.id).await?;

        match resolution {
            Resolution::KeepLocal => {
                let item = operation.item.clone();
                self.requeue(operation, entry.as_ref(), item).await
            }
            Resolution::Merge(item) => {
                let item = checked_item(item, &operation.item_id)?;
                self.requeue(operation, entry.as_ref(), item).await
            }
            Resolution::KeepRemote => {
                let server_value = entry.and_then(|entry| entry.server_value);
                match server_value {
                    Some(server_value) => {
                        self.store
                            .upsert(&operation.table_name, &operation.item_id, &server_value)
                            .await?;
                    }
                    // An insert the server never accepted has no remote copy
                    None if operation.kind == OperationKind::Insert => {
                        self.store
                            .delete(&operation.table_name, &operation.item_id)
                            .await?;
                    }
                    None => {}
                }
                self.drop_operation(&operation.id).await
            }
            Resolution::CancelAndDiscard => self.drop_operation(&operation.id).await,
            Resolution::CancelAndUpdate(item) => {
                let item = match item {
                    Some(item) => item,
                    None => entry.and_then(|entry| entry.server_value).ok_or_else(|| {
                        Error::InvalidInput(format!(
                            "operation {} has no server copy to apply",
                            operation.id
                        ))
                    })?,
                };
                let item = checked_item(item, &operation.item_id)?;
                self.store
                    .upsert(&operation.table_name, &operation.item_id, &item)
                    .await?;
                self.drop_operation(&operation.id).await
            }
            Resolution::Retry => {
                self.queue
                    .set_state(&operation.id, OperationState::Pending)
                    .await?;
                self.errors.clear(&operation.id).await
            }
        }
    }

    /// Put `item` back in the queue, carrying the server's version when the
    /// failure was a conflict
    async fn requeue(
        &self,
        operation: &TableOperation,
        entry: Option<&OperationError>,
        mut item: Value,
    ) -> Result<()> {
        let conflict = entry.filter(|entry| entry.error_kind == ErrorKind::Conflict);
        let server_version = conflict.and_then(OperationError::server_version);
        if let Some(version) = &server_version {
            set_version(&mut item, version);
        }

        // The row already exists remotely, so a forced insert becomes an update
        let kind = match (operation.kind, conflict) {
            (OperationKind::Insert, Some(_)) => OperationKind::Update,
            (kind, _) => kind,
        };

        self.queue.rewrite(&operation.id, kind, &item).await?;
        self.queue
            .set_state(&operation.id, OperationState::Pending)
            .await?;
        self.errors.clear(&operation.id).await?;

        if kind != OperationKind::Delete {
            self.store
                .upsert(&operation.table_name, &operation.item_id, &item)
                .await?;
        }
        Ok(())
    }

    async fn drop_operation(&self, id: &OperationId) -> Result<()> {
        self.errors.clear(id).await?;
        self.queue.remove(id).await
    }
}

/// Validate a caller-supplied replacement item for `item_id`
fn checked_item(mut item: Value, item_id: &ItemId) -> Result<Value> {
    as_object(&item)?;
    let has_id = item
        .get(ID_PROPERTY)
        .is_some_and(|id| !id.is_null());

    if has_id {
        let id = item_id_of(&item)?;
        if &id != item_id {
            return Err(Error::InvalidInput(format!(
                "replacement item id '{id}' does not match '{item_id}'"
            )));
        }
    } else if let Value::Object(map) = &mut item {
        map.insert(
            ID_PROPERTY.to_string(),
            Value::String(item_id.as_str().to_string()),
        );
    }
    Ok(item)
}
