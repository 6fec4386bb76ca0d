//! Shared sync service wrapper used by applications.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::db::{
    Database, LibSqlLocalStore, LibSqlOperationErrorLog, LibSqlOperationQueue, LocalStore,
    OperationErrorLog, OperationQueue,
};
use crate::error::{Error, Result};
use crate::models::{
    ensure_insert_id, item_id_of, merge_documents, ItemId, OperationError, OperationId,
    OperationKind, TableOperation,
};
use crate::sync::{self, PushExecutor, PushSummary, Resolution};
use crate::transport::{ReqwestTransport, Transport};

/// Thread-safe front door to one offline operation queue.
///
/// Local writes land in the item store and the queue in one transaction.
/// Pushes are serialized; queueing stays available while a push waits on
/// the network.
pub struct SyncService<T> {
    db: Arc<Mutex<Database>>,
    push_lock: Arc<Mutex<()>>,
    transport: Arc<T>,
    config: SyncConfig,
    cancel: Arc<Mutex<CancellationToken>>,
    db_path: Option<PathBuf>,
}

impl<T> Clone for SyncService<T> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            push_lock: Arc::clone(&self.push_lock),
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            cancel: Arc::clone(&self.cancel),
            db_path: self.db_path.clone(),
        }
    }
}

impl SyncService<ReqwestTransport> {
    /// Open a service at `db_path` talking HTTP with the configured timeout
    pub async fn open_http(db_path: impl Into<PathBuf>, config: SyncConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.request_timeout())
            .map_err(|error| Error::Transport(error.to_string()))?;
        Self::open_path(db_path, config, transport).await
    }
}

impl<T: Transport> SyncService<T> {
    /// Open a service backed by the database at the given filesystem path.
    ///
    /// Operations left mid-push by a previous process are requeued.
    pub async fn open_path(
        db_path: impl Into<PathBuf>,
        config: SyncConfig,
        transport: T,
    ) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        tracing::info!(
            path = %db_path.display(),
            remote = %config.base_url,
            "Opened sync queue"
        );
        Self::from_database(db, config, transport, Some(db_path)).await
    }

    /// Open an in-memory service (primarily for tests).
    pub async fn open_in_memory(config: SyncConfig, transport: T) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Self::from_database(db, config, transport, None).await
    }

    async fn from_database(
        db: Database,
        config: SyncConfig,
        transport: T,
        db_path: Option<PathBuf>,
    ) -> Result<Self> {
        LibSqlOperationQueue::new(db.connection())
            .recover_interrupted()
            .await?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            push_lock: Arc::new(Mutex::new(())),
            transport: Arc::new(transport),
            config,
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            db_path,
        })
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Token stopping the current or next `push`/`push_table` of this
    /// service and its clones.
    ///
    /// The push that observes the cancellation replaces the token, so fetch
    /// a fresh one for every push you may want to stop.
    pub async fn cancellation_token(&self) -> CancellationToken {
        self.cancel.lock().await.clone()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Queue an insert. A missing `id` is generated; the item with its final
    /// id is written to the local store.
    pub async fn enqueue_insert(&self, table_name: &str, mut item: Value) -> Result<OperationId> {
        let item_id = ensure_insert_id(&mut item)?;
        self.enqueue(table_name, item_id, OperationKind::Insert, item)
            .await
    }

    /// Queue an update; `item` may carry only the changed fields
    pub async fn enqueue_update(&self, table_name: &str, item: Value) -> Result<OperationId> {
        let item_id = item_id_of(&item)?;
        self.enqueue(table_name, item_id, OperationKind::Update, item)
            .await
    }

    /// Queue a delete and drop the local copy
    pub async fn enqueue_delete(&self, table_name: &str, item: Value) -> Result<OperationId> {
        let item_id = item_id_of(&item)?;
        self.enqueue(table_name, item_id, OperationKind::Delete, item)
            .await
    }

    /// Queue an undelete of a soft-deleted row
    pub async fn enqueue_undelete(&self, table_name: &str, item: Value) -> Result<OperationId> {
        let item_id = item_id_of(&item)?;
        self.enqueue(table_name, item_id, OperationKind::Undelete, item)
            .await
    }

    async fn enqueue(
        &self,
        table_name: &str,
        item_id: ItemId,
        kind: OperationKind,
        item: Value,
    ) -> Result<OperationId> {
        let table_name = table_name.trim();
        if table_name.is_empty() {
            return Err(Error::InvalidInput("table name cannot be empty".to_string()));
        }

        let db = self.db.lock().await;
        let conn = db.connection();
        let store = LibSqlLocalStore::new(conn);
        let queue = LibSqlOperationQueue::new(conn);

        db.begin().await?;
        let result: Result<OperationId> = async {
            // Queue the full local snapshot so version tokens travel with it
            let snapshot = match store.get(table_name, &item_id).await? {
                Some(local) => merge_documents(&local, &item),
                None => item,
            };
            let operation = queue
                .enqueue(table_name, &item_id, kind, snapshot.clone())
                .await?;

            if kind == OperationKind::Delete {
                store.delete(table_name, &item_id).await?;
            } else {
                store.upsert(table_name, &item_id, &snapshot).await?;
            }
            Ok(operation.id)
        }
        .await;
        db.finish(result).await
    }

    /// Push every pending operation
    pub async fn push(&self) -> Result<PushSummary> {
        self.push_with_service_token(None).await
    }

    /// Push the pending operations of one table
    pub async fn push_table(&self, table_name: &str) -> Result<PushSummary> {
        self.push_with_service_token(Some(table_name)).await
    }

    async fn push_with_service_token(&self, table_name: Option<&str>) -> Result<PushSummary> {
        let _push = self.push_lock.lock().await;
        let cancel = self.cancel.lock().await.clone();
        let result = self.run_push(table_name, &cancel).await;

        if cancel.is_cancelled() {
            let mut current = self.cancel.lock().await;
            if current.is_cancelled() {
                *current = CancellationToken::new();
                tracing::debug!("Re-armed push cancellation token");
            }
        }
        result
    }

    /// Push, stopping between operations or during a backoff once `cancel`
    /// fires. A request already on the wire runs to completion.
    pub async fn push_with_cancellation(
        &self,
        table_name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<PushSummary> {
        let _push = self.push_lock.lock().await;
        self.run_push(table_name, cancel).await
    }

    async fn run_push(
        &self,
        table_name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<PushSummary> {
        PushExecutor::new(&self.db, self.transport.as_ref(), &self.config, cancel)
            .push(table_name)
            .await
    }

    /// All recorded operation failures, oldest first
    pub async fn get_errors(&self) -> Result<Vec<OperationError>> {
        let db = self.db.lock().await;
        LibSqlOperationErrorLog::new(db.connection())
            .list_all()
            .await
    }

    /// Settle a failed operation
    pub async fn resolve(&self, operation_id: &OperationId, resolution: Resolution) -> Result<()> {
        let db = self.db.lock().await;
        sync::resolve(&db, operation_id, resolution).await
    }

    /// Queued operations in push order, including failed ones
    pub async fn pending_operations(&self) -> Result<Vec<TableOperation>> {
        let db = self.db.lock().await;
        LibSqlOperationQueue::new(db.connection()).list_all().await
    }

    /// Number of operations waiting to be pushed
    pub async fn pending_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlOperationQueue::new(db.connection())
            .pending_count()
            .await
    }

    /// Local copy of an item
    pub async fn local_item(&self, table_name: &str, item_id: &ItemId) -> Result<Option<Value>> {
        let db = self.db.lock().await;
        LibSqlLocalStore::new(db.connection())
            .get(table_name, item_id)
            .await
    }

    /// All local items of a table
    pub async fn local_items(&self, table_name: &str) -> Result<Vec<Value>> {
        let db = self.db.lock().await;
        LibSqlLocalStore::new(db.connection())
            .list(table_name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn service() -> SyncService<ScriptedTransport> {
        let config = SyncConfig::new("https://app.example.com").unwrap();
        SyncService::open_in_memory(config, ScriptedTransport::new())
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_enqueue_writes_local_and_queue() {
        let service = service().await;
        let id = service
            .enqueue_insert("todo", json!({ "id": "a", "text": "hi" }))
            .await
            .unwrap();

        let operations = service.pending_operations().await.unwrap();
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].id, id);
        assert_eq!(
            service.local_items("todo").await.unwrap(),
            vec![json!({ "id": "a", "text": "hi" })]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn partial_update_queues_full_snapshot() {
        let service = service().await;
        service
            .enqueue_insert("todo", json!({ "id": "a", "text": "hi", "done": false }))
            .await
            .unwrap();
        service
            .enqueue_update("todo", json!({ "id": "a", "done": true }))
            .await
            .unwrap();

        let operation = &service.pending_operations().await.unwrap()[0];
        assert_eq!(operation.kind, OperationKind::Insert);
        assert_eq!(operation.item, json!({ "id": "a", "text": "hi", "done": true }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_invalid_input() {
        let service = service().await;

        assert!(matches!(
            service.enqueue_insert("  ", json!({ "id": "a" })).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            service.enqueue_insert("todo", json!({ "id": 7 })).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            service.enqueue_update("todo", json!({ "text": "no id" })).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(service.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn service_token_cancels_push() {
        let service = service().await;
        service
            .enqueue_insert("todo", json!({ "id": "a" }))
            .await
            .unwrap();

        service.clone().cancellation_token().await.cancel();
        let summary = service.push().await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(service.transport().request_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_push_re_arms_service_token() {
        let service = service().await;
        service
            .enqueue_insert("todo", json!({ "id": "a" }))
            .await
            .unwrap();

        let first = service.cancellation_token().await;
        first.cancel();
        assert!(service.push().await.unwrap().cancelled);

        let fresh = service.cancellation_token().await;
        assert!(!fresh.is_cancelled());
        let summary = service.clone().push_table("todo").await.unwrap();

        assert!(!summary.cancelled);
        assert_eq!(summary.completed_count, 1);
        assert_eq!(service.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_after_insert_drops_local_copy() {
        let service = service().await;
        service
            .enqueue_insert("todo", json!({ "id": "a" }))
            .await
            .unwrap();
        service
            .enqueue_delete("todo", json!({ "id": "a" }))
            .await
            .unwrap();

        let operations = service.pending_operations().await.unwrap();
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].kind, OperationKind::Delete);
        assert_eq!(
            service.local_item("todo", &ItemId::new("a")).await.unwrap(),
            None
        );
    }
}
