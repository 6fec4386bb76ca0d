//! Push loop: replays queued operations against the remote table service

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{PushMode, SyncConfig};
use crate::db::{
    Database, LibSqlLocalStore, LibSqlOperationErrorLog, LibSqlOperationQueue, LocalStore,
    OperationErrorLog, OperationQueue,
};
use crate::error::{Result, SyncError};
use crate::models::{
    merge_documents, ErrorKind, OperationError, OperationId, OperationKind, OperationState,
    TableOperation,
};
use crate::transport::Transport;
use crate::util::unix_millis_now;

use super::outcome::{classify, Outcome};
use super::request::build_request;

/// Result of one push
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushSummary {
    pub completed_count: usize,
    /// Operations parked during this push, in the order they failed
    pub failed_operations: Vec<(OperationId, ErrorKind)>,
    /// The push stopped early because cancellation was requested
    pub cancelled: bool,
}

impl PushSummary {
    pub fn is_clean(&self) -> bool {
        self.failed_operations.is_empty() && !self.cancelled
    }
}

enum Step {
    Completed,
    Failed(ErrorKind),
    Cancelled,
}

/// Drives operations from the queue through the transport.
///
/// The database lock is held only around store work, never across a remote
/// call, so callers can keep queueing mutations while a push runs.
pub(crate) struct PushExecutor<'a, T> {
    db: &'a Mutex<Database>,
    transport: &'a T,
    config: &'a SyncConfig,
    cancel: &'a CancellationToken,
}

impl<'a, T: Transport> PushExecutor<'a, T> {
    pub(crate) const fn new(
        db: &'a Mutex<Database>,
        transport: &'a T,
        config: &'a SyncConfig,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            db,
            transport,
            config,
            cancel,
        }
    }

    /// Push pending operations, optionally restricted to one table
    pub(crate) async fn push(&self, table_name: Option<&str>) -> Result<PushSummary> {
        let mode = self.config.push_mode;
        let mut summary = PushSummary::default();

        tracing::info!(table = table_name, mode = ?mode, "Starting push");

        loop {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let next = {
                let db = self.db.lock().await;
                LibSqlOperationQueue::new(db.connection())
                    .dequeue_next(mode, table_name)
                    .await?
            };
            let Some(operation) = next else {
                break;
            };
            let operation_id = operation.id;

            match self.execute(operation).await? {
                Step::Completed => summary.completed_count += 1,
                Step::Failed(kind) => {
                    summary.failed_operations.push((operation_id, kind));
                    if mode == PushMode::StopOnFirstError {
                        break;
                    }
                }
                Step::Cancelled => {
                    summary.cancelled = true;
                    break;
                }
            }
        }

        tracing::info!(
            completed = summary.completed_count,
            failed = summary.failed_operations.len(),
            cancelled = summary.cancelled,
            "Push finished"
        );
        Ok(summary)
    }

    /// Run one attempted operation to completion, failure or cancellation
    async fn execute(&self, mut operation: TableOperation) -> Result<Step> {
        let policy = &self.config.retry;
        let mut retry = 0;

        loop {
            let request = match build_request(&self.config.base_url, &operation) {
                Ok(request) => request,
                Err(error) => return self.fail(&operation, error).await,
            };

            tracing::debug!(
                operation_id = %operation.id,
                method = %request.method,
                url = %request.url,
                attempt = operation.attempts,
                "Sending operation"
            );
            let result = self.transport.send(request).await;

            let error = match classify(operation.kind, result) {
                Outcome::Success(server_item) => {
                    self.complete(&operation, server_item).await?;
                    return Ok(Step::Completed);
                }
                Outcome::Failure(error) => error,
            };

            if !error.is_transient() || retry >= policy.max_retries {
                return self.fail(&operation, error).await;
            }

            let delay = policy.delay_for(retry);
            retry += 1;
            tracing::warn!(
                operation_id = %operation.id,
                retry,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error.message,
                "Transient failure; retrying"
            );

            // Back in the queue while waiting so a cancelled push leaves it replayable
            self.set_state(&operation.id, OperationState::Pending)
                .await?;
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(Step::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }

            // Re-read: mutations queued during the backoff collapsed into this row
            operation = self
                .set_state(&operation.id, OperationState::Attempted)
                .await?;
        }
    }

    async fn set_state(&self, id: &OperationId, state: OperationState) -> Result<TableOperation> {
        let db = self.db.lock().await;
        LibSqlOperationQueue::new(db.connection())
            .set_state(id, state)
            .await
    }

    /// Apply the server's copy locally and drop the operation from the queue
    async fn complete(
        &self,
        operation: &TableOperation,
        server_item: Option<serde_json::Value>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let queue = LibSqlOperationQueue::new(conn);
        let store = LibSqlLocalStore::new(conn);

        db.begin().await?;
        let result = async {
            if operation.kind != OperationKind::Delete {
                if let Some(server_item) = server_item {
                    let local = store
                        .get(&operation.table_name, &operation.item_id)
                        .await?
                        .unwrap_or_else(|| operation.item.clone());
                    store
                        .upsert(
                            &operation.table_name,
                            &operation.item_id,
                            &merge_documents(&local, &server_item),
                        )
                        .await?;
                }
            }
            queue
                .set_state(&operation.id, OperationState::Completed)
                .await?;
            queue.remove(&operation.id).await
        }
        .await;
        db.finish(result).await?;

        tracing::debug!(
            operation_id = %operation.id,
            table = %operation.table_name,
            item_id = %operation.item_id,
            kind = %operation.kind,
            "Operation completed"
        );
        Ok(())
    }

    /// Park the operation as failed and record why
    async fn fail(&self, operation: &TableOperation, error: SyncError) -> Result<Step> {
        let entry = OperationError {
            operation_id: operation.id,
            table_name: operation.table_name.clone(),
            item_id: operation.item_id.clone(),
            kind: operation.kind,
            error_kind: error.kind,
            message: error.message,
            server_value: error.server_value,
            client_value: operation.item.clone(),
            raw_response: error.raw_response,
            recorded_at: unix_millis_now(),
        };

        let db = self.db.lock().await;
        let conn = db.connection();
        db.begin().await?;
        let result = async {
            LibSqlOperationQueue::new(conn)
                .set_state(&operation.id, OperationState::Failed)
                .await?;
            LibSqlOperationErrorLog::new(conn).record(&entry).await
        }
        .await;
        db.finish(result).await?;

        tracing::warn!(
            operation_id = %operation.id,
            table = %operation.table_name,
            item_id = %operation.item_id,
            error_kind = %entry.error_kind,
            message = %entry.message,
            "Operation failed"
        );
        Ok(Step::Failed(entry.error_kind))
    }
}
