//! Database layer for tablesync

mod connection;
mod error_log;
mod local_store;
mod migrations;
mod operation_queue;

pub use connection::Database;
pub use error_log::{LibSqlOperationErrorLog, OperationErrorLog};
pub use local_store::{LibSqlLocalStore, LocalStore};
pub use operation_queue::{LibSqlOperationQueue, OperationQueue};
