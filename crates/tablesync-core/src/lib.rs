//! tablesync-core - Offline operation queue for REST table services
//!
//! Local mutations are recorded in a durable queue, collapsed per item and
//! pushed later in order. Failed pushes are parked with their server
//! response until the application resolves them.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sync;
pub mod transport;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{PushMode, RetryPolicy, SyncConfig};
pub use error::{Error, Result, SyncError};
pub use models::{
    ErrorKind, ItemId, OperationError, OperationId, OperationKind, OperationState, TableOperation,
};
pub use services::SyncService;
pub use sync::{PushSummary, Resolution};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
