//! Services shared by applications embedding the sync queue

mod sync_service;

pub use sync_service::SyncService;
