//! Data models for tablesync

mod document;
mod operation;
mod operation_error;

pub use document::{
    as_object, ensure_insert_id, etag_from_version, item_id_of, merge_documents, set_version,
    strip_system_properties, validate_string_id, version_from_etag, version_of, ID_PROPERTY,
    SYSTEM_PROPERTIES, VERSION_PROPERTY,
};
pub use operation::{ItemId, OperationId, OperationKind, OperationState, TableOperation};
pub use operation_error::{ErrorKind, OperationError, RawResponse};
