//! Classification of remote responses

use serde_json::Value;

use crate::error::SyncError;
use crate::models::{set_version, version_from_etag, OperationKind, RawResponse};
use crate::transport::{HttpResponse, TransportError};
use crate::util::compact_text;

const STATUS_NOT_FOUND: u16 = 404;
const STATUS_REQUEST_TIMEOUT: u16 = 408;
const STATUS_CONFLICT: u16 = 409;
const STATUS_PRECONDITION_FAILED: u16 = 412;
const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// What happened to one remote attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Applied remotely; carries the server's copy of the item when it sent one
    Success(Option<Value>),
    Failure(SyncError),
}

/// Classify the result of sending an operation of `kind`
pub fn classify(kind: OperationKind, result: Result<HttpResponse, TransportError>) -> Outcome {
    let response = match result {
        Ok(response) => response,
        Err(error) => return Outcome::Failure(SyncError::transient(error.to_string(), None)),
    };

    if response.is_success() {
        return Outcome::Success(server_document(&response));
    }

    let status = response.status;
    // The row is already gone remotely, which is what a delete wants
    if kind == OperationKind::Delete && status == STATUS_NOT_FOUND {
        return Outcome::Success(None);
    }

    let raw = RawResponse {
        status,
        body: response.body.clone(),
    };
    let message = format!("HTTP {status}: {}", compact_text(&response.body));

    let error = match status {
        STATUS_CONFLICT | STATUS_PRECONDITION_FAILED => {
            SyncError::conflict(message, server_document(&response), raw)
        }
        STATUS_REQUEST_TIMEOUT | STATUS_TOO_MANY_REQUESTS | 500..=599 => {
            SyncError::transient(message, Some(raw))
        }
        _ => SyncError::permanent(message, Some(raw)),
    };
    Outcome::Failure(error)
}

/// Item document from a response body, with the version taken from `ETag`
fn server_document(response: &HttpResponse) -> Option<Value> {
    let body = response.body.trim();
    if body.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(body) {
        Ok(mut document) if document.is_object() => {
            if let Some(etag) = response.header("ETag") {
                set_version(&mut document, &version_from_etag(etag));
            }
            Some(document)
        }
        Ok(_) => None,
        Err(error) => {
            tracing::warn!(
                status = response.status,
                %error,
                "Ignoring non-JSON response body"
            );
            None
        }
    }
}
