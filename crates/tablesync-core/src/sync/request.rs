//! Mapping of queued operations onto table service requests

use crate::error::SyncError;
use crate::models::{
    etag_from_version, strip_system_properties, version_of, OperationKind, TableOperation,
    ID_PROPERTY,
};
use crate::transport::{HttpMethod, HttpRequest};

const TABLES_PATH: &str = "tables";
const IF_MATCH: &str = "If-Match";

/// Build the remote request replaying `operation`.
///
/// Fails with a permanent error when the snapshot cannot be sent at all.
pub fn build_request(base_url: &str, operation: &TableOperation) -> Result<HttpRequest, SyncError> {
    if !operation.item.is_object() {
        return Err(SyncError::permanent(
            format!(
                "item for {}/{} is not a JSON object",
                operation.table_name, operation.item_id
            ),
            None,
        ));
    }

    let table_url = format!(
        "{}/{TABLES_PATH}/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(&operation.table_name)
    );
    let item_url = format!(
        "{table_url}/{}",
        urlencoding::encode(operation.item_id.as_str())
    );

    let (method, url, body) = match operation.kind {
        OperationKind::Insert => (
            HttpMethod::Post,
            table_url,
            Some(strip_system_properties(&operation.item)),
        ),
        OperationKind::Update => (
            HttpMethod::Patch,
            item_url,
            Some(strip_system_properties(&operation.item)),
        ),
        OperationKind::Delete => (HttpMethod::Delete, item_url, None),
        OperationKind::Undelete => (HttpMethod::Post, item_url, None),
    };

    // Rows keyed by integer ids predate optimistic concurrency
    let numeric_id = operation
        .item
        .get(ID_PROPERTY)
        .is_some_and(serde_json::Value::is_number);

    let mut headers = Vec::new();
    if operation.kind != OperationKind::Insert && !numeric_id {
        if let Some(version) = version_of(&operation.item) {
            headers.push((IF_MATCH.to_string(), etag_from_version(&version)));
        }
    }

    let body = body
        .map(|body| serde_json::to_string(&body))
        .transpose()
        .map_err(|error| {
            SyncError::permanent(format!("failed to serialize item: {error}"), None)
        })?;

    Ok(HttpRequest {
        method,
        url,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorKind, ItemId};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn operation(kind: OperationKind, item: Value) -> TableOperation {
        TableOperation::new("todo items", ItemId::new("a b"), kind, item)
    }

    #[test]
    fn insert_posts_to_table_without_precondition() {
        let request = build_request(
            "https://app.example.com/",
            &operation(
                OperationKind::Insert,
                json!({ "id": "a b", "text": "hi", "version": "v1" }),
            ),
        )
        .unwrap();

        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.url, "https://app.example.com/tables/todo%20items");
        assert_eq!(request.header("If-Match"), None);
        let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({ "id": "a b", "text": "hi" }));
    }

    #[test]
    fn update_patches_item_with_if_match() {
        let request = build_request(
            "https://app.example.com",
            &operation(
                OperationKind::Update,
                json!({ "id": "a b", "text": "hi", "version": "AAAA", "updatedAt": "x" }),
            ),
        )
        .unwrap();

        assert_eq!(request.method, HttpMethod::Patch);
        assert_eq!(request.url, "https://app.example.com/tables/todo%20items/a%20b");
        assert_eq!(request.header("if-match"), Some("\"AAAA\""));
        let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({ "id": "a b", "text": "hi" }));
    }

    #[test]
    fn update_without_version_skips_precondition() {
        let request = build_request(
            "https://app.example.com",
            &operation(OperationKind::Update, json!({ "id": "a b", "text": "hi" })),
        )
        .unwrap();
        assert!(request.headers.is_empty());
    }

    #[test]
    fn integer_keyed_row_skips_precondition() {
        let item = json!({ "id": 42, "text": "hi", "version": "AAAA" });
        let operation = TableOperation::new("todo", ItemId::new("42"), OperationKind::Update, item);

        let request = build_request("https://app.example.com", &operation).unwrap();

        assert_eq!(request.url, "https://app.example.com/tables/todo/42");
        assert_eq!(request.header("If-Match"), None);
    }

    #[test]
    fn delete_has_no_body() {
        let request = build_request(
            "https://app.example.com",
            &operation(OperationKind::Delete, json!({ "id": "a b", "version": "v9" })),
        )
        .unwrap();

        assert_eq!(request.method, HttpMethod::Delete);
        assert_eq!(request.body, None);
        assert_eq!(request.header("If-Match"), Some("\"v9\""));
    }

    #[test]
    fn undelete_posts_to_item() {
        let request = build_request(
            "https://app.example.com",
            &operation(OperationKind::Undelete, json!({ "id": "a b" })),
        )
        .unwrap();

        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.url, "https://app.example.com/tables/todo%20items/a%20b");
    }

    #[test]
    fn non_object_item_is_permanent_failure() {
        let error = build_request(
            "https://app.example.com",
            &operation(OperationKind::Update, json!(["not", "an", "object"])),
        )
        .unwrap_err();
        assert_eq!(error.kind, ErrorKind::Permanent);
    }
}
