//! Helpers over the JSON item documents carried by operations.
//!
//! Items are plain JSON objects. The `id` property is the row key and the
//! `version` system property holds the optimistic concurrency token.

use serde_json::{Map, Value};
use uuid::Uuid;

use super::ItemId;
use crate::error::{Error, Result};

/// Property holding the primary key
pub const ID_PROPERTY: &str = "id";

/// System property holding the version token
pub const VERSION_PROPERTY: &str = "version";

/// Server-managed properties that are never sent back on update
pub const SYSTEM_PROPERTIES: [&str; 4] = [VERSION_PROPERTY, "createdAt", "updatedAt", "deleted"];

const MAX_STRING_ID_LEN: usize = 255;

/// Quote a version token for use in an `If-Match` header
pub fn etag_from_version(version: &str) -> String {
    format!("\"{}\"", version.replace('"', "\\\""))
}

/// Extract the version token from an `ETag` header value
pub fn version_from_etag(etag: &str) -> String {
    let etag = etag.trim();
    let etag = etag.strip_prefix("W/").unwrap_or(etag);
    let unquoted = etag
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .unwrap_or(etag);
    unquoted.replace("\\\"", "\"")
}

/// Version token stored on an item, if any
pub fn version_of(item: &Value) -> Option<String> {
    match item.get(VERSION_PROPERTY)? {
        Value::String(version) if !version.is_empty() => Some(version.clone()),
        _ => None,
    }
}

/// Replace the version token on an item object
pub fn set_version(item: &mut Value, version: &str) {
    if let Value::Object(map) = item {
        map.insert(
            VERSION_PROPERTY.to_string(),
            Value::String(version.to_string()),
        );
    }
}

/// Copy of `item` without server-managed properties
pub fn strip_system_properties(item: &Value) -> Value {
    match item {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !SYSTEM_PROPERTIES.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Shallow merge: every top-level field of `patch` overwrites the one in
/// `base`. Non-object inputs yield `patch` unchanged.
pub fn merge_documents(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            let mut merged: Map<String, Value> = base.clone();
            for (key, value) in patch {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => patch.clone(),
    }
}

/// Read the row key of an existing item (string or integer)
pub fn item_id_of(item: &Value) -> Result<ItemId> {
    let map = as_object(item)?;
    match map.get(ID_PROPERTY) {
        Some(Value::String(id)) => {
            validate_string_id(id)?;
            Ok(ItemId::new(id.clone()))
        }
        Some(Value::Number(number)) => number
            .as_i64()
            .filter(|id| *id > 0)
            .map(|id| ItemId::new(id.to_string()))
            .ok_or_else(|| Error::InvalidInput(format!("invalid numeric id {number}"))),
        Some(_) => Err(Error::InvalidInput(
            "item id must be a string or an integer".to_string(),
        )),
        None => Err(Error::InvalidInput("item has no id".to_string())),
    }
}

/// Resolve the key for an item about to be inserted.
///
/// Offline inserts need the key before the server sees the row, so a missing
/// or null `id` is filled with a fresh UUID v7 string. Numeric ids are
/// server-assigned and cannot be queued.
pub fn ensure_insert_id(item: &mut Value) -> Result<ItemId> {
    let map = match item {
        Value::Object(map) => map,
        _ => return Err(Error::InvalidInput("item must be a JSON object".to_string())),
    };

    match map.get(ID_PROPERTY) {
        None | Some(Value::Null) => {
            let id = Uuid::now_v7().to_string();
            map.insert(ID_PROPERTY.to_string(), Value::String(id.clone()));
            Ok(ItemId::new(id))
        }
        Some(Value::String(id)) => {
            validate_string_id(id)?;
            Ok(ItemId::new(id.clone()))
        }
        Some(Value::Number(_)) => Err(Error::InvalidInput(
            "offline inserts require a string id; numeric ids are assigned by the server"
                .to_string(),
        )),
        Some(_) => Err(Error::InvalidInput(
            "item id must be a string".to_string(),
        )),
    }
}

/// Reject ids the service cannot route (`/`, quotes, control characters...)
pub fn validate_string_id(id: &str) -> Result<()> {
    let invalid = id.is_empty()
        || id.len() > MAX_STRING_ID_LEN
        || id == "."
        || id == ".."
        || id
            .chars()
            .any(|c| c.is_control() || matches!(c, '"' | '+' | '?' | '\\' | '/' | '`'));

    if invalid {
        Err(Error::InvalidInput(format!("invalid item id '{id}'")))
    } else {
        Ok(())
    }
}

pub fn as_object(item: &Value) -> Result<&Map<String, Value>> {
    item.as_object()
        .ok_or_else(|| Error::InvalidInput("item must be a JSON object".to_string()))
}
