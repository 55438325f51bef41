//! On-disk snapshot format.
//!
//! Snapshots are pretty-printed JSON with a fixed envelope (`kind`, `vp_id`,
//! `fields`) and lexicographically ordered field names, one field per line.
//! Two equal entities always encode to identical bytes.

use crate::error::{Error, Result};
use crate::models::{Entity, EntityKind, Fields, Value, VersionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize)]
struct SnapshotOut<'a> {
    kind: EntityKind,
    vp_id: &'a VersionId,
    fields: &'a Fields,
}

#[derive(Deserialize)]
struct SnapshotIn {
    kind: EntityKind,
    vp_id: String,
    fields: serde_json::Map<String, serde_json::Value>,
}

pub fn encode(entity: &Entity) -> Result<Vec<u8>> {
    for name in entity.fields.keys() {
        if name.is_empty() {
            return Err(Error::Encoding {
                field: name.clone(),
                reason: "empty field name".to_string(),
            });
        }
    }

    let snapshot = SnapshotOut {
        kind: entity.kind,
        vp_id: &entity.vp_id,
        fields: &entity.fields,
    };

    let mut bytes = serde_json::to_vec_pretty(&snapshot).map_err(|e| Error::Encoding {
        field: String::new(),
        reason: e.to_string(),
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<Entity> {
    decode_at(bytes, "<memory>")
}

/// Decodes a snapshot, naming `location` in any corruption error.
pub fn decode_at(bytes: &[u8], location: &str) -> Result<Entity> {
    let corrupt = |reason: String| Error::CorruptData {
        location: location.to_string(),
        reason,
    };

    let raw: SnapshotIn = serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
    let vp_id = VersionId::parse(&raw.vp_id).map_err(|e| corrupt(e.to_string()))?;

    let mut fields = Fields::new();
    for (name, json) in raw.fields {
        let value = strict_value(json).ok_or_else(|| corrupt(format!("bad value in '{}'", name)))?;
        fields.insert(name, value);
    }

    Ok(Entity {
        kind: raw.kind,
        vp_id,
        fields,
    })
}

/// The encoder never writes nulls or fractional numbers, so a snapshot that
/// contains them did not come from us.
fn strict_value(json: serde_json::Value) -> Option<Value> {
    use serde_json::Value as Json;

    match json {
        Json::Null => None,
        Json::Bool(b) => Some(Value::Bool(b)),
        Json::String(s) => Some(Value::Str(s)),
        Json::Number(n) => n.as_i64().map(Value::Int),
        Json::Array(items) => items
            .into_iter()
            .map(strict_value)
            .collect::<Option<Vec<_>>>()
            .map(Value::List),
        Json::Object(map) => map
            .into_iter()
            .map(|(k, v)| strict_value(v).map(|v| (k, v)))
            .collect::<Option<BTreeMap<_, _>>>()
            .map(Value::Map),
    }
}
