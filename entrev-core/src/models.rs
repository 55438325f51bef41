use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub type Fields = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Post,
    Comment,
    Option,
    User,
    Term,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Post,
        EntityKind::Comment,
        EntityKind::Option,
        EntityKind::User,
        EntityKind::Term,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Post => "post",
            EntityKind::Comment => "comment",
            EntityKind::Option => "option",
            EntityKind::User => "user",
            EntityKind::Term => "term",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "post" => Some(EntityKind::Post),
            "comment" => Some(EntityKind::Comment),
            "option" => Some(EntityKind::Option),
            "user" => Some(EntityKind::User),
            "term" => Some(EntityKind::Term),
            _ => None,
        }
    }

    /// Name of the storage directory holding this kind's snapshots.
    pub fn directory(&self) -> &'static str {
        match self {
            EntityKind::Post => "posts",
            EntityKind::Comment => "comments",
            EntityKind::Option => "options",
            EntityKind::User => "users",
            EntityKind::Term => "terms",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version-tracking identity. Stable for the entity's whole lifecycle and
/// independent of any primary key in the live store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId(String);

impl VersionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string().to_uppercase())
    }

    /// Identities double as file names, so only a conservative character set
    /// is accepted.
    pub fn parse(s: &str) -> Result<Self> {
        let valid = !s.is_empty()
            && s.len() <= 128
            && !s.starts_with('.')
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');

        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidIdentity(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VersionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        VersionId::parse(&value)
    }
}

impl From<VersionId> for String {
    fn from(id: VersionId) -> Self {
        id.0
    }
}

/// Primary key of a record in the live store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LiveId(pub u64);

impl fmt::Display for LiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of one snapshot: entity kind plus identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: VersionId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: VersionId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Canonical field value. Numbers are integers; anything that arrives as an
/// integral float is folded into `Int`, other floats are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Converts inbound JSON. `null` means "field absent" and yields `None`.
    pub fn from_json(field: &str, json: serde_json::Value) -> Result<Option<Value>> {
        use serde_json::Value as Json;

        let value = match json {
            Json::Null => return Ok(None),
            Json::Bool(b) => Value::Bool(b),
            Json::String(s) => Value::Str(s),
            Json::Number(n) => Value::Int(Self::canonical_int(field, &n)?),
            Json::Array(items) => {
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    match Value::from_json(field, item)? {
                        Some(v) => list.push(v),
                        None => {
                            return Err(Error::Encoding {
                                field: field.to_string(),
                                reason: "null inside a list".to_string(),
                            })
                        }
                    }
                }
                Value::List(list)
            }
            Json::Object(map) => {
                let mut out = BTreeMap::new();
                for (key, item) in map {
                    if let Some(v) = Value::from_json(field, item)? {
                        out.insert(key, v);
                    }
                }
                Value::Map(out)
            }
        };

        Ok(Some(value))
    }

    fn canonical_int(field: &str, n: &serde_json::Number) -> Result<i64> {
        if let Some(i) = n.as_i64() {
            return Ok(i);
        }
        match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                Ok(f as i64)
            }
            _ => Err(Error::Encoding {
                field: field.to_string(),
                reason: format!("unsupported number {}", n),
            }),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Short human form used in commit summaries and CLI output.
    pub fn display(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Str(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub vp_id: VersionId,
    pub fields: Fields,
}

impl Entity {
    pub fn new(kind: EntityKind, vp_id: VersionId) -> Self {
        Self {
            kind,
            vp_id,
            fields: Fields::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Builds an entity from a JSON object of fields.
    pub fn from_json(
        kind: EntityKind,
        vp_id: VersionId,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self> {
        let mut entity = Entity::new(kind, vp_id);
        for (name, json) in fields {
            if name.is_empty() {
                return Err(Error::Encoding {
                    field: name,
                    reason: "empty field name".to_string(),
                });
            }
            if let Some(value) = Value::from_json(&name, json)? {
                entity.fields.insert(name, value);
            }
        }
        Ok(entity)
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.vp_id.clone())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_id_generation() {
        let id = VersionId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id.as_str(), id.as_str().to_uppercase());
    }

    #[test]
    fn test_version_id_rejects_path_characters() {
        assert!(VersionId::parse("blogname").is_ok());
        assert!(VersionId::parse("../etc").is_err());
        assert!(VersionId::parse("a/b").is_err());
        assert!(VersionId::parse("").is_err());
        assert!(VersionId::parse(".hidden").is_err());
    }

    #[test]
    fn test_value_canonical_numbers() {
        assert_eq!(
            Value::from_json("n", json!(3.0)).unwrap(),
            Some(Value::Int(3))
        );
        assert!(Value::from_json("n", json!(3.5)).is_err());
        assert_eq!(Value::from_json("n", json!(null)).unwrap(), None);
    }

    #[test]
    fn test_entity_from_json_drops_nulls() {
        let fields = json!({"post_title": "Hello", "post_parent": null, "menu_order": 0});
        let entity = Entity::from_json(
            EntityKind::Post,
            VersionId::generate(),
            fields.as_object().cloned().unwrap(),
        )
        .unwrap();

        assert_eq!(entity.get_str("post_title"), Some("Hello"));
        assert!(entity.get("post_parent").is_none());
        assert_eq!(entity.get("menu_order"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_entity_from_json_rejects_unsupported_values() {
        let fields = json!({"ratio": 0.25});
        let err = Entity::from_json(
            EntityKind::Option,
            VersionId::parse("ratio").unwrap(),
            fields.as_object().cloned().unwrap(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::Encoding { field, .. } if field == "ratio"));
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
    }
}
