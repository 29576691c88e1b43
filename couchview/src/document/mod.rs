// Document codec - mapping between caller records and stored CouchDB documents

use crate::error::{CouchError, Result};
use crate::schema::{ModelDefinition, PropertyType};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Internal identifier field of a stored document.
pub const ID_FIELD: &str = "_id";
/// Revision field of a stored document.
pub const REV_FIELD: &str = "_rev";
/// Field that tags a stored document with the model it belongs to.
pub const MODEL_TAG: &str = "loopbackModel";
/// Soft-delete marker understood by CouchDB bulk writes.
pub const DELETED_FIELD: &str = "_deleted";
/// Public identifier field of a record.
pub const PUBLIC_ID: &str = "id";

/// An application-level record: public id, revision token and attributes.
///
/// Date attributes are carried as RFC 3339 strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    /// Build a record from a JSON object, lifting `id` and `_rev` out of the attributes.
    pub fn from_value(value: Value) -> Result<Self> {
        let record: Record = serde_json::from_value(value)?;
        Ok(record)
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        if let Some(id) = &self.id {
            obj.insert(PUBLIC_ID.into(), Value::String(id.clone()));
        }
        if let Some(rev) = &self.rev {
            obj.insert(REV_FIELD.into(), Value::String(rev.clone()));
        }
        for (k, v) in &self.data {
            obj.insert(k.clone(), v.clone());
        }
        Value::Object(obj)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.rev.is_none() && self.data.is_empty()
    }

    /// Shallow merge: every attribute in `attributes` overwrites the record's value.
    pub fn merge(&mut self, attributes: &Map<String, Value>) {
        for (key, value) in attributes {
            match key.as_str() {
                PUBLIC_ID => {
                    if let Some(id) = value_to_id(value) {
                        self.id = Some(id);
                    }
                }
                REV_FIELD => self.rev = value.as_str().map(str::to_string),
                _ => {
                    self.data.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Remove any soft-delete marker the caller may have supplied.
    pub fn strip_deleted(&mut self) {
        self.data.remove(DELETED_FIELD);
    }
}

/// Convert a record into the stored document shape for `model`.
///
/// The record is not modified; a new document value is returned.
pub fn to_storage(model: &ModelDefinition, record: &Record) -> Result<Value> {
    let mut doc = Map::new();

    if let Some(id) = &record.id {
        doc.insert(ID_FIELD.into(), Value::String(id.clone()));
    }
    if let Some(rev) = &record.rev {
        doc.insert(REV_FIELD.into(), Value::String(rev.clone()));
    }

    for (key, value) in &record.data {
        match key.as_str() {
            // The identifier and tag are owned by the codec, never by attributes
            ID_FIELD | MODEL_TAG => continue,
            // A literal null revision is dropped rather than written
            REV_FIELD if value.is_null() => continue,
            PUBLIC_ID => {
                if let Some(id) = value_to_id(value) {
                    doc.insert(ID_FIELD.into(), Value::String(id));
                }
                continue;
            }
            _ => {}
        }
        let stored = match model.kind_of(key) {
            Some(kind) => normalize_key(kind, value),
            None => value.clone(),
        };
        doc.insert(key.clone(), stored);
    }

    doc.insert(MODEL_TAG.into(), Value::String(model.name.clone()));

    Ok(Value::Object(doc))
}

/// Convert a stored document back into a record. `None` passes through as `None`.
pub fn from_storage(model: &ModelDefinition, doc: Option<Value>) -> Result<Option<Record>> {
    let doc = match doc {
        Some(Value::Object(map)) => map,
        Some(Value::Null) | None => return Ok(None),
        Some(other) => {
            return Err(CouchError::Other(format!(
                "Stored document must be a JSON object, got {}",
                type_name(&other)
            )))
        }
    };

    let mut record = Record::new();
    for (key, value) in doc {
        match key.as_str() {
            ID_FIELD | PUBLIC_ID => {
                // `_id` always wins over an already-unwrapped `id`
                if key == ID_FIELD || record.id.is_none() {
                    record.id = value_to_id(&value);
                }
            }
            REV_FIELD => record.rev = value.as_str().map(str::to_string),
            MODEL_TAG => {}
            _ => {
                let restored = match model.kind_of(&key) {
                    Some(PropertyType::Date) => millis_to_date(&value),
                    _ => value,
                };
                record.data.insert(key, restored);
            }
        }
    }

    Ok(Some(record))
}

/// Normalize a value for storage or key comparison against a property of `kind`.
/// Date strings become epoch milliseconds; every other value passes through.
pub fn normalize_key(kind: &PropertyType, value: &Value) -> Value {
    match kind {
        PropertyType::Date => match value {
            Value::String(s) => match parse_date(s) {
                Some(date) => Value::from(date.timestamp_millis()),
                None => value.clone(),
            },
            _ => value.clone(),
        },
        PropertyType::String
        | PropertyType::Number
        | PropertyType::Boolean
        | PropertyType::Object
        | PropertyType::Array
        | PropertyType::Any
        | PropertyType::Custom(_) => value.clone(),
    }
}

/// Normalize `value` using the kind of `property` on `model`, if declared.
pub fn normalize_for(model: &ModelDefinition, property: &str, value: &Value) -> Value {
    match model.kind_of(property) {
        Some(kind) => normalize_key(kind, value),
        None => value.clone(),
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn millis_to_date(value: &Value) -> Value {
    let millis = match value.as_i64() {
        Some(ms) => ms,
        None => return value.clone(),
    };
    match Utc.timestamp_millis_opt(millis).single() {
        Some(date) => Value::String(date.to_rfc3339_opts(SecondsFormat::Millis, true)),
        None => value.clone(),
    }
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(number_to_id(n)),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Document id for a numeric value. Whole floats print without a fraction,
/// so `1.0` and `1` name the same document.
pub(crate) fn number_to_id(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if !n.is_i64() && !n.is_u64() && f.fract() == 0.0 && f.abs() < 1e21 => {
            format!("{f:.0}")
        }
        _ => n.to_string(),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn widget() -> ModelDefinition {
        ModelDefinition::new("Widget")
            .property("color", PropertyType::String, true)
            .property("made", PropertyType::Date, false)
            .property("weight", PropertyType::Number, false)
            .with_revision()
    }

    #[test]
    fn test_to_storage_moves_id_and_stamps_tag() {
        let record = Record::new().with_id("w1").with("color", json!("red"));
        let doc = to_storage(&widget(), &record).unwrap();
        assert_eq!(
            doc,
            json!({ "_id": "w1", "color": "red", "loopbackModel": "Widget" })
        );
        // Caller's record untouched
        assert_eq!(record.id.as_deref(), Some("w1"));
    }

    #[test]
    fn test_numeric_ids_print_like_integers() {
        let record = Record::new().with("id", json!(1.0));
        assert_eq!(to_storage(&widget(), &record).unwrap()["_id"], json!("1"));
        let record = Record::new().with("id", json!(7));
        assert_eq!(to_storage(&widget(), &record).unwrap()["_id"], json!("7"));
        let record = Record::new().with("id", json!(1.5));
        assert_eq!(to_storage(&widget(), &record).unwrap()["_id"], json!("1.5"));
    }

    #[test]
    fn test_to_storage_converts_dates_to_millis() {
        let record = Record::new().with("made", json!("2024-03-01T12:00:00.000Z"));
        let doc = to_storage(&widget(), &record).unwrap();
        assert_eq!(doc["made"], json!(1709294400000_i64));
    }

    #[test]
    fn test_to_storage_leaves_non_date_values_on_date_field() {
        let record = Record::new()
            .with("made", json!("sometime last week"))
            .with("weight", json!("2024-03-01T12:00:00Z"));
        let doc = to_storage(&widget(), &record).unwrap();
        assert_eq!(doc["made"], json!("sometime last week"));
        // Not a date property, so a date-looking string is kept as-is
        assert_eq!(doc["weight"], json!("2024-03-01T12:00:00Z"));
    }

    #[test]
    fn test_to_storage_drops_null_revision_and_foreign_tag() {
        let mut record = Record::new();
        record.data.insert("id".into(), json!(42));
        record.data.insert("_rev".into(), Value::Null);
        record.data.insert("loopbackModel".into(), json!("Other"));
        record.data.insert("color".into(), json!("blue"));
        let doc = to_storage(&widget(), &record).unwrap();
        assert_eq!(doc["_id"], json!("42"));
        assert!(doc.get("_rev").is_none());
        assert_eq!(doc["loopbackModel"], json!("Widget"));
    }

    #[test]
    fn test_from_storage_restores_record() {
        let doc = json!({
            "_id": "w1",
            "_rev": "1-abc",
            "loopbackModel": "Widget",
            "color": "red",
            "made": 1709294400000_i64
        });
        let record = from_storage(&widget(), Some(doc)).unwrap().unwrap();
        assert_eq!(record.id.as_deref(), Some("w1"));
        assert_eq!(record.rev.as_deref(), Some("1-abc"));
        assert_eq!(record.get("made"), Some(&json!("2024-03-01T12:00:00.000Z")));
        assert!(record.get("loopbackModel").is_none());
        assert!(record.get("_id").is_none());
    }

    #[test]
    fn test_from_storage_passes_absent_document_through() {
        assert_eq!(from_storage(&widget(), None).unwrap(), None);
        assert_eq!(from_storage(&widget(), Some(Value::Null)).unwrap(), None);
    }

    #[test]
    fn test_from_storage_rejects_non_object() {
        assert!(from_storage(&widget(), Some(json!([1, 2]))).is_err());
    }

    #[test]
    fn test_round_trip_restores_id_and_dates() {
        let original = Record::new()
            .with_id("w9")
            .with("color", json!("green"))
            .with("made", json!("2023-11-05T08:30:15.250Z"))
            .with("weight", json!(3.5));
        let stored = to_storage(&widget(), &original).unwrap();
        let restored = from_storage(&widget(), Some(stored)).unwrap().unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_merge_and_strip_deleted() {
        let mut record = Record::new().with_id("w1").with("color", json!("red"));
        let mut attrs = Map::new();
        attrs.insert("color".into(), json!("blue"));
        attrs.insert("_deleted".into(), json!(true));
        attrs.insert("_rev".into(), json!("3-x"));
        record.merge(&attrs);
        record.strip_deleted();
        assert_eq!(record.get("color"), Some(&json!("blue")));
        assert_eq!(record.rev.as_deref(), Some("3-x"));
        assert!(record.get("_deleted").is_none());
    }

    #[test]
    fn test_record_json_shape() {
        let record = Record::from_value(json!({ "id": "a", "_rev": "1-x", "n": 1 })).unwrap();
        assert_eq!(record.id.as_deref(), Some("a"));
        assert_eq!(record.rev.as_deref(), Some("1-x"));
        assert_eq!(record.to_value(), json!({ "id": "a", "_rev": "1-x", "n": 1 }));
    }

    #[test]
    fn test_normalize_key_only_touches_dates() {
        assert_eq!(
            normalize_key(&PropertyType::Date, &json!("1970-01-01T00:00:01Z")),
            json!(1000)
        );
        assert_eq!(normalize_key(&PropertyType::Date, &json!(5)), json!(5));
        assert_eq!(
            normalize_key(&PropertyType::String, &json!("1970-01-01T00:00:01Z")),
            json!("1970-01-01T00:00:01Z")
        );
    }
}
