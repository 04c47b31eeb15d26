//! Collection+JSON response decoding.
//!
//! CUBE answers most requests with a Collection+JSON document:
//!
//! ```json
//! {"collection": {"items": [
//!     {"href": "...", "data": [{"name": "id", "value": 3}, {"name": "title", "value": "x"}]}
//! ]}}
//! ```
//!
//! Each item's `data` list is flattened into a [`Record`] keyed by field name.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

/// One flattened collection item: field name to value.
pub type Record = serde_json::Map<String, Value>;

/// Decoded body of a backend response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResult {
    /// A typed collection (or plain JSON object) flattened into records.
    Records(Vec<Record>),
    /// A body that was not JSON.
    Text(String),
}

impl ParsedResult {
    /// Records in this result; empty for a text body.
    pub fn records(&self) -> &[Record] {
        match self {
            ParsedResult::Records(records) => records,
            ParsedResult::Text(_) => &[],
        }
    }

    /// Consume the result into its records.
    pub fn into_records(self) -> Vec<Record> {
        match self {
            ParsedResult::Records(records) => records,
            ParsedResult::Text(_) => Vec::new(),
        }
    }

    /// Raw text, if the body was not JSON.
    pub fn text(&self) -> Option<&str> {
        match self {
            ParsedResult::Text(text) => Some(text),
            ParsedResult::Records(_) => None,
        }
    }

    /// First value of `field` across the records, in order.
    pub fn first_value(&self, field: &str) -> Option<&Value> {
        self.records().iter().find_map(|r| r.get(field))
    }

    /// First value of `field` interpreted as an integer id.
    pub fn first_id(&self, field: &str) -> Option<i64> {
        self.first_value(field).and_then(value_as_i64)
    }

    /// Decode every record into `T`.
    pub fn decode_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.records().iter().map(decode).collect()
    }
}

/// Decode a single record into `T`.
pub fn decode<T: DeserializeOwned>(record: &Record) -> Result<T> {
    serde_json::from_value(Value::Object(record.clone()))
        .map_err(|e| Error::Malformed(format!("unexpected record shape: {e}")))
}

/// Interpret a JSON value as an integer, accepting numeric strings.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Deserialize)]
struct Envelope {
    collection: Collection,
}

#[derive(Deserialize)]
struct Collection {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Deserialize)]
struct Item {
    #[serde(default)]
    href: Option<String>,
    #[serde(default)]
    data: Vec<Field>,
}

#[derive(Deserialize)]
struct Field {
    name: String,
    #[serde(default)]
    value: Value,
}

/// Parse a response body.
///
/// Non-JSON bodies come back as [`ParsedResult::Text`]. A JSON body with a
/// `collection` key must be well formed, otherwise [`Error::Malformed`].
pub fn parse_body(body: &str) -> Result<ParsedResult> {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return Ok(ParsedResult::Text(body.to_string())),
    };

    if value.get("collection").is_some() {
        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|e| Error::Malformed(format!("invalid collection: {e}")))?;
        return Ok(ParsedResult::Records(
            envelope.collection.items.into_iter().map(flatten).collect(),
        ));
    }

    match value {
        Value::Object(map) => Ok(ParsedResult::Records(vec![map])),
        Value::Array(items) if items.iter().all(Value::is_object) => Ok(ParsedResult::Records(
            items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
        )),
        _ => Ok(ParsedResult::Text(body.to_string())),
    }
}

fn flatten(item: Item) -> Record {
    let mut record: Record = item
        .data
        .into_iter()
        .map(|field| (field.name, field.value))
        .collect();
    if let Some(href) = item.href {
        record.entry("href").or_insert(Value::String(href));
    }
    record
}
