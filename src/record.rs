//! Raw entity records as handed over by the persistence layer.
//!
//! A record is a flat mapping of field name to scalar value. Field names are
//! not stable across schema revisions, so nothing outside [`crate::normalize`]
//! reads them directly.

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;

/// A single scalar value of a raw record.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Date(NaiveDate),
    List(Vec<String>),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        match self {
            RawValue::Null => true,
            RawValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl From<serde_json::Value> for RawValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => RawValue::Null,
            Value::Bool(b) => RawValue::Bool(b),
            Value::Number(n) => n.as_f64().map(RawValue::Number).unwrap_or(RawValue::Null),
            Value::String(s) => RawValue::Text(s),
            Value::Array(items) => RawValue::List(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s),
                        Value::Null => None,
                        other => Some(other.to_string()),
                    })
                    .collect(),
            ),
            // Nested objects are not scalars; keep their text so nothing is lost.
            Value::Object(_) => RawValue::Text(value.to_string()),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Number(value as f64)
    }
}

impl From<NaiveDate> for RawValue {
    fn from(value: NaiveDate) -> Self {
        RawValue::Date(value)
    }
}

impl From<Vec<String>> for RawValue {
    fn from(value: Vec<String>) -> Self {
        RawValue::List(value)
    }
}

/// Flat field-name → scalar mapping.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "BTreeMap<String, serde_json::Value>")]
pub struct RawRecord {
    fields: BTreeMap<String, RawValue>,
}

impl From<BTreeMap<String, serde_json::Value>> for RawRecord {
    fn from(map: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            fields: map.into_iter().map(|(k, v)| (k, RawValue::from(v))).collect(),
        }
    }
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for callers assembling a record by hand.
    pub fn with(mut self, key: &str, value: impl Into<RawValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<RawValue>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Returns the value under `key` when it is present and not null.
    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    /// Integer identifier under `id`, if any.
    pub fn id(&self) -> Option<i64> {
        match self.get("id")? {
            RawValue::Number(n) => Some(*n as i64),
            RawValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Integer foreign key under `key`, if any.
    pub fn reference(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            RawValue::Number(n) => Some(*n as i64),
            RawValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Flattens a related record into this one under `<relation>.<field>` keys.
    ///
    /// A missing relation is tolerated; its fields simply stay absent.
    pub fn with_relation(mut self, relation: &str, related: Option<&RawRecord>) -> Self {
        if let Some(related) = related {
            for (key, value) in &related.fields {
                self.fields
                    .insert(format!("{relation}.{key}"), value.clone());
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_from_json_object() {
        let json = r#"{
            "id": 7,
            "wps_number": "WPS-001",
            "welding_positions": ["PA", "PB"],
            "pwht_required": false,
            "remarks": null
        }"#;

        let record: RawRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id(), Some(7));
        assert_eq!(record.get("wps_number"), Some(&RawValue::Text("WPS-001".into())));
        assert_eq!(
            record.get("welding_positions"),
            Some(&RawValue::List(vec!["PA".into(), "PB".into()]))
        );
        assert_eq!(record.get("pwht_required"), Some(&RawValue::Bool(false)));
        assert!(record.get("remarks").is_none());
    }

    #[test]
    fn test_blank_text_counts_as_absent() {
        let record = RawRecord::new().with("title", "   ");
        assert!(record.get("title").is_none());
    }

    #[test]
    fn test_with_relation_prefixes_keys() {
        let company = RawRecord::new().with("name", "Acme Fabrication");
        let record = RawRecord::new()
            .with("wps_number", "WPS-9")
            .with_relation("organization", Some(&company))
            .with_relation("wps", None);

        assert_eq!(
            record.get("organization.name"),
            Some(&RawValue::Text("Acme Fabrication".into()))
        );
        assert_eq!(record.len(), 2);
    }
}
