//! Row and Record Value Types
//!
//! Shared value types that cross the collaborator trait seams: raw rows
//! as yielded by a [`SourceClient`](crate::source::SourceClient) and the
//! typed canonical records consumed by a
//! [`TargetStore`](crate::target::TargetStore).

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// The payload of one raw source row.
///
/// Database-backed sources typically yield positional tuples; REST
/// sources yield keyed objects. The field schema addresses into either
/// shape by index or key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowPayload {
    /// Positional tuple, addressed by column index
    Positional(Vec<Value>),
    /// Keyed object, addressed by field name
    Keyed(serde_json::Map<String, Value>),
}

impl RowPayload {
    /// Look up a value by column index (positional payloads only)
    pub fn value_at(&self, index: usize) -> Option<&Value> {
        match self {
            RowPayload::Positional(values) => values.get(index),
            RowPayload::Keyed(_) => None,
        }
    }

    /// Look up a value by key (keyed payloads only)
    pub fn value_for(&self, key: &str) -> Option<&Value> {
        match self {
            RowPayload::Positional(_) => None,
            RowPayload::Keyed(map) => map.get(key),
        }
    }
}

/// One raw row from a source page.
///
/// Transient: rows are transformed into [`CanonicalRecord`]s and
/// dropped with their page. The primary key and source modification
/// timestamp are lifted out of the payload because the paging cursor
/// and the freshness check need them regardless of payload shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    /// Source primary key; the keyset cursor advances on this
    pub id: i64,
    /// Source-side last modification time, when the source tracks one
    pub updated_at: Option<DateTime<Utc>>,
    /// The raw field values
    pub payload: RowPayload,
}

impl SourceRow {
    pub fn positional(id: i64, updated_at: Option<DateTime<Utc>>, values: Vec<Value>) -> Self {
        Self {
            id,
            updated_at,
            payload: RowPayload::Positional(values),
        }
    }

    pub fn keyed(
        id: i64,
        updated_at: Option<DateTime<Utc>>,
        map: serde_json::Map<String, Value>,
    ) -> Self {
        Self {
            id,
            updated_at,
            payload: RowPayload::Keyed(map),
        }
    }
}

/// A typed, validated field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Uuid(Uuid),
    Text(String),
    Integer(i64),
    Decimal(BigDecimal),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

}

/// A typed record keyed by declared field names.
///
/// Invariant: always carries a non-null primary key. Records that
/// cannot produce one are dropped by the transformer and never reach a
/// store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Primary key in the target table
    pub key: i64,
    /// Declared fields in schema order (BTreeMap keeps output stable)
    pub fields: BTreeMap<String, FieldValue>,
}

impl CanonicalRecord {
    pub fn new(key: i64) -> Self {
        Self {
            key,
            fields: BTreeMap::new(),
        }
    }

    /// Get a field value by declared name
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Set a field value, replacing any previous value
    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// Names of fields whose values differ from `other`.
    ///
    /// Only fields present on `self` are compared; a field missing on
    /// `other` counts as different.
    pub fn differing_fields(&self, other: &CanonicalRecord) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(name, value)| other.fields.get(*name) != Some(value))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_lookup() {
        let positional = RowPayload::Positional(vec![json!(1), json!("a")]);
        assert_eq!(positional.value_at(1), Some(&json!("a")));
        assert_eq!(positional.value_at(2), None);
        assert_eq!(positional.value_for("name"), None);

        let mut map = serde_json::Map::new();
        map.insert("name".to_string(), json!("a"));
        let keyed = RowPayload::Keyed(map);
        assert_eq!(keyed.value_for("name"), Some(&json!("a")));
        assert_eq!(keyed.value_at(0), None);
    }

    #[test]
    fn test_differing_fields() {
        let mut left = CanonicalRecord::new(1);
        left.set("name", FieldValue::Text("alpha".to_string()));
        left.set("active", FieldValue::Boolean(true));

        let mut right = left.clone();
        assert!(left.differing_fields(&right).is_empty());

        right.set("name", FieldValue::Text("beta".to_string()));
        assert_eq!(left.differing_fields(&right), vec!["name".to_string()]);

        right.fields.remove("active");
        let mut diff = left.differing_fields(&right);
        diff.sort();
        assert_eq!(diff, vec!["active".to_string(), "name".to_string()]);
    }
}
