//! Record Transformation and Validation
//!
//! Turns raw source rows into typed canonical records, or rejects them.
//!
//! ## Counters
//!
//! The transformer keeps two tallies that must never be conflated:
//!
//! - **validation errors**: a required field was missing or
//!   unparseable, so the whole record was dropped. Nothing partial is
//!   ever written.
//! - **corruption warnings**: a non-required field was malformed or
//!   out of range, so the field was replaced with its declared default
//!   and the record kept.
//!
//! ## Purity
//!
//! Transforming the same row twice with the same schema yields an
//! identical record; the counters are the only state.

use tracing::{debug, warn};

use crate::schema::{coerce_value, CoercionError, FieldDescriptor};
use sync_traits::{CanonicalRecord, SourceRow};

/// Running tallies for one sync run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformCounters {
    /// Records dropped because a required field was missing or bad
    pub validation_errors: u64,
    /// Fields replaced with their default on a kept record
    pub corruption_warnings: u64,
}

/// Transforms raw rows into canonical records against one schema.
///
/// Built once per run from a schema passed by value; never shared
/// across runs.
pub struct RecordTransformer {
    schema: Vec<FieldDescriptor>,
    counters: TransformCounters,
}

impl RecordTransformer {
    pub fn new(schema: Vec<FieldDescriptor>) -> Self {
        Self {
            schema,
            counters: TransformCounters::default(),
        }
    }

    /// Transform one raw row.
    ///
    /// Returns `None` when the record is dropped (required field
    /// missing or unparseable); the validation-error counter is bumped
    /// exactly once per dropped record.
    pub fn transform_row(&mut self, row: &SourceRow) -> Option<CanonicalRecord> {
        let mut record = CanonicalRecord::new(row.id);

        for descriptor in &self.schema {
            let raw = descriptor.source.lookup(&row.payload);

            let coerced = match raw {
                Some(value) => coerce_value(value, descriptor.field_type),
                None => Err(CoercionError::Missing),
            };

            match coerced {
                Ok(value) => record.set(descriptor.name.clone(), value),
                Err(reason) if descriptor.required => {
                    self.counters.validation_errors += 1;
                    warn!(
                        row_id = row.id,
                        field = %descriptor.name,
                        %reason,
                        "dropping record: required field failed validation"
                    );
                    return None;
                }
                Err(CoercionError::Missing) => {
                    // Absent optional value is not corruption
                    record.set(descriptor.name.clone(), descriptor.default.clone());
                }
                Err(reason) => {
                    self.counters.corruption_warnings += 1;
                    debug!(
                        row_id = row.id,
                        field = %descriptor.name,
                        %reason,
                        "replacing corrupt field with declared default"
                    );
                    record.set(descriptor.name.clone(), descriptor.default.clone());
                }
            }
        }

        Some(record)
    }

    /// Transform a whole page, keeping only valid records
    pub fn transform_page(&mut self, page: &[SourceRow]) -> Vec<CanonicalRecord> {
        page.iter()
            .filter_map(|row| self.transform_row(row))
            .collect()
    }

    pub fn counters(&self) -> TransformCounters {
        self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSource, FieldType, IntWidth};
    use serde_json::{json, Value};
    use sync_traits::FieldValue;

    fn contact_schema() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::required("email", FieldSource::Index(0), FieldType::Email),
            FieldDescriptor::optional(
                "age",
                FieldSource::Index(1),
                FieldType::Integer(IntWidth::Small),
                FieldValue::Integer(0),
            ),
            FieldDescriptor::optional(
                "nickname",
                FieldSource::Index(2),
                FieldType::Text,
                FieldValue::Null,
            ),
        ]
    }

    #[test]
    fn test_transform_valid_row() {
        let mut transformer = RecordTransformer::new(contact_schema());
        let row = SourceRow::positional(7, None, vec![json!("a@b.com"), json!(33), json!("Al")]);

        let record = transformer.transform_row(&row).unwrap();
        assert_eq!(record.key, 7);
        assert_eq!(record.get("email"), Some(&FieldValue::Text("a@b.com".into())));
        assert_eq!(record.get("age"), Some(&FieldValue::Integer(33)));
        assert_eq!(transformer.counters(), TransformCounters::default());
    }

    #[test]
    fn test_required_field_drop_counted_once() {
        let mut transformer = RecordTransformer::new(contact_schema());
        let row = SourceRow::positional(8, None, vec![json!("not-an-email"), json!(33)]);

        assert!(transformer.transform_row(&row).is_none());
        assert_eq!(transformer.counters().validation_errors, 1);
        assert_eq!(transformer.counters().corruption_warnings, 0);
    }

    #[test]
    fn test_missing_required_field_drops() {
        let mut transformer = RecordTransformer::new(contact_schema());
        let row = SourceRow::positional(9, None, vec![Value::Null, json!(33)]);

        assert!(transformer.transform_row(&row).is_none());
        assert_eq!(transformer.counters().validation_errors, 1);
    }

    #[test]
    fn test_out_of_range_optional_replaced_with_default() {
        let mut transformer = RecordTransformer::new(contact_schema());
        // age 70000 does not fit a smallint
        let row = SourceRow::positional(10, None, vec![json!("a@b.com"), json!(70_000)]);

        let record = transformer.transform_row(&row).unwrap();
        assert_eq!(record.get("age"), Some(&FieldValue::Integer(0)));
        assert_eq!(transformer.counters().corruption_warnings, 1);
        assert_eq!(transformer.counters().validation_errors, 0);
    }

    #[test]
    fn test_missing_optional_defaults_without_corruption() {
        let mut transformer = RecordTransformer::new(contact_schema());
        let row = SourceRow::positional(11, None, vec![json!("a@b.com")]);

        let record = transformer.transform_row(&row).unwrap();
        assert_eq!(record.get("age"), Some(&FieldValue::Integer(0)));
        assert_eq!(record.get("nickname"), Some(&FieldValue::Null));
        assert_eq!(transformer.counters().corruption_warnings, 0);
    }

    #[test]
    fn test_transform_is_pure() {
        let row = SourceRow::positional(12, None, vec![json!("a@b.com"), json!(5), json!("x")]);

        let mut first = RecordTransformer::new(contact_schema());
        let mut second = RecordTransformer::new(contact_schema());
        assert_eq!(first.transform_row(&row), second.transform_row(&row));
        // Repeating with the same transformer also matches
        assert_eq!(first.transform_row(&row), second.transform_row(&row));
    }

    #[test]
    fn test_transform_page_filters_dropped() {
        let mut transformer = RecordTransformer::new(contact_schema());
        let page = vec![
            SourceRow::positional(1, None, vec![json!("a@b.com"), json!(1)]),
            SourceRow::positional(2, None, vec![json!("bad"), json!(2)]),
            SourceRow::positional(3, None, vec![json!("c@d.org"), json!(3)]),
        ];

        let records = transformer.transform_page(&page);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, 1);
        assert_eq!(records[1].key, 3);
        assert_eq!(transformer.counters().validation_errors, 1);
    }

    #[test]
    fn test_keyed_payload() {
        let schema = vec![FieldDescriptor::required(
            "email",
            FieldSource::Key("primary_email".to_string()),
            FieldType::Email,
        )];
        let mut transformer = RecordTransformer::new(schema);

        let mut map = serde_json::Map::new();
        map.insert("primary_email".to_string(), json!("k@v.io"));
        let row = SourceRow::keyed(20, None, map);

        let record = transformer.transform_row(&row).unwrap();
        assert_eq!(record.get("email"), Some(&FieldValue::Text("k@v.io".into())));
    }
}
