//! Field Schema and Type Coercion
//!
//! The ordered [`FieldDescriptor`] list is the shared contract between
//! a source's row layout and the transformer: one descriptor per
//! declared target field, addressing the raw value by column index or
//! key and naming the type it must coerce to.
//!
//! Schemas are built once per run and passed by value into the
//! transformer; nothing here is shared mutable state across runs.
//!
//! ## Coercion
//!
//! [`coerce_value`] turns one raw JSON value into a typed
//! [`FieldValue`] or a [`CoercionError`]. The transformer decides what
//! a failure means: a required field drops the record, a non-required
//! field falls back to its declared default.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde_json::Value;
use std::str::FromStr;
use sync_traits::{FieldValue, RowPayload};
use uuid::Uuid;

/// Bounded integer widths, range-checked against the target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    /// 16-bit signed (smallint)
    Small,
    /// 32-bit signed (integer)
    Standard,
    /// 64-bit signed (bigint)
    Big,
}

impl IntWidth {
    /// Inclusive range of representable values
    pub fn range(&self) -> (i64, i64) {
        match self {
            IntWidth::Small => (i16::MIN as i64, i16::MAX as i64),
            IntWidth::Standard => (i32::MIN as i64, i32::MAX as i64),
            IntWidth::Big => (i64::MIN, i64::MAX),
        }
    }
}

/// Declared type of one target field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// UUID identifier
    Identifier,
    DateTime,
    Date,
    Time,
    /// Range-checked integer
    Integer(IntWidth),
    Decimal,
    Boolean,
    Text,
    /// Text with mailbox-shape validation
    Email,
    /// Text normalized to digits with optional leading `+`
    Phone,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Identifier => "identifier",
            FieldType::DateTime => "datetime",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::Integer(_) => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Boolean => "boolean",
            FieldType::Text => "text",
            FieldType::Email => "email",
            FieldType::Phone => "phone",
        }
    }
}

/// Where a field's raw value lives in the source row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    /// Column index for positional rows
    Index(usize),
    /// Field name for keyed rows
    Key(String),
}

impl FieldSource {
    /// Resolve the raw value out of a row payload
    pub fn lookup<'a>(&self, payload: &'a RowPayload) -> Option<&'a Value> {
        match self {
            FieldSource::Index(index) => payload.value_at(*index),
            FieldSource::Key(key) => payload.value_for(key),
        }
    }
}

/// One declared target field: name, raw location, type, requiredness
/// and the default used when a non-required value is missing or
/// malformed.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub source: FieldSource,
    pub field_type: FieldType,
    pub required: bool,
    pub default: FieldValue,
}

impl FieldDescriptor {
    /// A required field; coercion failure drops the whole record
    pub fn required(name: impl Into<String>, source: FieldSource, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            source,
            field_type,
            required: true,
            default: FieldValue::Null,
        }
    }

    /// A non-required field; coercion failure falls back to `default`
    pub fn optional(
        name: impl Into<String>,
        source: FieldSource,
        field_type: FieldType,
        default: FieldValue,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            field_type,
            required: false,
            default,
        }
    }
}

/// Why a raw value failed to coerce
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoercionError {
    /// Value absent or JSON null
    Missing,
    /// Value present but unparseable as the declared type
    Malformed { expected: &'static str, got: String },
    /// Parsed fine but outside the declared numeric range
    OutOfRange { value: i64, min: i64, max: i64 },
}

impl std::fmt::Display for CoercionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoercionError::Missing => write!(f, "value missing"),
            CoercionError::Malformed { expected, got } => {
                write!(f, "expected {expected}, got {got}")
            }
            CoercionError::OutOfRange { value, min, max } => {
                write!(f, "{value} outside [{min}, {max}]")
            }
        }
    }
}

/// Coerce one raw value into the declared field type.
///
/// Pure: the same value and type always produce the same result.
pub fn coerce_value(raw: &Value, field_type: FieldType) -> Result<FieldValue, CoercionError> {
    if raw.is_null() {
        return Err(CoercionError::Missing);
    }

    match field_type {
        FieldType::Identifier => coerce_identifier(raw),
        FieldType::DateTime => coerce_datetime(raw),
        FieldType::Date => coerce_date(raw),
        FieldType::Time => coerce_time(raw),
        FieldType::Integer(width) => coerce_integer(raw, width),
        FieldType::Decimal => coerce_decimal(raw),
        FieldType::Boolean => coerce_boolean(raw),
        FieldType::Text => coerce_text(raw),
        FieldType::Email => coerce_email(raw),
        FieldType::Phone => coerce_phone(raw),
    }
}

fn malformed(expected: &'static str, raw: &Value) -> CoercionError {
    CoercionError::Malformed {
        expected,
        got: raw.to_string(),
    }
}

fn coerce_identifier(raw: &Value) -> Result<FieldValue, CoercionError> {
    let s = raw.as_str().ok_or_else(|| malformed("uuid", raw))?;
    Uuid::parse_str(s.trim())
        .map(FieldValue::Uuid)
        .map_err(|_| malformed("uuid", raw))
}

fn coerce_datetime(raw: &Value) -> Result<FieldValue, CoercionError> {
    match raw {
        // Unix epoch seconds
        Value::Number(n) => {
            let secs = n.as_i64().ok_or_else(|| malformed("datetime", raw))?;
            Utc.timestamp_opt(secs, 0)
                .single()
                .map(FieldValue::DateTime)
                .ok_or_else(|| malformed("datetime", raw))
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(FieldValue::DateTime(dt.with_timezone(&Utc)));
            }
            // Common database renderings without an offset, treated as UTC
            for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Ok(FieldValue::DateTime(naive.and_utc()));
                }
            }
            Err(malformed("datetime", raw))
        }
        _ => Err(malformed("datetime", raw)),
    }
}

fn coerce_date(raw: &Value) -> Result<FieldValue, CoercionError> {
    let s = raw.as_str().ok_or_else(|| malformed("date", raw))?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map(FieldValue::Date)
        .map_err(|_| malformed("date", raw))
}

fn coerce_time(raw: &Value) -> Result<FieldValue, CoercionError> {
    let s = raw.as_str().ok_or_else(|| malformed("time", raw))?;
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map(FieldValue::Time)
        .map_err(|_| malformed("time", raw))
}

fn coerce_integer(raw: &Value, width: IntWidth) -> Result<FieldValue, CoercionError> {
    let value = match raw {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i
            } else {
                // Accept floats that are exactly integral
                let f = n.as_f64().ok_or_else(|| malformed("integer", raw))?;
                if f.fract() != 0.0 || f < i64::MIN as f64 || f > i64::MAX as f64 {
                    return Err(malformed("integer", raw));
                }
                f as i64
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| malformed("integer", raw))?,
        _ => return Err(malformed("integer", raw)),
    };

    let (min, max) = width.range();
    if value < min || value > max {
        return Err(CoercionError::OutOfRange { value, min, max });
    }
    Ok(FieldValue::Integer(value))
}

fn coerce_decimal(raw: &Value) -> Result<FieldValue, CoercionError> {
    let parsed = match raw {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()),
        Value::String(s) => BigDecimal::from_str(s.trim()),
        _ => return Err(malformed("decimal", raw)),
    };
    parsed
        .map(FieldValue::Decimal)
        .map_err(|_| malformed("decimal", raw))
}

fn coerce_boolean(raw: &Value) -> Result<FieldValue, CoercionError> {
    match raw {
        Value::Bool(b) => Ok(FieldValue::Boolean(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(FieldValue::Boolean(false)),
            Some(1) => Ok(FieldValue::Boolean(true)),
            _ => Err(malformed("boolean", raw)),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Ok(FieldValue::Boolean(true)),
            "false" | "f" | "no" | "n" | "0" => Ok(FieldValue::Boolean(false)),
            _ => Err(malformed("boolean", raw)),
        },
        _ => Err(malformed("boolean", raw)),
    }
}

fn coerce_text(raw: &Value) -> Result<FieldValue, CoercionError> {
    match raw {
        Value::String(s) => Ok(FieldValue::Text(s.clone())),
        // Sources disagree on whether codes are strings or numbers
        Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
        Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
        _ => Err(malformed("text", raw)),
    }
}

fn coerce_email(raw: &Value) -> Result<FieldValue, CoercionError> {
    let s = raw.as_str().ok_or_else(|| malformed("email", raw))?;
    let normalized = s.trim().to_ascii_lowercase();
    let Some((local, domain)) = normalized.split_once('@') else {
        return Err(malformed("email", raw));
    };
    if local.is_empty() || domain.is_empty() || !domain.contains('.') || domain.contains('@') {
        return Err(malformed("email", raw));
    }
    Ok(FieldValue::Text(normalized))
}

fn coerce_phone(raw: &Value) -> Result<FieldValue, CoercionError> {
    let s = match raw {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(malformed("phone", raw)),
    };
    let trimmed = s.trim();
    let plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 7 || digits.len() > 15 {
        return Err(malformed("phone", raw));
    }
    let normalized = if plus { format!("+{digits}") } else { digits };
    Ok(FieldValue::Text(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_identifier() {
        let raw = json!("550e8400-e29b-41d4-a716-446655440000");
        let FieldValue::Uuid(id) = coerce_value(&raw, FieldType::Identifier).unwrap() else {
            panic!("expected uuid");
        };
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");

        assert!(coerce_value(&json!("not-a-uuid"), FieldType::Identifier).is_err());
        assert!(coerce_value(&json!(42), FieldType::Identifier).is_err());
    }

    #[test]
    fn test_coerce_datetime_formats() {
        for raw in [
            json!("2024-03-01T12:30:00Z"),
            json!("2024-03-01 12:30:00"),
            json!("2024-03-01T12:30:00.000"),
        ] {
            let FieldValue::DateTime(dt) = coerce_value(&raw, FieldType::DateTime).unwrap() else {
                panic!("expected datetime for {raw}");
            };
            assert_eq!(dt.to_rfc3339(), "2024-03-01T12:30:00+00:00");
        }

        // Epoch seconds
        let FieldValue::DateTime(dt) = coerce_value(&json!(1_709_296_200), FieldType::DateTime)
            .unwrap()
        else {
            panic!("expected datetime");
        };
        assert_eq!(dt.timestamp(), 1_709_296_200);

        assert!(coerce_value(&json!("yesterday"), FieldType::DateTime).is_err());
    }

    #[test]
    fn test_coerce_date_and_time() {
        assert_eq!(
            coerce_value(&json!("2024-12-31"), FieldType::Date).unwrap(),
            FieldValue::Date(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap())
        );
        assert!(coerce_value(&json!("31/12/2024"), FieldType::Date).is_err());

        assert_eq!(
            coerce_value(&json!("09:15"), FieldType::Time).unwrap(),
            FieldValue::Time(NaiveTime::from_hms_opt(9, 15, 0).unwrap())
        );
    }

    #[test]
    fn test_coerce_integer_range_check() {
        assert_eq!(
            coerce_value(&json!(1000), FieldType::Integer(IntWidth::Small)).unwrap(),
            FieldValue::Integer(1000)
        );

        let err = coerce_value(&json!(40_000), FieldType::Integer(IntWidth::Small)).unwrap_err();
        assert!(matches!(err, CoercionError::OutOfRange { value: 40_000, .. }));

        // Same value fits the wider column
        assert_eq!(
            coerce_value(&json!(40_000), FieldType::Integer(IntWidth::Standard)).unwrap(),
            FieldValue::Integer(40_000)
        );
    }

    #[test]
    fn test_coerce_integer_from_string_and_float() {
        assert_eq!(
            coerce_value(&json!(" 42 "), FieldType::Integer(IntWidth::Big)).unwrap(),
            FieldValue::Integer(42)
        );
        assert_eq!(
            coerce_value(&json!(42.0), FieldType::Integer(IntWidth::Big)).unwrap(),
            FieldValue::Integer(42)
        );
        assert!(coerce_value(&json!(42.5), FieldType::Integer(IntWidth::Big)).is_err());
    }

    #[test]
    fn test_coerce_decimal() {
        let FieldValue::Decimal(d) = coerce_value(&json!("19.99"), FieldType::Decimal).unwrap()
        else {
            panic!("expected decimal");
        };
        assert_eq!(d, BigDecimal::from_str("19.99").unwrap());

        assert!(coerce_value(&json!("nineteen"), FieldType::Decimal).is_err());
    }

    #[test]
    fn test_coerce_boolean_spellings() {
        for truthy in [json!(true), json!(1), json!("yes"), json!("T"), json!("1")] {
            assert_eq!(
                coerce_value(&truthy, FieldType::Boolean).unwrap(),
                FieldValue::Boolean(true),
                "raw: {truthy}"
            );
        }
        for falsy in [json!(false), json!(0), json!("no"), json!("F")] {
            assert_eq!(
                coerce_value(&falsy, FieldType::Boolean).unwrap(),
                FieldValue::Boolean(false),
                "raw: {falsy}"
            );
        }
        assert!(coerce_value(&json!("maybe"), FieldType::Boolean).is_err());
    }

    #[test]
    fn test_coerce_email() {
        assert_eq!(
            coerce_value(&json!("  Jane.Doe@Example.COM "), FieldType::Email).unwrap(),
            FieldValue::Text("jane.doe@example.com".to_string())
        );
        assert!(coerce_value(&json!("not-an-email"), FieldType::Email).is_err());
        assert!(coerce_value(&json!("user@nodot"), FieldType::Email).is_err());
    }

    #[test]
    fn test_coerce_phone() {
        assert_eq!(
            coerce_value(&json!("+1 (555) 123-4567"), FieldType::Phone).unwrap(),
            FieldValue::Text("+15551234567".to_string())
        );
        assert_eq!(
            coerce_value(&json!("555.123.4567"), FieldType::Phone).unwrap(),
            FieldValue::Text("5551234567".to_string())
        );
        assert!(coerce_value(&json!("12345"), FieldType::Phone).is_err());
    }

    #[test]
    fn test_null_is_missing_not_malformed() {
        assert_eq!(
            coerce_value(&Value::Null, FieldType::Text).unwrap_err(),
            CoercionError::Missing
        );
    }

    #[test]
    fn test_field_source_lookup() {
        let payload = RowPayload::Positional(vec![json!(7), json!("name")]);
        assert_eq!(FieldSource::Index(1).lookup(&payload), Some(&json!("name")));
        assert_eq!(FieldSource::Key("name".to_string()).lookup(&payload), None);
    }
}
