//! Raw row to [`RecordEnvelope`] conversion.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::SecondsFormat;
use serde_json::{Map, Number, Value};

use crate::error::{Result, SourceError};
use crate::types::{RawValue, RecordEnvelope};

/// Pair a raw row with its projected column names.
///
/// Returns `Ok(None)` for an empty row. Every value coerces to JSON, so a
/// non-empty row is always emitted whole.
pub fn normalize(
    table: &str,
    columns: &[String],
    row: Vec<RawValue>,
) -> Result<Option<RecordEnvelope>> {
    if columns.len() != row.len() {
        return Err(SourceError::internal(format!(
            "table '{}': {} projected columns but row has {} values",
            table,
            columns.len(),
            row.len()
        )));
    }
    if row.is_empty() {
        return Ok(None);
    }

    let data: Map<String, Value> = columns
        .iter()
        .cloned()
        .zip(row.into_iter().map(to_json))
        .collect();

    Ok(Some(RecordEnvelope {
        table: table.to_string(),
        data,
    }))
}

/// JSON rendering of a single raw value.
pub fn to_json(value: RawValue) -> Value {
    match value {
        RawValue::Null => Value::Null,
        RawValue::Boolean(b) => Value::Bool(b),
        RawValue::Integer(i) => Value::Number(i.into()),
        RawValue::Float(f) => float_to_json(f),
        RawValue::Decimal(text) => decimal_to_json(text),
        RawValue::Text(s) => Value::String(s),
        RawValue::Bytes(bytes) => Value::String(STANDARD.encode(bytes)),
        RawValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        RawValue::Timestamp(ts) => Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        RawValue::TimestampTz(ts) => {
            Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, false))
        }
        RawValue::Array(items) => Value::Array(items.into_iter().map(to_json).collect()),
        RawValue::Json(v) => v,
    }
}

fn float_to_json(f: f64) -> Value {
    match Number::from_f64(f) {
        Some(n) => Value::Number(n),
        None if f.is_nan() => Value::String("NaN".to_string()),
        None if f.is_sign_positive() => Value::String("Infinity".to_string()),
        None => Value::String("-Infinity".to_string()),
    }
}

/// Digits are kept as written. `NaN` and the infinities stay strings, like
/// their float counterparts.
fn decimal_to_json(text: String) -> Value {
    match text.parse::<Number>() {
        Ok(n) => Value::Number(n),
        Err(_) => Value::String(text),
    }
}
