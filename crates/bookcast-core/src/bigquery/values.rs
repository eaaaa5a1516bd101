//! Decoding of `getQueryResults` cells into JSON values.
//!
//! BigQuery sends every scalar as a string (`{"v": "42"}`), so the schema decides
//! the type. TIMESTAMP cells carry float epoch seconds, sometimes in exponent form.

use bookcast_warehouse::{FieldType, Row, WarehouseError};
use chrono::{DateTime, SecondsFormat};
use serde::Deserialize;
use serde_json::{Number, Value};

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub fields: Vec<SchemaField>,
}

impl SchemaField {
    fn repeated(&self) -> bool {
        self.mode.as_deref() == Some("REPEATED")
    }

    fn is_record(&self) -> bool {
        matches!(self.field_type.as_str(), "RECORD" | "STRUCT")
    }
}

pub(crate) fn decode_row(fields: &[SchemaField], row: &Value) -> Result<Row, WarehouseError> {
    let cells = row
        .get("f")
        .and_then(Value::as_array)
        .ok_or_else(|| decode_error("result row has no `f` array"))?;
    if cells.len() != fields.len() {
        return Err(decode_error(format!(
            "result row has {} cells, schema has {} fields",
            cells.len(),
            fields.len()
        )));
    }

    let mut output = Row::new();
    for (field, cell) in fields.iter().zip(cells) {
        let raw = cell.get("v").unwrap_or(&Value::Null);
        output.insert(field.name.clone(), decode_field(field, raw)?);
    }
    Ok(output)
}

fn decode_field(field: &SchemaField, raw: &Value) -> Result<Value, WarehouseError> {
    if field.repeated() {
        let items = match raw {
            Value::Null => return Ok(Value::Array(Vec::new())),
            Value::Array(items) => items,
            other => return Err(decode_error(format!("{}: expected array, got {other}", field.name))),
        };
        return items
            .iter()
            .map(|item| decode_single(field, item.get("v").unwrap_or(&Value::Null)))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }
    decode_single(field, raw)
}

fn decode_single(field: &SchemaField, raw: &Value) -> Result<Value, WarehouseError> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    if field.is_record() {
        return decode_row(&field.fields, raw).map(Value::Object);
    }

    let text = match raw {
        Value::String(text) => text.as_str(),
        other => return Ok(other.clone()),
    };

    let parse_failure =
        |expected: &str| decode_error(format!("{}: `{text}` is not a valid {expected}", field.name));

    match FieldType::from_warehouse_name(&field.field_type) {
        Some(FieldType::Int64) => text
            .parse::<i64>()
            .map(|value| Value::Number(Number::from(value)))
            .map_err(|_| parse_failure("integer")),
        Some(FieldType::Float64) => match text {
            "NaN" | "Infinity" | "-Infinity" => Ok(Value::Null),
            _ => text
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| parse_failure("float")),
        },
        Some(FieldType::Bool) => match text {
            "true" | "TRUE" => Ok(Value::Bool(true)),
            "false" | "FALSE" => Ok(Value::Bool(false)),
            _ => Err(parse_failure("boolean")),
        },
        Some(FieldType::Timestamp) if field.field_type.eq_ignore_ascii_case("TIMESTAMP") => {
            epoch_seconds_to_rfc3339(text)
                .map(Value::String)
                .ok_or_else(|| parse_failure("timestamp"))
        }
        _ => Ok(Value::String(text.to_string())),
    }
}

/// `"1.7040672E9"` → `"2024-01-01T00:00:00Z"`.
pub(crate) fn epoch_seconds_to_rfc3339(text: &str) -> Option<String> {
    let seconds = text.parse::<f64>().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    let micros = (seconds * 1_000_000.0).round() as i64;
    DateTime::from_timestamp_micros(micros)
        .map(|timestamp| timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn decode_error(message: impl Into<String>) -> WarehouseError {
    WarehouseError::Decode {
        operation: String::from("jobs.getQueryResults"),
        message: message.into(),
    }
}
