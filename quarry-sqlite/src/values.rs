//! Conversions between Quarry values and SQLite values.
//!
//! GUIDs are stored as lowercase hyphenated text and datetimes as RFC 3339
//! UTC text with fixed microsecond precision, so lexical order matches time
//! order. Booleans are 0/1.

use chrono::{DateTime, SecondsFormat, Utc};
use quarry_core::{IdType, QuarryError, QueryValue, RawId, StoreError, StructureId};
use rusqlite::types::Value;

pub fn format_date_time(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn to_sql_value(value: &QueryValue) -> Value {
    match value {
        QueryValue::Null => Value::Null,
        QueryValue::String(s) => Value::Text(s.clone()),
        QueryValue::Integer(v) => Value::Integer(*v),
        QueryValue::Fractal(v) => Value::Real(*v),
        QueryValue::Bool(v) => Value::Integer(i64::from(*v)),
        QueryValue::DateTime(v) => Value::Text(format_date_time(v)),
        QueryValue::Guid(v) => Value::Text(v.hyphenated().to_string()),
    }
}

pub fn id_to_sql(id: &StructureId) -> Value {
    to_sql_value(&id.to_query_value())
}

/// Column type of the `StructureId` column for an id type.
pub fn id_column_type(id_type: IdType) -> &'static str {
    if id_type.is_identity() {
        "INTEGER"
    } else {
        "TEXT"
    }
}

/// Read back an id column value as an id of `id_type`.
pub fn id_from_sql(value: Value, id_type: IdType) -> Result<StructureId, QuarryError> {
    let raw = match value {
        Value::Integer(v) => RawId::Int(v),
        Value::Text(s) => RawId::Text(s),
        other => {
            return Err(StoreError::QueryFailed {
                reason: format!("unexpected StructureId column value {:?}", other),
            }
            .into())
        }
    };
    Ok(StructureId::convert_from(raw, id_type)?)
}
