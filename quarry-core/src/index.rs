//! Index extraction: flatten a serialized structure into index values along
//! the member paths of its schema.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::{DataTypeCode, IndexAccessor, QueryValue, StructureSchema};

/// One row of a structure's index table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureIndex {
    pub member_path: String,
    pub data_type_code: DataTypeCode,
    pub value: QueryValue,
}

/// Extract every index value of `json` for the members of `schema`.
///
/// Arrays along a path fan out into one value per element. Null and missing
/// members produce no index value.
pub fn extract_indexes(
    schema: &StructureSchema,
    json: &Value,
) -> Result<Vec<StructureIndex>, ValidationError> {
    let mut indexes = Vec::new();
    for accessor in schema.members() {
        let segments: Vec<&str> = accessor.member_path.split('.').collect();
        let mut scalars = Vec::new();
        collect(json, &segments, &mut scalars);
        for scalar in scalars {
            indexes.push(StructureIndex {
                member_path: accessor.member_path.clone(),
                data_type_code: accessor.data_type_code,
                value: convert(accessor, scalar)?,
            });
        }
    }
    Ok(indexes)
}

fn collect<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect(item, segments, out);
            }
        }
        Value::Null => {}
        Value::Object(map) => {
            if let Some((head, rest)) = segments.split_first() {
                if let Some(child) = map.get(*head) {
                    collect(child, rest, out);
                }
            }
        }
        scalar => {
            if segments.is_empty() {
                out.push(scalar);
            }
        }
    }
}

fn convert(accessor: &IndexAccessor, scalar: &Value) -> Result<QueryValue, ValidationError> {
    let mismatch = || ValidationError::InvalidValue {
        field: accessor.member_path.clone(),
        reason: format!("{} is not a {} value", scalar, accessor.data_type_code),
    };

    match accessor.data_type_code {
        DataTypeCode::String => scalar
            .as_str()
            .map(|s| QueryValue::String(s.to_string()))
            .ok_or_else(mismatch),
        DataTypeCode::Integer => scalar.as_i64().map(QueryValue::Integer).ok_or_else(mismatch),
        DataTypeCode::Fractal => scalar.as_f64().map(QueryValue::Fractal).ok_or_else(mismatch),
        DataTypeCode::Bool => scalar.as_bool().map(QueryValue::Bool).ok_or_else(mismatch),
        DataTypeCode::DateTime => scalar
            .as_str()
            .and_then(parse_datetime)
            .map(QueryValue::DateTime)
            .ok_or_else(mismatch),
        DataTypeCode::Guid => scalar
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(QueryValue::Guid)
            .ok_or_else(mismatch),
    }
}

/// RFC 3339 text, or a timestamp without offset (a serialized
/// `NaiveDateTime`), which is read as UTC.
fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(text) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(_) => text.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc()),
    }
}
