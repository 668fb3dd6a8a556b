//! Literal values carried by predicates, index rows and SQL parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DataTypeCode;

/// A scalar literal as it is bound to a statement parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryValue {
    Null,
    String(String),
    Integer(i64),
    Fractal(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Guid(Uuid),
}

impl QueryValue {
    /// The data-type code this literal naturally belongs to, `None` for null.
    pub fn data_type_code(&self) -> Option<DataTypeCode> {
        match self {
            QueryValue::Null => None,
            QueryValue::String(_) => Some(DataTypeCode::String),
            QueryValue::Integer(_) => Some(DataTypeCode::Integer),
            QueryValue::Fractal(_) => Some(DataTypeCode::Fractal),
            QueryValue::Bool(_) => Some(DataTypeCode::Bool),
            QueryValue::DateTime(_) => Some(DataTypeCode::DateTime),
            QueryValue::Guid(_) => Some(DataTypeCode::Guid),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, QueryValue::Null)
    }

    /// Short name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self.data_type_code() {
            Some(code) => code.as_str(),
            None => "Null",
        }
    }
}

impl From<i32> for QueryValue {
    fn from(v: i32) -> Self {
        QueryValue::Integer(i64::from(v))
    }
}

impl From<i64> for QueryValue {
    fn from(v: i64) -> Self {
        QueryValue::Integer(v)
    }
}

impl From<f64> for QueryValue {
    fn from(v: f64) -> Self {
        QueryValue::Fractal(v)
    }
}

impl From<bool> for QueryValue {
    fn from(v: bool) -> Self {
        QueryValue::Bool(v)
    }
}

impl From<&str> for QueryValue {
    fn from(v: &str) -> Self {
        QueryValue::String(v.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(v: String) -> Self {
        QueryValue::String(v)
    }
}

impl From<Uuid> for QueryValue {
    fn from(v: Uuid) -> Self {
        QueryValue::Guid(v)
    }
}

impl From<DateTime<Utc>> for QueryValue {
    fn from(v: DateTime<Utc>) -> Self {
        QueryValue::DateTime(v)
    }
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(QueryValue::Null)
    }
}

/// A named statement parameter. Parameter order always matches placeholder
/// order in the SQL text it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlParameter {
    pub name: String,
    pub value: QueryValue,
}

impl SqlParameter {
    pub fn new(name: impl Into<String>, value: QueryValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}
