//! Structure identifiers and their conversion from caller-supplied raw ids.
//!
//! A [`StructureId`] always carries the id type of the structure it belongs
//! to, so equality and ordering follow the backing id column: identities
//! compare numerically, GUIDs as 128-bit values and strings exactly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::QueryValue;

// ============================================================================
// ID TYPE
// ============================================================================

/// The id strategy of a structure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdType {
    /// Sequential 32-bit identity.
    Identity,
    /// Sequential 64-bit identity.
    BigIdentity,
    Guid,
    String,
}

impl IdType {
    /// Identities are sequential, so their order follows insertion order.
    pub fn is_identity(&self) -> bool {
        matches!(self, IdType::Identity | IdType::BigIdentity)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IdType::Identity => "Identity",
            IdType::BigIdentity => "BigIdentity",
            IdType::Guid => "Guid",
            IdType::String => "String",
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RAW ID
// ============================================================================

/// An id as supplied by a caller, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawId {
    Int(i64),
    Guid(Uuid),
    Text(String),
    Json(serde_json::Value),
    Id(StructureId),
}

impl From<i32> for RawId {
    fn from(v: i32) -> Self {
        RawId::Int(i64::from(v))
    }
}

impl From<u32> for RawId {
    fn from(v: u32) -> Self {
        RawId::Int(i64::from(v))
    }
}

impl From<i64> for RawId {
    fn from(v: i64) -> Self {
        RawId::Int(v)
    }
}

impl From<Uuid> for RawId {
    fn from(v: Uuid) -> Self {
        RawId::Guid(v)
    }
}

impl From<&str> for RawId {
    fn from(v: &str) -> Self {
        RawId::Text(v.to_string())
    }
}

impl From<String> for RawId {
    fn from(v: String) -> Self {
        RawId::Text(v)
    }
}

impl From<serde_json::Value> for RawId {
    fn from(v: serde_json::Value) -> Self {
        RawId::Json(v)
    }
}

impl From<StructureId> for RawId {
    fn from(v: StructureId) -> Self {
        RawId::Id(v)
    }
}

impl From<&StructureId> for RawId {
    fn from(v: &StructureId) -> Self {
        RawId::Id(v.clone())
    }
}

// ============================================================================
// STRUCTURE ID
// ============================================================================

/// Normalized identifier of one structure instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StructureId {
    Identity(i32),
    BigIdentity(i64),
    Guid(Uuid),
    String(String),
}

impl StructureId {
    /// Convert a raw id into the id type of a structure.
    ///
    /// Conversion is total over [`RawId`]: every input either yields an id
    /// of the requested type or a [`ValidationError`].
    pub fn convert_from(raw: impl Into<RawId>, id_type: IdType) -> Result<Self, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidId {
            id_type: id_type.to_string(),
            reason,
        };

        match (raw.into(), id_type) {
            (RawId::Id(id), _) if id.id_type() == id_type => Ok(id),
            (RawId::Id(StructureId::Identity(v)), IdType::BigIdentity) => {
                Ok(StructureId::BigIdentity(i64::from(v)))
            }
            (RawId::Id(StructureId::BigIdentity(v)), IdType::Identity) => {
                Self::convert_from(RawId::Int(v), id_type)
            }
            (RawId::Id(id), _) => Err(invalid(format!(
                "{} id cannot be used as {} id",
                id.id_type(),
                id_type
            ))),

            (RawId::Json(serde_json::Value::Number(n)), _) => match n.as_i64() {
                Some(v) => Self::convert_from(RawId::Int(v), id_type),
                None => Err(invalid(format!("{} is not an integer", n))),
            },
            (RawId::Json(serde_json::Value::String(s)), _) => {
                Self::convert_from(RawId::Text(s), id_type)
            }
            (RawId::Json(other), _) => Err(invalid(format!("unsupported JSON id {}", other))),

            (RawId::Int(v), IdType::Identity) => {
                let v = i32::try_from(v).map_err(|_| invalid(format!("{} is out of range", v)))?;
                if v <= 0 {
                    return Err(invalid(format!("{} is not positive", v)));
                }
                Ok(StructureId::Identity(v))
            }
            (RawId::Int(v), IdType::BigIdentity) => {
                if v <= 0 {
                    return Err(invalid(format!("{} is not positive", v)));
                }
                Ok(StructureId::BigIdentity(v))
            }
            (RawId::Text(s), IdType::Identity | IdType::BigIdentity) => {
                let v = s
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| invalid(format!("'{}' is not an integer", s)))?;
                Self::convert_from(RawId::Int(v), id_type)
            }

            (RawId::Guid(g), IdType::Guid) => {
                if g.is_nil() {
                    return Err(invalid("nil GUID".to_string()));
                }
                Ok(StructureId::Guid(g))
            }
            (RawId::Text(s), IdType::Guid) => {
                let g = Uuid::from_str(s.trim())
                    .map_err(|e| invalid(format!("'{}' is not a GUID: {}", s, e)))?;
                Self::convert_from(RawId::Guid(g), id_type)
            }

            (RawId::Text(s), IdType::String) => {
                if s.trim().is_empty() {
                    return Err(invalid("blank string".to_string()));
                }
                Ok(StructureId::String(s))
            }

            (RawId::Int(v), IdType::Guid | IdType::String) => {
                Err(invalid(format!("integer {} cannot be used", v)))
            }
            (RawId::Guid(g), IdType::Identity | IdType::BigIdentity | IdType::String) => {
                Err(invalid(format!("GUID {} cannot be used", g)))
            }
        }
    }

    pub fn id_type(&self) -> IdType {
        match self {
            StructureId::Identity(_) => IdType::Identity,
            StructureId::BigIdentity(_) => IdType::BigIdentity,
            StructureId::Guid(_) => IdType::Guid,
            StructureId::String(_) => IdType::String,
        }
    }

    /// The id as a statement parameter value.
    pub fn to_query_value(&self) -> QueryValue {
        match self {
            StructureId::Identity(v) => QueryValue::Integer(i64::from(*v)),
            StructureId::BigIdentity(v) => QueryValue::Integer(*v),
            StructureId::Guid(g) => QueryValue::Guid(*g),
            StructureId::String(s) => QueryValue::String(s.clone()),
        }
    }
}

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureId::Identity(v) => write!(f, "{}", v),
            StructureId::BigIdentity(v) => write!(f, "{}", v),
            StructureId::Guid(g) => write!(f, "{}", g),
            StructureId::String(s) => f.write_str(s),
        }
    }
}

/// Generate a new timestamp-sortable GUID id.
pub fn new_guid_id() -> StructureId {
    StructureId::Guid(Uuid::now_v7())
}

// =============================================================================
// TESTS
// =============================================================================
