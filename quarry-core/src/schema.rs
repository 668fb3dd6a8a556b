//! Structure schemas: the storage shape and indexable members of a structure type.
//!
//! A schema is immutable once built. When a type changes shape a new schema
//! with a new [`StructureSchema::fingerprint`] is built and re-registered.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{QueryError, ValidationError};
use crate::IdType;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid identifier regex"));

/// Structure and namespace names end up in table names, so they are
/// restricted to plain identifiers.
pub fn validate_identifier(identifier: &str) -> Result<(), ValidationError> {
    if IDENTIFIER.is_match(identifier) {
        Ok(())
    } else {
        Err(ValidationError::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason: "must start with a letter or underscore and contain only letters, digits and underscores".to_string(),
        })
    }
}

// ============================================================================
// DATA TYPE CODE
// ============================================================================

/// Tag selecting the value column and comparison semantics of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataTypeCode {
    String,
    Integer,
    Fractal,
    Bool,
    DateTime,
    Guid,
}

impl DataTypeCode {
    /// Index-table column holding values of this type.
    pub fn value_column(&self) -> &'static str {
        match self {
            DataTypeCode::String => "StringValue",
            DataTypeCode::Integer => "IntegerValue",
            DataTypeCode::Fractal => "FractalValue",
            DataTypeCode::Bool => "BoolValue",
            DataTypeCode::DateTime => "DateTimeValue",
            DataTypeCode::Guid => "GuidValue",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataTypeCode::String => "String",
            DataTypeCode::Integer => "Integer",
            DataTypeCode::Fractal => "Fractal",
            DataTypeCode::Bool => "Bool",
            DataTypeCode::DateTime => "DateTime",
            DataTypeCode::Guid => "Guid",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataTypeCode::Integer | DataTypeCode::Fractal)
    }

    /// Whether a value of type `other` can be compared against this type.
    pub fn is_comparable_with(&self, other: DataTypeCode) -> bool {
        *self == other || (self.is_numeric() && other.is_numeric())
    }

    /// Whether a literal of type `literal` can be bound against this member type.
    /// Integer literals are accepted for fractal members.
    pub fn accepts(&self, literal: DataTypeCode) -> bool {
        *self == literal || (*self == DataTypeCode::Fractal && literal == DataTypeCode::Integer)
    }

    pub const ALL: [DataTypeCode; 6] = [
        DataTypeCode::String,
        DataTypeCode::Integer,
        DataTypeCode::Fractal,
        DataTypeCode::Bool,
        DataTypeCode::DateTime,
        DataTypeCode::Guid,
    ];
}

impl fmt::Display for DataTypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// STRUCTURE KEY
// ============================================================================

/// Stable registry key of a structure type (`namespace.Name` or `Name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructureKey(String);

impl StructureKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        if namespace.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{}.{}", namespace, name))
        }
    }

    /// Parse a key from its rendered form, validating both segments.
    pub fn parse(key: &str) -> Result<Self, ValidationError> {
        match key.rsplit_once('.') {
            Some((namespace, name)) => {
                validate_identifier(namespace)?;
                validate_identifier(name)?;
            }
            None => validate_identifier(key)?,
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StructureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// MEMBERS
// ============================================================================

/// One indexable member of a structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexAccessor {
    /// Dotted path into the serialized structure, e.g. `Address.City`.
    pub member_path: String,
    /// Declared type name, informational.
    pub data_type: String,
    pub data_type_code: DataTypeCode,
    pub is_unique: bool,
    /// Members reached through an array yield one index value per element.
    pub is_enumerable: bool,
}

// ============================================================================
// STRUCTURE SCHEMA
// ============================================================================

/// Compiled description of a structure type's storage shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureSchema {
    key: StructureKey,
    namespace: String,
    name: String,
    id_type: IdType,
    members: BTreeMap<String, IndexAccessor>,
    fingerprint: String,
}

impl StructureSchema {
    pub fn builder(name: impl Into<String>, id_type: IdType) -> SchemaBuilder {
        SchemaBuilder::new(name, id_type)
    }

    pub fn key(&self) -> &StructureKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    /// SHA-256 over name, id type and members; changes whenever the shape does.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn table_prefix(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}_{}", self.namespace, self.name)
        }
    }

    pub fn structure_table(&self) -> String {
        format!("{}Structure", self.table_prefix())
    }

    pub fn indexes_table(&self) -> String {
        format!("{}Indexes", self.table_prefix())
    }

    pub fn members(&self) -> impl Iterator<Item = &IndexAccessor> {
        self.members.values()
    }

    pub fn member(&self, member_path: &str) -> Option<&IndexAccessor> {
        self.members.get(member_path)
    }

    /// Look up a member or fail with [`QueryError::UnknownMember`].
    pub fn require_member(&self, member_path: &str) -> Result<&IndexAccessor, QueryError> {
        self.member(member_path)
            .ok_or_else(|| QueryError::UnknownMember {
                structure: self.key.to_string(),
                member_path: member_path.to_string(),
            })
    }
}

/// Builder for [`StructureSchema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    namespace: String,
    name: String,
    id_type: IdType,
    members: Vec<IndexAccessor>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>, id_type: IdType) -> Self {
        Self {
            namespace: String::new(),
            name: name.into(),
            id_type,
            members: Vec::new(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn id_type(mut self, id_type: IdType) -> Self {
        self.id_type = id_type;
        self
    }

    /// Add a scalar member.
    pub fn member(self, member_path: impl Into<String>, code: DataTypeCode) -> Self {
        self.accessor(member_path, code, false, false)
    }

    /// Add a member whose values must be unique across the structure set.
    pub fn unique_member(self, member_path: impl Into<String>, code: DataTypeCode) -> Self {
        self.accessor(member_path, code, true, false)
    }

    /// Add a member reached through an array.
    pub fn enumerable_member(self, member_path: impl Into<String>, code: DataTypeCode) -> Self {
        self.accessor(member_path, code, false, true)
    }

    fn accessor(
        mut self,
        member_path: impl Into<String>,
        code: DataTypeCode,
        is_unique: bool,
        is_enumerable: bool,
    ) -> Self {
        self.members.push(IndexAccessor {
            member_path: member_path.into(),
            data_type: code.as_str().to_string(),
            data_type_code: code,
            is_unique,
            is_enumerable,
        });
        self
    }

    /// Override the informational type name of the last added member.
    pub fn declared_as(mut self, data_type: impl Into<String>) -> Self {
        if let Some(last) = self.members.last_mut() {
            last.data_type = data_type.into();
        }
        self
    }

    pub fn build(self) -> Result<StructureSchema, ValidationError> {
        validate_identifier(&self.name)?;
        if !self.namespace.is_empty() {
            validate_identifier(&self.namespace)?;
        }

        let mut members = BTreeMap::new();
        for accessor in self.members {
            let path = accessor.member_path.as_str();
            if path.is_empty() || path.split('.').any(str::is_empty) {
                return Err(ValidationError::InvalidValue {
                    field: "member_path".to_string(),
                    reason: format!("'{}' has an empty segment", path),
                });
            }
            if path.chars().any(char::is_control) {
                return Err(ValidationError::InvalidValue {
                    field: "member_path".to_string(),
                    reason: format!("'{}' contains control characters", path.escape_debug()),
                });
            }
            if path == "StructureId" {
                return Err(ValidationError::InvalidValue {
                    field: "member_path".to_string(),
                    reason: "StructureId is reserved for the id column".to_string(),
                });
            }
            if members.contains_key(path) {
                return Err(ValidationError::InvalidValue {
                    field: "member_path".to_string(),
                    reason: format!("'{}' is declared twice", path),
                });
            }
            members.insert(accessor.member_path.clone(), accessor);
        }

        let key = StructureKey::new(&self.namespace, &self.name);
        let fingerprint = fingerprint(&key, self.id_type, &members);

        Ok(StructureSchema {
            key,
            namespace: self.namespace,
            name: self.name,
            id_type: self.id_type,
            members,
            fingerprint,
        })
    }
}

fn fingerprint(
    key: &StructureKey,
    id_type: IdType,
    members: &BTreeMap<String, IndexAccessor>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(id_type.as_str().as_bytes());
    for accessor in members.values() {
        hasher.update([0u8]);
        hasher.update(accessor.member_path.as_bytes());
        hasher.update([0u8]);
        hasher.update(accessor.data_type_code.as_str().as_bytes());
        hasher.update([u8::from(accessor.is_unique), u8::from(accessor.is_enumerable)]);
    }
    hex::encode(hasher.finalize())
}

// =============================================================================
// TESTS
// =============================================================================
