//! Error types for Quarry operations

use thiserror::Error;

/// Caller input that was rejected before any I/O happened.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Collection {field} must contain at least one item")]
    EmptyCollection { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid id for {id_type} structure: {reason}")]
    InvalidId { id_type: String, reason: String },

    #[error("Invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("Structure not registered: {structure}")]
    UnknownStructure { structure: String },
}

/// A predicate tree or query that cannot be compiled against a schema.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Member '{member_path}' is not indexed by structure {structure}")]
    UnknownMember {
        structure: String,
        member_path: String,
    },

    #[error("Type mismatch on member '{member_path}': expected {expected}, got {actual}")]
    TypeMismatch {
        member_path: String,
        expected: String,
        actual: String,
    },

    #[error("Operator {operator} is not supported on member '{member_path}': {reason}")]
    UnsupportedOperator {
        member_path: String,
        operator: String,
        reason: String,
    },

    #[error("Member '{member_path}' is not enumerable")]
    NotEnumerable { member_path: String },

    #[error("Logical {operator} requires at least one operand")]
    EmptyLogical { operator: String },

    #[error("Paging with an offset requires at least one sorting")]
    PagingWithoutOrdering,

    #[error("Invalid paging: {reason}")]
    InvalidPaging { reason: String },
}

/// An operation the core cannot express for a structure/id-type combination.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UnsupportedError {
    #[error("{operation} is not supported for {id_type} ids of structure {structure}")]
    IdType {
        operation: String,
        structure: String,
        id_type: String,
    },
}

/// One failed attempt inside a composite cache operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFailure {
    pub structure: String,
    pub reason: String,
}

impl std::fmt::Display for CacheFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.structure, self.reason)
    }
}

fn join_failures(failures: &[CacheFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures inside cache get/put/remove/clear.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache lock poisoned for {structure}")]
    LockPoisoned { structure: String },

    #[error("Cache backend failure for {structure}: {reason}")]
    Backend { structure: String, reason: String },

    #[error(
        "Cache clear failed for {} of {} entries: {}",
        .failures.len(),
        .attempted.len(),
        join_failures(.failures)
    )]
    ClearFailed {
        attempted: Vec<String>,
        failures: Vec<CacheFailure>,
    },
}

/// Failures reported by the backing store. Propagated verbatim, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Connection already closed")]
    ConnectionClosed,

    #[error("Query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Schema operation failed for {structure}: {reason}")]
    SchemaFailed { structure: String, reason: String },

    #[error("Structure {structure} with id {id} not found")]
    NotFound { structure: String, id: String },

    #[error("Database operation failed: {reason}")]
    DatabaseFailed { reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Session lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session already disposed")]
    AlreadyDisposed,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Payload (de)serialization errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SerializationError {
    #[error("Serialization failed: {reason}")]
    Serialize { reason: String },

    #[error("Deserialization failed: {reason}")]
    Deserialize { reason: String },
}

/// Master error type for all Quarry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuarryError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Unsupported operation: {0}")]
    Unsupported(#[from] UnsupportedError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),
}

/// Result type alias for Quarry operations.
pub type QuarryResult<T> = Result<T, QuarryError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_display_unknown_member() {
        let err = QueryError::UnknownMember {
            structure: "MyItem".to_string(),
            member_path: "Nope".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Nope"));
        assert!(msg.contains("MyItem"));
    }

    #[test]
    fn test_cache_error_display_clear_failed_names_all_attempts() {
        let err = CacheError::ClearFailed {
            attempted: vec!["A".to_string(), "B".to_string()],
            failures: vec![CacheFailure {
                structure: "B".to_string(),
                reason: "disk gone".to_string(),
            }],
        };
        let msg = format!("{}", err);
        assert!(msg.contains("1 of 2"));
        assert!(msg.contains("B: disk gone"));
    }

    #[test]
    fn test_unsupported_error_display() {
        let err = UnsupportedError::IdType {
            operation: "get_by_id_interval".to_string(),
            structure: "GuidItem".to_string(),
            id_type: "Guid".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("get_by_id_interval"));
        assert!(msg.contains("Guid"));
    }

    #[test]
    fn test_quarry_error_from_variants() {
        let store = QuarryError::from(StoreError::ConnectionClosed);
        assert!(matches!(store, QuarryError::Store(_)));

        let session = QuarryError::from(SessionError::AlreadyDisposed);
        assert!(matches!(session, QuarryError::Session(_)));

        let query = QuarryError::from(QueryError::PagingWithoutOrdering);
        assert!(matches!(query, QuarryError::Query(_)));

        let validation = QuarryError::from(ValidationError::EmptyCollection {
            field: "ids".to_string(),
        });
        assert!(matches!(validation, QuarryError::Validation(_)));

        let cache = QuarryError::from(CacheError::LockPoisoned {
            structure: "MyItem".to_string(),
        });
        assert!(matches!(cache, QuarryError::Cache(_)));
    }

    #[test]
    fn test_session_error_display() {
        let msg = format!("{}", QuarryError::from(SessionError::AlreadyDisposed));
        assert!(msg.contains("already disposed"));
    }
}
