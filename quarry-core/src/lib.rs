//! Quarry Core - Shared Types
//!
//! Ids, schemas, query values, configuration and the error taxonomy used by
//! every other Quarry crate. No I/O happens here.

pub mod config;
pub mod error;
pub mod identity;
pub mod index;
pub mod schema;
pub mod serializer;
pub mod structure;
pub mod value;

pub use config::{CacheConfig, CacheConsumeMode, DatabaseConfig, SerializerConfig};
pub use error::*;
pub use identity::{new_guid_id, IdType, RawId, StructureId};
pub use index::{extract_indexes, StructureIndex};
pub use schema::{
    validate_identifier, DataTypeCode, IndexAccessor, SchemaBuilder, StructureKey,
    StructureSchema,
};
pub use serializer::JsonSerializer;
pub use structure::{Structure, StructureSchemas};
pub use value::{QueryValue, SqlParameter};
