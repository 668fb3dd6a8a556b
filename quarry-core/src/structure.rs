//! The `Structure` trait and the schema registry keyed by structure key.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::ValidationError;
use crate::{IdType, SchemaBuilder, StructureId, StructureKey, StructureSchema};

/// A typed document stored in the backing store.
///
/// # Implementation Requirements
///
/// - `NAME` (and `NAMESPACE`, if set) must be plain identifiers; they become
///   table names
/// - `describe()` must declare every member that queries may reference,
///   using the member paths of the serialized form
/// - `structure_id()` returns `None` only for ids the store assigns
pub trait Structure: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;
    const NAMESPACE: &'static str = "";
    const ID_TYPE: IdType;

    /// Declare the indexable members.
    fn describe(schema: SchemaBuilder) -> SchemaBuilder;

    /// The id of this instance, if it already has one.
    fn structure_id(&self) -> Option<StructureId>;

    fn key() -> StructureKey {
        StructureKey::new(Self::NAMESPACE, Self::NAME)
    }

    fn schema() -> Result<StructureSchema, ValidationError> {
        Self::describe(SchemaBuilder::new(Self::NAME, Self::ID_TYPE).namespace(Self::NAMESPACE))
            .build()
    }
}

/// Registry of built schemas.
///
/// Lookups and first-time builds are sharded; a schema for a key is built
/// by exactly one caller even under concurrent first access.
#[derive(Debug, Default)]
pub struct StructureSchemas {
    schemas: DashMap<StructureKey, Arc<StructureSchema>>,
}

impl StructureSchemas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the schema of `T`, building and registering it on first access.
    pub fn get_schema<T: Structure>(&self) -> Result<Arc<StructureSchema>, ValidationError> {
        let key = T::key();
        if let Some(schema) = self.schemas.get(&key) {
            return Ok(Arc::clone(schema.value()));
        }
        let schema = self
            .schemas
            .entry(key)
            .or_try_insert_with(|| T::schema().map(Arc::new))?;
        Ok(Arc::clone(schema.value()))
    }

    /// Register a schema, replacing the current one only if its shape changed.
    /// Returns the schema now registered for the key.
    pub fn register(&self, schema: StructureSchema) -> Arc<StructureSchema> {
        match self.schemas.entry(schema.key().clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().fingerprint() != schema.fingerprint() {
                    occupied.insert(Arc::new(schema));
                }
                Arc::clone(occupied.get())
            }
            Entry::Vacant(vacant) => Arc::clone(vacant.insert(Arc::new(schema)).value()),
        }
    }

    pub fn get(&self, key: &StructureKey) -> Option<Arc<StructureSchema>> {
        self.schemas.get(key).map(|s| Arc::clone(s.value()))
    }

    pub fn contains(&self, key: &StructureKey) -> bool {
        self.schemas.contains_key(key)
    }

    pub fn remove_schema(&self, key: &StructureKey) -> Option<Arc<StructureSchema>> {
        self.schemas.remove(key).map(|(_, schema)| schema)
    }

    pub fn clear(&self) {
        self.schemas.clear();
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
