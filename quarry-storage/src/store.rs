//! Backing store abstraction.
//!
//! A [`StoreProvider`] owns the physical database and hands out
//! [`StoreClient`]s, one per session. Clients only move serialized payloads
//! and index rows; they never see typed structures.

use std::sync::Arc;

use async_trait::async_trait;
use quarry_core::{QuarryResult, StructureId, StructureIndex, StructureSchema};
use quarry_query::{CompiledQuery, CompiledWhere, RawQuery, SqlDialect};
use serde::{Deserialize, Serialize};

/// A payload read back together with its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredStructure {
    pub id: StructureId,
    pub json: String,
}

impl StoredStructure {
    pub fn new(id: StructureId, json: impl Into<String>) -> Self {
        Self {
            id,
            json: json.into(),
        }
    }
}

/// One connection to the backing store.
///
/// Every method fails with `StoreError::ConnectionClosed` once
/// [`StoreClient::close`] has been called. Failures are returned as-is;
/// clients never retry.
#[async_trait]
pub trait StoreClient: Send + Sync {
    // === Schema ===

    /// Create or migrate the tables of a structure set. Idempotent.
    async fn upsert_schema(&self, schema: &StructureSchema) -> QuarryResult<()>;

    /// Drop the tables of a structure set if they exist.
    async fn drop_schema(&self, schema: &StructureSchema) -> QuarryResult<()>;

    // === Reads ===

    async fn fetch_by_id(
        &self,
        schema: &StructureSchema,
        id: &StructureId,
    ) -> QuarryResult<Option<String>>;

    /// Fetch the payloads of every existing id. Order is unspecified.
    async fn fetch_by_ids(
        &self,
        schema: &StructureSchema,
        ids: &[StructureId],
    ) -> QuarryResult<Vec<StoredStructure>>;

    /// Payloads with ids in `from..=to`, ordered by id.
    async fn fetch_by_id_interval(
        &self,
        schema: &StructureSchema,
        from: &StructureId,
        to: &StructureId,
    ) -> QuarryResult<Vec<String>>;

    /// Every payload of the structure set, ordered by id.
    async fn fetch_all_ordered(&self, schema: &StructureSchema) -> QuarryResult<Vec<String>>;

    /// Run a compiled select of payloads.
    async fn execute_query(
        &self,
        schema: &StructureSchema,
        query: &CompiledQuery,
    ) -> QuarryResult<Vec<String>>;

    /// Run caller-written SQL; the first column of every row is a payload.
    async fn execute_raw(&self, query: &RawQuery) -> QuarryResult<Vec<String>>;

    async fn row_count(&self, schema: &StructureSchema) -> QuarryResult<u64>;

    async fn row_count_by_filter(
        &self,
        schema: &StructureSchema,
        filter: &CompiledWhere,
    ) -> QuarryResult<u64>;

    async fn exists_by_id(&self, schema: &StructureSchema, id: &StructureId)
        -> QuarryResult<bool>;

    /// Ids matching a compiled filter, ordered by id.
    async fn ids_by_filter(
        &self,
        schema: &StructureSchema,
        filter: &CompiledWhere,
    ) -> QuarryResult<Vec<StructureId>>;

    // === Writes ===

    /// Reserve `count` consecutive identity values and return the first.
    async fn reserve_identities(&self, schema: &StructureSchema, count: u32) -> QuarryResult<i64>;

    async fn insert(
        &self,
        schema: &StructureSchema,
        id: &StructureId,
        json: &str,
        indexes: &[StructureIndex],
    ) -> QuarryResult<()>;

    /// Replace the payload and index rows of an existing structure.
    /// A missing id is `StoreError::NotFound`.
    async fn update(
        &self,
        schema: &StructureSchema,
        id: &StructureId,
        json: &str,
        indexes: &[StructureIndex],
    ) -> QuarryResult<()>;

    /// Returns the number of deleted structures.
    async fn delete_by_ids(&self, schema: &StructureSchema, ids: &[StructureId])
        -> QuarryResult<u64>;

    async fn delete_by_id_interval(
        &self,
        schema: &StructureSchema,
        from: &StructureId,
        to: &StructureId,
    ) -> QuarryResult<u64>;

    // === Lifecycle ===

    async fn close(&self) -> QuarryResult<()>;

    fn is_closed(&self) -> bool;
}

/// Owner of the physical database.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    fn dialect(&self) -> Arc<dyn SqlDialect>;

    async fn connect(&self) -> QuarryResult<Box<dyn StoreClient>>;

    /// Drop the database if present and create it empty.
    async fn ensure_new_database(&self) -> QuarryResult<()>;

    async fn create_database_if_not_exists(&self) -> QuarryResult<()>;

    /// Verify that the database exists and prepare it for use.
    async fn initialize_existing(&self) -> QuarryResult<()>;

    async fn drop_database_if_exists(&self) -> QuarryResult<()>;

    async fn database_exists(&self) -> QuarryResult<bool>;
}
