//! Session orchestrator: the per-caller façade over one store connection.
//!
//! Every operation first makes sure the structure's schema is in the store.
//! Id reads go through the cache (when the database has one); predicate
//! queries and counts always go to the store through the compiler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use quarry_core::{
    extract_indexes, new_guid_id, CacheConsumeMode, IdType, QuarryError, QuarryResult, RawId,
    SessionError, Structure, StructureId, StructureIndex, StructureSchema, UnsupportedError,
    ValidationError,
};
use quarry_query::{Predicate, Query, RawQuery, ID_COLUMN};
use quarry_storage::{StoreClient, StructureFetcher};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::database::Database;

// ============================================================================
// FETCHER
// ============================================================================

/// Store-backed fetcher handed to the cache for one structure type.
struct SessionFetcher<'a> {
    client: &'a dyn StoreClient,
    schema: &'a StructureSchema,
}

#[async_trait]
impl StructureFetcher for SessionFetcher<'_> {
    async fn fetch(&self, id: &StructureId) -> QuarryResult<Option<String>> {
        self.client.fetch_by_id(self.schema, id).await
    }

    async fn fetch_many(&self, ids: &[StructureId]) -> QuarryResult<Vec<(StructureId, String)>> {
        let rows = self.client.fetch_by_ids(self.schema, ids).await?;
        Ok(rows.into_iter().map(|row| (row.id, row.json)).collect())
    }

    async fn exists(&self, id: &StructureId) -> QuarryResult<bool> {
        self.client.exists_by_id(self.schema, id).await
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// A unit of work against one database.
///
/// After [`Session::dispose`] every operation fails with
/// [`SessionError::AlreadyDisposed`], including a second `dispose`.
pub struct Session {
    db: Database,
    client: Box<dyn StoreClient>,
    consume_mode: CacheConsumeMode,
    disposed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.db.name())
            .field("consume_mode", &self.consume_mode)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        db: Database,
        client: Box<dyn StoreClient>,
        consume_mode: CacheConsumeMode,
    ) -> Self {
        Self {
            db,
            client,
            consume_mode,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn consume_mode(&self) -> CacheConsumeMode {
        self.consume_mode
    }

    pub fn set_consume_mode(&mut self, mode: CacheConsumeMode) {
        self.consume_mode = mode;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Release the store connection. Only the first call succeeds.
    pub async fn dispose(&self) -> QuarryResult<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyDisposed.into());
        }
        self.client.close().await
    }

    fn ensure_active(&self) -> QuarryResult<()> {
        if self.is_disposed() {
            return Err(SessionError::AlreadyDisposed.into());
        }
        Ok(())
    }

    /// Resolve the schema of `T` and make sure the store holds it.
    async fn prepare<T: Structure>(&self) -> QuarryResult<Arc<StructureSchema>> {
        self.ensure_active()?;
        let schema = self.db.schemas().get_schema::<T>()?;
        self.db.ensure_schema(self.client.as_ref(), &schema).await?;
        Ok(schema)
    }

    fn fetcher<'a>(&'a self, schema: &'a StructureSchema) -> SessionFetcher<'a> {
        SessionFetcher {
            client: self.client.as_ref(),
            schema,
        }
    }

    fn convert_ids<I>(schema: &StructureSchema, ids: I) -> QuarryResult<Vec<StructureId>>
    where
        I: IntoIterator,
        I::Item: Into<RawId>,
    {
        let ids = ids
            .into_iter()
            .map(|raw| StructureId::convert_from(raw, schema.id_type()))
            .collect::<Result<Vec<_>, _>>()?;
        if ids.is_empty() {
            return Err(ValidationError::EmptyCollection {
                field: "ids".to_string(),
            }
            .into());
        }
        Ok(ids)
    }

    fn require_identity(schema: &StructureSchema, operation: &str) -> QuarryResult<()> {
        if schema.id_type().is_identity() {
            return Ok(());
        }
        Err(UnsupportedError::IdType {
            operation: operation.to_string(),
            structure: schema.key().to_string(),
            id_type: schema.id_type().to_string(),
        }
        .into())
    }

    // ========================================================================
    // SCHEMA
    // ========================================================================

    /// The schema of `T`, upserted into the store if needed.
    pub async fn structure_schema<T: Structure>(&self) -> QuarryResult<Arc<StructureSchema>> {
        self.prepare::<T>().await
    }

    // ========================================================================
    // ID READS
    // ========================================================================

    pub async fn get_by_id<T: Structure>(&self, id: impl Into<RawId>) -> QuarryResult<Option<T>> {
        self.get_by_id_as::<T, T>(id).await
    }

    /// Read the structure stored for `T` under `id` and deserialize it as
    /// `R`. The read is cached under `T`.
    pub async fn get_by_id_as<T, R>(&self, id: impl Into<RawId>) -> QuarryResult<Option<R>>
    where
        T: Structure,
        R: DeserializeOwned,
    {
        match self.get_by_id_as_json::<T>(id).await? {
            Some(json) => Ok(Some(self.db.serializer().deserialize(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn get_by_id_as_json<T: Structure>(
        &self,
        id: impl Into<RawId>,
    ) -> QuarryResult<Option<String>> {
        let schema = self.prepare::<T>().await?;
        let id = StructureId::convert_from(id, schema.id_type())?;
        let fetcher = self.fetcher(&schema);
        match self.db.cache() {
            Some(cache) => {
                cache
                    .consume(schema.key(), &id, &fetcher, self.consume_mode)
                    .await
            }
            None => fetcher.fetch(&id).await,
        }
    }

    /// Structures for `ids` in the order given. Ids that do not exist are
    /// skipped.
    pub async fn get_by_ids<T, I>(&self, ids: I) -> QuarryResult<Vec<T>>
    where
        T: Structure,
        I: IntoIterator,
        I::Item: Into<RawId>,
    {
        self.get_by_ids_as::<T, T, I>(ids).await
    }

    pub async fn get_by_ids_as<T, R, I>(&self, ids: I) -> QuarryResult<Vec<R>>
    where
        T: Structure,
        R: DeserializeOwned,
        I: IntoIterator,
        I::Item: Into<RawId>,
    {
        let payloads = self.get_by_ids_as_json::<T, I>(ids).await?;
        Ok(self.db.serializer().deserialize_many(payloads)?)
    }

    pub async fn get_by_ids_as_json<T, I>(&self, ids: I) -> QuarryResult<Vec<String>>
    where
        T: Structure,
        I: IntoIterator,
        I::Item: Into<RawId>,
    {
        let schema = self.prepare::<T>().await?;
        let ids = Self::convert_ids(&schema, ids)?;
        let fetcher = self.fetcher(&schema);
        match self.db.cache() {
            Some(cache) => {
                cache
                    .consume_many(schema.key(), &ids, &fetcher, self.consume_mode)
                    .await
            }
            None => {
                let rows: HashMap<_, _> = fetcher.fetch_many(&ids).await?.into_iter().collect();
                Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
            }
        }
    }

    pub async fn exists<T: Structure>(&self, id: impl Into<RawId>) -> QuarryResult<bool> {
        let schema = self.prepare::<T>().await?;
        let id = StructureId::convert_from(id, schema.id_type())?;
        let fetcher = self.fetcher(&schema);
        match self.db.cache() {
            Some(cache) => {
                cache
                    .exists(schema.key(), &id, &fetcher, self.consume_mode)
                    .await
            }
            None => fetcher.exists(&id).await,
        }
    }

    /// Structures with ids in `from..=to`, ordered by id. Identity ids only.
    pub async fn get_by_id_interval<T: Structure>(
        &self,
        from: impl Into<RawId>,
        to: impl Into<RawId>,
    ) -> QuarryResult<Vec<T>> {
        let schema = self.prepare::<T>().await?;
        Self::require_identity(&schema, "get_by_id_interval")?;
        let from = StructureId::convert_from(from, schema.id_type())?;
        let to = StructureId::convert_from(to, schema.id_type())?;
        let payloads = self
            .client
            .fetch_by_id_interval(&schema, &from, &to)
            .await?;
        Ok(self.db.serializer().deserialize_many(payloads)?)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub async fn query<T: Structure>(&self, query: &Query) -> QuarryResult<Vec<T>> {
        self.query_as::<T, T>(query).await
    }

    /// Run a query against `T` and deserialize the payloads as `R`, which may
    /// be any shape compatible with the stored JSON.
    pub async fn query_as<T, R>(&self, query: &Query) -> QuarryResult<Vec<R>>
    where
        T: Structure,
        R: DeserializeOwned,
    {
        let payloads = self.query_as_json::<T>(query).await?;
        Ok(self.db.serializer().deserialize_many(payloads)?)
    }

    pub async fn query_as_json<T: Structure>(&self, query: &Query) -> QuarryResult<Vec<String>> {
        let schema = self.prepare::<T>().await?;
        if query.is_empty() {
            return self.client.fetch_all_ordered(&schema).await;
        }
        let compiled = self.db.compiler().compile_query(&schema, query)?;
        self.client.execute_query(&schema, &compiled).await
    }

    /// Count matching structures without materializing them.
    pub async fn count<T: Structure>(&self, query: &Query) -> QuarryResult<u64> {
        let schema = self.prepare::<T>().await?;
        match &query.predicate {
            None => self.client.row_count(&schema).await,
            Some(predicate) => {
                let filter = self.db.compiler().compile_where(&schema, Some(predicate))?;
                self.client.row_count_by_filter(&schema, &filter).await
            }
        }
    }

    pub async fn count_all<T: Structure>(&self) -> QuarryResult<u64> {
        self.count::<T>(&Query::new()).await
    }

    pub async fn raw_query<T: Structure>(&self, query: &RawQuery) -> QuarryResult<Vec<T>> {
        self.raw_query_as::<T, T>(query).await
    }

    pub async fn raw_query_as<T, R>(&self, query: &RawQuery) -> QuarryResult<Vec<R>>
    where
        T: Structure,
        R: DeserializeOwned,
    {
        let payloads = self.raw_query_as_json::<T>(query).await?;
        Ok(self.db.serializer().deserialize_many(payloads)?)
    }

    /// Run caller-written SQL against the tables of `T` once its schema is in
    /// the store. The cache is bypassed.
    pub async fn raw_query_as_json<T: Structure>(
        &self,
        query: &RawQuery,
    ) -> QuarryResult<Vec<String>> {
        if query.is_blank() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "sql".to_string(),
            }
            .into());
        }
        self.prepare::<T>().await?;
        self.client.execute_raw(query).await
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert `item`, assigning an id when it has none. Returns the id.
    pub async fn insert<T: Structure>(&self, item: &T) -> QuarryResult<StructureId> {
        let schema = self.prepare::<T>().await?;
        let id = match item.structure_id() {
            Some(id) => StructureId::convert_from(id, schema.id_type())?,
            None => self
                .assign_ids(&schema, 1)
                .await?
                .pop()
                .ok_or_else(|| ValidationError::RequiredFieldMissing {
                    field: ID_COLUMN.to_string(),
                })?,
        };
        self.insert_with_id(&schema, item, &id).await?;
        Ok(id)
    }

    /// Insert several items. Identity ids for items without one are reserved
    /// in a single block. Items are written in order; a failure stops the
    /// batch.
    pub async fn insert_many<T: Structure>(&self, items: &[T]) -> QuarryResult<Vec<StructureId>> {
        if items.is_empty() {
            return Err(ValidationError::EmptyCollection {
                field: "items".to_string(),
            }
            .into());
        }
        let schema = self.prepare::<T>().await?;
        let missing = items.iter().filter(|item| item.structure_id().is_none()).count();
        let mut assigned = self.assign_ids(&schema, missing).await?.into_iter();

        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let id = match item.structure_id() {
                Some(id) => StructureId::convert_from(id, schema.id_type())?,
                None => assigned.next().ok_or_else(|| ValidationError::RequiredFieldMissing {
                    field: ID_COLUMN.to_string(),
                })?,
            };
            self.insert_with_id(&schema, item, &id).await?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Insert a structure of type `T` given as JSON text. The id is read from
    /// the `StructureId` member when present and assigned otherwise.
    pub async fn insert_json<T: Structure>(&self, json: &str) -> QuarryResult<StructureId> {
        self.insert_many_json::<T, _>([json])
            .await?
            .pop()
            .ok_or_else(|| {
                ValidationError::RequiredFieldMissing {
                    field: ID_COLUMN.to_string(),
                }
                .into()
            })
    }

    /// JSON counterpart of [`Session::insert_many`]. Every payload is parsed
    /// and id-checked before the first write.
    pub async fn insert_many_json<T, I>(&self, payloads: I) -> QuarryResult<Vec<StructureId>>
    where
        T: Structure,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let payloads: Vec<I::Item> = payloads.into_iter().collect();
        if payloads.is_empty() {
            return Err(ValidationError::EmptyCollection {
                field: "payloads".to_string(),
            }
            .into());
        }
        let schema = self.prepare::<T>().await?;

        let mut parsed = Vec::with_capacity(payloads.len());
        for json in &payloads {
            let value = self.db.serializer().parse_value(json.as_ref())?;
            if !value.is_object() {
                return Err(ValidationError::InvalidValue {
                    field: schema.key().to_string(),
                    reason: "structures must serialize to JSON objects".to_string(),
                }
                .into());
            }
            let id = match value.get(ID_COLUMN) {
                None | Some(Value::Null) => None,
                Some(raw) => Some(StructureId::convert_from(raw.clone(), schema.id_type())?),
            };
            parsed.push((value, id));
        }

        let missing = parsed.iter().filter(|(_, id)| id.is_none()).count();
        let mut assigned = self.assign_ids(&schema, missing).await?.into_iter();

        let mut ids = Vec::with_capacity(parsed.len());
        for (value, id) in parsed {
            let id = match id {
                Some(id) => id,
                None => assigned.next().ok_or_else(|| ValidationError::RequiredFieldMissing {
                    field: ID_COLUMN.to_string(),
                })?,
            };
            let (json, indexes) = with_id(&schema, value, &id)?;
            self.client.insert(&schema, &id, &json, &indexes).await?;
            self.invalidate(&schema, std::slice::from_ref(&id)).await?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn assign_ids(&self, schema: &StructureSchema, count: usize) -> QuarryResult<Vec<StructureId>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        match schema.id_type() {
            IdType::Guid => Ok((0..count).map(|_| new_guid_id()).collect()),
            IdType::Identity | IdType::BigIdentity => {
                let block = u32::try_from(count).map_err(|_| ValidationError::InvalidValue {
                    field: "items".to_string(),
                    reason: format!("cannot reserve {} identities at once", count),
                })?;
                let first = self.client.reserve_identities(schema, block).await?;
                (first..first + i64::from(block))
                    .map(|v| StructureId::convert_from(v, schema.id_type()).map_err(QuarryError::from))
                    .collect()
            }
            IdType::String => Err(ValidationError::RequiredFieldMissing {
                field: ID_COLUMN.to_string(),
            }
            .into()),
        }
    }

    async fn insert_with_id<T: Structure>(
        &self,
        schema: &StructureSchema,
        item: &T,
        id: &StructureId,
    ) -> QuarryResult<()> {
        let (json, indexes) = self.serialize_with_id(schema, item, id)?;
        self.client.insert(schema, id, &json, &indexes).await?;
        self.invalidate(schema, std::slice::from_ref(id)).await
    }

    /// Replace a stored structure. The item must carry its id.
    pub async fn update<T: Structure>(&self, item: &T) -> QuarryResult<()> {
        let schema = self.prepare::<T>().await?;
        let id = item
            .structure_id()
            .ok_or_else(|| ValidationError::RequiredFieldMissing {
                field: ID_COLUMN.to_string(),
            })?;
        let id = StructureId::convert_from(id, schema.id_type())?;
        let (json, indexes) = self.serialize_with_id(&schema, item, &id)?;
        self.client.update(&schema, &id, &json, &indexes).await?;
        self.invalidate(&schema, std::slice::from_ref(&id)).await
    }

    /// Returns whether a structure was deleted.
    pub async fn delete_by_id<T: Structure>(&self, id: impl Into<RawId>) -> QuarryResult<bool> {
        let id: RawId = id.into();
        Ok(self.delete_by_ids::<T, _>([id]).await? > 0)
    }

    pub async fn delete_by_ids<T, I>(&self, ids: I) -> QuarryResult<u64>
    where
        T: Structure,
        I: IntoIterator,
        I::Item: Into<RawId>,
    {
        let schema = self.prepare::<T>().await?;
        let ids = Self::convert_ids(&schema, ids)?;
        let deleted = self.client.delete_by_ids(&schema, &ids).await?;
        self.invalidate(&schema, &ids).await?;
        Ok(deleted)
    }

    /// Delete ids in `from..=to`. Identity ids only.
    pub async fn delete_by_id_interval<T: Structure>(
        &self,
        from: impl Into<RawId>,
        to: impl Into<RawId>,
    ) -> QuarryResult<u64> {
        let schema = self.prepare::<T>().await?;
        Self::require_identity(&schema, "delete_by_id_interval")?;
        let from = StructureId::convert_from(from, schema.id_type())?;
        let to = StructureId::convert_from(to, schema.id_type())?;
        let deleted = self
            .client
            .delete_by_id_interval(&schema, &from, &to)
            .await?;
        self.invalidate_all(&schema).await?;
        Ok(deleted)
    }

    /// Delete every structure matching `predicate`.
    pub async fn delete_by_query<T: Structure>(&self, predicate: &Predicate) -> QuarryResult<u64> {
        let schema = self.prepare::<T>().await?;
        let filter = self.db.compiler().compile_where(&schema, Some(predicate))?;
        let ids = self.client.ids_by_filter(&schema, &filter).await?;
        if ids.is_empty() {
            return Ok(0);
        }
        let deleted = self.client.delete_by_ids(&schema, &ids).await?;
        self.invalidate_all(&schema).await?;
        Ok(deleted)
    }

    fn serialize_with_id<T: Structure>(
        &self,
        schema: &StructureSchema,
        item: &T,
        id: &StructureId,
    ) -> QuarryResult<(String, Vec<StructureIndex>)> {
        let value = self.db.serializer().to_value(item)?;
        with_id(schema, value, id)
    }

    async fn invalidate(&self, schema: &StructureSchema, ids: &[StructureId]) -> QuarryResult<()> {
        if let Some(cache) = self.db.cache() {
            cache.remove_many(schema.key(), ids).await?;
        }
        Ok(())
    }

    async fn invalidate_all(&self, schema: &StructureSchema) -> QuarryResult<()> {
        if let Some(cache) = self.db.cache() {
            cache.clear_for(schema.key()).await?;
        }
        Ok(())
    }
}

/// Write `id` into the payload and extract its index values.
fn with_id(
    schema: &StructureSchema,
    mut value: Value,
    id: &StructureId,
) -> QuarryResult<(String, Vec<StructureIndex>)> {
    let Value::Object(map) = &mut value else {
        return Err(ValidationError::InvalidValue {
            field: schema.key().to_string(),
            reason: "structures must serialize to JSON objects".to_string(),
        }
        .into());
    };
    map.insert(ID_COLUMN.to_string(), id_to_json(id));
    let indexes = extract_indexes(schema, &value)?;
    Ok((value.to_string(), indexes))
}

fn id_to_json(id: &StructureId) -> Value {
    match id {
        StructureId::Identity(v) => Value::from(*v),
        StructureId::BigIdentity(v) => Value::from(*v),
        StructureId::Guid(g) => Value::from(g.to_string()),
        StructureId::String(s) => Value::from(s.as_str()),
    }
}
