//! Database handle: owns the store provider, schema registry, cache and
//! the orchestration lock around every schema-affecting operation.

use std::sync::Arc;

use quarry_core::{
    DatabaseConfig, JsonSerializer, QuarryResult, Structure, StructureKey, StructureSchema,
    StructureSchemas, ValidationError,
};
use quarry_query::SqlCompiler;
use quarry_storage::{CacheProvider, StoreClient, StoreProvider};
use tokio::sync::Mutex;

use crate::schema_manager::SchemaManager;
use crate::session::Session;

/// Shared database handle. Cloning is cheap; every clone shares one lock,
/// registry and cache.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    config: DatabaseConfig,
    provider: Arc<dyn StoreProvider>,
    schemas: StructureSchemas,
    schema_manager: SchemaManager,
    cache: Option<Arc<CacheProvider>>,
    serializer: JsonSerializer,
    compiler: SqlCompiler,
    /// Orchestration lock. Held for schema mutations and database lifecycle
    /// operations only; ordinary reads and writes never take it.
    lock: Mutex<()>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.config.name)
            .field("dialect", &self.inner.compiler.dialect().name())
            .field("schemas", &self.inner.schemas.len())
            .field("cached", &self.inner.cache.is_some())
            .finish()
    }
}

impl Database {
    /// Build a database from configuration. When caching is enabled an
    /// in-memory cache provider is created with the configured structures
    /// already enabled.
    pub fn new(config: DatabaseConfig, provider: Arc<dyn StoreProvider>) -> QuarryResult<Self> {
        config.validate()?;
        let cache = if config.cache.enabled {
            let cache = CacheProvider::in_memory().with_auto_enable(config.cache.auto_enable);
            for structure in &config.cache.enabled_structures {
                cache.enable_for(&StructureKey::parse(structure)?);
            }
            Some(Arc::new(cache))
        } else {
            None
        };
        Ok(Self::build(config, provider, cache))
    }

    /// Build a database around a caller-supplied cache provider. The cache
    /// section of `config` only contributes the default consume mode.
    pub fn with_cache(
        config: DatabaseConfig,
        provider: Arc<dyn StoreProvider>,
        cache: Arc<CacheProvider>,
    ) -> QuarryResult<Self> {
        config.validate()?;
        Ok(Self::build(config, provider, Some(cache)))
    }

    fn build(
        config: DatabaseConfig,
        provider: Arc<dyn StoreProvider>,
        cache: Option<Arc<CacheProvider>>,
    ) -> Self {
        let serializer = JsonSerializer::new(config.serializer.clone());
        let compiler = SqlCompiler::new(provider.dialect());
        tracing::info!(
            name = %config.name,
            dialect = compiler.dialect().name(),
            cache = cache.is_some(),
            "Database configured"
        );
        Self {
            inner: Arc::new(DatabaseInner {
                config,
                provider,
                schemas: StructureSchemas::new(),
                schema_manager: SchemaManager::new(),
                cache,
                serializer,
                compiler,
                lock: Mutex::new(()),
            }),
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> Option<&Arc<CacheProvider>> {
        self.inner.cache.as_ref()
    }

    pub fn schemas(&self) -> &StructureSchemas {
        &self.inner.schemas
    }

    pub fn serializer(&self) -> &JsonSerializer {
        &self.inner.serializer
    }

    pub fn compiler(&self) -> &SqlCompiler {
        &self.inner.compiler
    }

    pub(crate) fn schema_manager(&self) -> &SchemaManager {
        &self.inner.schema_manager
    }

    // ========================================================================
    // SESSIONS
    // ========================================================================

    /// Open a session on a fresh store connection. The session starts in the
    /// configured consume mode.
    pub async fn create_session(&self) -> QuarryResult<Session> {
        let client = self.inner.provider.connect().await?;
        Ok(Session::new(
            self.clone(),
            client,
            self.inner.config.cache.consume_mode,
        ))
    }

    // ========================================================================
    // DATABASE LIFECYCLE
    // ========================================================================

    pub async fn ensure_new_database(&self) -> QuarryResult<()> {
        let _guard = self.inner.lock.lock().await;
        self.reset_caches().await?;
        self.inner.provider.ensure_new_database().await
    }

    pub async fn create_if_not_exists(&self) -> QuarryResult<()> {
        let _guard = self.inner.lock.lock().await;
        self.reset_caches().await?;
        self.inner.provider.create_database_if_not_exists().await
    }

    pub async fn initialize_existing(&self) -> QuarryResult<()> {
        let _guard = self.inner.lock.lock().await;
        self.reset_caches().await?;
        self.inner.provider.initialize_existing().await
    }

    pub async fn delete_if_exists(&self) -> QuarryResult<()> {
        let _guard = self.inner.lock.lock().await;
        self.reset_caches().await?;
        self.inner.provider.drop_database_if_exists().await
    }

    pub async fn exists(&self) -> QuarryResult<bool> {
        let _guard = self.inner.lock.lock().await;
        self.inner.provider.database_exists().await
    }

    /// Clear every cache entry and forget every upserted shape. Caller holds
    /// the orchestration lock.
    async fn reset_caches(&self) -> QuarryResult<()> {
        if let Some(cache) = &self.inner.cache {
            cache.clear().await?;
        }
        self.inner.schema_manager.clear();
        Ok(())
    }

    // ========================================================================
    // STRUCTURE SETS
    // ========================================================================

    /// Create or migrate the tables of `T`.
    pub async fn upsert_structure_set<T: Structure>(&self) -> QuarryResult<()> {
        let schema = self.inner.schemas.get_schema::<T>()?;
        let _guard = self.inner.lock.lock().await;
        let client = self.inner.provider.connect().await?;
        let result = self.upsert_locked(client.as_ref(), &schema).await;
        client.close().await?;
        result
    }

    /// Drop the tables of `T`, its cache entry and its registered schema.
    pub async fn drop_structure_set<T: Structure>(&self) -> QuarryResult<()> {
        self.inner.schemas.get_schema::<T>()?;
        self.drop_structure_sets(&[T::key()]).await
    }

    /// Drop several structure sets under one acquisition of the lock. Every
    /// key must have a registered schema.
    pub async fn drop_structure_sets(&self, keys: &[StructureKey]) -> QuarryResult<()> {
        let schemas = keys
            .iter()
            .map(|key| {
                self.inner
                    .schemas
                    .get(key)
                    .ok_or_else(|| ValidationError::UnknownStructure {
                        structure: key.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let _guard = self.inner.lock.lock().await;
        let client = self.inner.provider.connect().await?;
        let result = self.drop_locked(client.as_ref(), &schemas).await;
        client.close().await?;
        result
    }

    async fn drop_locked(
        &self,
        client: &dyn StoreClient,
        schemas: &[Arc<StructureSchema>],
    ) -> QuarryResult<()> {
        for schema in schemas {
            let key = schema.key();
            if let Some(cache) = &self.inner.cache {
                cache.clear_for(key).await?;
            }
            client.drop_schema(schema).await?;
            self.inner.schema_manager.forget(key);
            self.inner.schemas.remove_schema(key);
            tracing::info!(structure = %key, "Structure set dropped");
        }
        Ok(())
    }

    async fn upsert_locked(
        &self,
        client: &dyn StoreClient,
        schema: &StructureSchema,
    ) -> QuarryResult<()> {
        if let Some(cache) = &self.inner.cache {
            cache.clear_for(schema.key()).await?;
        }
        client.upsert_schema(schema).await?;
        self.inner.schema_manager.mark_upserted(schema);
        Ok(())
    }

    /// Make sure the store holds the current shape of `schema` before a
    /// session touches it. A no-op without locking when already current.
    pub(crate) async fn ensure_schema(
        &self,
        client: &dyn StoreClient,
        schema: &StructureSchema,
    ) -> QuarryResult<()> {
        if self.inner.schema_manager.is_current(schema) {
            return Ok(());
        }
        let _guard = self.inner.lock.lock().await;
        if self.inner.schema_manager.is_current(schema) {
            return Ok(());
        }
        tracing::debug!(structure = %schema.key(), "Upserting schema before first use");
        self.upsert_locked(client, schema).await
    }
}
