//! Cache entry and fetcher traits.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use quarry_core::{CacheError, QuarryResult, StructureId, StructureKey};

/// Cache of serialized payloads for one structure type, keyed by id.
///
/// # Implementation Requirements
///
/// - Each operation must be linearizable with respect to the others; a
///   reader must never observe a partially applied `clear()` or `put_many()`
/// - Errors must be reported, never turned into misses
/// - `remove`, `remove_many` and `clear` must advance the invalidation
///   generation, and the conditional puts must compare and insert under the
///   same critical section as those invalidations
#[async_trait]
pub trait CacheEntry: Debug + Send + Sync {
    fn structure(&self) -> &StructureKey;

    async fn get(&self, id: &StructureId) -> Result<Option<String>, CacheError>;

    /// Look up several ids; the result is positionally aligned with `ids`.
    async fn get_many(&self, ids: &[StructureId]) -> Result<Vec<Option<String>>, CacheError> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            found.push(self.get(id).await?);
        }
        Ok(found)
    }

    async fn put(&self, id: StructureId, payload: String) -> Result<(), CacheError>;

    async fn put_many(&self, items: Vec<(StructureId, String)>) -> Result<(), CacheError> {
        for (id, payload) in items {
            self.put(id, payload).await?;
        }
        Ok(())
    }

    /// Current invalidation generation.
    async fn generation(&self) -> Result<u64, CacheError>;

    /// Store `items` unless the entry was invalidated after `generation` was
    /// read. Returns whether the payloads were stored.
    async fn put_many_if_generation(
        &self,
        generation: u64,
        items: Vec<(StructureId, String)>,
    ) -> Result<bool, CacheError>;

    async fn put_if_generation(
        &self,
        generation: u64,
        id: StructureId,
        payload: String,
    ) -> Result<bool, CacheError> {
        self.put_many_if_generation(generation, vec![(id, payload)])
            .await
    }

    async fn remove(&self, id: &StructureId) -> Result<(), CacheError>;

    async fn remove_many(&self, ids: &[StructureId]) -> Result<(), CacheError> {
        for id in ids {
            self.remove(id).await?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Creates the cache entry of a structure type on first use.
pub trait CacheEntryFactory: Send + Sync {
    fn create(&self, structure: &StructureKey) -> Arc<dyn CacheEntry>;
}

impl<F> CacheEntryFactory for F
where
    F: Fn(&StructureKey) -> Arc<dyn CacheEntry> + Send + Sync,
{
    fn create(&self, structure: &StructureKey) -> Arc<dyn CacheEntry> {
        self(structure)
    }
}

/// Database side of a cache read for one structure type.
#[async_trait]
pub trait StructureFetcher: Send + Sync {
    async fn fetch(&self, id: &StructureId) -> QuarryResult<Option<String>>;

    /// Fetch every existing id. Order is unspecified.
    async fn fetch_many(&self, ids: &[StructureId]) -> QuarryResult<Vec<(StructureId, String)>>;

    async fn exists(&self, id: &StructureId) -> QuarryResult<bool>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
