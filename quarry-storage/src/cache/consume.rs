//! Cache-aware id reads.
//!
//! Routing per read:
//!
//! ```text
//! not enabled for type ──┐
//! mode = IgnoreCache ────┴──► fetcher only, cache untouched
//! enabled ──► entry lookup ──► hit: cached payload
//!                         └──► miss: fetcher ──► write back if UpdateCacheWithDbResult
//! ```
//!
//! Write-back is conditional on the entry's invalidation generation read
//! before the fetch. An invalidation that lands while the fetch is in flight
//! wins, and the fetched payload is returned uncached.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use quarry_core::{CacheConsumeMode, QuarryResult, StructureId, StructureKey};

use super::provider::CacheProvider;
use super::traits::{CacheEntry, StructureFetcher};

impl CacheProvider {
    fn entry_for_mode(
        &self,
        structure: &StructureKey,
        mode: CacheConsumeMode,
    ) -> Option<Arc<dyn CacheEntry>> {
        match mode {
            CacheConsumeMode::IgnoreCache => None,
            CacheConsumeMode::ReadOnly | CacheConsumeMode::UpdateCacheWithDbResult => {
                self.entry_for(structure)
            }
        }
    }

    /// Read one payload through the cache.
    ///
    /// Fetcher failures propagate and nothing is cached for them. Cache
    /// failures propagate too; they are never treated as misses.
    pub async fn consume(
        &self,
        structure: &StructureKey,
        id: &StructureId,
        fetcher: &dyn StructureFetcher,
        mode: CacheConsumeMode,
    ) -> QuarryResult<Option<String>> {
        let Some(entry) = self.entry_for_mode(structure, mode) else {
            return fetcher.fetch(id).await;
        };

        if let Some(payload) = entry.get(id).await? {
            tracing::debug!(structure = %structure, id = %id, "Cache hit");
            return Ok(Some(payload));
        }

        tracing::debug!(structure = %structure, id = %id, mode = %mode, "Cache miss");
        let generation = entry.generation().await?;
        let fetched = fetcher.fetch(id).await?;
        if let Some(payload) = &fetched {
            if mode.writes_back()
                && !entry
                    .put_if_generation(generation, id.clone(), payload.clone())
                    .await?
            {
                tracing::debug!(structure = %structure, id = %id, "Write-back skipped after invalidation");
            }
        }
        Ok(fetched)
    }

    /// Read several payloads through the cache.
    ///
    /// Only the ids missing from the cache are fetched, in a single call.
    /// The result follows the order of `ids`; ids that exist nowhere are
    /// skipped and repeated ids yield repeated payloads.
    pub async fn consume_many(
        &self,
        structure: &StructureKey,
        ids: &[StructureId],
        fetcher: &dyn StructureFetcher,
        mode: CacheConsumeMode,
    ) -> QuarryResult<Vec<String>> {
        let Some(entry) = self.entry_for_mode(structure, mode) else {
            let fetched: HashMap<_, _> = fetcher.fetch_many(&distinct(ids)).await?.into_iter().collect();
            return Ok(in_input_order(ids, |id| fetched.get(id).cloned()));
        };

        let cached = entry.get_many(ids).await?;
        let mut found: HashMap<StructureId, String> = HashMap::with_capacity(ids.len());
        let mut misses = Vec::new();
        let mut seen_misses = HashSet::new();
        let mut hits = 0usize;
        for (id, payload) in ids.iter().zip(cached) {
            match payload {
                Some(payload) => {
                    hits += 1;
                    found.insert(id.clone(), payload);
                }
                None => {
                    if seen_misses.insert(id) {
                        misses.push(id.clone());
                    }
                }
            }
        }

        tracing::debug!(
            structure = %structure,
            hits,
            misses = misses.len(),
            mode = %mode,
            "Cache batch lookup"
        );

        if !misses.is_empty() {
            let generation = entry.generation().await?;
            let fetched = fetcher.fetch_many(&misses).await?;
            if mode.writes_back()
                && !fetched.is_empty()
                && !entry.put_many_if_generation(generation, fetched.clone()).await?
            {
                tracing::debug!(structure = %structure, "Batch write-back skipped after invalidation");
            }
            found.extend(fetched);
        }

        Ok(in_input_order(ids, |id| found.get(id).cloned()))
    }

    /// Existence check. A cached payload implies existence; otherwise the
    /// fetcher decides. Existence itself is never cached.
    pub async fn exists(
        &self,
        structure: &StructureKey,
        id: &StructureId,
        fetcher: &dyn StructureFetcher,
        mode: CacheConsumeMode,
    ) -> QuarryResult<bool> {
        if let Some(entry) = self.entry_for_mode(structure, mode) {
            if entry.get(id).await?.is_some() {
                tracing::debug!(structure = %structure, id = %id, "Cache hit on exists");
                return Ok(true);
            }
        }
        fetcher.exists(id).await
    }
}

fn distinct(ids: &[StructureId]) -> Vec<StructureId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().filter(|id| seen.insert(*id)).cloned().collect()
}

fn in_input_order<F>(ids: &[StructureId], lookup: F) -> Vec<String>
where
    F: Fn(&StructureId) -> Option<String>,
{
    ids.iter().filter_map(lookup).collect()
}
