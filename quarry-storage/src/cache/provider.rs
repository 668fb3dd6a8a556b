//! Registry of per-structure cache entries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use quarry_core::{CacheError, CacheFailure, StructureId, StructureKey};

use super::memory::MemoryCacheEntry;
use super::traits::{CacheEntry, CacheEntryFactory, CacheStats};

/// Registry mapping structure keys to their cache entries.
///
/// Registration is sharded per key: enabling, disabling and looking up
/// unrelated structure types never contend on a common lock, and the entry
/// factory runs at most once per key under concurrent first access.
pub struct CacheProvider {
    entries: DashMap<StructureKey, Arc<dyn CacheEntry>>,
    auto_enable: AtomicBool,
    factory: Arc<dyn CacheEntryFactory>,
}

impl std::fmt::Debug for CacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheProvider")
            .field("structures", &self.structures())
            .field("auto_enable", &self.auto_enable())
            .finish()
    }
}

impl Default for CacheProvider {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl CacheProvider {
    pub fn new(factory: Arc<dyn CacheEntryFactory>) -> Self {
        Self {
            entries: DashMap::new(),
            auto_enable: AtomicBool::new(false),
            factory,
        }
    }

    /// Provider creating [`MemoryCacheEntry`] instances.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheEntry::factory))
    }

    pub fn with_auto_enable(self, auto_enable: bool) -> Self {
        self.set_auto_enable(auto_enable);
        self
    }

    pub fn auto_enable(&self) -> bool {
        self.auto_enable.load(Ordering::Acquire)
    }

    pub fn set_auto_enable(&self, auto_enable: bool) {
        self.auto_enable.store(auto_enable, Ordering::Release);
    }

    // === Registration ===

    /// Create the entry for `structure` if absent. Idempotent.
    pub fn enable_for(&self, structure: &StructureKey) -> Arc<dyn CacheEntry> {
        let entry = self
            .entries
            .entry(structure.clone())
            .or_insert_with(|| {
                tracing::info!(structure = %structure, "Cache enabled");
                self.factory.create(structure)
            });
        Arc::clone(entry.value())
    }

    /// Remove the entry for `structure`. Returns whether one was registered.
    pub fn disable_for(&self, structure: &StructureKey) -> bool {
        let removed = self.entries.remove(structure).is_some();
        if removed {
            tracing::info!(structure = %structure, "Cache disabled");
        }
        removed
    }

    /// Whether lookups for `structure` go through a cache entry.
    pub fn is_enabled_for(&self, structure: &StructureKey) -> bool {
        self.auto_enable() || self.handles(structure)
    }

    /// Whether `structure` currently has a registered entry, regardless of
    /// auto-enable.
    pub fn handles(&self, structure: &StructureKey) -> bool {
        self.entries.contains_key(structure)
    }

    /// The entry serving `structure`, created on demand when auto-enable is on.
    pub fn entry_for(&self, structure: &StructureKey) -> Option<Arc<dyn CacheEntry>> {
        if let Some(entry) = self.entries.get(structure) {
            return Some(Arc::clone(entry.value()));
        }
        if self.auto_enable() {
            Some(self.enable_for(structure))
        } else {
            None
        }
    }

    /// Keys of all registered entries, sorted.
    pub fn structures(&self) -> Vec<StructureKey> {
        let mut keys: Vec<_> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    fn registered(&self) -> Vec<Arc<dyn CacheEntry>> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        entries.sort_by(|a, b| a.structure().cmp(b.structure()));
        entries
    }

    // === Invalidation ===

    /// Clear every registered entry.
    ///
    /// All entries are attempted even if some fail; failures are reported
    /// together as [`CacheError::ClearFailed`].
    pub async fn clear(&self) -> Result<(), CacheError> {
        let entries = self.registered();
        let mut attempted = Vec::with_capacity(entries.len());
        let mut failures = Vec::new();

        for entry in entries {
            let structure = entry.structure().to_string();
            if let Err(e) = entry.clear().await {
                tracing::warn!(structure = %structure, error = %e, "Cache clear failed");
                failures.push(CacheFailure {
                    structure: structure.clone(),
                    reason: e.to_string(),
                });
            }
            attempted.push(structure);
        }

        tracing::debug!(
            attempted = attempted.len(),
            failed = failures.len(),
            "Cleared caches"
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CacheError::ClearFailed {
                attempted,
                failures,
            })
        }
    }

    /// Clear the entry of one structure type if it is registered.
    pub async fn clear_for(&self, structure: &StructureKey) -> Result<(), CacheError> {
        let entry = self.entries.get(structure).map(|e| Arc::clone(e.value()));
        match entry {
            Some(entry) => {
                tracing::debug!(structure = %structure, "Clearing cache");
                entry.clear().await
            }
            None => Ok(()),
        }
    }

    /// Drop one cached payload if the structure type is registered.
    pub async fn remove(&self, structure: &StructureKey, id: &StructureId) -> Result<(), CacheError> {
        let entry = self.entries.get(structure).map(|e| Arc::clone(e.value()));
        match entry {
            Some(entry) => entry.remove(id).await,
            None => Ok(()),
        }
    }

    pub async fn remove_many(
        &self,
        structure: &StructureKey,
        ids: &[StructureId],
    ) -> Result<(), CacheError> {
        let entry = self.entries.get(structure).map(|e| Arc::clone(e.value()));
        match entry {
            Some(entry) => entry.remove_many(ids).await,
            None => Ok(()),
        }
    }

    pub async fn stats_for(&self, structure: &StructureKey) -> Result<Option<CacheStats>, CacheError> {
        let entry = self.entries.get(structure).map(|e| Arc::clone(e.value()));
        match entry {
            Some(entry) => entry.stats().await.map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn key(name: &str) -> StructureKey {
        StructureKey::new("", name)
    }

    #[test]
    fn test_enable_disable_handles() {
        let provider = CacheProvider::in_memory();
        let k = key("MyItem");
        assert!(!provider.handles(&k));
        assert!(!provider.is_enabled_for(&k));
        assert!(provider.entry_for(&k).is_none());

        let a = provider.enable_for(&k);
        let b = provider.enable_for(&k);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(provider.handles(&k));

        assert!(provider.disable_for(&k));
        assert!(!provider.disable_for(&k));
        assert!(provider.entry_for(&k).is_none());
    }

    #[test]
    fn test_auto_enable_creates_on_lookup() {
        let provider = CacheProvider::in_memory().with_auto_enable(true);
        let k = key("MyItem");
        assert!(provider.is_enabled_for(&k));
        assert!(!provider.handles(&k));
        assert!(provider.entry_for(&k).is_some());
        assert!(provider.handles(&k));
    }

    #[test]
    fn test_factory_runs_once_under_concurrent_enable() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let provider = Arc::new(CacheProvider::new(Arc::new(
            move |structure: &StructureKey| -> Arc<dyn CacheEntry> {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(MemoryCacheEntry::new(structure.clone()))
            },
        )));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = Arc::clone(&provider);
                std::thread::spawn(move || provider.enable_for(&key("Hot")))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_for_and_remove() {
        let provider = CacheProvider::in_memory();
        let k = key("MyItem");
        let entry = provider.enable_for(&k);
        entry.put(StructureId::Identity(1), "A".into()).await.unwrap();
        entry.put(StructureId::Identity(2), "B".into()).await.unwrap();

        provider.remove(&k, &StructureId::Identity(1)).await.unwrap();
        assert_eq!(provider.stats_for(&k).await.unwrap().unwrap().entry_count, 1);

        provider.clear_for(&k).await.unwrap();
        assert_eq!(provider.stats_for(&k).await.unwrap().unwrap().entry_count, 0);

        provider.clear_for(&key("Unknown")).await.unwrap();
        assert!(provider.stats_for(&key("Unknown")).await.unwrap().is_none());
    }
}
