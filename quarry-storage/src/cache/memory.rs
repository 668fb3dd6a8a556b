//! In-process cache entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use quarry_core::{CacheError, StructureId, StructureKey};

use super::traits::{CacheEntry, CacheStats};

#[derive(Debug, Default)]
struct Slots {
    payloads: HashMap<StructureId, String>,
    generation: u64,
}

impl Slots {
    fn invalidated(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Payload cache for one structure type held in process memory.
///
/// Every operation takes the lock exactly once, so batch operations and
/// `clear()` are atomic with respect to concurrent readers.
#[derive(Debug)]
pub struct MemoryCacheEntry {
    structure: StructureKey,
    slots: RwLock<Slots>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCacheEntry {
    pub fn new(structure: StructureKey) -> Self {
        Self {
            structure,
            slots: RwLock::new(Slots::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Factory suitable for [`crate::CacheProvider::new`].
    pub fn factory(structure: &StructureKey) -> Arc<dyn CacheEntry> {
        Arc::new(Self::new(structure.clone()))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Slots>, CacheError> {
        self.slots.read().map_err(|_| self.poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Slots>, CacheError> {
        self.slots.write().map_err(|_| self.poisoned())
    }

    fn poisoned(&self) -> CacheError {
        CacheError::LockPoisoned {
            structure: self.structure.to_string(),
        }
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl CacheEntry for MemoryCacheEntry {
    fn structure(&self) -> &StructureKey {
        &self.structure
    }

    async fn get(&self, id: &StructureId) -> Result<Option<String>, CacheError> {
        let found = self.read()?.payloads.get(id).cloned();
        self.record(found.is_some());
        Ok(found)
    }

    async fn get_many(&self, ids: &[StructureId]) -> Result<Vec<Option<String>>, CacheError> {
        let slots = self.read()?;
        let found: Vec<_> = ids.iter().map(|id| slots.payloads.get(id).cloned()).collect();
        drop(slots);
        for item in &found {
            self.record(item.is_some());
        }
        Ok(found)
    }

    async fn put(&self, id: StructureId, payload: String) -> Result<(), CacheError> {
        self.write()?.payloads.insert(id, payload);
        Ok(())
    }

    async fn put_many(&self, items: Vec<(StructureId, String)>) -> Result<(), CacheError> {
        self.write()?.payloads.extend(items);
        Ok(())
    }

    async fn generation(&self) -> Result<u64, CacheError> {
        Ok(self.read()?.generation)
    }

    async fn put_many_if_generation(
        &self,
        generation: u64,
        items: Vec<(StructureId, String)>,
    ) -> Result<bool, CacheError> {
        let mut slots = self.write()?;
        if slots.generation != generation {
            return Ok(false);
        }
        slots.payloads.extend(items);
        Ok(true)
    }

    async fn remove(&self, id: &StructureId) -> Result<(), CacheError> {
        let mut slots = self.write()?;
        slots.payloads.remove(id);
        slots.invalidated();
        Ok(())
    }

    async fn remove_many(&self, ids: &[StructureId]) -> Result<(), CacheError> {
        let mut slots = self.write()?;
        for id in ids {
            slots.payloads.remove(id);
        }
        slots.invalidated();
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut slots = self.write()?;
        slots.payloads.clear();
        slots.invalidated();
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.read()?.payloads.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> MemoryCacheEntry {
        MemoryCacheEntry::new(StructureKey::new("", "MyItem"))
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let entry = entry();
        let id = StructureId::Identity(1);
        assert_eq!(entry.get(&id).await.unwrap(), None);

        entry.put(id.clone(), "A".to_string()).await.unwrap();
        assert_eq!(entry.get(&id).await.unwrap(), Some("A".to_string()));

        entry.remove(&id).await.unwrap();
        assert_eq!(entry.get(&id).await.unwrap(), None);

        let stats = entry.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn test_get_many_is_positional() {
        let entry = entry();
        entry
            .put_many(vec![
                (StructureId::Identity(1), "A".to_string()),
                (StructureId::Identity(3), "C".to_string()),
            ])
            .await
            .unwrap();

        let found = entry
            .get_many(&[
                StructureId::Identity(3),
                StructureId::Identity(2),
                StructureId::Identity(1),
            ])
            .await
            .unwrap();
        assert_eq!(found, vec![Some("C".to_string()), None, Some("A".to_string())]);
    }

    #[tokio::test]
    async fn test_clear_and_remove_many() {
        let entry = entry();
        for i in 1..=4 {
            entry
                .put(StructureId::Identity(i), i.to_string())
                .await
                .unwrap();
        }
        entry
            .remove_many(&[StructureId::Identity(1), StructureId::Identity(2)])
            .await
            .unwrap();
        assert_eq!(entry.stats().await.unwrap().entry_count, 2);

        entry.clear().await.unwrap();
        assert_eq!(entry.stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn test_conditional_put_rejected_after_invalidation() {
        let entry = entry();
        let id = StructureId::Identity(1);

        let before = entry.generation().await.unwrap();
        entry.clear().await.unwrap();
        let stored = entry
            .put_if_generation(before, id.clone(), "stale".to_string())
            .await
            .unwrap();
        assert!(!stored);
        assert_eq!(entry.get(&id).await.unwrap(), None);

        let current = entry.generation().await.unwrap();
        assert_ne!(current, before);
        assert!(entry
            .put_if_generation(current, id.clone(), "fresh".to_string())
            .await
            .unwrap());
        assert_eq!(entry.get(&id).await.unwrap(), Some("fresh".to_string()));

        entry.remove(&id).await.unwrap();
        assert!(!entry
            .put_many_if_generation(current, vec![(id, "again".to_string())])
            .await
            .unwrap());
    }
}
