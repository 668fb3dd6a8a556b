//! Tracks which schema shapes have been upserted into the store.

use dashmap::DashMap;
use quarry_core::{StructureKey, StructureSchema};

/// Fingerprint of the last upserted shape per structure.
///
/// Reads are lock-free; the owning database double-checks under its
/// orchestration lock before upserting.
#[derive(Debug, Default)]
pub struct SchemaManager {
    upserted: DashMap<StructureKey, String>,
}

impl SchemaManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the store already holds this exact shape.
    pub fn is_current(&self, schema: &StructureSchema) -> bool {
        self.upserted
            .get(schema.key())
            .is_some_and(|fingerprint| fingerprint.value() == schema.fingerprint())
    }

    pub fn mark_upserted(&self, schema: &StructureSchema) {
        self.upserted
            .insert(schema.key().clone(), schema.fingerprint().to_string());
    }

    pub fn forget(&self, key: &StructureKey) {
        self.upserted.remove(key);
    }

    pub fn clear(&self) {
        self.upserted.clear();
    }

    pub fn len(&self) -> usize {
        self.upserted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty()
    }
}
