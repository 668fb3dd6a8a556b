//! Per-structure-type cache layer.
//!
//! A [`CacheProvider`] holds one [`CacheEntry`] per enabled structure type
//! and routes id-based reads through it according to a
//! [`CacheConsumeMode`](quarry_core::CacheConsumeMode). Predicate queries
//! never go through the cache; it is keyed by id only.

pub mod consume;
pub mod memory;
pub mod provider;
pub mod traits;

pub use memory::MemoryCacheEntry;
pub use provider::CacheProvider;
pub use traits::{CacheEntry, CacheEntryFactory, CacheStats, StructureFetcher};
