//! Quarry Storage - Store Traits and Cache Layer
//!
//! Defines the backing store abstraction and the per-structure-type cache
//! that sits in front of id-based reads. The SQLite implementation of the
//! store lives in quarry-sqlite.

pub mod cache;
pub mod store;

pub use cache::{
    CacheEntry, CacheEntryFactory, CacheProvider, CacheStats, MemoryCacheEntry, StructureFetcher,
};
pub use quarry_core::CacheConsumeMode;
pub use store::{StoreClient, StoreProvider, StoredStructure};
