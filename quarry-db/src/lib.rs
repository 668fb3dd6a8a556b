//! Quarry DB - Database and Session Orchestration
//!
//! [`Database`] owns the schema registry, the optional cache and the
//! orchestration lock around schema mutations. [`Session`] is the per-caller
//! façade for reads, queries and writes.
//!
//! ```ignore
//! let db = Database::new(DatabaseConfig::from_env()?, Arc::new(SqliteStore::in_memory()?))?;
//! db.create_if_not_exists().await?;
//!
//! let session = db.create_session().await?;
//! let id = session.insert(&MyItem::new(5, 5)).await?;
//! let same = session
//!     .query::<MyItem>(&Query::new().filter(Predicate::members(
//!         MemberRef::integer("Int1"),
//!         ComparisonOp::Eq,
//!         MemberRef::integer("Int2"),
//!     )))
//!     .await?;
//! session.dispose().await?;
//! ```

mod database;
mod schema_manager;
mod session;

pub use database::Database;
pub use schema_manager::SchemaManager;
pub use session::Session;

pub use quarry_core::{
    CacheConsumeMode, DatabaseConfig, QuarryError, QuarryResult, Structure, StructureId,
    StructureKey,
};
pub use quarry_query::{
    ComparisonOp, MemberRef, Predicate, Query, RawQuery, SortDirection, StringOp,
};
