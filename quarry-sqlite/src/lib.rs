//! Quarry SQLite - Reference Backing Store
//!
//! Stores each structure set as a structure table of JSON payloads plus an
//! index table with one row per indexed member value, the layout the query
//! compiler targets.

mod client;
mod ddl;
mod store;
mod values;

pub use client::SqliteClient;
pub use store::SqliteStore;
