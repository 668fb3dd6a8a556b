//! Quarry Query - Predicate Tree and SQL Compiler
//!
//! Turns a [`Query`] over one structure type into parameterized SQL against
//! that type's structure and index tables.

pub mod compiler;
pub mod dialect;
pub mod predicate;

pub use compiler::{
    CompiledQuery, CompiledWhere, RawQuery, SqlCompiler, ID_COLUMN, JSON_COLUMN,
    MEMBER_PATH_COLUMN, STRUCTURE_ALIAS,
};
pub use dialect::{SqlDialect, SqlServerDialect, SqliteDialect, LIKE_ESCAPE};
pub use predicate::{
    ComparisonOp, MemberRef, Paging, Predicate, Query, SortDirection, Sorting, StringOp,
};
