//! SQL dialects: the backend-specific bits of generated statements.

use std::fmt::Debug;

/// Character used to escape LIKE wildcards in bound patterns.
pub const LIKE_ESCAPE: char = '\\';

/// Backend-specific rendering rules used by the compiler.
pub trait SqlDialect: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Quote an identifier (table or column name).
    fn quote_identifier(&self, identifier: &str) -> String;

    /// Placeholder text of the zero-based `index`-th parameter.
    fn placeholder(&self, index: usize) -> String;

    /// Whether the paging clause binds its count before its offset.
    fn count_before_offset(&self) -> bool;

    /// Render the paging clause. `offset` is `None` when paging starts at 0.
    fn paging_clause(&self, count: &str, offset: Option<&str>) -> String;

    /// Render a string literal. Only used for schema-owned text such as
    /// member paths, never for caller values.
    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Escape LIKE wildcards so `value` matches literally.
    fn escape_like(&self, value: &str) -> String {
        let mut escaped = String::with_capacity(value.len());
        for c in value.chars() {
            if c == LIKE_ESCAPE || c == '%' || c == '_' {
                escaped.push(LIKE_ESCAPE);
            }
            escaped.push(c);
        }
        escaped
    }
}

/// SQLite: `"x"` identifiers, `?N` placeholders, `limit .. offset ..`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{}", index + 1)
    }

    fn count_before_offset(&self) -> bool {
        true
    }

    fn paging_clause(&self, count: &str, offset: Option<&str>) -> String {
        match offset {
            Some(offset) => format!("limit {} offset {}", count, offset),
            None => format!("limit {}", count),
        }
    }
}

/// SQL Server: `[x]` identifiers, `@pN` placeholders, `offset .. fetch next ..`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("[{}]", identifier.replace(']', "]]"))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@p{}", index)
    }

    fn count_before_offset(&self) -> bool {
        false
    }

    fn paging_clause(&self, count: &str, offset: Option<&str>) -> String {
        format!(
            "offset {} rows fetch next {} rows only",
            offset.unwrap_or("0"),
            count
        )
    }

    fn escape_like(&self, value: &str) -> String {
        let mut escaped = String::with_capacity(value.len());
        for c in value.chars() {
            if matches!(c, LIKE_ESCAPE | '%' | '_' | '[') {
                escaped.push(LIKE_ESCAPE);
            }
            escaped.push(c);
        }
        escaped
    }
}
