//! SQLite implementation of [`StoreProvider`].
//!
//! One connection is shared by every client the store hands out. A database
//! "exists" once the bookkeeping tables are present, so the lifecycle
//! operations behave the same for files and in-memory databases.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use quarry_core::{QuarryResult, StoreError};
use quarry_query::{SqlDialect, SqliteDialect};
use quarry_storage::{StoreClient, StoreProvider};
use rusqlite::{params, Connection};

use crate::client::SqliteClient;
use crate::ddl::{self, quote};

#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    location: String,
}

impl SqliteStore {
    pub fn in_memory() -> QuarryResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::ConnectionFailed {
            reason: e.to_string(),
        })?;
        Ok(Self::from_connection(conn, ":memory:"))
    }

    pub fn open(path: impl AsRef<Path>) -> QuarryResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| StoreError::ConnectionFailed {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Ok(Self::from_connection(conn, &path.display().to_string()))
    }

    fn from_connection(conn: Connection, location: &str) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            location: location.to_string(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> QuarryResult<T> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut conn).map_err(|e| {
            StoreError::DatabaseFailed {
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn user_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "select name from sqlite_master where type = 'table' and name not like 'sqlite_%'",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect()
    }

    fn drop_all(conn: &mut Connection) -> rusqlite::Result<()> {
        let tx = conn.transaction()?;
        for table in Self::user_tables(&tx)? {
            tx.execute(&format!("drop table if exists {}", quote(&table)), [])?;
        }
        tx.commit()
    }

    fn exists(conn: &Connection) -> rusqlite::Result<bool> {
        conn.query_row(
            "select exists(select 1 from sqlite_master where type = 'table' and name = ?1)",
            params![ddl::META_TABLE],
            |row| row.get(0),
        )
    }
}

#[async_trait]
impl StoreProvider for SqliteStore {
    fn dialect(&self) -> Arc<dyn SqlDialect> {
        Arc::new(SqliteDialect)
    }

    async fn connect(&self) -> QuarryResult<Box<dyn StoreClient>> {
        Ok(Box::new(SqliteClient::new(Arc::clone(&self.conn))))
    }

    async fn ensure_new_database(&self) -> QuarryResult<()> {
        self.with_conn(|conn| {
            Self::drop_all(conn)?;
            conn.execute_batch(&ddl::bookkeeping_tables())
        })?;
        tracing::info!(location = %self.location, "Created new database");
        Ok(())
    }

    async fn create_database_if_not_exists(&self) -> QuarryResult<()> {
        self.with_conn(|conn| conn.execute_batch(&ddl::bookkeeping_tables()))
    }

    async fn initialize_existing(&self) -> QuarryResult<()> {
        if !self.with_conn(|conn| Self::exists(conn))? {
            return Err(StoreError::DatabaseFailed {
                reason: format!("database at {} does not exist", self.location),
            }
            .into());
        }
        // Brings databases created by older versions up to the current set.
        self.with_conn(|conn| conn.execute_batch(&ddl::bookkeeping_tables()))
    }

    async fn drop_database_if_exists(&self) -> QuarryResult<()> {
        self.with_conn(Self::drop_all)?;
        tracing::info!(location = %self.location, "Dropped database");
        Ok(())
    }

    async fn database_exists(&self) -> QuarryResult<bool> {
        self.with_conn(|conn| Self::exists(conn))
    }
}
