//! SQLite implementation of [`StoreClient`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use quarry_core::{
    QuarryError, QuarryResult, StoreError, StructureId, StructureIndex, StructureSchema,
    UnsupportedError,
};
use quarry_query::{
    CompiledQuery, CompiledWhere, RawQuery, ID_COLUMN, JSON_COLUMN, STRUCTURE_ALIAS,
};
use quarry_storage::{StoreClient, StoredStructure};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::ddl::{self, quote};
use crate::values::{id_from_sql, id_to_sql, to_sql_value};

/// Upper bound on ids bound into one `in (...)` list.
const MAX_IDS_PER_STATEMENT: usize = 500;

pub(crate) fn query_failed(e: rusqlite::Error) -> QuarryError {
    StoreError::QueryFailed {
        reason: e.to_string(),
    }
    .into()
}

fn schema_failed(schema: &StructureSchema) -> impl Fn(rusqlite::Error) -> QuarryError + '_ {
    move |e| {
        StoreError::SchemaFailed {
            structure: schema.key().to_string(),
            reason: e.to_string(),
        }
        .into()
    }
}

/// A session's handle on the shared connection.
///
/// Closing a client only marks it closed; the connection belongs to the
/// [`crate::SqliteStore`] that created it.
#[derive(Debug)]
pub struct SqliteClient {
    conn: Arc<Mutex<Connection>>,
    closed: AtomicBool,
}

impl SqliteClient {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            closed: AtomicBool::new(false),
        }
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> QuarryResult<T>,
    ) -> QuarryResult<T> {
        if self.is_closed() {
            return Err(StoreError::ConnectionClosed.into());
        }
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut conn)
    }

    fn fetch_json_list(
        conn: &Connection,
        sql: &str,
        values: Vec<Value>,
    ) -> QuarryResult<Vec<String>> {
        let mut stmt = conn.prepare(sql).map_err(query_failed)?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| row.get::<_, String>(0))
            .map_err(query_failed)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_failed)
    }

    fn write_indexes(
        tx: &rusqlite::Transaction<'_>,
        schema: &StructureSchema,
        id: &Value,
        indexes: &[StructureIndex],
    ) -> QuarryResult<()> {
        let table = quote(&schema.indexes_table());
        for index in indexes {
            let sql = format!(
                "insert into {} {}",
                table,
                ddl::insert_index_row(index.data_type_code)
            );
            let mut stmt = tx.prepare_cached(&sql).map_err(query_failed)?;
            stmt.execute(params![id, index.member_path, to_sql_value(&index.value)])
                .map_err(query_failed)?;
        }
        Ok(())
    }
}

#[async_trait]
impl StoreClient for SqliteClient {
    async fn upsert_schema(&self, schema: &StructureSchema) -> QuarryResult<()> {
        self.with_conn(|conn| {
            let on_error = schema_failed(schema);
            let structure = schema.key().to_string();
            let stored: Option<String> = conn
                .query_row(
                    &format!(
                        "select \"Fingerprint\" from {} where \"Structure\" = ?1",
                        quote(ddl::SCHEMAS_TABLE)
                    ),
                    params![structure],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| match e {
                    rusqlite::Error::SqliteFailure(_, _) => QuarryError::from(StoreError::DatabaseFailed {
                        reason: format!("database is not initialized: {}", e),
                    }),
                    other => on_error(other),
                })?;
            if stored.as_deref() == Some(schema.fingerprint()) {
                return Ok(());
            }

            let tx = conn.transaction().map_err(&on_error)?;
            tx.execute_batch(&ddl::create_structure_set(schema))
                .map_err(&on_error)?;
            tx.execute(&ddl::delete_stale_index_rows(schema), [])
                .map_err(&on_error)?;
            tx.execute(
                &format!(
                    "insert into {} (\"Structure\", \"Fingerprint\") values (?1, ?2)
                     on conflict(\"Structure\") do update set \"Fingerprint\" = excluded.\"Fingerprint\"",
                    quote(ddl::SCHEMAS_TABLE)
                ),
                params![structure, schema.fingerprint()],
            )
            .map_err(&on_error)?;
            tx.commit().map_err(&on_error)?;

            tracing::info!(
                structure = %schema.key(),
                fingerprint = %schema.fingerprint(),
                "Upserted structure set"
            );
            Ok(())
        })
    }

    async fn drop_schema(&self, schema: &StructureSchema) -> QuarryResult<()> {
        self.with_conn(|conn| {
            let on_error = schema_failed(schema);
            let structure = schema.key().to_string();
            let tx = conn.transaction().map_err(&on_error)?;
            tx.execute_batch(&ddl::drop_structure_set(schema))
                .map_err(&on_error)?;
            for table in [ddl::SCHEMAS_TABLE, ddl::IDENTITIES_TABLE] {
                tx.execute(
                    &format!("delete from {} where \"Structure\" = ?1", quote(table)),
                    params![structure],
                )
                .map_err(&on_error)?;
            }
            tx.commit().map_err(&on_error)?;
            tracing::info!(structure = %schema.key(), "Dropped structure set");
            Ok(())
        })
    }

    async fn fetch_by_id(
        &self,
        schema: &StructureSchema,
        id: &StructureId,
    ) -> QuarryResult<Option<String>> {
        self.with_conn(|conn| {
            let sql = format!(
                "select {} from {} where {} = ?1",
                quote(JSON_COLUMN),
                quote(&schema.structure_table()),
                quote(ID_COLUMN)
            );
            conn.query_row(&sql, [id_to_sql(id)], |row| row.get(0))
                .optional()
                .map_err(query_failed)
        })
    }

    async fn fetch_by_ids(
        &self,
        schema: &StructureSchema,
        ids: &[StructureId],
    ) -> QuarryResult<Vec<StoredStructure>> {
        self.with_conn(|conn| {
            let mut found = Vec::with_capacity(ids.len());
            for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
                let sql = format!(
                    "select {id}, {json} from {table} where {id} in ({list})",
                    id = quote(ID_COLUMN),
                    json = quote(JSON_COLUMN),
                    table = quote(&schema.structure_table()),
                    list = ddl::placeholders(chunk.len()),
                );
                let mut stmt = conn.prepare(&sql).map_err(query_failed)?;
                let rows = stmt
                    .query_map(params_from_iter(chunk.iter().map(id_to_sql)), |row| {
                        Ok((row.get::<_, Value>(0)?, row.get::<_, String>(1)?))
                    })
                    .map_err(query_failed)?;
                for row in rows {
                    let (raw_id, json) = row.map_err(query_failed)?;
                    found.push(StoredStructure::new(id_from_sql(raw_id, schema.id_type())?, json));
                }
            }
            Ok(found)
        })
    }

    async fn fetch_by_id_interval(
        &self,
        schema: &StructureSchema,
        from: &StructureId,
        to: &StructureId,
    ) -> QuarryResult<Vec<String>> {
        self.with_conn(|conn| {
            let sql = format!(
                "select {json} from {table} where {id} between ?1 and ?2 order by {id}",
                id = quote(ID_COLUMN),
                json = quote(JSON_COLUMN),
                table = quote(&schema.structure_table()),
            );
            Self::fetch_json_list(conn, &sql, vec![id_to_sql(from), id_to_sql(to)])
        })
    }

    async fn fetch_all_ordered(&self, schema: &StructureSchema) -> QuarryResult<Vec<String>> {
        self.with_conn(|conn| {
            let sql = format!(
                "select {json} from {table} order by {id}",
                id = quote(ID_COLUMN),
                json = quote(JSON_COLUMN),
                table = quote(&schema.structure_table()),
            );
            Self::fetch_json_list(conn, &sql, Vec::new())
        })
    }

    async fn execute_query(
        &self,
        schema: &StructureSchema,
        query: &CompiledQuery,
    ) -> QuarryResult<Vec<String>> {
        tracing::debug!(structure = %schema.key(), sql = %query.sql, "Executing query");
        self.with_conn(|conn| {
            let values = query.parameters.iter().map(|p| to_sql_value(&p.value)).collect();
            Self::fetch_json_list(conn, &query.sql, values)
        })
    }

    async fn execute_raw(&self, query: &RawQuery) -> QuarryResult<Vec<String>> {
        tracing::debug!(sql = %query.sql, parameters = query.parameters.len(), "Executing raw query");
        self.with_conn(|conn| {
            let values = query.parameters.iter().map(|p| to_sql_value(&p.value)).collect();
            Self::fetch_json_list(conn, &query.sql, values)
        })
    }

    async fn row_count(&self, schema: &StructureSchema) -> QuarryResult<u64> {
        self.with_conn(|conn| {
            let sql = format!("select count(*) from {}", quote(&schema.structure_table()));
            let count: i64 = conn.query_row(&sql, [], |row| row.get(0)).map_err(query_failed)?;
            Ok(count as u64)
        })
    }

    async fn row_count_by_filter(
        &self,
        schema: &StructureSchema,
        filter: &CompiledWhere,
    ) -> QuarryResult<u64> {
        self.with_conn(|conn| {
            let sql = format!(
                "select count(*) from {} {}{}",
                quote(&schema.structure_table()),
                STRUCTURE_ALIAS,
                filter.where_clause()
            );
            let values = filter.parameters.iter().map(|p| to_sql_value(&p.value));
            let count: i64 = conn
                .query_row(&sql, params_from_iter(values), |row| row.get(0))
                .map_err(query_failed)?;
            Ok(count as u64)
        })
    }

    async fn exists_by_id(
        &self,
        schema: &StructureSchema,
        id: &StructureId,
    ) -> QuarryResult<bool> {
        self.with_conn(|conn| {
            let sql = format!(
                "select exists(select 1 from {} where {} = ?1)",
                quote(&schema.structure_table()),
                quote(ID_COLUMN)
            );
            conn.query_row(&sql, [id_to_sql(id)], |row| row.get(0))
                .map_err(query_failed)
        })
    }

    async fn ids_by_filter(
        &self,
        schema: &StructureSchema,
        filter: &CompiledWhere,
    ) -> QuarryResult<Vec<StructureId>> {
        self.with_conn(|conn| {
            let sql = format!(
                "select {alias}.{id} from {table} {alias}{filter} order by {alias}.{id}",
                alias = STRUCTURE_ALIAS,
                id = quote(ID_COLUMN),
                table = quote(&schema.structure_table()),
                filter = filter.where_clause(),
            );
            let mut stmt = conn.prepare(&sql).map_err(query_failed)?;
            let values = filter.parameters.iter().map(|p| to_sql_value(&p.value));
            let rows = stmt
                .query_map(params_from_iter(values), |row| row.get::<_, Value>(0))
                .map_err(query_failed)?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(id_from_sql(row.map_err(query_failed)?, schema.id_type())?);
            }
            Ok(ids)
        })
    }

    async fn reserve_identities(&self, schema: &StructureSchema, count: u32) -> QuarryResult<i64> {
        if !schema.id_type().is_identity() {
            return Err(UnsupportedError::IdType {
                operation: "reserve_identities".to_string(),
                structure: schema.key().to_string(),
                id_type: schema.id_type().to_string(),
            }
            .into());
        }
        self.with_conn(|conn| {
            let structure = schema.key().to_string();
            let tx = conn.transaction().map_err(query_failed)?;
            let stored_next: Option<i64> = tx
                .query_row(
                    &format!(
                        "select \"NextId\" from {} where \"Structure\" = ?1",
                        quote(ddl::IDENTITIES_TABLE)
                    ),
                    params![structure],
                    |row| row.get(0),
                )
                .optional()
                .map_err(query_failed)?;
            // Explicitly supplied ids may have moved past the counter.
            let max_used: i64 = tx
                .query_row(
                    &format!(
                        "select coalesce(max({}), 0) from {}",
                        quote(ID_COLUMN),
                        quote(&schema.structure_table())
                    ),
                    [],
                    |row| row.get(0),
                )
                .map_err(query_failed)?;

            let first = stored_next.unwrap_or(1).max(max_used + 1);
            tx.execute(
                &format!(
                    "insert into {} (\"Structure\", \"NextId\") values (?1, ?2)
                     on conflict(\"Structure\") do update set \"NextId\" = excluded.\"NextId\"",
                    quote(ddl::IDENTITIES_TABLE)
                ),
                params![structure, first + i64::from(count)],
            )
            .map_err(query_failed)?;
            tx.commit().map_err(query_failed)?;
            Ok(first)
        })
    }

    async fn insert(
        &self,
        schema: &StructureSchema,
        id: &StructureId,
        json: &str,
        indexes: &[StructureIndex],
    ) -> QuarryResult<()> {
        self.with_conn(|conn| {
            let id = id_to_sql(id);
            let tx = conn.transaction().map_err(query_failed)?;
            tx.execute(
                &format!(
                    "insert into {} ({}, {}) values (?1, ?2)",
                    quote(&schema.structure_table()),
                    quote(ID_COLUMN),
                    quote(JSON_COLUMN)
                ),
                params![id, json],
            )
            .map_err(query_failed)?;
            Self::write_indexes(&tx, schema, &id, indexes)?;
            tx.commit().map_err(query_failed)
        })
    }

    async fn update(
        &self,
        schema: &StructureSchema,
        id: &StructureId,
        json: &str,
        indexes: &[StructureIndex],
    ) -> QuarryResult<()> {
        self.with_conn(|conn| {
            let id_value = id_to_sql(id);
            let tx = conn.transaction().map_err(query_failed)?;
            let changed = tx
                .execute(
                    &format!(
                        "update {} set {} = ?2 where {} = ?1",
                        quote(&schema.structure_table()),
                        quote(JSON_COLUMN),
                        quote(ID_COLUMN)
                    ),
                    params![id_value, json],
                )
                .map_err(query_failed)?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    structure: schema.key().to_string(),
                    id: id.to_string(),
                }
                .into());
            }
            tx.execute(
                &format!(
                    "delete from {} where {} = ?1",
                    quote(&schema.indexes_table()),
                    quote(ID_COLUMN)
                ),
                params![id_value],
            )
            .map_err(query_failed)?;
            Self::write_indexes(&tx, schema, &id_value, indexes)?;
            tx.commit().map_err(query_failed)
        })
    }

    async fn delete_by_ids(
        &self,
        schema: &StructureSchema,
        ids: &[StructureId],
    ) -> QuarryResult<u64> {
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(query_failed)?;
            let mut deleted = 0u64;
            for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
                let list = ddl::placeholders(chunk.len());
                let values: Vec<Value> = chunk.iter().map(id_to_sql).collect();
                tx.execute(
                    &format!(
                        "delete from {} where {} in ({})",
                        quote(&schema.indexes_table()),
                        quote(ID_COLUMN),
                        list
                    ),
                    params_from_iter(values.iter()),
                )
                .map_err(query_failed)?;
                deleted += tx
                    .execute(
                        &format!(
                            "delete from {} where {} in ({})",
                            quote(&schema.structure_table()),
                            quote(ID_COLUMN),
                            list
                        ),
                        params_from_iter(values.iter()),
                    )
                    .map_err(query_failed)? as u64;
            }
            tx.commit().map_err(query_failed)?;
            Ok(deleted)
        })
    }

    async fn delete_by_id_interval(
        &self,
        schema: &StructureSchema,
        from: &StructureId,
        to: &StructureId,
    ) -> QuarryResult<u64> {
        self.with_conn(|conn| {
            let bounds = [id_to_sql(from), id_to_sql(to)];
            let tx = conn.transaction().map_err(query_failed)?;
            tx.execute(
                &format!(
                    "delete from {} where {} between ?1 and ?2",
                    quote(&schema.indexes_table()),
                    quote(ID_COLUMN)
                ),
                params_from_iter(bounds.iter()),
            )
            .map_err(query_failed)?;
            let deleted = tx
                .execute(
                    &format!(
                        "delete from {} where {} between ?1 and ?2",
                        quote(&schema.structure_table()),
                        quote(ID_COLUMN)
                    ),
                    params_from_iter(bounds.iter()),
                )
                .map_err(query_failed)?;
            tx.commit().map_err(query_failed)?;
            Ok(deleted as u64)
        })
    }

    async fn close(&self) -> QuarryResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::ConnectionClosed.into());
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
