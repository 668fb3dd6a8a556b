//! Table layout of a structure set and the database bookkeeping tables.
//!
//! ```text
//! quarry_meta        ("Key" pk, "Value")             marks an initialized database
//! quarry_schemas     ("Structure" pk, "Fingerprint") last upserted shape per set
//! quarry_identities  ("Structure" pk, "NextId")      identity counters
//! <Prefix>Structure  ("StructureId" pk, "Json")
//! <Prefix>Indexes    ("StructureId", "MemberPath", one column per value type)
//! ```

use quarry_core::{DataTypeCode, StructureSchema};
use quarry_query::{SqlDialect, SqliteDialect, ID_COLUMN, JSON_COLUMN, MEMBER_PATH_COLUMN};

use crate::values::id_column_type;

pub const META_TABLE: &str = "quarry_meta";
pub const SCHEMAS_TABLE: &str = "quarry_schemas";
pub const IDENTITIES_TABLE: &str = "quarry_identities";

const VALUE_COLUMNS: [(DataTypeCode, &str); 6] = [
    (DataTypeCode::String, "TEXT"),
    (DataTypeCode::Integer, "INTEGER"),
    (DataTypeCode::Fractal, "REAL"),
    (DataTypeCode::Bool, "INTEGER"),
    (DataTypeCode::DateTime, "TEXT"),
    (DataTypeCode::Guid, "TEXT"),
];

pub fn quote(identifier: &str) -> String {
    SqliteDialect.quote_identifier(identifier)
}

pub fn literal(value: &str) -> String {
    SqliteDialect.string_literal(value)
}

pub fn bookkeeping_tables() -> String {
    format!(
        "create table if not exists {meta} (\"Key\" TEXT primary key not null, \"Value\" TEXT not null);
         insert or ignore into {meta} (\"Key\", \"Value\") values ('format', '1');
         create table if not exists {schemas} (\"Structure\" TEXT primary key not null, \"Fingerprint\" TEXT not null);
         create table if not exists {identities} (\"Structure\" TEXT primary key not null, \"NextId\" INTEGER not null);",
        meta = quote(META_TABLE),
        schemas = quote(SCHEMAS_TABLE),
        identities = quote(IDENTITIES_TABLE),
    )
}

/// Create statements for both tables of a set plus their lookup indexes.
pub fn create_structure_set(schema: &StructureSchema) -> String {
    let structure = quote(&schema.structure_table());
    let indexes_table = schema.indexes_table();
    let indexes = quote(&indexes_table);
    let id_type = id_column_type(schema.id_type());

    let value_columns: Vec<String> = VALUE_COLUMNS
        .iter()
        .map(|(code, sql_type)| format!("{} {}", quote(code.value_column()), sql_type))
        .collect();

    let mut sql = format!(
        "create table if not exists {structure} ({id} {id_type} primary key not null, {json} TEXT not null);
         create table if not exists {indexes} ({id} {id_type} not null, {path} TEXT not null, {values});
         create index if not exists {by_id} on {indexes} ({id});
         create index if not exists {by_path} on {indexes} ({path});",
        id = quote(ID_COLUMN),
        json = quote(JSON_COLUMN),
        path = quote(MEMBER_PATH_COLUMN),
        values = value_columns.join(", "),
        by_id = quote(&format!("{}_{}", indexes_table, ID_COLUMN)),
        by_path = quote(&format!("{}_{}", indexes_table, MEMBER_PATH_COLUMN)),
    );

    for member in schema.members().filter(|m| m.is_unique) {
        sql.push_str(&format!(
            "\ncreate unique index if not exists {name} on {indexes} ({column}) where {path} = {member};",
            name = quote(&format!("{}_uq_{}", indexes_table, member.member_path)),
            column = quote(member.data_type_code.value_column()),
            path = quote(MEMBER_PATH_COLUMN),
            member = literal(&member.member_path),
        ));
    }
    sql
}

/// Delete index rows of members the schema no longer declares.
pub fn delete_stale_index_rows(schema: &StructureSchema) -> String {
    let indexes = quote(&schema.indexes_table());
    let path = quote(MEMBER_PATH_COLUMN);
    let members: Vec<String> = schema.members().map(|m| literal(&m.member_path)).collect();
    if members.is_empty() {
        format!("delete from {}", indexes)
    } else {
        format!("delete from {} where {} not in ({})", indexes, path, members.join(", "))
    }
}

pub fn drop_structure_set(schema: &StructureSchema) -> String {
    format!(
        "drop table if exists {}; drop table if exists {};",
        quote(&schema.indexes_table()),
        quote(&schema.structure_table()),
    )
}

pub fn insert_index_row(code: DataTypeCode) -> String {
    format!(
        "({id}, {path}, {column}) values (?1, ?2, ?3)",
        id = quote(ID_COLUMN),
        path = quote(MEMBER_PATH_COLUMN),
        column = quote(code.value_column()),
    )
}

/// `?1, ?2, ... ?n`
pub fn placeholders(n: usize) -> String {
    (0..n)
        .map(|i| SqliteDialect.placeholder(i))
        .collect::<Vec<_>>()
        .join(", ")
}
