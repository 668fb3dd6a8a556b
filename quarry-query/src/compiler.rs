//! SQL Compiler - Predicate Tree to parameterized SQL
//!
//! Every member predicate becomes an `exists` sub-select against the
//! structure's index table, correlated on `StructureId` with the outer
//! structure-table alias [`STRUCTURE_ALIAS`]:
//!
//! ```text
//! exists (select 1 from "MyItemIndexes" si0
//!         where si0."StructureId" = s."StructureId"
//!           and si0."MemberPath" = 'Int1'
//!           and si0."IntegerValue" = ?1)
//! ```
//!
//! A member-to-member comparison replaces the placeholder with a correlated
//! sub-query selecting the right member's value column for the same
//! structure. Literal values are only ever bound as parameters; member paths
//! come from the schema and are emitted as escaped string literals.
//!
//! Compilation is deterministic: aliases come from a per-compilation counter
//! and parameters are allocated in placeholder order.

use std::sync::Arc;

use quarry_core::{
    DataTypeCode, IndexAccessor, QueryError, QueryValue, SqlParameter, StructureSchema,
};
use serde::{Deserialize, Serialize};

use crate::dialect::{SqlDialect, SqliteDialect, LIKE_ESCAPE};
use crate::predicate::{ComparisonOp, MemberRef, Predicate, Query, StringOp};

/// Alias of the structure table in every statement the compiler emits.
pub const STRUCTURE_ALIAS: &str = "s";
pub const ID_COLUMN: &str = "StructureId";
pub const JSON_COLUMN: &str = "Json";
pub const MEMBER_PATH_COLUMN: &str = "MemberPath";

// ============================================================================
// OUTPUT
// ============================================================================

/// A WHERE condition over the structure table aliased as [`STRUCTURE_ALIAS`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledWhere {
    /// Condition text without the `where` keyword; empty when unfiltered.
    pub sql: String,
    pub parameters: Vec<SqlParameter>,
}

impl CompiledWhere {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// ` where <condition>` or an empty string.
    pub fn where_clause(&self) -> String {
        if self.sql.is_empty() {
            String::new()
        } else {
            format!(" where {}", self.sql)
        }
    }
}

/// A complete select of structure payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub parameters: Vec<SqlParameter>,
    /// Validated member paths to resolve alongside the payloads.
    pub includes: Vec<String>,
}

/// Caller-written SQL returning payloads in its first column, with
/// parameters in placeholder order. Placeholders follow the store's dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct RawQuery {
    pub sql: String,
    pub parameters: Vec<SqlParameter>,
}

impl RawQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter; it binds to the next placeholder.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.parameters.push(SqlParameter::new(name, value.into()));
        self
    }

    pub fn is_blank(&self) -> bool {
        self.sql.trim().is_empty()
    }
}

// ============================================================================
// COMPILER
// ============================================================================

/// Compiles predicate trees and queries for one SQL dialect.
#[derive(Debug, Clone)]
pub struct SqlCompiler {
    dialect: Arc<dyn SqlDialect>,
}

impl Default for SqlCompiler {
    fn default() -> Self {
        Self::new(Arc::new(SqliteDialect))
    }
}

impl SqlCompiler {
    pub fn new(dialect: Arc<dyn SqlDialect>) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    /// Compile only the WHERE condition, for counts, id lookups and deletes.
    pub fn compile_where(
        &self,
        schema: &StructureSchema,
        predicate: Option<&Predicate>,
    ) -> Result<CompiledWhere, QueryError> {
        let mut emitter = Emitter::new(self.dialect.as_ref(), schema);
        let sql = match predicate {
            Some(predicate) => emitter.predicate(predicate)?,
            None => String::new(),
        };
        tracing::debug!(
            structure = %schema.key(),
            sql = %sql,
            parameters = emitter.parameters.len(),
            "Compiled where"
        );
        Ok(CompiledWhere {
            sql,
            parameters: emitter.parameters,
        })
    }

    /// Compile a full select of payloads: filter, ordering and paging.
    pub fn compile_query(
        &self,
        schema: &StructureSchema,
        query: &Query,
    ) -> Result<CompiledQuery, QueryError> {
        if let Some(paging) = &query.paging {
            if paging.count == 0 {
                return Err(QueryError::InvalidPaging {
                    reason: "count must be positive".to_string(),
                });
            }
            if paging.offset > 0 && query.sortings.is_empty() {
                return Err(QueryError::PagingWithoutOrdering);
            }
        }
        for include in &query.includes {
            schema.require_member(include)?;
        }

        let d = self.dialect.as_ref();
        let mut emitter = Emitter::new(d, schema);

        let mut sql = format!(
            "select {s}.{json} from {table} {s}",
            s = STRUCTURE_ALIAS,
            json = d.quote_identifier(JSON_COLUMN),
            table = d.quote_identifier(&schema.structure_table()),
        );

        if let Some(predicate) = &query.predicate {
            let condition = emitter.predicate(predicate)?;
            sql.push_str(" where ");
            sql.push_str(&condition);
        }

        let mut order_terms = Vec::with_capacity(query.sortings.len() + 1);
        for sorting in &query.sortings {
            let accessor = emitter.resolve(&sorting.member)?;
            order_terms.push(format!(
                "{} {}",
                emitter.sort_key(accessor),
                sorting.direction.as_sql()
            ));
        }
        order_terms.push(format!("{}.{} asc", STRUCTURE_ALIAS, d.quote_identifier(ID_COLUMN)));
        sql.push_str(" order by ");
        sql.push_str(&order_terms.join(", "));

        if let Some(paging) = &query.paging {
            let count = QueryValue::Integer(paging_bound("count", paging.count)?);
            let offset = match paging.offset {
                0 => None,
                offset => Some(QueryValue::Integer(paging_bound("offset", offset)?)),
            };
            let clause = match offset {
                Some(offset) if d.count_before_offset() => {
                    let c = emitter.bind(count);
                    let o = emitter.bind(offset);
                    d.paging_clause(&c, Some(&o))
                }
                Some(offset) => {
                    let o = emitter.bind(offset);
                    let c = emitter.bind(count);
                    d.paging_clause(&c, Some(&o))
                }
                None => {
                    let c = emitter.bind(count);
                    d.paging_clause(&c, None)
                }
            };
            sql.push(' ');
            sql.push_str(&clause);
        }

        tracing::debug!(
            structure = %schema.key(),
            sql = %sql,
            parameters = emitter.parameters.len(),
            "Compiled query"
        );

        Ok(CompiledQuery {
            sql,
            parameters: emitter.parameters,
            includes: query.includes.clone(),
        })
    }
}

// ============================================================================
// EMITTER
// ============================================================================

/// Per-compilation state: parameter list and alias counter.
struct Emitter<'a> {
    dialect: &'a dyn SqlDialect,
    schema: &'a StructureSchema,
    indexes_table: String,
    parameters: Vec<SqlParameter>,
    next_alias: usize,
}

impl<'a> Emitter<'a> {
    fn new(dialect: &'a dyn SqlDialect, schema: &'a StructureSchema) -> Self {
        Self {
            dialect,
            schema,
            indexes_table: dialect.quote_identifier(&schema.indexes_table()),
            parameters: Vec::new(),
            next_alias: 0,
        }
    }

    fn alias(&mut self, prefix: &str) -> String {
        let alias = format!("{}{}", prefix, self.next_alias);
        self.next_alias += 1;
        alias
    }

    fn bind(&mut self, value: QueryValue) -> String {
        let placeholder = self.dialect.placeholder(self.parameters.len());
        self.parameters
            .push(SqlParameter::new(placeholder.clone(), value));
        placeholder
    }

    fn column(&self, alias: &str, column: &str) -> String {
        format!("{}.{}", alias, self.dialect.quote_identifier(column))
    }

    /// Look up the member in the schema and check the node's type tag.
    fn resolve(&self, member: &MemberRef) -> Result<&'a IndexAccessor, QueryError> {
        let accessor = self.schema.require_member(&member.member_path)?;
        if accessor.data_type_code != member.data_type_code {
            return Err(QueryError::TypeMismatch {
                member_path: member.member_path.clone(),
                expected: accessor.data_type_code.to_string(),
                actual: member.data_type_code.to_string(),
            });
        }
        Ok(accessor)
    }

    /// Check that `value` can be bound against `accessor`, widening integer
    /// literals for fractal members.
    fn literal(&self, accessor: &IndexAccessor, value: &QueryValue) -> Result<QueryValue, QueryError> {
        let mismatch = || QueryError::TypeMismatch {
            member_path: accessor.member_path.clone(),
            expected: accessor.data_type_code.to_string(),
            actual: value.kind().to_string(),
        };
        let code = value.data_type_code().ok_or_else(mismatch)?;
        if !accessor.data_type_code.accepts(code) {
            return Err(mismatch());
        }
        Ok(match (accessor.data_type_code, value) {
            (DataTypeCode::Fractal, QueryValue::Integer(v)) => QueryValue::Fractal(*v as f64),
            _ => value.clone(),
        })
    }

    fn check_operator(accessor: &IndexAccessor, op: ComparisonOp) -> Result<(), QueryError> {
        let ordered = !matches!(accessor.data_type_code, DataTypeCode::Bool | DataTypeCode::Guid);
        if op.is_equality() || ordered {
            Ok(())
        } else {
            Err(QueryError::UnsupportedOperator {
                member_path: accessor.member_path.clone(),
                operator: op.to_string(),
                reason: format!("{} members only support = and <>", accessor.data_type_code),
            })
        }
    }

    /// `exists (select 1 from <indexes> a where a.id = s.id and a.path = '<path>' [and <cond>])`
    fn member_exists<F>(&mut self, accessor: &IndexAccessor, condition: F) -> Result<String, QueryError>
    where
        F: FnOnce(&mut Self, &str) -> Result<Option<String>, QueryError>,
    {
        let alias = self.alias("si");
        let mut sql = format!(
            "exists (select 1 from {table} {a} where {a_id} = {s_id} and {a_path} = {path}",
            table = self.indexes_table,
            a = alias,
            a_id = self.column(&alias, ID_COLUMN),
            s_id = self.column(STRUCTURE_ALIAS, ID_COLUMN),
            a_path = self.column(&alias, MEMBER_PATH_COLUMN),
            path = self.dialect.string_literal(&accessor.member_path),
        );
        if let Some(condition) = condition(self, &alias)? {
            sql.push_str(" and ");
            sql.push_str(&condition);
        }
        sql.push(')');
        Ok(sql)
    }

    fn predicate(&mut self, predicate: &Predicate) -> Result<String, QueryError> {
        match predicate {
            Predicate::Compare { member, op, value } => self.compare(member, *op, value),
            Predicate::CompareMembers { left, op, right } => self.compare_members(left, *op, right),
            Predicate::StringMatch { member, op, value } => self.string_match(member, *op, value),
            Predicate::In { member, values } => self.in_set(member, values),
            Predicate::Between { member, low, high } => self.between(member, low, high),
            Predicate::AnyElement { member, op, value } => {
                let accessor = self.resolve(member)?;
                if !accessor.is_enumerable {
                    return Err(QueryError::NotEnumerable {
                        member_path: member.member_path.clone(),
                    });
                }
                if value.is_null() {
                    return Err(QueryError::UnsupportedOperator {
                        member_path: member.member_path.clone(),
                        operator: op.to_string(),
                        reason: "elements are never null".to_string(),
                    });
                }
                self.compare(member, *op, value)
            }
            Predicate::And(operands) => self.logical("and", operands),
            Predicate::Or(operands) => self.logical("or", operands),
            Predicate::Not(inner) => Ok(format!("(not {})", self.predicate(inner)?)),
        }
    }

    fn logical(&mut self, operator: &str, operands: &[Predicate]) -> Result<String, QueryError> {
        if operands.is_empty() {
            return Err(QueryError::EmptyLogical {
                operator: operator.to_string(),
            });
        }
        let parts = operands
            .iter()
            .map(|operand| self.predicate(operand))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("({})", parts.join(&format!(" {} ", operator))))
    }

    fn compare(
        &mut self,
        member: &MemberRef,
        op: ComparisonOp,
        value: &QueryValue,
    ) -> Result<String, QueryError> {
        let accessor = self.resolve(member)?;

        if value.is_null() {
            return match op {
                ComparisonOp::Eq => Ok(format!("(not {})", self.member_exists(accessor, |_, _| Ok(None))?)),
                ComparisonOp::Ne => self.member_exists(accessor, |_, _| Ok(None)),
                _ => Err(QueryError::UnsupportedOperator {
                    member_path: member.member_path.clone(),
                    operator: op.to_string(),
                    reason: "null only supports = and <>".to_string(),
                }),
            };
        }

        Self::check_operator(accessor, op)?;
        let value = self.literal(accessor, value)?;
        self.member_exists(accessor, |e, alias| {
            let column = e.column(alias, accessor.data_type_code.value_column());
            let placeholder = e.bind(value);
            Ok(Some(format!("{} {} {}", column, op.as_sql(), placeholder)))
        })
    }

    fn compare_members(
        &mut self,
        left: &MemberRef,
        op: ComparisonOp,
        right: &MemberRef,
    ) -> Result<String, QueryError> {
        let left_accessor = self.resolve(left)?;
        let right_accessor = self.resolve(right)?;

        if right_accessor.is_enumerable {
            return Err(QueryError::UnsupportedOperator {
                member_path: right.member_path.clone(),
                operator: op.to_string(),
                reason: "the right-hand member of a member comparison must not be enumerable"
                    .to_string(),
            });
        }
        if !left_accessor
            .data_type_code
            .is_comparable_with(right_accessor.data_type_code)
        {
            return Err(QueryError::TypeMismatch {
                member_path: right.member_path.clone(),
                expected: left_accessor.data_type_code.to_string(),
                actual: right_accessor.data_type_code.to_string(),
            });
        }
        Self::check_operator(left_accessor, op)?;

        self.member_exists(left_accessor, |e, alias| {
            let sub = e.alias("sub");
            let left_column = e.column(alias, left_accessor.data_type_code.value_column());
            let sub_value = e.column(&sub, right_accessor.data_type_code.value_column());
            Ok(Some(format!(
                "{left} {op} (select {sub_value} from {table} {sub} where {sub_id} = {outer_id} and {sub_path} = {path})",
                left = left_column,
                op = op.as_sql(),
                sub_value = sub_value,
                table = e.indexes_table,
                sub = sub,
                sub_id = e.column(&sub, ID_COLUMN),
                outer_id = e.column(alias, ID_COLUMN),
                sub_path = e.column(&sub, MEMBER_PATH_COLUMN),
                path = e.dialect.string_literal(&right_accessor.member_path),
            )))
        })
    }

    fn string_match(
        &mut self,
        member: &MemberRef,
        op: StringOp,
        value: &str,
    ) -> Result<String, QueryError> {
        let accessor = self.resolve(member)?;
        if accessor.data_type_code != DataTypeCode::String {
            return Err(QueryError::UnsupportedOperator {
                member_path: member.member_path.clone(),
                operator: op.to_string(),
                reason: format!("{} members cannot be pattern matched", accessor.data_type_code),
            });
        }
        let escaped = self.dialect.escape_like(value);
        let pattern = match op {
            StringOp::Contains => format!("%{}%", escaped),
            StringOp::StartsWith => format!("{}%", escaped),
            StringOp::EndsWith => format!("%{}", escaped),
        };
        self.member_exists(accessor, |e, alias| {
            let column = e.column(alias, accessor.data_type_code.value_column());
            let placeholder = e.bind(QueryValue::String(pattern));
            Ok(Some(format!(
                "{} like {} escape '{}'",
                column, placeholder, LIKE_ESCAPE
            )))
        })
    }

    fn in_set(&mut self, member: &MemberRef, values: &[QueryValue]) -> Result<String, QueryError> {
        let accessor = self.resolve(member)?;
        if values.is_empty() {
            return Ok("1 = 0".to_string());
        }
        let values = values
            .iter()
            .map(|value| self.literal(accessor, value))
            .collect::<Result<Vec<_>, _>>()?;
        self.member_exists(accessor, |e, alias| {
            let column = e.column(alias, accessor.data_type_code.value_column());
            let placeholders = values
                .into_iter()
                .map(|value| e.bind(value))
                .collect::<Vec<_>>();
            Ok(Some(format!("{} in ({})", column, placeholders.join(", "))))
        })
    }

    fn between(
        &mut self,
        member: &MemberRef,
        low: &QueryValue,
        high: &QueryValue,
    ) -> Result<String, QueryError> {
        let accessor = self.resolve(member)?;
        Self::check_operator(accessor, ComparisonOp::Gte)?;
        let low = self.literal(accessor, low)?;
        let high = self.literal(accessor, high)?;
        self.member_exists(accessor, |e, alias| {
            let column = e.column(alias, accessor.data_type_code.value_column());
            let low = e.bind(low);
            let high = e.bind(high);
            Ok(Some(format!("{} between {} and {}", column, low, high)))
        })
    }

    /// Correlated `min(..)` of the member's value for the outer structure.
    fn sort_key(&mut self, accessor: &IndexAccessor) -> String {
        let alias = self.alias("so");
        format!(
            "(select min({value}) from {table} {a} where {a_id} = {s_id} and {a_path} = {path})",
            value = self.column(&alias, accessor.data_type_code.value_column()),
            table = self.indexes_table,
            a = alias,
            a_id = self.column(&alias, ID_COLUMN),
            s_id = self.column(STRUCTURE_ALIAS, ID_COLUMN),
            a_path = self.column(&alias, MEMBER_PATH_COLUMN),
            path = self.dialect.string_literal(&accessor.member_path),
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================

/// Paging values are bound as signed integers; anything above `i64::MAX`
/// would wrap to a negative limit, which SQLite reads as "no limit".
fn paging_bound(what: &str, value: u64) -> Result<i64, QueryError> {
    i64::try_from(value).map_err(|_| QueryError::InvalidPaging {
        reason: format!("{} {} exceeds {}", what, value, i64::MAX),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqlServerDialect;
    use quarry_core::IdType;

    fn schema() -> StructureSchema {
        StructureSchema::builder("MyItem", IdType::Identity)
            .member("Int1", DataTypeCode::Integer)
            .member("Int2", DataTypeCode::Integer)
            .member("Name", DataTypeCode::String)
            .member("Score", DataTypeCode::Fractal)
            .member("Active", DataTypeCode::Bool)
            .enumerable_member("Tags", DataTypeCode::String)
            .build()
            .unwrap()
    }

    fn compiler() -> SqlCompiler {
        SqlCompiler::default()
    }

    #[test]
    fn test_member_comparison_is_parameterized() {
        let compiled = compiler()
            .compile_where(&schema(), Some(&Predicate::eq(MemberRef::integer("Int1"), 42)))
            .unwrap();
        assert_eq!(
            compiled.sql,
            "exists (select 1 from \"MyItemIndexes\" si0 where si0.\"StructureId\" = s.\"StructureId\" \
             and si0.\"MemberPath\" = 'Int1' and si0.\"IntegerValue\" = ?1)"
        );
        assert_eq!(compiled.parameters, vec![SqlParameter::new("?1", QueryValue::Integer(42))]);
        assert!(!compiled.sql.contains("42"));
    }

    #[test]
    fn test_member_to_member_uses_correlated_subquery() {
        let p = Predicate::members(
            MemberRef::integer("Int1"),
            ComparisonOp::Eq,
            MemberRef::integer("Int2"),
        );
        let compiled = compiler().compile_where(&schema(), Some(&p)).unwrap();
        assert_eq!(
            compiled.sql,
            "exists (select 1 from \"MyItemIndexes\" si0 where si0.\"StructureId\" = s.\"StructureId\" \
             and si0.\"MemberPath\" = 'Int1' and si0.\"IntegerValue\" = \
             (select sub1.\"IntegerValue\" from \"MyItemIndexes\" sub1 \
             where sub1.\"StructureId\" = si0.\"StructureId\" and sub1.\"MemberPath\" = 'Int2'))"
        );
        assert!(compiled.parameters.is_empty());
    }

    #[test]
    fn test_member_to_member_selects_right_value_column() {
        let p = Predicate::members(
            MemberRef::fractal("Score"),
            ComparisonOp::Gt,
            MemberRef::integer("Int1"),
        );
        let compiled = compiler().compile_where(&schema(), Some(&p)).unwrap();
        assert!(compiled.sql.contains("si0.\"FractalValue\" > (select sub1.\"IntegerValue\""));
    }

    #[test]
    fn test_member_to_member_rejects_incomparable_types() {
        let p = Predicate::members(
            MemberRef::integer("Int1"),
            ComparisonOp::Eq,
            MemberRef::string("Name"),
        );
        assert!(matches!(
            compiler().compile_where(&schema(), Some(&p)),
            Err(QueryError::TypeMismatch { .. })
        ));

        let p = Predicate::members(
            MemberRef::string("Name"),
            ComparisonOp::Eq,
            MemberRef::string("Tags"),
        );
        assert!(matches!(
            compiler().compile_where(&schema(), Some(&p)),
            Err(QueryError::UnsupportedOperator { .. })
        ));
    }

    #[test]
    fn test_logical_nodes_are_parenthesized() {
        let p = Predicate::eq(MemberRef::integer("Int1"), 1)
            .or(Predicate::eq(MemberRef::integer("Int2"), 2))
            .and(Predicate::eq(MemberRef::string("Name"), "x").negate());
        let compiled = compiler().compile_where(&schema(), Some(&p)).unwrap();
        assert!(compiled.sql.starts_with("((exists"));
        assert!(compiled.sql.contains(") or exists"));
        assert!(compiled.sql.contains(" and (not exists"));
        let names: Vec<_> = compiled.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["?1", "?2", "?3"]);
        assert_eq!(compiled.parameters[2].value, QueryValue::from("x"));
    }

    #[test]
    fn test_empty_logical_is_rejected() {
        assert!(matches!(
            compiler().compile_where(&schema(), Some(&Predicate::all(vec![]))),
            Err(QueryError::EmptyLogical { .. })
        ));
    }

    #[test]
    fn test_string_match_escapes_wildcards() {
        let p = Predicate::starts_with(MemberRef::string("Name"), "50%_");
        let compiled = compiler().compile_where(&schema(), Some(&p)).unwrap();
        assert!(compiled.sql.ends_with("si0.\"StringValue\" like ?1 escape '\\')"));
        assert_eq!(compiled.parameters[0].value, QueryValue::from("50\\%\\_%"));
    }

    #[test]
    fn test_string_match_on_integer_rejected() {
        let p = Predicate::contains(MemberRef::string("Int1"), "1");
        assert!(matches!(
            compiler().compile_where(&schema(), Some(&p)),
            Err(QueryError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_null_comparisons() {
        let is_null = compiler()
            .compile_where(&schema(), Some(&Predicate::eq(MemberRef::string("Name"), QueryValue::Null)))
            .unwrap();
        assert!(is_null.sql.starts_with("(not exists"));
        assert!(is_null.parameters.is_empty());

        let not_null = compiler()
            .compile_where(&schema(), Some(&Predicate::ne(MemberRef::string("Name"), QueryValue::Null)))
            .unwrap();
        assert!(not_null.sql.starts_with("exists"));

        assert!(compiler()
            .compile_where(&schema(), Some(&Predicate::gt(MemberRef::string("Name"), QueryValue::Null)))
            .is_err());
    }

    #[test]
    fn test_type_checks() {
        assert!(matches!(
            compiler().compile_where(&schema(), Some(&Predicate::eq(MemberRef::integer("Int1"), "x"))),
            Err(QueryError::TypeMismatch { .. })
        ));
        assert!(matches!(
            compiler().compile_where(&schema(), Some(&Predicate::eq(MemberRef::integer("Missing"), 1))),
            Err(QueryError::UnknownMember { .. })
        ));
        assert!(matches!(
            compiler().compile_where(&schema(), Some(&Predicate::lt(MemberRef::bool("Active"), true))),
            Err(QueryError::UnsupportedOperator { .. })
        ));

        let widened = compiler()
            .compile_where(&schema(), Some(&Predicate::gte(MemberRef::fractal("Score"), 3)))
            .unwrap();
        assert_eq!(widened.parameters[0].value, QueryValue::Fractal(3.0));
    }

    #[test]
    fn test_in_and_between() {
        let empty = compiler()
            .compile_where(&schema(), Some(&Predicate::in_set(MemberRef::integer("Int1"), Vec::<i64>::new())))
            .unwrap();
        assert_eq!(empty.sql, "1 = 0");

        let set = compiler()
            .compile_where(&schema(), Some(&Predicate::in_set(MemberRef::integer("Int1"), vec![1, 2])))
            .unwrap();
        assert!(set.sql.contains("si0.\"IntegerValue\" in (?1, ?2)"));

        let range = compiler()
            .compile_where(&schema(), Some(&Predicate::between(MemberRef::integer("Int1"), 1, 5)))
            .unwrap();
        assert!(range.sql.contains("between ?1 and ?2"));
    }

    #[test]
    fn test_any_element_requires_enumerable() {
        let ok = compiler()
            .compile_where(
                &schema(),
                Some(&Predicate::any_element(MemberRef::string("Tags"), ComparisonOp::Eq, "red")),
            )
            .unwrap();
        assert!(ok.sql.contains("'Tags'"));

        assert!(matches!(
            compiler().compile_where(
                &schema(),
                Some(&Predicate::any_element(MemberRef::string("Name"), ComparisonOp::Eq, "red")),
            ),
            Err(QueryError::NotEnumerable { .. })
        ));
    }

    #[test]
    fn test_empty_query_is_ordered_full_scan() {
        let compiled = compiler().compile_query(&schema(), &Query::new()).unwrap();
        assert_eq!(
            compiled.sql,
            "select s.\"Json\" from \"MyItemStructure\" s order by s.\"StructureId\" asc"
        );
        assert!(compiled.parameters.is_empty());
    }

    #[test]
    fn test_sorting_and_paging() {
        let query = Query::new()
            .filter(Predicate::gt(MemberRef::integer("Int1"), 0))
            .order_by_desc(MemberRef::integer("Int2"))
            .page(20, 10);
        let compiled = compiler().compile_query(&schema(), &query).unwrap();
        assert!(compiled.sql.contains(
            "order by (select min(so1.\"IntegerValue\") from \"MyItemIndexes\" so1 \
             where so1.\"StructureId\" = s.\"StructureId\" and so1.\"MemberPath\" = 'Int2') desc, \
             s.\"StructureId\" asc limit ?2 offset ?3"
        ));
        let values: Vec<_> = compiled.parameters.iter().map(|p| p.value.clone()).collect();
        assert_eq!(
            values,
            vec![QueryValue::Integer(0), QueryValue::Integer(10), QueryValue::Integer(20)]
        );
    }

    #[test]
    fn test_sqlserver_binds_offset_first() {
        let compiler = SqlCompiler::new(Arc::new(SqlServerDialect));
        let query = Query::new().order_by(MemberRef::integer("Int1")).page(5, 10);
        let compiled = compiler.compile_query(&schema(), &query).unwrap();
        assert!(compiled.sql.ends_with("offset @p0 rows fetch next @p1 rows only"));
        assert_eq!(compiled.parameters[0].value, QueryValue::Integer(5));
        assert_eq!(compiled.parameters[1].value, QueryValue::Integer(10));
        assert!(compiled.sql.starts_with("select s.[Json] from [MyItemStructure] s"));
    }

    #[test]
    fn test_paging_contract() {
        assert!(matches!(
            compiler().compile_query(&schema(), &Query::new().page(10, 5)),
            Err(QueryError::PagingWithoutOrdering)
        ));
        assert!(matches!(
            compiler().compile_query(&schema(), &Query::new().take(0)),
            Err(QueryError::InvalidPaging { .. })
        ));
        let take = compiler().compile_query(&schema(), &Query::new().take(3)).unwrap();
        assert!(take.sql.ends_with("limit ?1"));
    }

    #[test]
    fn test_paging_beyond_signed_range_is_rejected() {
        assert!(matches!(
            compiler().compile_query(&schema(), &Query::new().take(u64::MAX)),
            Err(QueryError::InvalidPaging { .. })
        ));
        let sorted = Query::new().order_by(MemberRef::integer("Int1"));
        assert!(matches!(
            compiler().compile_query(&schema(), &sorted.page(u64::MAX, 10)),
            Err(QueryError::InvalidPaging { .. })
        ));

        let widest = compiler()
            .compile_query(&schema(), &Query::new().take(i64::MAX as u64))
            .unwrap();
        assert_eq!(widest.parameters[0].value, QueryValue::Integer(i64::MAX));
    }

    #[test]
    fn test_includes_are_validated() {
        let ok = compiler()
            .compile_query(&schema(), &Query::new().include("Name"))
            .unwrap();
        assert_eq!(ok.includes, vec!["Name".to_string()]);
        assert!(compiler()
            .compile_query(&schema(), &Query::new().include("Nope"))
            .is_err());
    }

    #[test]
    fn test_compile_where_without_predicate() {
        let compiled = compiler().compile_where(&schema(), None).unwrap();
        assert!(compiled.is_empty());
        assert_eq!(compiled.where_clause(), "");
    }
}
