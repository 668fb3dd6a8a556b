//! Predicate Tree - backend-independent query representation
//!
//! Trees are built by a query builder and consumed read-only by the
//! [`crate::SqlCompiler`]. Every member reference carries its member path
//! and data-type code so the compiler never has to look at the original type.

use std::fmt;

use quarry_core::{DataTypeCode, QueryValue};
use serde::{Deserialize, Serialize};

// ============================================================================
// MEMBERS AND OPERATORS
// ============================================================================

/// Reference to an indexed member of the queried structure type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberRef {
    pub member_path: String,
    /// Declared type name, informational.
    pub data_type: String,
    pub data_type_code: DataTypeCode,
}

impl MemberRef {
    pub fn new(member_path: impl Into<String>, data_type_code: DataTypeCode) -> Self {
        Self {
            member_path: member_path.into(),
            data_type: data_type_code.as_str().to_string(),
            data_type_code,
        }
    }

    pub fn string(member_path: impl Into<String>) -> Self {
        Self::new(member_path, DataTypeCode::String)
    }

    pub fn integer(member_path: impl Into<String>) -> Self {
        Self::new(member_path, DataTypeCode::Integer)
    }

    pub fn fractal(member_path: impl Into<String>) -> Self {
        Self::new(member_path, DataTypeCode::Fractal)
    }

    pub fn bool(member_path: impl Into<String>) -> Self {
        Self::new(member_path, DataTypeCode::Bool)
    }

    pub fn date_time(member_path: impl Into<String>) -> Self {
        Self::new(member_path, DataTypeCode::DateTime)
    }

    pub fn guid(member_path: impl Into<String>) -> Self {
        Self::new(member_path, DataTypeCode::Guid)
    }

    pub fn declared_as(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = data_type.into();
        self
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.member_path)
    }
}

/// Binary comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl ComparisonOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Lte => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Gte => ">=",
        }
    }

    /// Whether the operator only tests equality.
    pub fn is_equality(&self) -> bool {
        matches!(self, ComparisonOp::Eq | ComparisonOp::Ne)
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Pattern match on a string member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StringOp {
    Contains,
    StartsWith,
    EndsWith,
}

impl StringOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            StringOp::Contains => "Contains",
            StringOp::StartsWith => "StartsWith",
            StringOp::EndsWith => "EndsWith",
        }
    }
}

impl fmt::Display for StringOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PREDICATE
// ============================================================================

/// One node of a predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Member compared to a literal.
    Compare {
        member: MemberRef,
        op: ComparisonOp,
        value: QueryValue,
    },
    /// Member compared to another member of the same structure instance.
    CompareMembers {
        left: MemberRef,
        op: ComparisonOp,
        right: MemberRef,
    },
    StringMatch {
        member: MemberRef,
        op: StringOp,
        value: String,
    },
    In {
        member: MemberRef,
        values: Vec<QueryValue>,
    },
    /// Inclusive range.
    Between {
        member: MemberRef,
        low: QueryValue,
        high: QueryValue,
    },
    /// Some element of an enumerable member satisfies the comparison.
    AnyElement {
        member: MemberRef,
        op: ComparisonOp,
        value: QueryValue,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(member: MemberRef, op: ComparisonOp, value: impl Into<QueryValue>) -> Self {
        Predicate::Compare {
            member,
            op,
            value: value.into(),
        }
    }

    pub fn eq(member: MemberRef, value: impl Into<QueryValue>) -> Self {
        Self::compare(member, ComparisonOp::Eq, value)
    }

    pub fn ne(member: MemberRef, value: impl Into<QueryValue>) -> Self {
        Self::compare(member, ComparisonOp::Ne, value)
    }

    pub fn lt(member: MemberRef, value: impl Into<QueryValue>) -> Self {
        Self::compare(member, ComparisonOp::Lt, value)
    }

    pub fn lte(member: MemberRef, value: impl Into<QueryValue>) -> Self {
        Self::compare(member, ComparisonOp::Lte, value)
    }

    pub fn gt(member: MemberRef, value: impl Into<QueryValue>) -> Self {
        Self::compare(member, ComparisonOp::Gt, value)
    }

    pub fn gte(member: MemberRef, value: impl Into<QueryValue>) -> Self {
        Self::compare(member, ComparisonOp::Gte, value)
    }

    pub fn members(left: MemberRef, op: ComparisonOp, right: MemberRef) -> Self {
        Predicate::CompareMembers { left, op, right }
    }

    pub fn contains(member: MemberRef, value: impl Into<String>) -> Self {
        Predicate::StringMatch {
            member,
            op: StringOp::Contains,
            value: value.into(),
        }
    }

    pub fn starts_with(member: MemberRef, value: impl Into<String>) -> Self {
        Predicate::StringMatch {
            member,
            op: StringOp::StartsWith,
            value: value.into(),
        }
    }

    pub fn ends_with(member: MemberRef, value: impl Into<String>) -> Self {
        Predicate::StringMatch {
            member,
            op: StringOp::EndsWith,
            value: value.into(),
        }
    }

    pub fn in_set<V, I>(member: MemberRef, values: I) -> Self
    where
        V: Into<QueryValue>,
        I: IntoIterator<Item = V>,
    {
        Predicate::In {
            member,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn between(
        member: MemberRef,
        low: impl Into<QueryValue>,
        high: impl Into<QueryValue>,
    ) -> Self {
        Predicate::Between {
            member,
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn any_element(member: MemberRef, op: ComparisonOp, value: impl Into<QueryValue>) -> Self {
        Predicate::AnyElement {
            member,
            op,
            value: value.into(),
        }
    }

    pub fn all(predicates: Vec<Predicate>) -> Self {
        Predicate::And(predicates)
    }

    pub fn any(predicates: Vec<Predicate>) -> Self {
        Predicate::Or(predicates)
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut operands) => {
                operands.push(other);
                Predicate::And(operands)
            }
            lhs => Predicate::And(vec![lhs, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut operands) => {
                operands.push(other);
                Predicate::Or(operands)
            }
            lhs => Predicate::Or(vec![lhs, other]),
        }
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Member paths referenced anywhere in the tree, in visit order.
    pub fn member_paths(&self) -> Vec<&str> {
        let mut paths = Vec::new();
        self.collect_paths(&mut paths);
        paths
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Compare { member, .. }
            | Predicate::StringMatch { member, .. }
            | Predicate::In { member, .. }
            | Predicate::Between { member, .. }
            | Predicate::AnyElement { member, .. } => out.push(&member.member_path),
            Predicate::CompareMembers { left, right, .. } => {
                out.push(&left.member_path);
                out.push(&right.member_path);
            }
            Predicate::And(operands) | Predicate::Or(operands) => {
                for operand in operands {
                    operand.collect_paths(out);
                }
            }
            Predicate::Not(inner) => inner.collect_paths(out),
        }
    }
}

// ============================================================================
// QUERY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sorting {
    pub member: MemberRef,
    pub direction: SortDirection,
}

/// Offset/limit paging. `count` must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    pub offset: u64,
    pub count: u64,
}

/// A full query against one structure type.
///
/// An empty query is a full scan ordered by structure id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub predicate: Option<Predicate>,
    pub sortings: Vec<Sorting>,
    pub paging: Option<Paging>,
    pub includes: Vec<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter; repeated calls are combined with `and`.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn order_by(mut self, member: MemberRef) -> Self {
        self.sortings.push(Sorting {
            member,
            direction: SortDirection::Asc,
        });
        self
    }

    pub fn order_by_desc(mut self, member: MemberRef) -> Self {
        self.sortings.push(Sorting {
            member,
            direction: SortDirection::Desc,
        });
        self
    }

    pub fn page(mut self, offset: u64, count: u64) -> Self {
        self.paging = Some(Paging { offset, count });
        self
    }

    pub fn take(self, count: u64) -> Self {
        self.page(0, count)
    }

    pub fn include(mut self, member_path: impl Into<String>) -> Self {
        self.includes.push(member_path.into());
        self
    }

    pub fn has_predicate(&self) -> bool {
        self.predicate.is_some()
    }

    /// True when the query has no predicate, sortings, paging or includes.
    pub fn is_empty(&self) -> bool {
        self.predicate.is_none()
            && self.sortings.is_empty()
            && self.paging.is_none()
            && self.includes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_flattens_left_chain() {
        let p = Predicate::eq(MemberRef::integer("A"), 1)
            .and(Predicate::eq(MemberRef::integer("B"), 2))
            .and(Predicate::eq(MemberRef::integer("C"), 3));
        match p {
            Predicate::And(operands) => assert_eq!(operands.len(), 3),
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_member_paths_visit_order() {
        let p = Predicate::members(
            MemberRef::integer("Int1"),
            ComparisonOp::Eq,
            MemberRef::integer("Int2"),
        )
        .or(Predicate::contains(MemberRef::string("Name"), "x").negate());
        assert_eq!(p.member_paths(), vec!["Int1", "Int2", "Name"]);
    }

    #[test]
    fn test_query_builder() {
        let q = Query::new()
            .filter(Predicate::gt(MemberRef::integer("Int1"), 1))
            .filter(Predicate::lt(MemberRef::integer("Int1"), 9))
            .order_by_desc(MemberRef::integer("Int1"))
            .page(10, 5);
        assert!(!q.is_empty());
        assert!(matches!(q.predicate, Some(Predicate::And(ref ops)) if ops.len() == 2));
        assert_eq!(q.sortings[0].direction, SortDirection::Desc);
        assert_eq!(q.paging, Some(Paging { offset: 10, count: 5 }));
        assert!(Query::new().is_empty());
    }

    #[test]
    fn test_in_set_converts_values() {
        let p = Predicate::in_set(MemberRef::integer("Int1"), vec![1, 2, 3]);
        match p {
            Predicate::In { values, .. } => {
                assert_eq!(values, vec![QueryValue::Integer(1), QueryValue::Integer(2), QueryValue::Integer(3)])
            }
            other => panic!("expected In, got {:?}", other),
        }
    }
}
