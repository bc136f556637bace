//! Query construction and filtering API for document stores.
//!
//! This module provides the query descriptor sent to a backend: filtering, sorting,
//! pagination, includes, the index to run against, and the staleness policy. It also
//! provides the visitor used by backends to evaluate or translate filter expressions.
//!
//! # Query Building
//!
//! Queries are immutable values built with a fluent builder. Building a query never
//! executes it:
//!
//! ```ignore
//! use docsession::query::{Query, Filter, SortDirection};
//!
//! let query = Query::builder()
//!     .collection("Characters")
//!     .filter(Filter::any("Inventory", Filter::gt("Attack", 5)))
//!     .sort("Name", SortDirection::Asc)
//!     .offset(0)
//!     .limit(10)
//!     .build();
//! ```
//!
//! # Filter Expression API
//!
//! The [`Filter`] struct provides a collection of static methods for building filter expressions:
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - String: `starts_with`, `ends_with`, `contains`, `not_contains`
//! - Existence: `exists`, `not_exists`
//! - Array: `any_of`, `none_of`, `any`
//! - Logical: `and`, `or`
//!
//! Field names are dotted paths into nested documents (`Class.Name`). Inside
//! [`Filter::any`] paths are relative to the sequence element.

use bson::Bson;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::DocumentStoreError;

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

/// Sort specification for query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    /// The field path to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldOp {
    /// Equal to (exact match).
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// String or array contains value.
    Contains,
    /// String or array does not contain value.
    NotContains,
    /// String starts with value.
    StartsWith,
    /// String ends with value.
    EndsWith,
    /// Array contains any of the values.
    AnyOf,
    /// Array contains none of the values.
    NoneOf,
}

/// A filter expression for querying documents.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Not`)
/// to build complex filter predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The field path to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
    /// Existential predicate over a sequence: matches when at least one element does.
    Any {
        /// The field path of the sequence.
        field: String,
        /// Predicate evaluated against each element.
        predicate: Box<Expr>,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Returns the field paths this expression reads, in first-seen order.
    ///
    /// Paths under an [`Expr::Any`] are reported as `sequence[].path`.
    pub fn field_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect_paths("", &mut paths);
        paths
    }

    fn collect_paths(&self, prefix: &str, paths: &mut Vec<String>) {
        match self {
            Expr::And(exprs) | Expr::Or(exprs) => {
                for expr in exprs {
                    expr.collect_paths(prefix, paths);
                }
            }
            Expr::Not(expr) => expr.collect_paths(prefix, paths),
            Expr::Exists(field, _) | Expr::Field { field, .. } => {
                let path = format!("{prefix}{field}");
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
            Expr::Any { field, predicate } => {
                predicate.collect_paths(&format!("{prefix}{field}[]."), paths)
            }
        }
    }
}

/// What a query returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    /// Stored documents. For a map-only index, the distinct source documents of the
    /// matching index entries.
    #[default]
    Documents,
    /// The index's own output tuples (map output, or reduce output for map/reduce indexes).
    IndexEntries,
}

/// A structured query for retrieving and filtering documents.
///
/// Use [`QueryBuilder`] for ergonomic construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Collection to query when no index is named.
    pub collection: Option<String>,
    /// Index to run against. `None` lets the store pick an automatic index.
    pub index: Option<String>,
    /// Optional filter expression to match documents.
    pub filter: Option<Expr>,
    /// Maximum number of results to return.
    pub limit: Option<usize>,
    /// Number of results to skip (for pagination).
    pub offset: Option<usize>,
    /// Sort specifications, applied in order.
    pub sort: Vec<Sort>,
    /// Reference paths whose targets are fetched in the same round trip.
    pub includes: Vec<String>,
    /// Wait up to this long for the index to catch up instead of answering stale.
    pub wait_for_non_stale: Option<Duration>,
    /// What the query returns.
    pub projection: Projection,
}

impl Query {
    /// Creates a new empty query with no filters or limits.
    pub fn new() -> Self {
        Query::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }
}

/// Helper struct for constructing filter expressions.
///
/// All methods accept field names and values as `Into<String>` and `Into<Bson>` for ergonomics.
///
/// # Example
///
/// ```ignore
/// use docsession::query::Filter;
///
/// let expr = Filter::starts_with("Name", "Mike")
///     .and(Filter::eq("Class.Name", "Developer"));
/// ```
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals the specified value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal the specified value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    /// Matches documents where the field is greater than the specified value.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    /// Matches documents where the field is greater than or equal to the specified value.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    /// Matches documents where the field is less than the specified value.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    /// Matches documents where the field is less than or equal to the specified value.
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the string field starts with the specified value.
    pub fn starts_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::StartsWith, value.into())
    }

    /// Matches documents where the string field ends with the specified value.
    pub fn ends_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::EndsWith, value.into())
    }

    /// Matches documents where the field (string or array) contains the specified value.
    pub fn contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Contains, value.into())
    }

    /// Matches documents where the field (string or array) does not contain the specified value.
    pub fn not_contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NotContains, value.into())
    }

    /// Matches documents where the field exists.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field does not exist.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    /// Combines multiple expressions such that all must match.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// Combines multiple expressions such that any can match.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Matches documents where the array field contains any of the specified values.
    pub fn any_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::AnyOf, value.into())
    }

    /// Matches documents where the array field contains none of the specified values.
    pub fn none_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NoneOf, value.into())
    }

    /// Matches documents where at least one element of the sequence field satisfies
    /// `predicate`. Paths inside the predicate are relative to the element.
    ///
    /// ```ignore
    /// // characters carrying any item with Attack > 5
    /// Filter::any("Inventory", Filter::gt("Attack", 5));
    /// ```
    pub fn any(field: impl Into<String>, predicate: Expr) -> Expr {
        Expr::Any {
            field: field.into(),
            predicate: Box::new(predicate),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Sets the collection to query.
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.query.collection = Some(collection.into());
        self
    }

    /// Runs the query against a named index.
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.query.index = Some(index.into());
        self
    }

    /// Sets the filter expression for this query. Calling it again ANDs the expressions.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(match self.query.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Sets the maximum number of results to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Sets the number of results to skip.
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Adds a sort key. Keys are applied in the order they were added.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(Sort { field: field.into(), direction });
        self
    }

    /// Fetches the documents referenced by `path` in the same round trip.
    pub fn include(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if !self.query.includes.contains(&path) {
            self.query.includes.push(path);
        }
        self
    }

    /// Waits up to `timeout` for the index to become non-stale before answering.
    pub fn wait_for_non_stale(mut self, timeout: Duration) -> Self {
        self.query.wait_for_non_stale = Some(timeout);
        self
    }

    /// Sets what the query returns.
    pub fn projection(mut self, projection: Projection) -> Self {
        self.query.projection = projection;
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_any(&mut self, field: &str, predicate: &Expr) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
            Expr::Any { field, predicate } => self.visit_any(field, predicate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_filters_are_anded() {
        let query = Query::builder()
            .filter(Filter::eq("Race.Name", "Robot"))
            .filter(Filter::starts_with("Name", "Mike"))
            .build();

        assert_eq!(
            query.filter,
            Some(Expr::And(vec![
                Filter::eq("Race.Name", "Robot"),
                Filter::starts_with("Name", "Mike"),
            ]))
        );
    }

    #[test]
    fn field_paths_flatten_sequence_predicates() {
        let expr = Filter::any("Inventory", Filter::gt("Attack", 5))
            .and(Filter::eq("Name", "Jim"))
            .and(Filter::eq("Name", "Bob").not());

        assert_eq!(expr.field_paths(), vec!["Inventory[].Attack", "Name"]);
    }

    #[test]
    fn includes_are_deduplicated() {
        let query = Query::builder()
            .include("SiblingId")
            .include("SiblingId")
            .build();

        assert_eq!(query.includes, vec!["SiblingId"]);
    }
}
