//! Storage abstraction used by relation synchronization.
//!
//! Relation code never builds SQL itself. It describes reads and writes as
//! table + [`Filter`] operations against a [`RelationStore`]; the SQL store
//! renders them into statements, the in-memory store evaluates them
//! directly.

use crate::error::Error;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// One predicate on a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column = value` (key comparison, never matches NULL)
    Eq(String, Value),
    /// `column IN (values)`; an empty list matches nothing
    In(String, Vec<Value>),
    /// `column IS NULL`
    IsNull(String),
    /// Case-insensitive substring match on the column's text
    ContainsIgnoreCase(String, String),
}

impl Condition {
    pub fn column(&self) -> &str {
        match self {
            Condition::Eq(c, _)
            | Condition::In(c, _)
            | Condition::IsNull(c)
            | Condition::ContainsIgnoreCase(c, _) => c,
        }
    }

    /// Evaluate against a column value.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Condition::Eq(_, expected) => value.key_eq(expected),
            Condition::In(_, candidates) => candidates.iter().any(|c| value.key_eq(c)),
            Condition::IsNull(_) => value.is_null(),
            Condition::ContainsIgnoreCase(_, needle) => {
                if value.is_null() {
                    return false;
                }
                value
                    .to_string()
                    .to_lowercase()
                    .contains(&needle.to_lowercase())
            }
        }
    }
}

/// A conjunction of conditions with optional ordering and limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
    pub order_by: Option<String>,
    pub limit: Option<usize>,
}

impl Filter {
    /// A filter matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Shorthand for a single `column = value` filter.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(column, value)
    }

    /// Shorthand for a single `column IN (values)` filter.
    pub fn any_of(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self::all().and_in(column, values)
    }

    #[must_use]
    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn and_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and(Condition::Eq(column.into(), value.into()))
    }

    #[must_use]
    pub fn and_in(self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.and(Condition::In(column.into(), values))
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluate every condition using `lookup` to read column values.
    pub fn matches_with(&self, lookup: impl Fn(&str) -> Value) -> bool {
        self.conditions
            .iter()
            .all(|cond| cond.matches(&lookup(cond.column())))
    }
}

/// Persistence surface for relation synchronization.
///
/// Writes issued between [`begin`](RelationStore::begin) and
/// [`commit`](RelationStore::commit) form one atomic unit;
/// [`rollback`](RelationStore::rollback) discards all of them.
pub trait RelationStore: Send + Sync {
    /// Read matching rows.
    fn select(
        &self,
        cx: &Cx,
        table: &str,
        filter: &Filter,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Count matching rows.
    fn count(
        &self,
        cx: &Cx,
        table: &str,
        filter: &Filter,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Insert one row and return its key.
    ///
    /// When `values` carries no `key_column` the store generates the key.
    fn insert(
        &self,
        cx: &Cx,
        table: &str,
        key_column: &str,
        values: &[(String, Value)],
    ) -> impl Future<Output = Outcome<Value, Error>> + Send;

    /// Update matching rows, returning how many changed.
    fn update(
        &self,
        cx: &Cx,
        table: &str,
        assignments: &[(String, Value)],
        filter: &Filter,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Delete matching rows, returning how many were removed.
    fn delete(
        &self,
        cx: &Cx,
        table: &str,
        filter: &Filter,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    fn rollback(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;
}
