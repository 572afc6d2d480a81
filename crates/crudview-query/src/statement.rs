//! Rendering of store operations into SQL plus parameters.

use crate::dialect::Dialect;
use crudview_core::{Condition, Filter, Value};

/// A rendered statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Accumulates parameters and hands out placeholders.
struct Params {
    dialect: Dialect,
    values: Vec<Value>,
}

impl Params {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    fn push(&mut self, value: Value) -> String {
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }
}

fn escape_like(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn render_condition(condition: &Condition, params: &mut Params) -> String {
    let dialect = params.dialect;
    let column = dialect.quote_identifier(condition.column());
    match condition {
        Condition::Eq(_, value) => {
            let placeholder = params.push(value.clone());
            format!("{column} = {placeholder}")
        }
        // An empty IN list is invalid SQL; it matches nothing.
        Condition::In(_, values) if values.is_empty() => "1 = 0".to_string(),
        Condition::In(_, values) => {
            let placeholders: Vec<_> = values
                .iter()
                .map(|v| params.push(v.clone()))
                .collect();
            format!("{column} IN ({})", placeholders.join(", "))
        }
        Condition::IsNull(_) => format!("{column} IS NULL"),
        Condition::ContainsIgnoreCase(_, needle) => {
            let pattern = format!("%{}%", escape_like(&needle.to_lowercase()));
            let placeholder = params.push(Value::Text(pattern));
            if dialect.supports_ilike() {
                format!("{column} ILIKE {placeholder} ESCAPE '\\'")
            } else {
                format!("LOWER({column}) LIKE {placeholder} ESCAPE '\\'")
            }
        }
    }
}

fn render_where(filter: &Filter, params: &mut Params) -> String {
    if filter.conditions.is_empty() {
        return String::new();
    }
    let clauses: Vec<_> = filter
        .conditions
        .iter()
        .map(|c| render_condition(c, params))
        .collect();
    format!(" WHERE {}", clauses.join(" AND "))
}

/// `SELECT * FROM t [WHERE ..] [ORDER BY ..] [LIMIT n]`
pub fn select(dialect: Dialect, table: &str, filter: &Filter) -> Statement {
    let mut params = Params::new(dialect);
    let mut sql = format!("SELECT * FROM {}", dialect.quote_identifier(table));
    sql.push_str(&render_where(filter, &mut params));
    if let Some(column) = &filter.order_by {
        sql.push_str(&format!(" ORDER BY {}", dialect.quote_identifier(column)));
    }
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    Statement {
        sql,
        params: params.values,
    }
}

/// `SELECT COUNT(*) AS "count" FROM t [WHERE ..]`
pub fn count(dialect: Dialect, table: &str, filter: &Filter) -> Statement {
    let mut params = Params::new(dialect);
    let mut sql = format!(
        "SELECT COUNT(*) AS {} FROM {}",
        dialect.quote_identifier("count"),
        dialect.quote_identifier(table)
    );
    sql.push_str(&render_where(filter, &mut params));
    Statement {
        sql,
        params: params.values,
    }
}

/// `INSERT INTO t (a, b) VALUES ($1, $2)`
pub fn insert(dialect: Dialect, table: &str, values: &[(String, Value)]) -> Statement {
    let mut params = Params::new(dialect);
    if values.is_empty() {
        return Statement {
            sql: format!("INSERT INTO {} DEFAULT VALUES", dialect.quote_identifier(table)),
            params: Vec::new(),
        };
    }
    let columns: Vec<_> = values
        .iter()
        .map(|(c, _)| dialect.quote_identifier(c))
        .collect();
    let placeholders: Vec<_> = values.iter().map(|(_, v)| params.push(v.clone())).collect();
    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            dialect.quote_identifier(table),
            columns.join(", "),
            placeholders.join(", ")
        ),
        params: params.values,
    }
}

/// `UPDATE t SET a = $1 [WHERE ..]`
pub fn update(
    dialect: Dialect,
    table: &str,
    assignments: &[(String, Value)],
    filter: &Filter,
) -> Statement {
    let mut params = Params::new(dialect);
    let sets: Vec<_> = assignments
        .iter()
        .map(|(c, v)| {
            let placeholder = params.push(v.clone());
            format!("{} = {placeholder}", dialect.quote_identifier(c))
        })
        .collect();
    let mut sql = format!(
        "UPDATE {} SET {}",
        dialect.quote_identifier(table),
        sets.join(", ")
    );
    sql.push_str(&render_where(filter, &mut params));
    Statement {
        sql,
        params: params.values,
    }
}

/// `DELETE FROM t [WHERE ..]`
pub fn delete(dialect: Dialect, table: &str, filter: &Filter) -> Statement {
    let mut params = Params::new(dialect);
    let mut sql = format!("DELETE FROM {}", dialect.quote_identifier(table));
    sql.push_str(&render_where(filter, &mut params));
    Statement {
        sql,
        params: params.values,
    }
}
