//! Table definitions and constraint checks.

use crudview_core::{Error, Filter, IntegrityErrorKind, Result, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A stored row: column name to value.
pub type StoredRow = BTreeMap<String, Value>;

/// A foreign-key constraint checked on insert and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// Schema of an in-memory table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    /// Generated/unique key column; `None` for junction tables.
    pub key_column: Option<String>,
    /// Declared columns; absent values are stored as NULL.
    pub columns: Vec<String>,
    pub not_null: Vec<String>,
    /// Column groups that must be unique together.
    pub unique: Vec<Vec<String>>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableDef {
    /// A table with an auto-generated integer key.
    pub fn new(name: impl Into<String>, key_column: impl Into<String>) -> Self {
        let key = key_column.into();
        Self {
            name: name.into(),
            key_column: Some(key.clone()),
            columns: vec![key],
            not_null: Vec::new(),
            unique: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// A junction table whose rows are unique on `(owner_column, target_column)`.
    pub fn junction(
        name: impl Into<String>,
        owner_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        let owner = owner_column.into();
        let target = target_column.into();
        Self {
            name: name.into(),
            key_column: None,
            columns: vec![owner.clone(), target.clone()],
            not_null: vec![owner.clone(), target.clone()],
            unique: vec![vec![owner, target]],
            foreign_keys: Vec::new(),
        }
    }

    #[must_use]
    pub fn column(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.columns.contains(&name) {
            self.columns.push(name);
        }
        self
    }

    #[must_use]
    pub fn not_null(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self = self.column(name.clone());
        self.not_null.push(name);
        self
    }

    #[must_use]
    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique
            .push(columns.iter().map(|c| (*c).to_string()).collect());
        self
    }

    #[must_use]
    pub fn references(
        mut self,
        column: impl Into<String>,
        table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        let column = column.into();
        self = self.column(column.clone());
        self.foreign_keys.push(ForeignKey {
            column,
            references_table: table.into(),
            references_column: referenced_column.into(),
        });
        self
    }
}

/// Rows of one table plus its key generator.
#[derive(Debug, Clone)]
pub(crate) struct MemoryTable {
    pub(crate) def: TableDef,
    pub(crate) rows: Vec<StoredRow>,
    next_id: i64,
}

impl MemoryTable {
    pub(crate) fn new(def: TableDef) -> Self {
        Self {
            def,
            rows: Vec::new(),
            next_id: 1,
        }
    }

    /// Fill declared columns and assign a key when needed.
    pub(crate) fn prepare_insert(&mut self, values: &[(String, Value)]) -> StoredRow {
        let mut row: StoredRow = self
            .def
            .columns
            .iter()
            .map(|c| (c.clone(), Value::Null))
            .collect();
        for (column, value) in values {
            row.insert(column.clone(), value.clone());
        }
        if let Some(key) = &self.def.key_column {
            match row.get(key).and_then(Value::as_i64) {
                Some(id) => {
                    row.insert(key.clone(), Value::BigInt(id));
                    self.next_id = self.next_id.max(id + 1);
                }
                None if row.get(key).is_none_or(Value::is_null) => {
                    row.insert(key.clone(), Value::BigInt(self.next_id));
                    self.next_id += 1;
                }
                None => {}
            }
        }
        row
    }

    /// Check NOT NULL and unique constraints for `row`, ignoring the row at
    /// `skip` (the row being updated).
    pub(crate) fn check_local(&self, row: &StoredRow, skip: Option<usize>) -> Result<()> {
        for column in &self.def.not_null {
            if row.get(column).is_none_or(Value::is_null) {
                return Err(Error::integrity(
                    IntegrityErrorKind::NotNull,
                    &self.def.name,
                    format!("column '{column}' must not be null"),
                ));
            }
        }
        let key_group = self.def.key_column.iter().cloned().collect::<Vec<_>>();
        let groups = std::iter::once(&key_group).chain(self.def.unique.iter());
        for group in groups {
            if group.is_empty() {
                continue;
            }
            let duplicate = self.rows.iter().enumerate().any(|(i, existing)| {
                Some(i) != skip
                    && group.iter().all(|c| {
                        let a = row.get(c).unwrap_or(&Value::Null);
                        let b = existing.get(c).unwrap_or(&Value::Null);
                        a.key_eq(b)
                    })
            });
            if duplicate {
                return Err(Error::integrity(
                    IntegrityErrorKind::Unique,
                    &self.def.name,
                    format!("duplicate value for ({})", group.join(", ")),
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn matching(&self, filter: &Filter) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                filter.matches_with(|column| row.get(column).cloned().unwrap_or(Value::Null))
            })
            .map(|(i, _)| i)
            .collect()
    }
}

/// Total order used for `order_by`: NULL first, numbers numerically, text
/// case-insensitively.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Text(x), Value::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}
