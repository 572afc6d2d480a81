//! The in-memory [`RelationStore`].

use crate::table::{MemoryTable, StoredRow, TableDef, compare_values};
use crudview_core::{
    Cx, Error, Filter, IntegrityErrorKind, Outcome, RelationStore, Result, Row, TransactionError,
    TransactionErrorKind, Value,
};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

type Tables = BTreeMap<String, MemoryTable>;

#[derive(Debug, Default)]
struct MemoryState {
    tables: Tables,
    /// Copy of `tables` taken at BEGIN; restored on ROLLBACK.
    saved: Option<Tables>,
}

/// Transactional in-memory store.
///
/// Every operation runs synchronously under one lock, so the returned futures
/// are already complete. A transaction is a full copy of the tables taken at
/// `begin`; `rollback` puts that copy back.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    writes: AtomicU64,
}

/// Contents of every table, for before/after comparisons.
pub type Snapshot = BTreeMap<String, Vec<StoredRow>>;

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a table. Re-creating an existing table is a configuration error.
    pub fn create_table(&self, def: TableDef) -> Result<()> {
        let mut state = self.lock();
        if state.tables.contains_key(&def.name) {
            return Err(Error::config(format!("table '{}' already exists", def.name)));
        }
        tracing::debug!(table = %def.name, "Creating in-memory table");
        state.tables.insert(def.name.clone(), MemoryTable::new(def));
        Ok(())
    }

    /// Builder-style [`create_table`](Self::create_table).
    pub fn with_table(self, def: TableDef) -> Result<Self> {
        self.create_table(def)?;
        Ok(self)
    }

    /// Number of successful write operations so far (rolled back ones included).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().saved.is_some()
    }

    /// All rows of `table` in insertion order.
    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Copy of every table's rows.
    pub fn snapshot(&self) -> Snapshot {
        self.lock()
            .tables
            .iter()
            .map(|(name, table)| (name.clone(), table.rows.clone()))
            .collect()
    }

    pub fn insert_row(&self, table: &str, key_column: &str, values: &[(String, Value)]) -> Result<Value> {
        let mut state = self.lock();
        let row = {
            let target = table_mut(&mut state.tables, table)?;
            let row = target.prepare_insert(values);
            target.check_local(&row, None)?;
            row
        };
        check_foreign_keys(&state.tables, table, &row)?;
        let key = row.get(key_column).cloned().unwrap_or(Value::Null);
        tracing::trace!(table = table, key = %key, "Inserted row");
        table_mut(&mut state.tables, table)?.rows.push(row);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(key)
    }

    pub fn select_rows(&self, table: &str, filter: &Filter) -> Result<Vec<Row>> {
        let state = self.lock();
        let source = table_ref(&state.tables, table)?;
        let mut rows: Vec<&StoredRow> = source
            .matching(filter)
            .into_iter()
            .map(|i| &source.rows[i])
            .collect();
        if let Some(column) = &filter.order_by {
            rows.sort_by(|a, b| {
                compare_values(
                    a.get(column).unwrap_or(&Value::Null),
                    b.get(column).unwrap_or(&Value::Null),
                )
            });
        }
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows
            .into_iter()
            .map(|row| Row::from_pairs(row.iter().map(|(c, v)| (c.clone(), v.clone()))))
            .collect())
    }

    pub fn count_rows(&self, table: &str, filter: &Filter) -> Result<u64> {
        let state = self.lock();
        Ok(table_ref(&state.tables, table)?.matching(filter).len() as u64)
    }

    pub fn update_rows(
        &self,
        table: &str,
        assignments: &[(String, Value)],
        filter: &Filter,
    ) -> Result<u64> {
        let mut state = self.lock();
        let target = table_ref(&state.tables, table)?;
        let indexes = target.matching(filter);
        let mut updated = Vec::with_capacity(indexes.len());
        for &i in &indexes {
            let mut row = target.rows[i].clone();
            for (column, value) in assignments {
                row.insert(column.clone(), value.clone());
            }
            target.check_local(&row, Some(i))?;
            check_foreign_keys(&state.tables, table, &row)?;
            updated.push((i, row));
        }
        let count = updated.len() as u64;
        let target = table_mut(&mut state.tables, table)?;
        for (i, row) in updated {
            target.rows[i] = row;
        }
        if count > 0 {
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!(table = table, count, "Updated rows");
        Ok(count)
    }

    pub fn delete_rows(&self, table: &str, filter: &Filter) -> Result<u64> {
        let mut state = self.lock();
        let target = table_mut(&mut state.tables, table)?;
        let indexes = target.matching(filter);
        let mut position = 0;
        target.rows.retain(|_| {
            let keep = !indexes.contains(&position);
            position += 1;
            keep
        });
        let count = indexes.len() as u64;
        if count > 0 {
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!(table = table, count, "Deleted rows");
        Ok(count)
    }

    pub fn begin_sync(&self) -> Result<()> {
        let mut state = self.lock();
        if state.saved.is_some() {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::AlreadyActive,
                message: "transaction already in progress".to_string(),
            }));
        }
        state.saved = Some(state.tables.clone());
        Ok(())
    }

    pub fn commit_sync(&self) -> Result<()> {
        let mut state = self.lock();
        if state.saved.take().is_none() {
            return Err(not_active("commit"));
        }
        Ok(())
    }

    pub fn rollback_sync(&self) -> Result<()> {
        let mut state = self.lock();
        let Some(saved) = state.saved.take() else {
            return Err(not_active("rollback"));
        };
        state.tables = saved;
        tracing::debug!("Rolled back in-memory transaction");
        Ok(())
    }
}

fn not_active(op: &str) -> Error {
    Error::Transaction(TransactionError {
        kind: TransactionErrorKind::NotActive,
        message: format!("cannot {op}: no transaction in progress"),
    })
}

fn missing_table(table: &str) -> Error {
    Error::integrity(
        IntegrityErrorKind::MissingTable,
        table,
        format!("no such table '{table}'"),
    )
}

fn table_ref<'a>(tables: &'a Tables, table: &str) -> Result<&'a MemoryTable> {
    tables.get(table).ok_or_else(|| missing_table(table))
}

fn table_mut<'a>(tables: &'a mut Tables, table: &str) -> Result<&'a mut MemoryTable> {
    tables.get_mut(table).ok_or_else(|| missing_table(table))
}

fn check_foreign_keys(tables: &Tables, table: &str, row: &StoredRow) -> Result<()> {
    let def = &table_ref(tables, table)?.def;
    for fk in &def.foreign_keys {
        let value = row.get(&fk.column).unwrap_or(&Value::Null);
        if value.is_null() {
            continue;
        }
        let referenced = table_ref(tables, &fk.references_table)?;
        let exists = referenced.rows.iter().any(|r| {
            r.get(&fk.references_column)
                .is_some_and(|candidate| candidate.key_eq(value))
        });
        if !exists {
            return Err(Error::integrity(
                IntegrityErrorKind::ForeignKey,
                table,
                format!(
                    "{}.{} = {} has no matching {}.{}",
                    table, fk.column, value, fk.references_table, fk.references_column
                ),
            ));
        }
    }
    Ok(())
}

impl RelationStore for MemoryStore {
    fn select(
        &self,
        _cx: &Cx,
        table: &str,
        filter: &Filter,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let result = self.select_rows(table, filter);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn count(
        &self,
        _cx: &Cx,
        table: &str,
        filter: &Filter,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.count_rows(table, filter);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn insert(
        &self,
        _cx: &Cx,
        table: &str,
        key_column: &str,
        values: &[(String, Value)],
    ) -> impl Future<Output = Outcome<Value, Error>> + Send {
        let result = self.insert_row(table, key_column, values);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn update(
        &self,
        _cx: &Cx,
        table: &str,
        assignments: &[(String, Value)],
        filter: &Filter,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.update_rows(table, assignments, filter);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn delete(
        &self,
        _cx: &Cx,
        table: &str,
        filter: &Filter,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.delete_rows(table, filter);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn begin(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.begin_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn commit(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.commit_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn rollback(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.rollback_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }
}
