//! [`RelationStore`] over a SQL [`Connection`].

use crate::dialect::Dialect;
use crate::statement::{self, Statement};
use crudview_core::{
    Connection, Cx, Error, Filter, Outcome, RelationStore, Row, TransactionError,
    TransactionErrorKind, Value,
};
use std::sync::atomic::{AtomicBool, Ordering};

/// Renders store operations for one dialect and runs them on a connection.
///
/// Transactions are plain `BEGIN` / `COMMIT` / `ROLLBACK` statements, so the
/// store must own its connection for the duration of a save cycle.
#[derive(Debug)]
pub struct SqlStore<C: Connection> {
    conn: C,
    dialect: Dialect,
    in_transaction: AtomicBool,
}

impl<C: Connection> SqlStore<C> {
    pub fn new(conn: C, dialect: Dialect) -> Self {
        Self {
            conn,
            dialect,
            in_transaction: AtomicBool::new(false),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn into_connection(self) -> C {
        self.conn
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }

    async fn run_execute(&self, cx: &Cx, stmt: Statement) -> Outcome<u64, Error> {
        tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "Executing statement");
        self.conn.execute(cx, &stmt.sql, &stmt.params).await
    }

    async fn transaction_statement(
        &self,
        cx: &Cx,
        sql: &'static str,
        expect_active: bool,
    ) -> Outcome<(), Error> {
        if self.in_transaction() != expect_active {
            let (kind, message) = if expect_active {
                (
                    TransactionErrorKind::NotActive,
                    format!("cannot {sql}: no transaction in progress"),
                )
            } else {
                (
                    TransactionErrorKind::AlreadyActive,
                    "transaction already in progress".to_string(),
                )
            };
            return Outcome::Err(Error::Transaction(TransactionError { kind, message }));
        }
        tracing::debug!(sql = sql, "Transaction statement");
        let outcome = self.conn.execute(cx, sql, &[]).await;
        if matches!(outcome, Outcome::Ok(_)) {
            self.in_transaction.store(!expect_active, Ordering::Release);
        } else if sql == "ROLLBACK" {
            // The server drops the transaction even when ROLLBACK reports an error.
            self.in_transaction.store(false, Ordering::Release);
        }
        outcome.map(|_| ())
    }
}

impl<C: Connection> RelationStore for SqlStore<C> {
    fn select(
        &self,
        cx: &Cx,
        table: &str,
        filter: &Filter,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let stmt = statement::select(self.dialect, table, filter);
        async move {
            tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "Executing query");
            self.conn.query(cx, &stmt.sql, &stmt.params).await
        }
    }

    fn count(
        &self,
        cx: &Cx,
        table: &str,
        filter: &Filter,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let stmt = statement::count(self.dialect, table, filter);
        async move {
            tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "Executing query");
            let rows = match self.conn.query(cx, &stmt.sql, &stmt.params).await {
                Outcome::Ok(rows) => rows,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            let count = rows
                .first()
                .and_then(|row| row.get(0))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            Outcome::Ok(u64::try_from(count).unwrap_or(0))
        }
    }

    fn insert(
        &self,
        cx: &Cx,
        table: &str,
        key_column: &str,
        values: &[(String, Value)],
    ) -> impl Future<Output = Outcome<Value, Error>> + Send {
        let stmt = statement::insert(self.dialect, table, values);
        let provided = values
            .iter()
            .find(|(c, v)| c == key_column && !v.is_null())
            .map(|(_, v)| v.clone());
        async move {
            tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "Executing insert");
            match provided {
                Some(key) => match self.conn.execute(cx, &stmt.sql, &stmt.params).await {
                    Outcome::Ok(_) => Outcome::Ok(key),
                    Outcome::Err(e) => Outcome::Err(e),
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                },
                None => match self.conn.insert(cx, &stmt.sql, &stmt.params).await {
                    Outcome::Ok(id) => Outcome::Ok(Value::BigInt(id)),
                    Outcome::Err(e) => Outcome::Err(e),
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                },
            }
        }
    }

    fn update(
        &self,
        cx: &Cx,
        table: &str,
        assignments: &[(String, Value)],
        filter: &Filter,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let stmt = (!assignments.is_empty())
            .then(|| statement::update(self.dialect, table, assignments, filter));
        async move {
            match stmt {
                Some(stmt) => self.run_execute(cx, stmt).await,
                None => Outcome::Ok(0),
            }
        }
    }

    fn delete(
        &self,
        cx: &Cx,
        table: &str,
        filter: &Filter,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let stmt = statement::delete(self.dialect, table, filter);
        self.run_execute(cx, stmt)
    }

    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.transaction_statement(cx, "BEGIN", false)
    }

    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.transaction_statement(cx, "COMMIT", true)
    }

    fn rollback(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.transaction_statement(cx, "ROLLBACK", true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct MockState {
        executed: Vec<(String, Vec<Value>)>,
        next_id: i64,
        count_result: i64,
        fail_on: Option<&'static str>,
    }

    #[derive(Debug, Clone)]
    struct MockConnection {
        state: Arc<Mutex<MockState>>,
    }

    impl Connection for MockConnection {
        fn query(
            &self,
            _cx: &Cx,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
            let mut guard = self.state.lock().expect("lock poisoned");
            guard.executed.push((sql.to_string(), params.to_vec()));
            let rows = if sql.starts_with("SELECT COUNT(*)") {
                vec![Row::new(
                    vec!["count".into()],
                    vec![Value::BigInt(guard.count_result)],
                )]
            } else {
                Vec::new()
            };
            async move { Outcome::Ok(rows) }
        }

        fn execute(
            &self,
            _cx: &Cx,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = Outcome<u64, Error>> + Send {
            let mut guard = self.state.lock().expect("lock poisoned");
            guard.executed.push((sql.to_string(), params.to_vec()));
            let failure = guard
                .fail_on
                .filter(|f| *f == sql)
                .map(|f| Error::Custom(format!("{f} failed")));
            async move {
                match failure {
                    Some(e) => Outcome::Err(e),
                    None => Outcome::Ok(1),
                }
            }
        }

        fn insert(
            &self,
            _cx: &Cx,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = Outcome<i64, Error>> + Send {
            let mut guard = self.state.lock().expect("lock poisoned");
            guard.executed.push((sql.to_string(), params.to_vec()));
            guard.next_id += 1;
            let id = guard.next_id;
            async move { Outcome::Ok(id) }
        }
    }

    fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
        }
    }

    fn fixture() -> (Arc<Mutex<MockState>>, SqlStore<MockConnection>) {
        let state = Arc::new(Mutex::new(MockState {
            next_id: 3,
            count_result: 2,
            ..MockState::default()
        }));
        let conn = MockConnection {
            state: Arc::clone(&state),
        };
        (state, SqlStore::new(conn, Dialect::Postgres))
    }

    #[test]
    fn insert_returns_generated_or_provided_key() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let (state, store) = fixture();

        rt.block_on(async {
            let generated = unwrap_outcome(
                store
                    .insert(&cx, "tags", "id", &[("name".into(), Value::from("golang"))])
                    .await,
            );
            assert_eq!(generated, Value::BigInt(4));

            let provided = unwrap_outcome(
                store
                    .insert(
                        &cx,
                        "post_tag",
                        "post_id",
                        &[
                            ("post_id".into(), Value::BigInt(7)),
                            ("tag_id".into(), Value::BigInt(4)),
                        ],
                    )
                    .await,
            );
            assert_eq!(provided, Value::BigInt(7));
        });

        let guard = state.lock().expect("lock poisoned");
        assert_eq!(
            guard.executed[0].0,
            "INSERT INTO \"tags\" (\"name\") VALUES ($1)"
        );
        assert_eq!(
            guard.executed[1].0,
            "INSERT INTO \"post_tag\" (\"post_id\", \"tag_id\") VALUES ($1, $2)"
        );
    }

    #[test]
    fn count_reads_first_column() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let (_state, store) = fixture();

        rt.block_on(async {
            let n = unwrap_outcome(
                store
                    .count(&cx, "tags", &Filter::any_of("id", vec![Value::BigInt(2), Value::BigInt(3)]))
                    .await,
            );
            assert_eq!(n, 2);
        });
    }

    #[test]
    fn transaction_statements_are_tracked() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let (state, store) = fixture();

        rt.block_on(async {
            assert!(matches!(store.commit(&cx).await, Outcome::Err(Error::Transaction(_))));
            unwrap_outcome(store.begin(&cx).await);
            assert!(store.in_transaction());
            assert!(matches!(store.begin(&cx).await, Outcome::Err(Error::Transaction(_))));
            unwrap_outcome(store.delete(&cx, "post_tag", &Filter::eq("post_id", 7_i64)).await);
            unwrap_outcome(store.rollback(&cx).await);
            assert!(!store.in_transaction());
        });

        let guard = state.lock().expect("lock poisoned");
        let sql: Vec<_> = guard.executed.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(
            sql,
            vec![
                "BEGIN",
                "DELETE FROM \"post_tag\" WHERE \"post_id\" = $1",
                "ROLLBACK"
            ]
        );
    }

    #[test]
    fn empty_update_executes_nothing() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let (state, store) = fixture();

        rt.block_on(async {
            let n = unwrap_outcome(store.update(&cx, "books", &[], &Filter::all()).await);
            assert_eq!(n, 0);
        });
        assert!(state.lock().expect("lock poisoned").executed.is_empty());
    }

    #[test]
    fn failed_commit_is_cleared_by_rollback() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let (state, store) = fixture();
        state.lock().expect("lock poisoned").fail_on = Some("COMMIT");

        rt.block_on(async {
            unwrap_outcome(store.begin(&cx).await);
            assert!(matches!(store.commit(&cx).await, Outcome::Err(Error::Custom(_))));
            assert!(store.in_transaction());
            unwrap_outcome(store.rollback(&cx).await);
            assert!(!store.in_transaction());
            unwrap_outcome(store.begin(&cx).await);
        });
    }

    #[test]
    fn failed_rollback_still_ends_the_transaction() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let (state, store) = fixture();
        state.lock().expect("lock poisoned").fail_on = Some("ROLLBACK");

        rt.block_on(async {
            unwrap_outcome(store.begin(&cx).await);
            assert!(matches!(store.rollback(&cx).await, Outcome::Err(_)));
            assert!(!store.in_transaction());
            unwrap_outcome(store.begin(&cx).await);
        });
    }
}
