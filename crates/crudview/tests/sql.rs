//! Statement sequence of a save cycle through `SqlStore`.

use asupersync::runtime::RuntimeBuilder;
use crudview::prelude::*;
use crudview::{Connection, Row};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Recorded {
    statements: Vec<(String, Vec<Value>)>,
    next_id: i64,
    /// Canned result rows keyed by statement prefix.
    answers: Vec<(String, Vec<Row>)>,
    /// Statement prefix that fails the next time it runs.
    fail_once: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct RecordingConnection {
    state: Arc<Mutex<Recorded>>,
}

impl RecordingConnection {
    fn record(&self, sql: &str, params: &[Value]) -> Result<i64> {
        let mut guard = self.state.lock().expect("lock poisoned");
        guard.statements.push((sql.to_string(), params.to_vec()));
        if guard.fail_once.as_deref().is_some_and(|p| sql.starts_with(p)) {
            guard.fail_once = None;
            return Err(Error::query(sql, "connection reset"));
        }
        guard.next_id += 1;
        Ok(guard.next_id)
    }

    fn answer(&self, sql: &str) -> Vec<Row> {
        let guard = self.state.lock().expect("lock poisoned");
        guard
            .answers
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default()
    }
}

impl Connection for RecordingConnection {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let result = self.record(sql, params).map(|_| self.answer(sql));
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.record(sql, params).map(|_| 1);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let result = self.record(sql, params);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }
}

fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
    }
}

fn registry() -> RelationRegistry {
    RelationRegistry::new()
        .with_relation(
            RelationDescriptor::many_to_many(
                "tags",
                "tags",
                JunctionInfo::new("post_tag", "post_id", "tag_id"),
            )
            .create_attribute("name"),
        )
        .unwrap()
}

fn new_post(tags: serde_json::Value) -> CrudViewBehavior {
    let mut post = CrudViewBehavior::attach(
        Record::new("posts", "id"),
        &BehaviorConfig::with_relations(["tags"]),
        registry(),
    )
    .unwrap();
    post.set_property("title", &json!("Hello")).unwrap();
    post.set_property("tags", &tags).unwrap();
    post
}

fn statements(state: &Arc<Mutex<Recorded>>) -> Vec<String> {
    let guard = state.lock().expect("lock poisoned");
    guard.statements.iter().map(|(s, _)| s.clone()).collect()
}

#[test]
fn new_post_with_inline_tag_issues_ordered_statements() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = RecordingConnection::default();
    let state = Arc::clone(&conn.state);
    let store = SqlStore::new(conn, Dialect::Postgres);
    let mut post = new_post(json!([{"name": "golang"}]));

    let report = rt.block_on(async { unwrap_outcome(post.save(&cx, &store).await) });
    assert_eq!(report.created, 1);
    assert_eq!(report.junction_inserted, 1);
    assert!(!store.in_transaction());

    assert_eq!(
        statements(&state),
        vec![
            "BEGIN",
            "INSERT INTO \"posts\" (\"title\") VALUES ($1)",
            "SELECT * FROM \"post_tag\" WHERE \"post_id\" = $1",
            "INSERT INTO \"tags\" (\"name\") VALUES ($1)",
            "INSERT INTO \"post_tag\" (\"post_id\", \"tag_id\") VALUES ($1, $2)",
            "COMMIT",
        ]
    );
    let guard = state.lock().expect("lock poisoned");
    assert_eq!(guard.statements[4].1, vec![Value::BigInt(2), Value::BigInt(4)]);
}

#[test]
fn free_text_tags_are_not_bound_as_keys() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = RecordingConnection::default();
    {
        let mut guard = conn.state.lock().expect("lock poisoned");
        guard.answers = vec![
            (
                "SELECT COUNT(*)".to_string(),
                vec![Row::new(vec!["count".into()], vec![Value::BigInt(2)])],
            ),
            (
                "SELECT * FROM \"tags\"".to_string(),
                vec![
                    Row::new(
                        vec!["id".into(), "name".into()],
                        vec![Value::BigInt(2), Value::from("python")],
                    ),
                    Row::new(
                        vec!["id".into(), "name".into()],
                        vec![Value::BigInt(3), Value::from("c")],
                    ),
                ],
            ),
        ];
    }
    let state = Arc::clone(&conn.state);
    let store = SqlStore::new(conn, Dialect::Postgres);
    let mut post = new_post(json!([2, 3, "golang"]));

    let report = rt.block_on(async { unwrap_outcome(post.save(&cx, &store).await) });
    assert_eq!(report.created, 1);
    assert_eq!(report.junction_inserted, 3);

    let guard = state.lock().expect("lock poisoned");
    let (count_sql, count_params) = guard
        .statements
        .iter()
        .find(|(sql, _)| sql.starts_with("SELECT COUNT(*)"))
        .cloned()
        .expect("count statement");
    assert_eq!(
        count_sql,
        "SELECT COUNT(*) AS \"count\" FROM \"tags\" WHERE \"id\" IN ($1, $2)"
    );
    assert_eq!(count_params, vec![Value::BigInt(2), Value::BigInt(3)]);
    let created: Vec<_> = guard
        .statements
        .iter()
        .filter(|(sql, _)| sql.starts_with("INSERT INTO \"tags\""))
        .map(|(_, params)| params.clone())
        .collect();
    assert_eq!(created, vec![vec![Value::from("golang")]]);
}

#[test]
fn failed_sync_rolls_back_without_commit() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = RecordingConnection::default();
    conn.state.lock().expect("lock poisoned").fail_once =
        Some("INSERT INTO \"post_tag\"".to_string());
    let state = Arc::clone(&conn.state);
    let store = SqlStore::new(conn, Dialect::Postgres);
    let mut post = new_post(json!([{"name": "golang"}]));

    let outcome = rt.block_on(async { post.save(&cx, &store).await });

    assert!(matches!(outcome, Outcome::Err(Error::Query(_))));
    assert!(!store.in_transaction());
    assert!(post.owner().is_new());
    let sql = statements(&state);
    assert_eq!(sql.last().map(String::as_str), Some("ROLLBACK"));
    assert!(!sql.iter().any(|s| s == "COMMIT"));
}

#[test]
fn failed_commit_rolls_back_and_frees_the_store() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = RecordingConnection::default();
    conn.state.lock().expect("lock poisoned").fail_once = Some("COMMIT".to_string());
    let state = Arc::clone(&conn.state);
    let store = SqlStore::new(conn, Dialect::Postgres);

    rt.block_on(async {
        let mut first = new_post(json!([{"name": "golang"}]));
        let outcome = first.save(&cx, &store).await;
        assert!(matches!(outcome, Outcome::Err(Error::Query(_))));
        assert!(first.owner().is_new());
        assert!(!store.in_transaction());

        let mut second = new_post(json!([{"name": "zig"}]));
        let report = unwrap_outcome(second.save(&cx, &store).await);
        assert_eq!(report.created, 1);
    });

    let sql = statements(&state);
    let commit = sql.iter().position(|s| s == "COMMIT").expect("commit issued");
    assert_eq!(sql[commit + 1], "ROLLBACK");
    assert_eq!(sql[commit + 2], "BEGIN");
    assert_eq!(sql.last().map(String::as_str), Some("COMMIT"));
}
