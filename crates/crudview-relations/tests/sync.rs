//! Save and delete cycles against the in-memory store.

use asupersync::runtime::RuntimeBuilder;
use crudview_core::{
    Cx, Error, FieldRule, JunctionInfo, Outcome, Record, RelationDescriptor, RelationMetadata,
    RelationRegistry, RuleSet, UnlinkAction, ValidationErrorKind, Value,
};
use crudview_memory::{MemoryStore, TableDef};
use crudview_relations::{BeforeSave, RelationManager, RelationPayload, SyncReport};
use serde_json::json;
use std::sync::Arc;

fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
    }
}

fn seed(store: &MemoryStore, table: &str, values: &[(&str, Value)]) {
    let values: Vec<(String, Value)> = values
        .iter()
        .map(|(c, v)| ((*c).to_string(), v.clone()))
        .collect();
    store.insert_row(table, "id", &values).unwrap();
}

fn post_store() -> MemoryStore {
    let store = MemoryStore::new()
        .with_table(TableDef::new("posts", "id").column("title"))
        .unwrap()
        .with_table(TableDef::new("tags", "id").column("name").unique(&["name"]))
        .unwrap()
        .with_table(
            TableDef::junction("post_tag", "post_id", "tag_id")
                .references("post_id", "posts", "id")
                .references("tag_id", "tags", "id"),
        )
        .unwrap();
    seed(&store, "posts", &[("id", 7.into()), ("title", "Hello".into())]);
    seed(&store, "posts", &[("id", 8.into()), ("title", "Other".into())]);
    for name in ["rust", "python", "c"] {
        seed(&store, "tags", &[("name", name.into())]);
    }
    for (post, tag) in [(7, 1), (7, 2), (7, 3), (8, 1)] {
        store
            .insert_row(
                "post_tag",
                "post_id",
                &[
                    ("post_id".to_string(), Value::from(post)),
                    ("tag_id".to_string(), Value::from(tag)),
                ],
            )
            .unwrap();
    }
    store
}

fn post_metadata() -> Arc<dyn RelationMetadata> {
    let registry = RelationRegistry::new()
        .with_relation(
            RelationDescriptor::many_to_many(
                "tags",
                "tags",
                JunctionInfo::new("post_tag", "post_id", "tag_id"),
            )
            .create_attribute("name"),
        )
        .unwrap()
        .with_rules(
            "tags",
            RuleSet::new()
                .rule("name", FieldRule::Required)
                .rule("name", FieldRule::MinLength(2)),
        );
    Arc::new(registry)
}

fn post(id: i64) -> Record {
    Record::new("posts", "id").with("id", id)
}

fn junction_pairs(store: &MemoryStore, post_id: i64) -> Vec<(Value, Value)> {
    let mut pairs: Vec<_> = store
        .rows("post_tag")
        .into_iter()
        .filter(|row| row.get("post_id") == Some(&Value::BigInt(post_id)))
        .map(|row| (row["post_id"].clone(), row["tag_id"].clone()))
        .collect();
    pairs.sort_by_key(|(_, t)| t.as_i64());
    pairs
}

#[test]
fn tags_are_reconciled_through_the_junction_table() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = post_store();
    let mut manager = RelationManager::new(post_metadata(), ["tags"]).unwrap();

    let payload = RelationPayload::from_json("tags", &json!([2, "3", "golang"])).unwrap();
    assert!(manager.set_relation_value("tags", payload));

    let report = rt.block_on(async {
        let decision = unwrap_outcome(manager.before_save(&cx, &store, &post(7)).await);
        assert_eq!(decision, BeforeSave::Proceed);
        unwrap_outcome(manager.after_save(&cx, &store, &post(7)).await)
    });

    assert_eq!(
        report,
        SyncReport {
            created: 1,
            junction_inserted: 1,
            junction_deleted: 1,
            ..SyncReport::default()
        }
    );
    let golang = store
        .rows("tags")
        .into_iter()
        .find(|row| row["name"] == Value::from("golang"))
        .expect("golang tag inserted");
    assert_eq!(golang["id"], Value::BigInt(4));
    assert_eq!(
        junction_pairs(&store, 7),
        vec![
            (Value::BigInt(7), Value::BigInt(2)),
            (Value::BigInt(7), Value::BigInt(3)),
            (Value::BigInt(7), Value::BigInt(4)),
        ]
    );
    assert_eq!(junction_pairs(&store, 8).len(), 1);
    assert!(manager.relation_value("tags").is_none());
}

#[test]
fn existing_identifiers_never_create_duplicates() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = post_store();
    let mut manager = RelationManager::new(post_metadata(), ["tags"]).unwrap();

    rt.block_on(async {
        for _ in 0..2 {
            manager.set_relation_value("tags", RelationPayload::keys([Value::BigInt(1), Value::from("1"), Value::from("rust")]));
            let decision = unwrap_outcome(manager.before_save(&cx, &store, &post(8)).await);
            assert_eq!(decision, BeforeSave::Proceed);
            let report = unwrap_outcome(manager.after_save(&cx, &store, &post(8)).await);
            assert!(report.is_empty(), "unexpected writes: {report:?}");
        }
    });

    assert_eq!(store.rows("tags").len(), 3);
    assert_eq!(junction_pairs(&store, 8), vec![(Value::BigInt(8), Value::BigInt(1))]);
}

#[test]
fn removing_one_tag_deletes_exactly_its_row() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = post_store();
    let mut manager = RelationManager::new(post_metadata(), ["tags"]).unwrap();
    manager.set_relation_value("tags", RelationPayload::keys([1_i64, 3]));

    let report = rt.block_on(async {
        unwrap_outcome(manager.before_save(&cx, &store, &post(7)).await);
        unwrap_outcome(manager.after_save(&cx, &store, &post(7)).await)
    });

    assert_eq!(report.junction_deleted, 1);
    assert_eq!(report.junction_inserted, 0);
    assert_eq!(
        junction_pairs(&store, 7),
        vec![
            (Value::BigInt(7), Value::BigInt(1)),
            (Value::BigInt(7), Value::BigInt(3)),
        ]
    );
    assert_eq!(junction_pairs(&store, 8), vec![(Value::BigInt(8), Value::BigInt(1))]);
}

#[test]
fn invalid_inline_tag_cancels_without_writes() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = post_store();
    let before = store.snapshot();
    let writes = store.write_count();
    let mut manager = RelationManager::new(post_metadata(), ["tags"]).unwrap();

    let payload = RelationPayload::from_json("tags", &json!([2, {"name": "x"}])).unwrap();
    manager.set_relation_value("tags", payload);

    let decision = rt.block_on(async {
        unwrap_outcome(manager.before_save(&cx, &store, &post(7)).await)
    });

    let BeforeSave::Cancelled(errors) = decision else {
        std::panic::panic_any("expected cancelled save");
    };
    assert_eq!(errors.errors.len(), 1);
    assert_eq!(errors.errors[0].field, "tags[1].name");
    assert_eq!(errors.errors[0].kind, ValidationErrorKind::MinLength);
    assert!(manager.related_data().is_empty());
    assert_eq!(store.snapshot(), before);
    assert_eq!(store.write_count(), writes);
}

#[test]
fn unknown_key_without_create_attribute_is_rejected() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = post_store();
    let registry = RelationRegistry::new()
        .with_relation(RelationDescriptor::many_to_many(
            "tags",
            "tags",
            JunctionInfo::new("post_tag", "post_id", "tag_id"),
        ))
        .unwrap();
    let mut manager = RelationManager::new(Arc::new(registry), ["tags"]).unwrap();
    manager.set_relation_value("tags", RelationPayload::keys([2_i64, 99]));

    let decision = rt.block_on(async {
        unwrap_outcome(manager.before_save(&cx, &store, &post(7)).await)
    });
    let BeforeSave::Cancelled(errors) = decision else {
        std::panic::panic_any("expected cancelled save");
    };
    assert_eq!(errors.errors[0].kind, ValidationErrorKind::UnknownKey);
    assert_eq!(errors.errors[0].field, "tags");
}

#[test]
fn delete_removes_only_the_owners_junction_rows() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = post_store();
    let mut manager = RelationManager::new(post_metadata(), ["tags"]).unwrap();

    let report = rt.block_on(async {
        unwrap_outcome(manager.before_delete(&cx, &store, &post(7)).await);
        store
            .delete_rows("posts", &crudview_core::Filter::eq("id", 7_i64))
            .unwrap();
        unwrap_outcome(manager.after_delete(&cx, &store).await)
    });

    assert_eq!(report.junction_deleted, 3);
    assert!(junction_pairs(&store, 7).is_empty());
    assert_eq!(junction_pairs(&store, 8).len(), 1);
    assert_eq!(store.rows("tags").len(), 3);
}

fn author_store() -> MemoryStore {
    let store = MemoryStore::new()
        .with_table(TableDef::new("authors", "id").column("name"))
        .unwrap()
        .with_table(
            TableDef::new("books", "id")
                .column("title")
                .references("author_id", "authors", "id"),
        )
        .unwrap();
    seed(&store, "authors", &[("id", 5.into()), ("name", "Le Guin".into())]);
    seed(&store, "authors", &[("id", 6.into()), ("name", "Herbert".into())]);
    seed(&store, "books", &[("id", 9.into()), ("title", "Earthsea".into()), ("author_id", 5.into())]);
    seed(&store, "books", &[("id", 10.into()), ("title", "Dune".into()), ("author_id", Value::Null)]);
    seed(&store, "books", &[("id", 11.into()), ("title", "Lathe".into()), ("author_id", 5.into())]);
    seed(&store, "books", &[("id", 12.into()), ("title", "Children".into()), ("author_id", 6.into())]);
    store
}

fn books_metadata(action: UnlinkAction) -> Arc<dyn RelationMetadata> {
    Arc::new(
        RelationRegistry::new()
            .with_relation(RelationDescriptor::has_many("books", "books", "author_id").on_unlink(action))
            .unwrap(),
    )
}

fn author_of(store: &MemoryStore, book: i64) -> Value {
    store
        .rows("books")
        .into_iter()
        .find(|row| row["id"] == Value::BigInt(book))
        .map_or(Value::Null, |row| row["author_id"].clone())
}

#[test]
fn books_are_relinked_by_foreign_key() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = author_store();
    let mut manager = RelationManager::new(books_metadata(UnlinkAction::Nullify), ["books"]).unwrap();
    manager.set_relation_value("books", RelationPayload::keys(["9", "10"]));
    let author = Record::new("authors", "id").with("id", 5_i64);

    let report = rt.block_on(async {
        unwrap_outcome(manager.before_save(&cx, &store, &author).await);
        unwrap_outcome(manager.after_save(&cx, &store, &author).await)
    });

    assert_eq!(report.linked, 1);
    assert_eq!(report.unlinked, 1);
    assert_eq!(report.created, 0);
    assert_eq!(author_of(&store, 9), Value::BigInt(5));
    assert_eq!(author_of(&store, 10), Value::BigInt(5));
    assert_eq!(author_of(&store, 11), Value::Null);
    assert_eq!(author_of(&store, 12), Value::BigInt(6));
}

#[test]
fn inline_books_reuse_equal_rows_and_delete_dropped_ones() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = author_store();
    let mut manager = RelationManager::new(books_metadata(UnlinkAction::Delete), ["books"]).unwrap();
    let payload =
        RelationPayload::from_json("books", &json!([{"title": "Earthsea"}, {"title": "Tehanu"}]))
            .unwrap();
    manager.set_relation_value("books", payload);
    let author = Record::new("authors", "id").with("id", 5_i64);

    let report = rt.block_on(async {
        unwrap_outcome(manager.before_save(&cx, &store, &author).await);
        unwrap_outcome(manager.after_save(&cx, &store, &author).await)
    });

    assert_eq!(report.created, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.linked, 0);
    assert_eq!(author_of(&store, 9), Value::BigInt(5));
    assert!(store.rows("books").iter().all(|row| row["id"] != Value::BigInt(11)));
    let tehanu = store
        .rows("books")
        .into_iter()
        .find(|row| row["title"] == Value::from("Tehanu"))
        .expect("inline book inserted");
    assert_eq!(tehanu["author_id"], Value::BigInt(5));
}

#[test]
fn deleting_an_author_nullifies_their_books() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = author_store();
    let mut manager = RelationManager::new(books_metadata(UnlinkAction::Nullify), ["books"]).unwrap();
    let author = Record::new("authors", "id").with("id", 5_i64);

    let report = rt.block_on(async {
        unwrap_outcome(manager.before_delete(&cx, &store, &author).await);
        store
            .delete_rows("authors", &crudview_core::Filter::eq("id", 5_i64))
            .unwrap();
        unwrap_outcome(manager.after_delete(&cx, &store).await)
    });

    assert_eq!(report.unlinked, 2);
    assert_eq!(author_of(&store, 9), Value::Null);
    assert_eq!(author_of(&store, 11), Value::Null);
    assert_eq!(author_of(&store, 12), Value::BigInt(6));
}

#[test]
fn deleting_an_author_deletes_dependent_books() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = author_store();
    let mut manager = RelationManager::new(books_metadata(UnlinkAction::Delete), ["books"]).unwrap();
    let author = Record::new("authors", "id").with("id", 5_i64);

    let report = rt.block_on(async {
        unwrap_outcome(manager.before_delete(&cx, &store, &author).await);
        store
            .delete_rows("authors", &crudview_core::Filter::eq("id", 5_i64))
            .unwrap();
        unwrap_outcome(manager.after_delete(&cx, &store).await)
    });

    assert_eq!(report.deleted, 2);
    assert_eq!(report.unlinked, 0);
    let remaining: Vec<Value> = store.rows("books").into_iter().map(|row| row["id"].clone()).collect();
    assert_eq!(remaining, vec![Value::BigInt(10), Value::BigInt(12)]);
    assert_eq!(author_of(&store, 12), Value::BigInt(6));
}
