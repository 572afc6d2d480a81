//! crudview - relation synchronization for CRUD administration.
//!
//! crudview manages the relations of a persisted owner entity when an
//! administration form creates, updates or deletes it:
//!
//! - One-to-many relations are reconciled through the target's foreign key
//! - Many-to-many relations are reconciled by diffing junction-table rows
//! - Free-text and inline attribute payloads create new related rows
//! - Everything runs inside one transaction per save or delete
//!
//! # Quick Start
//!
//! ```ignore
//! use crudview::prelude::*;
//! use serde_json::json;
//!
//! async fn save_post(cx: &Cx, store: &MemoryStore) -> Outcome<SyncReport, Error> {
//!     let registry = RelationRegistry::new()
//!         .with_relation(
//!             RelationDescriptor::many_to_many(
//!                 "tags",
//!                 "tags",
//!                 JunctionInfo::new("post_tag", "post_id", "tag_id"),
//!             )
//!             .create_attribute("name"),
//!         )
//!         .unwrap();
//!     let config = BehaviorConfig::with_relations(["tags"]);
//!     let mut post =
//!         CrudViewBehavior::attach(Record::new("posts", "id"), &config, registry).unwrap();
//!     post.set_property("title", &json!("Hello")).unwrap();
//!     post.set_property("tags", &json!([2, 3, "golang"])).unwrap();
//!     post.save(cx, store).await
//! }
//! ```

pub mod behavior;
pub mod config;
pub mod fields;

pub use behavior::CrudViewBehavior;
pub use config::{BehaviorConfig, RelationConfig, RuleConfig};
pub use fields::{FieldKind, field_kinds};

// Re-export all public types from sub-crates
pub use crudview_core::{
    Condition, Connection, Cx, Error, FieldRule, Filter, JunctionInfo, Outcome, QueryDescriptor,
    Record, RelationDescriptor, RelationKind, RelationMetadata, RelationRegistry, RelationStore,
    Result, Row, RuleSet, UnlinkAction, ValidationError, ValidationErrorKind, Value,
};
pub use crudview_memory::{MemoryStore, TableDef};
pub use crudview_query::{Dialect, SqlStore};
pub use crudview_relations::{
    AutocompleteService, BeforeSave, Hint, HintQuery, JunctionRow, PayloadItem, RelatedData,
    RelationManager, RelationPayload, SyncReport,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        BehaviorConfig, CrudViewBehavior, Cx, Dialect, Error, FieldKind, Filter, JunctionInfo,
        MemoryStore, Outcome, Record, RelationDescriptor, RelationRegistry, RelationStore, Result,
        RuleSet, SqlStore, SyncReport, UnlinkAction, Value,
    };
}
