//! Save and delete protocol for an owner's relations.
//!
//! The owner's persistence layer calls the hooks in this order:
//!
//! ```text
//! save:   before_save -> write owner -> after_save
//! delete: before_delete -> delete owner -> after_delete
//! ```
//!
//! `before_save` only reads; every association write happens in `after_save`
//! and `after_delete`, inside the caller's transaction.

use crate::junction::{self, JunctionRow};
use crate::payload::{PayloadItem, RelationPayload};
use crate::related_data::RelatedData;
use crudview_core::{
    Cx, Error, Filter, Outcome, QueryDescriptor, Record, RelationDescriptor, RelationKind,
    RelationMetadata, RelationStore, UnlinkAction, ValidationError, Value,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of [`RelationManager::before_save`].
#[derive(Debug, Clone, PartialEq)]
pub enum BeforeSave {
    /// All submitted relation data is valid; the owner may be written.
    Proceed,
    /// Submitted relation data failed validation; nothing may be written.
    Cancelled(ValidationError),
}

impl BeforeSave {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BeforeSave::Cancelled(_))
    }
}

/// Counts of the writes performed by one hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Target rows inserted.
    pub created: usize,
    /// Foreign keys pointed at the owner.
    pub linked: usize,
    /// Foreign keys cleared.
    pub unlinked: usize,
    /// Target rows deleted.
    pub deleted: usize,
    pub junction_inserted: usize,
    pub junction_deleted: usize,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn merge(&mut self, other: SyncReport) {
        self.created += other.created;
        self.linked += other.linked;
        self.unlinked += other.unlinked;
        self.deleted += other.deleted;
        self.junction_inserted += other.junction_inserted;
        self.junction_deleted += other.junction_deleted;
    }
}

/// What `before_delete` saw for one relation.
#[derive(Debug, Clone)]
struct DeleteSnapshot {
    relation: RelationDescriptor,
    junction_rows: Vec<JunctionRow>,
    dependents: Vec<Value>,
}

#[derive(Debug)]
struct PendingDelete {
    owner_key: Value,
    snapshots: Vec<DeleteSnapshot>,
}

macro_rules! try_outcome {
    ($e:expr) => {
        match $e {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    };
}

/// Keeps an owner's relations in sync with submitted form data.
pub struct RelationManager {
    metadata: Arc<dyn RelationMetadata>,
    relations: Vec<String>,
    submitted: BTreeMap<String, RelationPayload>,
    pending: Vec<RelatedData>,
    pending_delete: Option<PendingDelete>,
}

impl std::fmt::Debug for RelationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationManager")
            .field("relations", &self.relations)
            .field("submitted", &self.submitted)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl RelationManager {
    /// Create a manager for the named relations.
    ///
    /// Every name must be declared in `metadata` and appear once.
    pub fn new<I, S>(metadata: Arc<dyn RelationMetadata>, relations: I) -> crudview_core::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        for name in relations {
            let name = name.into();
            if metadata.relation(&name).is_none() {
                return Err(Error::config(format!("relation '{name}' is not declared")));
            }
            if names.contains(&name) {
                return Err(Error::config(format!("relation '{name}' is configured twice")));
            }
            names.push(name);
        }
        Ok(Self {
            metadata,
            relations: names,
            submitted: BTreeMap::new(),
            pending: Vec::new(),
            pending_delete: None,
        })
    }

    /// Configured relation names, in configuration order.
    pub fn relations(&self) -> &[String] {
        &self.relations
    }

    pub fn can_set_property(&self, name: &str) -> bool {
        self.relations.iter().any(|r| r == name)
    }

    /// Record submitted data for `name`. Returns `false` (and stores nothing)
    /// when `name` is not a configured relation.
    pub fn set_relation_value(&mut self, name: &str, payload: RelationPayload) -> bool {
        if !self.can_set_property(name) {
            return false;
        }
        tracing::trace!(relation = name, items = payload.len(), "Relation value set");
        self.submitted.insert(name.to_string(), payload);
        true
    }

    /// Data submitted for `name` in the current cycle.
    pub fn relation_value(&self, name: &str) -> Option<&RelationPayload> {
        self.submitted.get(name)
    }

    /// Relation state prepared by the last `before_save`.
    pub fn related_data(&self) -> &[RelatedData] {
        &self.pending
    }

    fn descriptor(&self, name: &str) -> crudview_core::Result<RelationDescriptor> {
        self.metadata
            .relation(name)
            .cloned()
            .ok_or_else(|| Error::config(format!("relation '{name}' is not declared")))
    }

    /// Resolve submitted data into related entities and validate new ones.
    ///
    /// Never writes. On `Cancelled` the cycle state is discarded.
    #[tracing::instrument(level = "debug", skip(self, cx, store, owner), fields(owner = %owner.table()))]
    pub async fn before_save<S: RelationStore>(
        &mut self,
        cx: &Cx,
        store: &S,
        owner: &Record,
    ) -> Outcome<BeforeSave, Error> {
        self.pending.clear();
        let owner_key = owner.primary_key_value();
        let mut errors = ValidationError::new();

        for name in &self.relations {
            let Some(payload) = self.submitted.get(name) else {
                continue;
            };
            let descriptor = match self.descriptor(name) {
                Ok(d) => d,
                Err(e) => return Outcome::Err(e),
            };

            let mut data = RelatedData::new(name.as_str());
            data.set_data(payload.clone());
            try_outcome!(
                data.set_query_descriptor(
                    cx,
                    store,
                    QueryDescriptor::new(descriptor.clone(), owner_key.clone())
                )
                .await
            );

            if descriptor.kind == RelationKind::OneToOne && payload.len() > 1 {
                errors.add(
                    name.as_str(),
                    crudview_core::ValidationErrorKind::Custom,
                    "accepts a single related entity",
                );
                continue;
            }

            let existing = try_outcome!(load_existing(cx, store, &data, &descriptor).await);
            let rules = self.metadata.rules(&descriptor.target_table);

            for (index, item) in payload.items().iter().enumerate() {
                let candidate = match item {
                    PayloadItem::Key(key) => {
                        if let Some(found) = existing.iter().find(|r| r.primary_key_value().key_eq(key)) {
                            data.push_new_entity(found.clone());
                            continue;
                        }
                        let Some(attribute) = &descriptor.create_attribute else {
                            errors.add_unknown_key(name.as_str(), key);
                            continue;
                        };
                        Record::new(descriptor.target_table.as_str(), descriptor.target_key.as_str())
                            .with(attribute.as_str(), key.clone())
                    }
                    PayloadItem::Attributes(attributes) => {
                        let mut record = Record::new(
                            descriptor.target_table.as_str(),
                            descriptor.target_key.as_str(),
                        );
                        for (column, value) in attributes {
                            if column != &descriptor.target_key {
                                record.set(column.as_str(), value.clone());
                            }
                        }
                        record
                    }
                };
                if let Some(rules) = rules {
                    if let Err(invalid) = rules.validate(&candidate) {
                        errors.absorb(&format!("{name}[{index}]"), invalid);
                        continue;
                    }
                }
                data.push_new_entity(candidate);
            }

            tracing::debug!(
                relation = %name,
                old = data.old_entities().len(),
                new = data.new_entities().len(),
                "Prepared relation"
            );
            self.pending.push(data);
        }

        if errors.is_empty() {
            Outcome::Ok(BeforeSave::Proceed)
        } else {
            tracing::info!(errors = errors.errors.len(), "Relation validation failed");
            self.pending.clear();
            Outcome::Ok(BeforeSave::Cancelled(errors))
        }
    }

    /// Write associations for the relations prepared by `before_save`.
    ///
    /// `owner` must carry its key, i.e. it has been inserted or updated.
    #[tracing::instrument(level = "debug", skip(self, cx, store, owner), fields(owner = %owner.table()))]
    pub async fn after_save<S: RelationStore>(
        &mut self,
        cx: &Cx,
        store: &S,
        owner: &Record,
    ) -> Outcome<SyncReport, Error> {
        let owner_key = owner.primary_key_value().normalized_key();
        if owner_key.is_null() {
            return Outcome::Err(Error::Custom(format!(
                "cannot sync relations of an unsaved '{}' row",
                owner.table()
            )));
        }

        let mut report = SyncReport::default();
        for mut data in std::mem::take(&mut self.pending) {
            let Some(descriptor) = data.query_descriptor().map(|q| q.relation.clone()) else {
                continue;
            };
            data.bind_owner_key(owner_key.clone());
            let step = if descriptor.is_via_junction() {
                try_outcome!(sync_junction(cx, store, &mut data, &descriptor).await)
            } else {
                try_outcome!(sync_foreign_key(cx, store, &mut data, &descriptor, &owner_key).await)
            };
            tracing::debug!(relation = %descriptor.name, ?step, "Relation synced");
            report.merge(step);
        }
        self.submitted.clear();

        tracing::info!(
            owner = %owner_key,
            created = report.created,
            linked = report.linked,
            unlinked = report.unlinked,
            deleted = report.deleted,
            junction_inserted = report.junction_inserted,
            junction_deleted = report.junction_deleted,
            "Relations saved"
        );
        Outcome::Ok(report)
    }

    /// Snapshot what deleting `owner` will have to clean up.
    #[tracing::instrument(level = "debug", skip(self, cx, store, owner), fields(owner = %owner.table()))]
    pub async fn before_delete<S: RelationStore>(
        &mut self,
        cx: &Cx,
        store: &S,
        owner: &Record,
    ) -> Outcome<(), Error> {
        let owner_key = owner.primary_key_value().normalized_key();
        let mut snapshots = Vec::with_capacity(self.relations.len());
        if !owner_key.is_null() {
            for name in &self.relations {
                let relation = match self.descriptor(name) {
                    Ok(d) => d,
                    Err(e) => return Outcome::Err(e),
                };
                let mut snapshot = DeleteSnapshot {
                    relation,
                    junction_rows: Vec::new(),
                    dependents: Vec::new(),
                };
                if let Some(junction) = &snapshot.relation.junction {
                    let filter = Filter::eq(junction.owner_column.as_str(), owner_key.clone());
                    let rows = try_outcome!(store.select(cx, &junction.table, &filter).await);
                    snapshot.junction_rows = rows
                        .iter()
                        .filter_map(|row| JunctionRow::from_row(row, junction))
                        .collect();
                } else if let Some(fk) = &snapshot.relation.foreign_key {
                    let filter = Filter::eq(fk.as_str(), owner_key.clone());
                    let rows =
                        try_outcome!(store.select(cx, &snapshot.relation.target_table, &filter).await);
                    snapshot.dependents = rows
                        .iter()
                        .filter_map(|row| row.get_by_name(&snapshot.relation.target_key))
                        .map(Value::normalized_key)
                        .collect();
                }
                snapshots.push(snapshot);
            }
        }
        self.pending_delete = Some(PendingDelete {
            owner_key,
            snapshots,
        });
        Outcome::Ok(())
    }

    /// Remove junction rows and unlink or delete dependents of the deleted owner.
    #[tracing::instrument(level = "debug", skip(self, cx, store))]
    pub async fn after_delete<S: RelationStore>(
        &mut self,
        cx: &Cx,
        store: &S,
    ) -> Outcome<SyncReport, Error> {
        let Some(pending) = self.pending_delete.take() else {
            tracing::warn!("after_delete called without before_delete");
            return Outcome::Ok(SyncReport::default());
        };

        let mut report = SyncReport::default();
        for snapshot in &pending.snapshots {
            let relation = &snapshot.relation;
            if let Some(junction) = &relation.junction {
                let filter = Filter::eq(junction.owner_column.as_str(), pending.owner_key.clone());
                let removed = try_outcome!(store.delete(cx, &junction.table, &filter).await);
                tracing::debug!(
                    relation = %relation.name,
                    expected = snapshot.junction_rows.len(),
                    removed,
                    "Removed junction rows"
                );
                report.junction_deleted += count(removed);
            } else if let Some(fk) = &relation.foreign_key {
                if snapshot.dependents.is_empty() {
                    continue;
                }
                let filter = Filter::any_of(relation.target_key.as_str(), snapshot.dependents.clone());
                match relation.on_unlink {
                    UnlinkAction::Delete => {
                        let n = try_outcome!(store.delete(cx, &relation.target_table, &filter).await);
                        report.deleted += count(n);
                    }
                    UnlinkAction::Nullify => {
                        let n = try_outcome!(
                            store
                                .update(cx, &relation.target_table, &[(fk.clone(), Value::Null)], &filter)
                                .await
                        );
                        report.unlinked += count(n);
                    }
                }
            }
        }
        self.submitted.clear();
        tracing::info!(
            owner = %pending.owner_key,
            junction_deleted = report.junction_deleted,
            deleted = report.deleted,
            unlinked = report.unlinked,
            "Relations cleaned up after delete"
        );
        Outcome::Ok(report)
    }
}

fn count(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// Existing targets whose keys were submitted, read with one keyed select.
async fn load_existing<S: RelationStore>(
    cx: &Cx,
    store: &S,
    data: &RelatedData,
    descriptor: &RelationDescriptor,
) -> Outcome<Vec<Record>, Error> {
    let keys = data.lookup_keys();
    if keys.is_empty() {
        return Outcome::Ok(Vec::new());
    }
    let found = try_outcome!(data.count_existing_targets(cx, store).await);
    if found == 0 {
        return Outcome::Ok(Vec::new());
    }
    let filter = Filter::any_of(descriptor.target_key.as_str(), keys);
    let rows = try_outcome!(store.select(cx, &descriptor.target_table, &filter).await);
    Outcome::Ok(
        rows.iter()
            .map(|row| {
                Record::from_row(
                    descriptor.target_table.as_str(),
                    descriptor.target_key.as_str(),
                    row,
                )
            })
            .collect(),
    )
}

/// Insert every still-new entity and store its key back.
async fn insert_new_targets<S: RelationStore>(
    cx: &Cx,
    store: &S,
    data: &mut RelatedData,
    descriptor: &RelationDescriptor,
) -> Outcome<usize, Error> {
    let mut created = 0;
    for entity in data.new_entities_mut() {
        if !entity.is_new() {
            continue;
        }
        let key = try_outcome!(
            store
                .insert(cx, &descriptor.target_table, &descriptor.target_key, &entity.to_columns())
                .await
        );
        tracing::debug!(table = %descriptor.target_table, key = %key, "Created related row");
        entity.set_primary_key_value(key);
        created += 1;
    }
    Outcome::Ok(created)
}

async fn sync_foreign_key<S: RelationStore>(
    cx: &Cx,
    store: &S,
    data: &mut RelatedData,
    descriptor: &RelationDescriptor,
    owner_key: &Value,
) -> Outcome<SyncReport, Error> {
    let Some(fk) = descriptor.foreign_key.clone() else {
        return Outcome::Err(Error::config(format!(
            "relation '{}' has no foreign key column",
            descriptor.name
        )));
    };
    let mut report = SyncReport::default();

    for entity in data.new_entities_mut() {
        if entity.is_new() {
            entity.set(fk.as_str(), owner_key.clone());
        }
    }
    data.replace_existing_entities();
    report.created = try_outcome!(insert_new_targets(cx, store, data, descriptor).await);

    let to_link: Vec<Value> = data
        .new_entities()
        .iter()
        .filter(|e| !e.get(&fk).key_eq(owner_key))
        .map(Record::primary_key_value)
        .collect();
    if !to_link.is_empty() {
        let filter = Filter::any_of(descriptor.target_key.as_str(), to_link);
        let n = try_outcome!(
            store
                .update(cx, &descriptor.target_table, &[(fk.clone(), owner_key.clone())], &filter)
                .await
        );
        report.linked = count(n);
    }

    let dropped: Vec<Value> = data
        .old_entities()
        .iter()
        .filter(|old| !data.new_entities().iter().any(|new| new.same_row(old)))
        .map(Record::primary_key_value)
        .collect();
    if !dropped.is_empty() {
        let filter = Filter::any_of(descriptor.target_key.as_str(), dropped);
        match descriptor.on_unlink {
            UnlinkAction::Nullify => {
                let n = try_outcome!(
                    store
                        .update(cx, &descriptor.target_table, &[(fk, Value::Null)], &filter)
                        .await
                );
                report.unlinked = count(n);
            }
            UnlinkAction::Delete => {
                let n = try_outcome!(store.delete(cx, &descriptor.target_table, &filter).await);
                report.deleted = count(n);
            }
        }
    }
    Outcome::Ok(report)
}

async fn sync_junction<S: RelationStore>(
    cx: &Cx,
    store: &S,
    data: &mut RelatedData,
    descriptor: &RelationDescriptor,
) -> Outcome<SyncReport, Error> {
    let Some(junction) = descriptor.junction.clone() else {
        return Outcome::Err(Error::config(format!(
            "many-to-many relation '{}' has no junction table",
            descriptor.name
        )));
    };
    let mut report = SyncReport::default();

    try_outcome!(data.load_old_state(cx, store).await);
    data.replace_existing_entities();
    report.created = try_outcome!(insert_new_targets(cx, store, data, descriptor).await);

    let new_rows = data.build_new_junction_rows().to_vec();
    let ops = junction::diff(data.old_junction_rows(), &new_rows);
    let (linked, unlinked) =
        try_outcome!(junction::execute_link_ops(cx, store, &junction, &ops).await);
    report.junction_inserted = linked;
    report.junction_deleted = unlinked;
    Outcome::Ok(report)
}
