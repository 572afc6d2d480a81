//! Per-relation state for one save or delete cycle.

use crate::junction::JunctionRow;
use crate::payload::RelationPayload;
use crudview_core::{
    Cx, Error, Filter, JunctionInfo, Outcome, QueryDescriptor, Record, RelationStore, Value,
};

/// State of one relation while its owner is being saved.
///
/// Holds the submitted payload, the related entities as currently persisted
/// (`old_entities`) and the entities that should be related once the save
/// completes (`new_entities`). Many-to-many relations additionally track the
/// junction rows before and after reconciliation.
#[derive(Debug, Clone)]
pub struct RelatedData {
    attribute: String,
    data: RelationPayload,
    query: Option<QueryDescriptor>,
    old_entities: Vec<Record>,
    new_entities: Vec<Record>,
    old_junction_rows: Vec<JunctionRow>,
    new_junction_rows: Vec<JunctionRow>,
    old_state_loaded: bool,
}

impl RelatedData {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            data: RelationPayload::default(),
            query: None,
            old_entities: Vec::new(),
            new_entities: Vec::new(),
            old_junction_rows: Vec::new(),
            new_junction_rows: Vec::new(),
            old_state_loaded: false,
        }
    }

    /// Name of the relation attribute.
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn data(&self) -> &RelationPayload {
        &self.data
    }

    pub fn set_data(&mut self, data: RelationPayload) {
        self.data = data;
    }

    pub fn query_descriptor(&self) -> Option<&QueryDescriptor> {
        self.query.as_ref()
    }

    pub fn junction(&self) -> Option<&JunctionInfo> {
        self.query.as_ref().and_then(|q| q.relation.junction.as_ref())
    }

    pub fn junction_table(&self) -> Option<&str> {
        self.junction().map(|j| j.table.as_str())
    }

    /// Column of the junction table holding target keys.
    pub fn junction_column(&self) -> Option<&str> {
        self.junction().map(|j| j.target_column.as_str())
    }

    fn descriptor(&self) -> Result<&QueryDescriptor, Error> {
        self.query.as_ref().ok_or_else(|| {
            Error::config(format!(
                "relation '{}' has no query descriptor",
                self.attribute
            ))
        })
    }

    /// Attach the loader description.
    ///
    /// For foreign-key relations the currently related rows are loaded right
    /// away; junction relations wait for [`load_old_state`](Self::load_old_state).
    /// Nothing is read while the owner has no key.
    #[tracing::instrument(level = "debug", skip(self, cx, store, descriptor), fields(relation = %self.attribute))]
    pub async fn set_query_descriptor<S: RelationStore>(
        &mut self,
        cx: &Cx,
        store: &S,
        descriptor: QueryDescriptor,
    ) -> Outcome<(), Error> {
        let load = (!descriptor.is_via_junction() && descriptor.has_owner_key())
            .then(|| {
                descriptor.relation.foreign_key.as_ref().map(|fk| {
                    Filter::eq(fk.as_str(), descriptor.owner_key.normalized_key())
                        .order_by(descriptor.target_key())
                })
            })
            .flatten();
        let table = descriptor.target_table().to_string();
        let key = descriptor.target_key().to_string();
        self.query = Some(descriptor);

        if let Some(filter) = load {
            let rows = match store.select(cx, &table, &filter).await {
                Outcome::Ok(rows) => rows,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            tracing::debug!(count = rows.len(), "Loaded related rows");
            self.old_entities = rows
                .iter()
                .map(|row| Record::from_row(table.as_str(), key.as_str(), row))
                .collect();
        }
        Outcome::Ok(())
    }

    /// Point the descriptor at the owner's key once it is known.
    pub fn bind_owner_key(&mut self, owner_key: Value) {
        if let Some(query) = &mut self.query {
            query.owner_key = owner_key;
        }
    }

    /// Load the junction rows and matching targets of a many-to-many relation.
    ///
    /// Runs once per cycle; later calls do nothing.
    #[tracing::instrument(level = "debug", skip(self, cx, store), fields(relation = %self.attribute))]
    pub async fn load_old_state<S: RelationStore>(
        &mut self,
        cx: &Cx,
        store: &S,
    ) -> Outcome<(), Error> {
        if self.old_state_loaded {
            return Outcome::Ok(());
        }
        let query = match self.descriptor() {
            Ok(query) => query.clone(),
            Err(e) => return Outcome::Err(e),
        };
        let Some(junction) = query.relation.junction.clone() else {
            self.old_state_loaded = true;
            return Outcome::Ok(());
        };
        if query.has_owner_key() {
            let filter =
                Filter::eq(junction.owner_column.as_str(), query.owner_key.normalized_key());
            let rows = match store.select(cx, &junction.table, &filter).await {
                Outcome::Ok(rows) => rows,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            self.old_junction_rows = rows
                .iter()
                .filter_map(|row| JunctionRow::from_row(row, &junction))
                .collect();

            let targets: Vec<Value> = self
                .old_junction_rows
                .iter()
                .map(|row| row.target.clone())
                .collect();
            if !targets.is_empty() {
                let filter = Filter::any_of(query.target_key(), targets)
                    .order_by(query.target_key());
                let rows = match store.select(cx, query.target_table(), &filter).await {
                    Outcome::Ok(rows) => rows,
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                };
                self.old_entities = rows
                    .iter()
                    .map(|row| Record::from_row(query.target_table(), query.target_key(), row))
                    .collect();
            }
            tracing::debug!(
                junction_rows = self.old_junction_rows.len(),
                targets = self.old_entities.len(),
                "Loaded junction state"
            );
        }
        self.old_state_loaded = true;
        Outcome::Ok(())
    }

    pub fn old_entities(&self) -> &[Record] {
        &self.old_entities
    }

    pub fn new_entities(&self) -> &[Record] {
        &self.new_entities
    }

    pub(crate) fn new_entities_mut(&mut self) -> &mut [Record] {
        &mut self.new_entities
    }

    pub fn set_new_entities(&mut self, entities: Vec<Record>) {
        self.new_entities = entities;
    }

    pub fn push_new_entity(&mut self, entity: Record) {
        self.new_entities.push(entity);
    }

    pub fn old_junction_rows(&self) -> &[JunctionRow] {
        &self.old_junction_rows
    }

    pub fn new_junction_rows(&self) -> &[JunctionRow] {
        &self.new_junction_rows
    }

    /// Submitted identifiers that may name an existing target row.
    ///
    /// When the relation creates targets from free text, only integer keys
    /// are looked up; any other text is always a new target.
    pub fn lookup_keys(&self) -> Vec<Value> {
        let creates = self
            .query
            .as_ref()
            .is_some_and(|q| q.relation.create_attribute.is_some());
        let mut keys = self.data.key_values();
        if creates {
            keys.retain(|key| matches!(key, Value::BigInt(_)));
        }
        keys
    }

    /// Number of target rows whose key is among the submitted identifiers.
    pub async fn count_existing_targets<S: RelationStore>(
        &self,
        cx: &Cx,
        store: &S,
    ) -> Outcome<u64, Error> {
        let query = match self.descriptor() {
            Ok(query) => query,
            Err(e) => return Outcome::Err(e),
        };
        let keys = self.lookup_keys();
        if keys.is_empty() {
            return Outcome::Ok(0);
        }
        store
            .count(cx, query.target_table(), &Filter::any_of(query.target_key(), keys))
            .await
    }

    /// Swap each new entity for an old one with the same non-key attributes,
    /// then drop repeated references to one entity.
    ///
    /// The first matching old entity wins.
    pub fn replace_existing_entities(&mut self) {
        for entity in &mut self.new_entities {
            if !entity.is_new() {
                continue;
            }
            if let Some(old) = self.old_entities.iter().find(|old| old.same_attributes(entity)) {
                *entity = old.clone();
            }
        }

        let mut kept: Vec<Record> = Vec::with_capacity(self.new_entities.len());
        for entity in self.new_entities.drain(..) {
            let duplicate = kept.iter().any(|seen| {
                if entity.is_new() {
                    seen.is_new() && seen.same_attributes(&entity)
                } else {
                    seen.same_row(&entity)
                }
            });
            if !duplicate {
                kept.push(entity);
            }
        }
        self.new_entities = kept;
    }

    /// One junction row per persisted new entity, without duplicates.
    pub fn build_new_junction_rows(&mut self) -> &[JunctionRow] {
        let owner_key = self
            .query
            .as_ref()
            .map_or(Value::Null, |q| q.owner_key.clone());
        let mut rows: Vec<JunctionRow> = Vec::with_capacity(self.new_entities.len());
        if !owner_key.is_null() {
            for entity in &self.new_entities {
                let key = entity.primary_key_value();
                if key.is_null() {
                    continue;
                }
                let row = JunctionRow::new(owner_key.clone(), key);
                if !rows.contains(&row) {
                    rows.push(row);
                }
            }
        }
        self.new_junction_rows = rows;
        &self.new_junction_rows
    }
}
