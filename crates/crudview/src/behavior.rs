//! Owner-side integration of relation synchronization.

use crate::config::BehaviorConfig;
use crate::fields::{self, FieldKind};
use crudview_core::{
    Cx, Error, Filter, Outcome, Record, RelationMetadata, RelationRegistry, RelationStore, Result,
    Value,
};
use crudview_relations::{
    AutocompleteService, BeforeSave, Hint, HintQuery, RelationManager, RelationPayload, SyncReport,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Wires an owner record's save and delete to its relations.
///
/// Relation attributes assigned through [`set_property`](Self::set_property)
/// are held until [`save`](Self::save), which writes the owner and its
/// associations in one transaction.
///
/// # Example
///
/// ```rust,ignore
/// let mut post = CrudViewBehavior::attach(Record::new("posts", "id"), &config, registry)?;
/// post.set_property("title", &json!("Hello"))?;
/// post.set_property("tags", &json!([2, 3, "golang"]))?;
/// let report = post.save(&cx, &store).await;
/// ```
#[derive(Debug)]
pub struct CrudViewBehavior {
    owner: Record,
    metadata: Arc<RelationRegistry>,
    manager: RelationManager,
    autocomplete: AutocompleteService,
    hint_limit: usize,
}

impl CrudViewBehavior {
    /// Attach to `owner`, managing the relations named in `config`.
    ///
    /// Inline definitions of `config` are added to `registry`; every managed
    /// relation must then resolve.
    pub fn attach(owner: Record, config: &BehaviorConfig, registry: RelationRegistry) -> Result<Self> {
        let metadata = Arc::new(config.apply(registry)?);
        let shared: Arc<dyn RelationMetadata> = Arc::clone(&metadata) as Arc<dyn RelationMetadata>;
        let manager = RelationManager::new(Arc::clone(&shared), config.relation_names())?;
        tracing::debug!(
            owner = %owner.table(),
            relations = manager.relations().len(),
            "Attached behavior"
        );
        Ok(Self {
            owner,
            metadata,
            manager,
            autocomplete: AutocompleteService::new(shared),
            hint_limit: config.hint_limit,
        })
    }

    pub fn owner(&self) -> &Record {
        &self.owner
    }

    pub fn owner_mut(&mut self) -> &mut Record {
        &mut self.owner
    }

    pub fn into_owner(self) -> Record {
        self.owner
    }

    pub fn manager(&self) -> &RelationManager {
        &self.manager
    }

    /// Relation attributes and the owner's own attributes are settable.
    pub fn can_set_property(&self, name: &str) -> bool {
        self.manager.can_set_property(name) || (!name.is_empty() && name != self.owner.primary_key())
    }

    /// Assign a submitted value: relation attributes go to the relation
    /// manager, everything else to the owner record.
    pub fn set_property(&mut self, name: &str, value: &serde_json::Value) -> Result<()> {
        if self.manager.can_set_property(name) {
            let payload = RelationPayload::from_json(name, value)?;
            self.manager.set_relation_value(name, payload);
            return Ok(());
        }
        if !self.can_set_property(name) {
            return Err(Error::Custom(format!(
                "property '{name}' of '{}' cannot be set",
                self.owner.table()
            )));
        }
        self.owner.set(name, Value::from_json(value));
        Ok(())
    }

    /// Read back a property as JSON.
    pub fn property(&self, name: &str) -> Option<serde_json::Value> {
        if let Some(payload) = self.manager.relation_value(name) {
            return Some(payload.to_json());
        }
        self.owner.has(name).then(|| self.owner.get(name).to_json())
    }

    /// Input kind of every owner attribute.
    pub fn field_kinds(&self) -> BTreeMap<String, FieldKind> {
        fields::field_kinds(
            self.metadata.rules(self.owner.table()),
            self.owner.attributes().keys().map(String::as_str),
        )
    }

    /// Insert or update the owner and sync its relations in one transaction.
    ///
    /// A failed relation validation rolls back and returns
    /// [`Error::Validation`]; any other failure rolls back and returns the
    /// failure. The owner record is restored on failure.
    #[tracing::instrument(level = "debug", skip(self, cx, store), fields(owner = %self.owner.table()))]
    pub async fn save<S: RelationStore>(&mut self, cx: &Cx, store: &S) -> Outcome<SyncReport, Error> {
        match store.begin(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        let original = self.owner.clone();
        let outcome = self.save_in_transaction(cx, store).await;
        if !matches!(outcome, Outcome::Ok(_)) {
            self.owner = original;
        }
        finish(cx, store, outcome).await
    }

    async fn save_in_transaction<S: RelationStore>(
        &mut self,
        cx: &Cx,
        store: &S,
    ) -> Outcome<SyncReport, Error> {
        match self.manager.before_save(cx, store, &self.owner).await {
            Outcome::Ok(BeforeSave::Proceed) => {}
            Outcome::Ok(BeforeSave::Cancelled(errors)) => {
                return Outcome::Err(Error::Validation(errors));
            }
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        let table = self.owner.table().to_string();
        let key_column = self.owner.primary_key().to_string();
        if self.owner.is_new() {
            let key = match store
                .insert(cx, &table, &key_column, &self.owner.to_columns())
                .await
            {
                Outcome::Ok(key) => key,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            tracing::debug!(table = %table, key = %key, "Inserted owner");
            self.owner.set_primary_key_value(key);
        } else {
            let assignments: Vec<(String, Value)> = self
                .owner
                .to_columns()
                .into_iter()
                .filter(|(column, _)| *column != key_column)
                .collect();
            let filter = Filter::eq(
                key_column.as_str(),
                self.owner.primary_key_value().normalized_key(),
            );
            match store.update(cx, &table, &assignments, &filter).await {
                Outcome::Ok(n) => tracing::debug!(table = %table, updated = n, "Updated owner"),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        self.manager.after_save(cx, store, &self.owner).await
    }

    /// Delete the owner and clean up its associations in one transaction.
    #[tracing::instrument(level = "debug", skip(self, cx, store), fields(owner = %self.owner.table()))]
    pub async fn delete<S: RelationStore>(&mut self, cx: &Cx, store: &S) -> Outcome<SyncReport, Error> {
        if self.owner.is_new() {
            return Outcome::Err(Error::Custom(format!(
                "cannot delete an unsaved '{}' row",
                self.owner.table()
            )));
        }
        match store.begin(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        let outcome = self.delete_in_transaction(cx, store).await;
        finish(cx, store, outcome).await
    }

    async fn delete_in_transaction<S: RelationStore>(
        &mut self,
        cx: &Cx,
        store: &S,
    ) -> Outcome<SyncReport, Error> {
        match self.manager.before_delete(cx, store, &self.owner).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        let filter = Filter::eq(
            self.owner.primary_key(),
            self.owner.primary_key_value().normalized_key(),
        );
        match store.delete(cx, self.owner.table(), &filter).await {
            Outcome::Ok(n) => tracing::debug!(table = %self.owner.table(), deleted = n, "Deleted owner"),
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        self.manager.after_delete(cx, store).await
    }

    /// Autocomplete hints for one of the owner's relations.
    ///
    /// A `limit` of `None` uses the configured default.
    #[allow(clippy::too_many_arguments)]
    pub async fn hints<S: RelationStore>(
        &self,
        cx: &Cx,
        store: &S,
        relation: &str,
        key_attribute: &str,
        label_attribute: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Outcome<Vec<Hint>, Error> {
        let query = HintQuery::new(relation, key_attribute, label_attribute, query)
            .limit(limit.unwrap_or(self.hint_limit));
        self.autocomplete.hints(cx, store, &query).await
    }
}

/// Commit on success, roll back otherwise.
///
/// A failed commit is followed by a rollback so the store is left without an
/// open transaction.
async fn finish<S: RelationStore>(
    cx: &Cx,
    store: &S,
    outcome: Outcome<SyncReport, Error>,
) -> Outcome<SyncReport, Error> {
    let outcome = match outcome {
        Outcome::Ok(report) => match store.commit(cx).await {
            Outcome::Ok(()) => return Outcome::Ok(report),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        },
        other => other,
    };
    tracing::warn!(outcome = ?outcome, "Rolling back");
    if let Outcome::Err(e) = store.rollback(cx).await {
        tracing::warn!(error = %e, "Rollback failed");
    }
    outcome
}
