//! Lookup of related entities for autocomplete widgets.

use crudview_core::{Condition, Cx, Error, Filter, Outcome, RelationMetadata, RelationStore, Value};
use std::sync::Arc;

/// Default number of hints returned.
pub const DEFAULT_HINT_LIMIT: usize = 10;

/// One autocomplete suggestion.
#[derive(Debug, Clone, PartialEq)]
pub struct Hint {
    pub key: Value,
    pub label: String,
}

impl Hint {
    /// The `{"id": .., "text": ..}` shape widgets consume.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.key.to_json(),
            "text": self.label,
        })
    }
}

/// Parameters of a hint lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintQuery {
    pub relation: String,
    pub key_attribute: String,
    pub label_attribute: String,
    pub query: String,
    pub limit: usize,
}

impl HintQuery {
    pub fn new(
        relation: impl Into<String>,
        key_attribute: impl Into<String>,
        label_attribute: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            relation: relation.into(),
            key_attribute: key_attribute.into(),
            label_attribute: label_attribute.into(),
            query: query.into(),
            limit: DEFAULT_HINT_LIMIT,
        }
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Read-only lookup of a relation's targets by label.
pub struct AutocompleteService {
    metadata: Arc<dyn RelationMetadata>,
}

impl std::fmt::Debug for AutocompleteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutocompleteService").finish_non_exhaustive()
    }
}

impl AutocompleteService {
    pub fn new(metadata: Arc<dyn RelationMetadata>) -> Self {
        Self { metadata }
    }

    /// Targets whose label contains `query.query`, ignoring case.
    ///
    /// Labels starting with the query come first, then alphabetical order.
    #[tracing::instrument(level = "debug", skip(self, cx, store))]
    pub async fn hints<S: RelationStore>(
        &self,
        cx: &Cx,
        store: &S,
        query: &HintQuery,
    ) -> Outcome<Vec<Hint>, Error> {
        let Some(relation) = self.metadata.relation(&query.relation) else {
            return Outcome::Err(Error::config(format!(
                "relation '{}' is not declared",
                query.relation
            )));
        };
        if query.limit == 0 {
            return Outcome::Ok(Vec::new());
        }

        let needle = query.query.trim().to_lowercase();
        let mut filter = Filter::all();
        if !needle.is_empty() {
            filter = filter.and(Condition::ContainsIgnoreCase(
                query.label_attribute.clone(),
                needle.clone(),
            ));
        }
        let rows = match store.select(cx, &relation.target_table, &filter).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut hints: Vec<Hint> = rows
            .iter()
            .filter_map(|row| {
                let key = row.get_by_name(&query.key_attribute)?;
                let label = row.get_by_name(&query.label_attribute)?;
                if label.is_null() {
                    return None;
                }
                Some(Hint {
                    key: key.clone(),
                    label: label.to_string(),
                })
            })
            .collect();
        hints.sort_by_cached_key(|hint| {
            let label = hint.label.to_lowercase();
            (!label.starts_with(&needle), label)
        });
        hints.truncate(query.limit);

        tracing::debug!(relation = %query.relation, count = hints.len(), "Autocomplete hints");
        Outcome::Ok(hints)
    }
}
