//! Relation metadata.
//!
//! A relation is declared once per owner table and looked up by name when a
//! form submits data for it. The descriptor carries everything needed to load
//! the related rows and to write the association back: target table and key,
//! the foreign-key column for one-to-many relations, or the junction table
//! for many-to-many relations.

use crate::error::{Error, Result};
use crate::validate::RuleSet;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The type of relationship between the owner and its targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// One-to-many: the target rows carry a foreign key to the owner.
    #[default]
    OneToMany,
    /// One-to-one: like one-to-many, but at most one target is linked.
    OneToOne,
    /// Many-to-many: owner and targets are linked through a junction table.
    ManyToMany,
}

/// What happens to a foreign-keyed target that is no longer linked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlinkAction {
    /// Clear the foreign key (the row survives).
    #[default]
    Nullify,
    /// Delete the target row (dependent relation).
    Delete,
}

/// Information about a junction table for many-to-many relations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JunctionInfo {
    /// The junction table name (e.g. `"post_tag"`).
    pub table: String,
    /// Column holding the owner's key (e.g. `"post_id"`).
    pub owner_column: String,
    /// Column holding the target's key (e.g. `"tag_id"`).
    pub target_column: String,
}

impl JunctionInfo {
    pub fn new(
        table: impl Into<String>,
        owner_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            owner_column: owner_column.into(),
            target_column: target_column.into(),
        }
    }
}

/// Metadata about one relation of an owner table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    /// Name of the relation attribute on the owner (e.g. `"tags"`).
    pub name: String,
    /// Table of the related entities.
    pub target_table: String,
    /// Primary-key column of the target table.
    #[serde(default = "default_key")]
    pub target_key: String,
    #[serde(default)]
    pub kind: RelationKind,
    /// Foreign-key column on the target table (one-to-many / one-to-one).
    #[serde(default)]
    pub foreign_key: Option<String>,
    /// Junction table (many-to-many).
    #[serde(default)]
    pub junction: Option<JunctionInfo>,
    /// Applied to unlinked foreign-keyed targets and to dependents on delete.
    #[serde(default)]
    pub on_unlink: UnlinkAction,
    /// Attribute populated when a submitted scalar matches no existing key.
    ///
    /// With `Some("name")`, submitting `"golang"` for a tag relation creates a
    /// new tag whose `name` is `"golang"`. Without it an unknown key fails
    /// validation.
    #[serde(default)]
    pub create_attribute: Option<String>,
}

fn default_key() -> String {
    "id".to_string()
}

impl RelationDescriptor {
    /// Create a new relation descriptor with defaults.
    pub fn new(name: impl Into<String>, target_table: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            name: name.into(),
            target_table: target_table.into(),
            target_key: default_key(),
            kind,
            foreign_key: None,
            junction: None,
            on_unlink: UnlinkAction::default(),
            create_attribute: None,
        }
    }

    /// One-to-many relation keyed by `foreign_key` on the target table.
    pub fn has_many(
        name: impl Into<String>,
        target_table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(name, target_table, RelationKind::OneToMany).foreign_key(foreign_key)
    }

    /// One-to-one relation keyed by `foreign_key` on the target table.
    pub fn has_one(
        name: impl Into<String>,
        target_table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(name, target_table, RelationKind::OneToOne).foreign_key(foreign_key)
    }

    /// Many-to-many relation through `junction`.
    pub fn many_to_many(
        name: impl Into<String>,
        target_table: impl Into<String>,
        junction: JunctionInfo,
    ) -> Self {
        Self::new(name, target_table, RelationKind::ManyToMany).junction(junction)
    }

    /// Set the target's primary-key column.
    #[must_use]
    pub fn target_key(mut self, column: impl Into<String>) -> Self {
        self.target_key = column.into();
        self
    }

    /// Set the foreign-key column on the target table.
    #[must_use]
    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    /// Set the junction table.
    #[must_use]
    pub fn junction(mut self, junction: JunctionInfo) -> Self {
        self.junction = Some(junction);
        self
    }

    /// Set the unlink behavior.
    #[must_use]
    pub fn on_unlink(mut self, action: UnlinkAction) -> Self {
        self.on_unlink = action;
        self
    }

    /// Allow free-text values to create targets through `attribute`.
    #[must_use]
    pub fn create_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.create_attribute = Some(attribute.into());
        self
    }

    /// Whether associations live in a junction table.
    pub fn is_via_junction(&self) -> bool {
        self.kind == RelationKind::ManyToMany
    }

    /// Check that the descriptor is internally consistent.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("relation name must not be empty"));
        }
        if self.target_table.is_empty() {
            return Err(Error::config(format!(
                "relation '{}' has no target table",
                self.name
            )));
        }
        match self.kind {
            RelationKind::ManyToMany => {
                let Some(junction) = &self.junction else {
                    return Err(Error::config(format!(
                        "many-to-many relation '{}' has no junction table",
                        self.name
                    )));
                };
                if junction.owner_column.is_empty() || junction.target_column.is_empty() {
                    return Err(Error::config(format!(
                        "junction table '{}' of relation '{}' needs both key columns",
                        junction.table, self.name
                    )));
                }
            }
            RelationKind::OneToMany | RelationKind::OneToOne => {
                if self.foreign_key.as_deref().is_none_or(str::is_empty) {
                    return Err(Error::config(format!(
                        "relation '{}' has no foreign key column",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A relation descriptor bound to one owner key.
///
/// This is what a relation loader executes: "targets of relation R for owner
/// K". The owner key is `Null` while the owner has not been inserted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub relation: RelationDescriptor,
    pub owner_key: Value,
}

impl QueryDescriptor {
    pub fn new(relation: RelationDescriptor, owner_key: Value) -> Self {
        Self {
            relation,
            owner_key,
        }
    }

    pub fn is_via_junction(&self) -> bool {
        self.relation.is_via_junction()
    }

    pub fn target_table(&self) -> &str {
        &self.relation.target_table
    }

    pub fn target_key(&self) -> &str {
        &self.relation.target_key
    }

    /// Whether the owner exists yet (and so may have persisted targets).
    pub fn has_owner_key(&self) -> bool {
        !self.owner_key.is_null()
    }
}

/// Provider of relation metadata for an owner table.
pub trait RelationMetadata: Send + Sync {
    /// Look up a relation by name.
    fn relation(&self, name: &str) -> Option<&RelationDescriptor>;

    /// Validation rules for entities of `table`, if any are declared.
    fn rules(&self, _table: &str) -> Option<&RuleSet> {
        None
    }
}

/// Name-indexed relation metadata plus per-table validation rules.
#[derive(Debug, Clone, Default)]
pub struct RelationRegistry {
    relations: BTreeMap<String, RelationDescriptor>,
    rules: BTreeMap<String, RuleSet>,
}

impl RelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a relation, rejecting duplicates and inconsistent descriptors.
    pub fn register(&mut self, descriptor: RelationDescriptor) -> Result<()> {
        descriptor.validate()?;
        if self.relations.contains_key(&descriptor.name) {
            return Err(Error::config(format!(
                "relation '{}' is declared twice",
                descriptor.name
            )));
        }
        tracing::debug!(
            relation = %descriptor.name,
            target = %descriptor.target_table,
            kind = ?descriptor.kind,
            "Registered relation"
        );
        self.relations.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Builder-style registration.
    pub fn with_relation(mut self, descriptor: RelationDescriptor) -> Result<Self> {
        self.register(descriptor)?;
        Ok(self)
    }

    /// Attach validation rules to a target table.
    pub fn set_rules(&mut self, table: impl Into<String>, rules: RuleSet) {
        self.rules.insert(table.into(), rules);
    }

    #[must_use]
    pub fn with_rules(mut self, table: impl Into<String>, rules: RuleSet) -> Self {
        self.set_rules(table, rules);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

impl RelationMetadata for RelationRegistry {
    fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.get(name)
    }

    fn rules(&self, table: &str) -> Option<&RuleSet> {
        self.rules.get(table)
    }
}
