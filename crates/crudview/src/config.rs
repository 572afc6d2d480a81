//! Behavior configuration.
//!
//! A [`BehaviorConfig`] names the relations a behavior manages and may
//! declare them inline, together with validation rules for their target
//! tables. It deserializes from JSON:
//!
//! ```json
//! {
//!   "relations": ["tags"],
//!   "definitions": {
//!     "tags": {
//!       "target_table": "tags",
//!       "kind": "many_to_many",
//!       "junction": {"table": "post_tag", "owner_column": "post_id", "target_column": "tag_id"},
//!       "create_attribute": "name"
//!     }
//!   },
//!   "rules": {"tags": [{"rule": "required", "attribute": "name"}]}
//! }
//! ```

use crudview_core::{
    Error, FieldRule, JunctionInfo, RelationDescriptor, RelationKind, RelationRegistry, Result,
    RuleSet, UnlinkAction,
};
use crudview_relations::DEFAULT_HINT_LIMIT;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One relation declared in configuration; the map key is its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationConfig {
    pub target_table: String,
    #[serde(default = "default_key")]
    pub target_key: String,
    #[serde(default)]
    pub kind: RelationKind,
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub junction: Option<JunctionInfo>,
    #[serde(default)]
    pub on_unlink: UnlinkAction,
    #[serde(default)]
    pub create_attribute: Option<String>,
}

fn default_key() -> String {
    "id".to_string()
}

impl RelationConfig {
    pub fn to_descriptor(&self, name: &str) -> RelationDescriptor {
        RelationDescriptor {
            name: name.to_string(),
            target_table: self.target_table.clone(),
            target_key: self.target_key.clone(),
            kind: self.kind,
            foreign_key: self.foreign_key.clone(),
            junction: self.junction.clone(),
            on_unlink: self.on_unlink,
            create_attribute: self.create_attribute.clone(),
        }
    }
}

/// A validation rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RuleConfig {
    Required { attribute: String },
    MinLength { attribute: String, min: usize },
    MaxLength { attribute: String, max: usize },
    Pattern { attribute: String, pattern: String },
    Email { attribute: String },
    Number { attribute: String },
    File {
        attribute: String,
        #[serde(default)]
        extensions: Vec<String>,
    },
    Image { attribute: String },
}

impl RuleConfig {
    pub fn to_rule(&self) -> Result<(String, FieldRule)> {
        Ok(match self {
            RuleConfig::Required { attribute } => (attribute.clone(), FieldRule::Required),
            RuleConfig::MinLength { attribute, min } => {
                (attribute.clone(), FieldRule::MinLength(*min))
            }
            RuleConfig::MaxLength { attribute, max } => {
                (attribute.clone(), FieldRule::MaxLength(*max))
            }
            RuleConfig::Pattern { attribute, pattern } => {
                (attribute.clone(), FieldRule::pattern(pattern)?)
            }
            RuleConfig::Email { attribute } => (attribute.clone(), FieldRule::Email),
            RuleConfig::Number { attribute } => (attribute.clone(), FieldRule::Number),
            RuleConfig::File {
                attribute,
                extensions,
            } => (attribute.clone(), FieldRule::File(extensions.clone())),
            RuleConfig::Image { attribute } => (attribute.clone(), FieldRule::Image),
        })
    }
}

/// Configuration of a [`CrudViewBehavior`](crate::CrudViewBehavior).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Relations to manage, in sync order. Empty means every inline definition.
    pub relations: Vec<String>,
    /// Relations declared here instead of in the registry.
    pub definitions: BTreeMap<String, RelationConfig>,
    /// Validation rules per target table.
    pub rules: BTreeMap<String, Vec<RuleConfig>>,
    /// Default number of autocomplete hints.
    pub hint_limit: usize,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            relations: Vec::new(),
            definitions: BTreeMap::new(),
            rules: BTreeMap::new(),
            hint_limit: DEFAULT_HINT_LIMIT,
        }
    }
}

impl BehaviorConfig {
    /// Manage the named relations of an existing registry.
    pub fn with_relations<I, S>(relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            relations: relations.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("invalid behavior config: {e}")))
    }

    /// Names of the managed relations.
    pub fn relation_names(&self) -> Vec<String> {
        if self.relations.is_empty() {
            self.definitions.keys().cloned().collect()
        } else {
            self.relations.clone()
        }
    }

    /// Add the inline definitions and rules to `registry`.
    pub fn apply(&self, mut registry: RelationRegistry) -> Result<RelationRegistry> {
        for (name, relation) in &self.definitions {
            registry.register(relation.to_descriptor(name))?;
        }
        for (table, rules) in &self.rules {
            let mut set = RuleSet::new();
            for rule in rules {
                let (attribute, rule) = rule.to_rule()?;
                set.push(attribute, rule);
            }
            registry.set_rules(table.as_str(), set);
        }
        Ok(registry)
    }
}
