//! Input kinds derived from validation rules.

use crudview_core::{FieldRule, RuleSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a form should collect an attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Email,
    Number,
    File,
    Image,
    #[default]
    String,
}

impl FieldKind {
    fn from_rule(rule: &FieldRule) -> Option<Self> {
        match rule {
            FieldRule::Email => Some(FieldKind::Email),
            FieldRule::Number => Some(FieldKind::Number),
            FieldRule::File(_) => Some(FieldKind::File),
            FieldRule::Image => Some(FieldKind::Image),
            _ => None,
        }
    }
}

/// Map every attribute to its input kind.
///
/// Attributes with an email, number, file or image rule get that kind (a
/// later rule overrides an earlier one). Every other attribute in
/// `attributes` is a plain string field.
pub fn field_kinds<'a>(
    rules: Option<&RuleSet>,
    attributes: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, FieldKind> {
    let mut kinds = BTreeMap::new();
    if let Some(rules) = rules {
        for attribute in rules.attributes() {
            for rule in rules.rules_for(attribute) {
                if let Some(kind) = FieldKind::from_rule(rule) {
                    kinds.insert(attribute.to_string(), kind);
                }
            }
        }
    }
    for attribute in attributes {
        kinds.entry(attribute.to_string()).or_insert(FieldKind::String);
    }
    kinds
}
