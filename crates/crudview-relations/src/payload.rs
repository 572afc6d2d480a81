//! Submitted relation data.
//!
//! A form submits one of three shapes for a relation attribute: a single
//! identifier, a list of identifiers, or a list of attribute maps describing
//! entities to create inline. Lists may mix identifiers and maps.

use crudview_core::{Error, Result, TypeError, Value};
use std::collections::BTreeMap;

/// One element of a submitted relation value.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadItem {
    /// Identifier of an existing target, or free text for a new one.
    Key(Value),
    /// Attributes of a target to create.
    Attributes(BTreeMap<String, Value>),
}

impl PayloadItem {
    fn from_json(relation: &str, json: &serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Object(map) => Ok(PayloadItem::Attributes(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            )),
            serde_json::Value::Array(_) => Err(Error::Type(TypeError {
                expected: "identifier or attribute map",
                actual: "nested array".to_string(),
                column: Some(relation.to_string()),
            })),
            scalar => Ok(PayloadItem::Key(Value::from_json(scalar))),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            PayloadItem::Key(value) => value.to_json(),
            PayloadItem::Attributes(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

/// The raw value submitted for one relation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationPayload {
    items: Vec<PayloadItem>,
}

impl RelationPayload {
    pub fn new(items: Vec<PayloadItem>) -> Self {
        Self { items }
    }

    /// Payload of plain identifiers.
    pub fn keys<I, V>(keys: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::new(
            keys.into_iter()
                .map(|k| PayloadItem::Key(k.into()))
                .collect(),
        )
    }

    /// Parse a submitted JSON value.
    ///
    /// `null`, an empty string and an empty list all clear the relation.
    pub fn from_json(relation: &str, json: &serde_json::Value) -> Result<Self> {
        let items = match json {
            serde_json::Value::Null => Vec::new(),
            serde_json::Value::String(s) if s.trim().is_empty() => Vec::new(),
            serde_json::Value::Array(list) => list
                .iter()
                .filter(|v| !is_blank(v))
                .map(|v| PayloadItem::from_json(relation, v))
                .collect::<Result<_>>()?,
            other => vec![PayloadItem::from_json(relation, other)?],
        };
        Ok(Self { items })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.items.iter().map(PayloadItem::to_json).collect())
    }

    pub fn items(&self) -> &[PayloadItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Submitted identifiers, normalized and without duplicates.
    pub fn key_values(&self) -> Vec<Value> {
        let mut keys: Vec<Value> = Vec::new();
        for item in &self.items {
            if let PayloadItem::Key(value) = item {
                let key = value.normalized_key();
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }
}

fn is_blank(json: &serde_json::Value) -> bool {
    match json {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
