//! Dynamic entity records.
//!
//! An administration add-on works on whatever tables the application
//! declares, so entities are held as attribute maps instead of concrete
//! structs. Owner entities and related entities use the same type.

use crate::row::Row;
use crate::value::Value;
use std::collections::BTreeMap;

/// A persisted (or about to be persisted) entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    table: String,
    primary_key: String,
    attributes: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record for `table` keyed by `primary_key`.
    pub fn new(table: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: primary_key.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute assignment.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Build a record from a result row.
    pub fn from_row(table: impl Into<String>, primary_key: impl Into<String>, row: &Row) -> Self {
        let attributes = row
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        Self {
            table: table.into(),
            primary_key: primary_key.into(),
            attributes,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Name of the primary-key column.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Current primary-key value (`Null` while unsaved).
    pub fn primary_key_value(&self) -> Value {
        self.get(&self.primary_key)
    }

    /// A record is new until it carries a non-null primary key.
    pub fn is_new(&self) -> bool {
        self.primary_key_value().is_null()
    }

    pub fn set_primary_key_value(&mut self, value: Value) {
        self.attributes.insert(self.primary_key.clone(), value);
    }

    /// Read an attribute; absent attributes read as `Null`.
    pub fn get(&self, name: &str) -> Value {
        self.attributes.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Column/value pairs in column order, skipping a null primary key so the
    /// store can generate one.
    pub fn to_columns(&self) -> Vec<(String, Value)> {
        self.attributes
            .iter()
            .filter(|(name, value)| !(name.as_str() == self.primary_key && value.is_null()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Compare non-key attributes.
    ///
    /// An attribute missing on one side counts as `Null`, matching how a
    /// freshly loaded row reports every column.
    pub fn same_attributes(&self, other: &Record) -> bool {
        let own_key = self.primary_key.as_str();
        let other_key = other.primary_key.as_str();
        let names = self
            .attributes
            .keys()
            .filter(|name| name.as_str() != own_key)
            .chain(
                other
                    .attributes
                    .keys()
                    .filter(|name| name.as_str() != other_key),
            );
        for name in names {
            if self.get(name) != other.get(name) {
                return false;
            }
        }
        true
    }

    /// True when both records denote the same persisted row.
    pub fn same_row(&self, other: &Record) -> bool {
        self.table == other.table && self.primary_key_value().key_eq(&other.primary_key_value())
    }
}
