//! Core types and traits for crudview.
//!
//! This crate provides the foundations shared by the stores and the relation
//! synchronizer:
//!
//! - `Value`, `Row` and `Record` for dynamically typed entities
//! - `RelationDescriptor` / `RelationRegistry` for relation metadata
//! - `RuleSet` for validating entities created from submitted attributes
//! - `RelationStore` and `Connection` traits for persistence
//! - `Outcome` and `Cx` re-exported from asupersync

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod error;
pub mod record;
pub mod relation;
pub mod row;
pub mod store;
pub mod validate;
pub mod value;

pub use connection::Connection;
pub use error::{
    ConfigError, Error, FieldValidationError, IntegrityError, IntegrityErrorKind, QueryError,
    Result, TransactionError, TransactionErrorKind, TypeError, ValidationError,
    ValidationErrorKind,
};
pub use record::Record;
pub use relation::{
    JunctionInfo, QueryDescriptor, RelationDescriptor, RelationKind, RelationMetadata,
    RelationRegistry, UnlinkAction,
};
pub use row::{ColumnInfo, Row};
pub use store::{Condition, Filter, RelationStore};
pub use validate::{FieldRule, IMAGE_EXTENSIONS, RuleSet};
pub use value::Value;
