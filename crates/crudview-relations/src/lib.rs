//! Relation synchronization for crudview.
//!
//! `crudview-relations` reconciles an owner's declared relations with the
//! data a form submitted for them:
//!
//! - [`RelationPayload`]: the submitted identifiers and inline attribute maps
//! - [`RelatedData`]: old and new related entities of one relation
//! - [`RelationManager`]: the before/after save and delete hooks
//! - [`AutocompleteService`]: label lookup over a relation's targets
//!
//! One-to-many relations are reconciled by pointing the target's foreign key
//! at the owner; many-to-many relations by diffing junction rows. All writes
//! go through a [`RelationStore`](crudview_core::RelationStore) inside the
//! caller's transaction.

pub mod autocomplete;
pub mod junction;
pub mod manager;
pub mod payload;
pub mod related_data;

pub use autocomplete::{AutocompleteService, DEFAULT_HINT_LIMIT, Hint, HintQuery};
pub use junction::{JunctionRow, LinkOp};
pub use manager::{BeforeSave, RelationManager, SyncReport};
pub use payload::{PayloadItem, RelationPayload};
pub use related_data::RelatedData;
