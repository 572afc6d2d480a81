//! In-memory store for crudview.
//!
//! `MemoryStore` evaluates [`Filter`](crudview_core::Filter)s directly over
//! rows held in memory and enforces NOT NULL, unique and foreign-key
//! constraints, so relation synchronization can be exercised end to end
//! without a database.

mod store;
mod table;

pub use store::{MemoryStore, Snapshot};
pub use table::{ForeignKey, StoredRow, TableDef};
