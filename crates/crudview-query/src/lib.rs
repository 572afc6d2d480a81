//! SQL rendering for crudview.
//!
//! `crudview-query` turns the structured store operations used by relation
//! synchronization (table + [`Filter`](crudview_core::Filter)) into SQL text
//! plus parameters for Postgres, SQLite or MySQL, and executes them through
//! the [`Connection`](crudview_core::Connection) trait via [`SqlStore`].

pub mod dialect;
pub mod statement;
pub mod store;

pub use dialect::Dialect;
pub use statement::Statement;
pub use store::SqlStore;
