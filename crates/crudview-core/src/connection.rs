//! SQL connection trait.
//!
//! Drivers implement [`Connection`]; the SQL-backed store in `crudview-query`
//! renders relation writes into statements and runs them through it. All
//! operations take a `Cx` context for cancellation and return an `Outcome`.

use crate::error::Error;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// A database connection capable of executing statements.
///
/// Transactions are driven with plain `BEGIN` / `COMMIT` / `ROLLBACK`
/// statements through [`execute`](Connection::execute), so a connection used
/// for one save cycle must not be shared with concurrent work.
///
/// # Example
///
/// ```rust,ignore
/// let rows = conn.query(&cx, "SELECT * FROM \"tags\" WHERE \"id\" = $1", &[Value::BigInt(1)]).await;
/// ```
pub trait Connection: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Execute a statement (INSERT, UPDATE, DELETE) and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Execute an INSERT and return the generated row id.
    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send;
}
