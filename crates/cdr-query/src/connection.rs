//! Database access traits.
//!
//! The query builder never opens sockets itself. Anything that can hand out
//! a [`Connection`] implements [`ConnectionProvider`]; [`crate::SqliteProvider`]
//! is the implementation shipped with this crate.

use std::time::Duration;

use crate::error::{QueryError, QueryResult};
use crate::value::Value;

/// Default number of seconds a statement may run before the driver gives up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Database login role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Role {
    /// Account allowed to alter data.
    Writer,
    /// Read-only account.
    Guest,
}

impl Role {
    /// Login account name for the role.
    pub fn account(&self) -> &'static str {
        match self {
            Role::Writer => "cdr",
            Role::Guest => "CdrGuest",
        }
    }
}

/// SQL flavor spoken by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Dialect {
    /// `SELECT TOP n` and `SELECT ... INTO`.
    #[default]
    SqlServer,
    /// `LIMIT n` and `CREATE TABLE ... AS SELECT`.
    Sqlite,
}

/// Rows returned by a statement along with their column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column names in select-list order.
    pub columns: Vec<String>,
    /// Row values in select-list order.
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// First row, if any.
    pub fn fetchone(&self) -> Option<&Vec<Value>> {
        self.rows.first()
    }

    /// All rows.
    pub fn fetchall(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Consumes the result set, yielding its rows.
    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    /// Value in the first column of the first row; NULL when there are no rows.
    pub fn scalar(&self) -> Value {
        self.rows
            .first()
            .and_then(|row| row.first())
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if no rows came back.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// An open database connection.
///
/// Connections are not shared between threads; every logical operation
/// acquires its own from a [`ConnectionProvider`] and drops it when done.
pub trait Connection: Send {
    /// SQL dialect understood by the connection.
    fn dialect(&self) -> Dialect;

    /// Runs a statement that returns rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> QueryResult<ResultSet>;

    /// Runs a statement that modifies data, returning the affected row count.
    fn execute(&mut self, sql: &str, params: &[Value]) -> QueryResult<usize>;

    /// Changes the statement timeout for subsequent calls.
    fn set_timeout(&mut self, timeout: Duration) -> QueryResult<()>;

    /// Starts a transaction.
    fn begin(&mut self) -> QueryResult<()> {
        self.execute("BEGIN TRANSACTION", &[]).map(|_| ())
    }

    /// Commits the open transaction.
    fn commit(&mut self) -> QueryResult<()> {
        self.execute("COMMIT", &[]).map(|_| ())
    }

    /// Rolls back the open transaction.
    fn rollback(&mut self) -> QueryResult<()> {
        self.execute("ROLLBACK", &[]).map(|_| ())
    }
}

/// Source of database connections.
pub trait ConnectionProvider: Send + Sync {
    /// Opens a connection for the given role.
    ///
    /// Fails with [`QueryError::Connection`] if the database is unreachable
    /// or the credentials are refused.
    fn connect(&self, role: Role, timeout: Duration) -> QueryResult<Box<dyn Connection>>;
}

/// Runs `f` inside a transaction, committing on success and rolling back on error.
pub fn transaction<T, E, F>(conn: &mut dyn Connection, f: F) -> Result<T, E>
where
    F: FnOnce(&mut dyn Connection) -> Result<T, E>,
    E: From<QueryError>,
{
    conn.begin()?;
    match f(conn) {
        Ok(value) => {
            conn.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = conn.rollback() {
                log::warn!("rollback failed: {}", rollback_err);
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_set_scalar() {
        let rs = ResultSet {
            columns: vec!["n".into()],
            rows: vec![vec![Value::Integer(3)], vec![Value::Integer(4)]],
        };
        assert_eq!(rs.scalar(), Value::Integer(3));
        assert_eq!(rs.len(), 2);
        assert_eq!(ResultSet::default().scalar(), Value::Null);
    }

    #[test]
    fn test_role_accounts() {
        assert_eq!(Role::Guest.account(), "CdrGuest");
        assert_eq!(Role::Writer.account(), "cdr");
    }
}
