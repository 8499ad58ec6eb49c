//! SQLite-backed connection provider.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{OpenFlags, ToSql};

use crate::connection::{Connection, ConnectionProvider, Dialect, ResultSet, Role, DEFAULT_TIMEOUT};
use crate::error::{QueryError, QueryResult};
use crate::value::{Value, TIMESTAMP_FORMAT};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Owned;
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(Owned::Null),
            Value::Integer(i) => ToSqlOutput::Owned(Owned::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Owned(Owned::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Timestamp(dt) => {
                ToSqlOutput::Owned(Owned::Text(dt.format(TIMESTAMP_FORMAT).to_string()))
            }
        })
    }
}

fn from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

/// Hands out connections to a SQLite database file.
///
/// Guest connections are opened read-only.
#[derive(Debug, Clone)]
pub struct SqliteProvider {
    path: PathBuf,
    timeout: Duration,
}

impl SqliteProvider {
    /// Creates a provider for the database at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the timeout used when callers pass a zero duration.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a connection directly, without going through the trait object.
    pub fn open(&self, role: Role, timeout: Duration) -> QueryResult<SqliteConnection> {
        let flags = match role {
            Role::Writer => OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            Role::Guest => OpenFlags::SQLITE_OPEN_READ_ONLY,
        };
        let conn = rusqlite::Connection::open_with_flags(&self.path, flags)
            .map_err(|e| QueryError::Connection(format!("{}: {}", self.path.display(), e)))?;
        let timeout = if timeout.is_zero() { self.timeout } else { timeout };
        conn.busy_timeout(timeout)?;
        log::debug!("opened {} connection to {}", role.account(), self.path.display());
        Ok(SqliteConnection { conn })
    }
}

impl ConnectionProvider for SqliteProvider {
    fn connect(&self, role: Role, timeout: Duration) -> QueryResult<Box<dyn Connection>> {
        Ok(Box::new(self.open(role, timeout)?))
    }
}

/// A single SQLite connection.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// Runs a batch of semicolon-separated statements without parameters.
    pub fn execute_batch(&mut self, sql: &str) -> QueryResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> QueryResult<ResultSet> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_ref(row.get_ref(i)?));
            }
            result.push(values);
        }
        Ok(ResultSet {
            columns,
            rows: result,
        })
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> QueryResult<usize> {
        Ok(self
            .conn
            .execute(sql, rusqlite::params_from_iter(params.iter()))?)
    }

    fn set_timeout(&mut self, timeout: Duration) -> QueryResult<()> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    fn begin(&mut self) -> QueryResult<()> {
        self.execute_batch("BEGIN IMMEDIATE")
    }

    fn commit(&mut self) -> QueryResult<()> {
        self.execute_batch("COMMIT")
    }

    fn rollback(&mut self) -> QueryResult<()> {
        self.execute_batch("ROLLBACK")
    }
}
