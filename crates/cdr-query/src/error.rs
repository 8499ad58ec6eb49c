//! Error types for query construction and execution.

use thiserror::Error;

/// Errors that can occur while building or executing a query.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// A nested query used as a table has no alias.
    #[error("virtual table expression requires an alias")]
    MissingAlias,

    /// A nested query used as a FROM or JOIN target carries placeholders.
    #[error("placeholders not allowed in {0}")]
    PlaceholdersNotAllowed(&'static str),

    /// An `IN` or `NOT IN` test was given no values.
    #[error("{0:?} test with no values")]
    EmptyValueList(String),

    /// A single-value test was given a sequence of values.
    #[error("unexpected sequence of values for {0:?} test")]
    UnexpectedValueList(String),

    /// An ORDER BY token was not `column` or `column ASC|DESC`.
    #[error("invalid order column {0:?}")]
    InvalidOrderColumn(String),

    /// The row limit was negative.
    #[error("limit must be a non-negative integer, got {0}")]
    InvalidLimit(i64),

    /// The database could not be reached or refused the credentials.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Error reported by the database engine while running a statement.
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for QueryError {
    fn from(err: rusqlite::Error) -> Self {
        QueryError::Database(err.to_string())
    }
}

/// Result type for query operations.
pub type QueryResult<T> = std::result::Result<T, QueryError>;
