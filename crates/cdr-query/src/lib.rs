//! # cdr-query
//!
//! Composable, parameterized SQL SELECT builder for the CDR document
//! repository.
//!
//! Queries are assembled from tables, columns, joins, conditions and
//! alternative sets. Values never appear in the SQL text: every value is
//! bound through a `?` placeholder and handed to the driver in the
//! parameter list returned by [`Query::parms`].
//!
//! ## Quick Start
//!
//! ```rust
//! use cdr_query::{Condition, Query};
//!
//! let query = Query::new("doc_version", ["num"])
//!     .where_(Condition::eq("id", 42))
//!     .where_("publishable = 'Y'")
//!     .order(["num DESC"])
//!     .unwrap()
//!     .limit(1)
//!     .unwrap();
//!
//! assert_eq!(
//!     query.sql(),
//!     "SELECT TOP 1 num\n        FROM doc_version\n       WHERE id = ?\n         AND publishable = 'Y'\n    ORDER BY num DESC"
//! );
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Query ──render──> Rendered { sql, params }
//!   │
//!   └──execute──> dyn Connection ──> ResultSet
//!                      ^
//!          ConnectionProvider (SqliteProvider, ...)
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod connection;
mod error;
mod query;
mod render;
mod sqlite;
mod value;

pub use connection::{
    transaction, Connection, ConnectionProvider, Dialect, ResultSet, Role, DEFAULT_TIMEOUT,
};
pub use error::{QueryError, QueryResult};
pub use query::{Clause, Condition, Join, NestedQuery, Operand, Or, OrArm, Query, Table};
pub use render::{indent, Rendered, PLACEHOLDER};
pub use sqlite::{SqliteConnection, SqliteProvider};
pub use value::{parse_timestamp, Value, TIMESTAMP_FORMAT};
