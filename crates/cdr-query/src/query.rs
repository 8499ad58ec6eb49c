//! Query builder types.
//!
//! A [`Query`] is assembled with chained calls, each of which hands the
//! builder back. Calls that can reject their input (ORDER BY tokens, row
//! limits, value lists, nested tables) fail immediately rather than when
//! the query is executed.
//!
//! ```rust
//! use cdr_query::{Condition, Or, Query};
//!
//! let query = Query::new("document d", ["d.id", "d.title"])
//!     .join("doc_type t", ["t.id = d.doc_type"])
//!     .where_(Condition::eq("t.name", "Term"))
//!     .where_(Or::new().or("d.active_status = 'A'").or("d.active_status = 'I'"))
//!     .order(["d.title"])
//!     .unwrap();
//! assert_eq!(query.parms(), vec![cdr_query::Value::from("Term")]);
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::connection::{Connection, ConnectionProvider, Dialect, ResultSet, Role, DEFAULT_TIMEOUT};
use crate::error::{QueryError, QueryResult};
use crate::render::{render, Rendered};
use crate::value::Value;

// =============================================================================
// Tables
// =============================================================================

/// Target of a FROM or JOIN clause.
#[derive(Debug, Clone)]
pub enum Table {
    /// Table or view name, optionally followed by an alias (`"doc_version v"`).
    Named(String),
    /// A nested query serving as a virtual table, built by [`Table::nested`].
    Nested(NestedQuery),
}

/// A query that passed the checks in [`Table::nested`].
#[derive(Debug, Clone)]
pub struct NestedQuery(Box<Query>);

impl NestedQuery {
    /// The wrapped query.
    pub fn query(&self) -> &Query {
        &self.0
    }
}

impl Table {
    /// Wraps a query for use as a virtual table.
    ///
    /// The query must carry an alias and must not use placeholders, because
    /// the database engine cannot bind parameters in that position.
    pub fn nested(query: Query) -> QueryResult<Self> {
        if query.alias.is_none() {
            return Err(QueryError::MissingAlias);
        }
        if !query.parms().is_empty() {
            return Err(QueryError::PlaceholdersNotAllowed("virtual table"));
        }
        Ok(Table::Nested(NestedQuery(Box::new(query))))
    }
}

impl From<&str> for Table {
    fn from(name: &str) -> Self {
        Table::Named(name.to_string())
    }
}

impl From<String> for Table {
    fn from(name: String) -> Self {
        Table::Named(name)
    }
}

// =============================================================================
// Conditions
// =============================================================================

/// Right-hand side of a [`Condition`].
#[derive(Debug, Clone)]
pub enum Operand {
    /// A single bound value.
    Value(Value),
    /// Values for an `IN` or `NOT IN` test, one placeholder each.
    List(Vec<Value>),
    /// A nested query.
    Query(Box<Query>),
}

/// Test of a column (or expression) against a value, a value list, or a
/// nested query. Values are always bound through placeholders.
#[derive(Debug, Clone)]
pub struct Condition {
    /// Column or expression being tested.
    pub column: String,
    /// Value the column is tested against.
    pub value: Operand,
    /// SQL comparison operator (`=`, `<`, `LIKE`, `IN`, ...).
    pub test: String,
}

impl Condition {
    /// Tests `column` against a single value with the given operator.
    pub fn new(column: impl Into<String>, value: impl Into<Value>, test: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: Operand::Value(value.into()),
            test: test.into(),
        }
    }

    /// Equality test.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, value, "=")
    }

    /// `IN` / `NOT IN` test against a list of values.
    ///
    /// Fails if the list is empty or if `test` is not a list operator.
    pub fn list<I, V>(column: impl Into<String>, values: I, test: impl Into<String>) -> QueryResult<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let test = test.into();
        if !is_list_test(&test) {
            return Err(QueryError::UnexpectedValueList(test));
        }
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(QueryError::EmptyValueList(test.to_uppercase()));
        }
        Ok(Self {
            column: column.into(),
            value: Operand::List(values),
            test,
        })
    }

    /// Shorthand for [`Condition::list`] with `IN`.
    pub fn is_in<I, V>(column: impl Into<String>, values: I) -> QueryResult<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::list(column, values, "IN")
    }

    /// Tests `column` against the results of a nested query.
    pub fn subquery(column: impl Into<String>, query: Query, test: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: Operand::Query(Box::new(query)),
            test: test.into(),
        }
    }
}

pub(crate) fn is_list_test(test: &str) -> bool {
    matches!(test.trim().to_uppercase().as_str(), "IN" | "NOT IN")
}

/// A set of alternatives, any one of which satisfies the whole set.
///
/// Each alternative is either a single clause or a group of clauses that
/// are ANDed together. Alternatives render inside one pair of parentheses,
/// in the order they were added.
#[derive(Debug, Clone, Default)]
pub struct Or {
    pub(crate) arms: Vec<OrArm>,
}

/// One alternative inside an [`Or`].
#[derive(Debug, Clone)]
pub enum OrArm {
    /// A single clause.
    One(Clause),
    /// Clauses which must all hold.
    All(Vec<Clause>),
}

impl Or {
    /// Creates an empty set of alternatives.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single alternative.
    pub fn or(mut self, clause: impl Into<Clause>) -> Self {
        self.arms.push(OrArm::One(clause.into()));
        self
    }

    /// Adds an alternative made of clauses which must all hold.
    ///
    /// An empty group is ignored.
    pub fn or_all<I, C>(mut self, clauses: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Clause>,
    {
        let group: Vec<Clause> = clauses.into_iter().map(Into::into).collect();
        if !group.is_empty() {
            self.arms.push(OrArm::All(group));
        }
        self
    }

    /// Number of alternatives.
    pub fn len(&self) -> usize {
        self.arms.len()
    }

    /// True if no alternatives were added.
    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }
}

/// Anything that can appear in a WHERE, HAVING or JOIN ... ON clause.
#[derive(Debug, Clone)]
pub enum Clause {
    /// Trusted SQL fragment supplied by the caller.
    Sql(String),
    /// Placeholder-bound test.
    Test(Condition),
    /// Set of alternatives.
    Any(Or),
}

impl From<&str> for Clause {
    fn from(sql: &str) -> Self {
        Clause::Sql(sql.to_string())
    }
}

impl From<String> for Clause {
    fn from(sql: String) -> Self {
        Clause::Sql(sql)
    }
}

impl From<Condition> for Clause {
    fn from(condition: Condition) -> Self {
        Clause::Test(condition)
    }
}

impl From<Or> for Clause {
    fn from(or: Or) -> Self {
        Clause::Any(or)
    }
}

/// A JOIN clause.
#[derive(Debug, Clone)]
pub struct Join {
    /// Joined table.
    pub table: Table,
    /// LEFT OUTER JOIN if true.
    pub outer: bool,
    /// Conditions ANDed together after ON.
    pub conditions: Vec<Clause>,
}

// =============================================================================
// Query
// =============================================================================

#[derive(Debug, Default)]
struct RenderCache(Mutex<Option<Arc<Rendered>>>);

impl RenderCache {
    fn get(&self, dialect: Dialect) -> Option<Arc<Rendered>> {
        let guard = self.0.lock().ok()?;
        guard.as_ref().filter(|r| r.dialect == dialect).cloned()
    }

    fn put(&self, rendered: Arc<Rendered>) {
        if let Ok(mut guard) = self.0.lock() {
            *guard = Some(rendered);
        }
    }
}

impl Clone for RenderCache {
    fn clone(&self) -> Self {
        let inner = self.0.lock().ok().and_then(|g| g.clone());
        RenderCache(Mutex::new(inner))
    }
}

/// Builder for SQL SELECT statements.
///
/// The rendered SQL and its parameter list are produced together and cached;
/// every mutating call throws the cached rendering away.
#[derive(Debug, Clone)]
pub struct Query {
    pub(crate) table: Table,
    pub(crate) columns: Vec<String>,
    pub(crate) joins: Vec<Join>,
    pub(crate) wheres: Vec<Clause>,
    pub(crate) group: Vec<String>,
    pub(crate) having: Vec<Clause>,
    pub(crate) order: Vec<String>,
    pub(crate) unions: Vec<Query>,
    pub(crate) limit: Option<u64>,
    pub(crate) unique: bool,
    pub(crate) into: Option<String>,
    pub(crate) alias: Option<String>,
    pub(crate) outer: bool,
    dialect: Dialect,
    timeout: Duration,
    cache: RenderCache,
}

impl Query {
    /// Starts a query against `table` selecting `columns`.
    ///
    /// Columns may be expressions and may carry aliases
    /// (`"COUNT(*) AS n"`).
    pub fn new<T, I, S>(table: T, columns: I) -> Self
    where
        T: Into<Table>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            joins: Vec::new(),
            wheres: Vec::new(),
            group: Vec::new(),
            having: Vec::new(),
            order: Vec::new(),
            unions: Vec::new(),
            limit: None,
            unique: false,
            into: None,
            alias: None,
            outer: false,
            dialect: Dialect::default(),
            timeout: DEFAULT_TIMEOUT,
            cache: RenderCache::default(),
        }
    }

    /// Starts a query whose FROM target is another (aliased) query.
    pub fn from_query<I, S>(inner: Query, columns: I) -> QueryResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self::new(Table::nested(inner)?, columns))
    }

    fn touched(mut self) -> Self {
        self.cache = RenderCache::default();
        self
    }

    /// Overrides the default execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the dialect used when the query is rendered on its own.
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self.touched()
    }

    /// Inner join to another table.
    pub fn join<T, I, C>(mut self, table: T, conditions: I) -> Self
    where
        T: Into<Table>,
        I: IntoIterator<Item = C>,
        C: Into<Clause>,
    {
        self.joins.push(Join {
            table: table.into(),
            outer: false,
            conditions: conditions.into_iter().map(Into::into).collect(),
        });
        self.touched()
    }

    /// Left outer join to another table.
    pub fn outer<T, I, C>(mut self, table: T, conditions: I) -> Self
    where
        T: Into<Table>,
        I: IntoIterator<Item = C>,
        C: Into<Clause>,
    {
        self.joins.push(Join {
            table: table.into(),
            outer: true,
            conditions: conditions.into_iter().map(Into::into).collect(),
        });
        self.outer = true;
        self.touched()
    }

    /// Adds a condition to the WHERE clause.
    pub fn where_(mut self, condition: impl Into<Clause>) -> Self {
        self.wheres.push(condition.into());
        self.touched()
    }

    /// Adds columns to the GROUP BY clause.
    pub fn group<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group.extend(columns.into_iter().map(Into::into));
        self.touched()
    }

    /// Adds a condition to the HAVING clause.
    pub fn having(mut self, condition: impl Into<Clause>) -> Self {
        self.having.push(condition.into());
        self.touched()
    }

    /// Adds a query to be UNIONed with this one.
    ///
    /// Only the outermost query should carry an ORDER BY.
    pub fn union(mut self, query: Query) -> Self {
        self.unions.push(query);
        self.touched()
    }

    /// Adds sort columns, each `column` or `column ASC|DESC`.
    pub fn order<I, S>(mut self, columns: I) -> QueryResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for column in columns {
            let column = column.into();
            let words: Vec<&str> = column.split_whitespace().collect();
            let valid = match words.as_slice() {
                [_] => true,
                [_, dir] => matches!(dir.to_uppercase().as_str(), "ASC" | "DESC"),
                _ => false,
            };
            if !valid {
                return Err(QueryError::InvalidOrderColumn(column));
            }
            self.order.push(words.join(" "));
        }
        Ok(self.touched())
    }

    /// Caps the number of rows returned.
    pub fn limit(mut self, limit: i64) -> QueryResult<Self> {
        if limit < 0 {
            return Err(QueryError::InvalidLimit(limit));
        }
        self.limit = Some(limit as u64);
        Ok(self.touched())
    }

    /// Eliminates duplicate rows.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self.touched()
    }

    /// Stores the results in a newly created table.
    pub fn into_table(mut self, table: impl Into<String>) -> Self {
        self.into = Some(table.into());
        self.touched()
    }

    /// Names the query so it can serve as a virtual table.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self.touched()
    }

    /// Alias assigned with [`Query::alias`].
    pub fn alias_name(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Timeout used by [`Query::execute_with`].
    pub fn timeout_value(&self) -> Duration {
        self.timeout
    }

    /// SQL and parameters for this query's own dialect.
    pub fn rendered(&self) -> Arc<Rendered> {
        self.render_for(self.dialect)
    }

    /// SQL and parameters for a specific dialect.
    pub fn render_for(&self, dialect: Dialect) -> Arc<Rendered> {
        if let Some(cached) = self.cache.get(dialect) {
            return cached;
        }
        let rendered = Arc::new(render(self, dialect));
        self.cache.put(Arc::clone(&rendered));
        rendered
    }

    /// Rendered SQL string.
    pub fn sql(&self) -> String {
        self.rendered().sql.clone()
    }

    /// Parameters in placeholder order.
    pub fn parms(&self) -> Vec<Value> {
        self.rendered().params.clone()
    }

    /// Writes the query and its parameters to the log.
    pub fn log(&self, label: &str) {
        let rendered = self.rendered();
        let mut output = format!("{}:\n{}", label, rendered.sql);
        if !rendered.params.is_empty() {
            output.push_str("\nPARAMETERS:");
            for param in &rendered.params {
                output.push_str(&format!("\n\t{:?}", param));
            }
        }
        log::info!("{}", output);
    }

    /// Runs the query on an open connection.
    pub fn execute(&self, conn: &mut dyn Connection) -> QueryResult<ResultSet> {
        let rendered = self.render_for(conn.dialect());
        log::debug!("SQL Query\n{}\nParameters:\n{:?}", rendered.sql, rendered.params);
        conn.query(&rendered.sql, &rendered.params)
    }

    /// Runs the query on a fresh read-only connection.
    pub fn execute_with(&self, provider: &dyn ConnectionProvider) -> QueryResult<ResultSet> {
        let mut conn = provider.connect(Role::Guest, self.timeout)?;
        self.execute(conn.as_mut())
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.rendered().sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_in_list_fails() {
        let values: Vec<i64> = vec![];
        let err = Condition::is_in("i", values).unwrap_err();
        assert_eq!(err, QueryError::EmptyValueList("IN".into()));
        let err = Condition::list("i", Vec::<i64>::new(), "not in").unwrap_err();
        assert_eq!(err, QueryError::EmptyValueList("NOT IN".into()));
    }

    #[test]
    fn test_list_requires_list_operator() {
        let err = Condition::list("i", [1, 2], "=").unwrap_err();
        assert!(matches!(err, QueryError::UnexpectedValueList(_)));
    }

    #[test]
    fn test_order_validation() {
        let q = Query::new("t", ["a"]);
        assert!(q.clone().order(["a DESC", "b asc", "c"]).is_ok());
        assert!(matches!(
            q.clone().order(["a b"]),
            Err(QueryError::InvalidOrderColumn(_))
        ));
        assert!(q.order(["a DESC b"]).is_err());
    }

    #[test]
    fn test_order_normalizes_whitespace() {
        let q = Query::new("t", ["a"]).order(["  a    DESC "]).unwrap();
        assert_eq!(q.order, vec!["a DESC".to_string()]);
    }

    #[test]
    fn test_limit_validation() {
        assert!(Query::new("t", ["a"]).limit(0).is_ok());
        assert_eq!(
            Query::new("t", ["a"]).limit(-1).unwrap_err(),
            QueryError::InvalidLimit(-1)
        );
    }

    #[test]
    fn test_nested_table_requires_alias() {
        let inner = Query::new("t", ["a"]);
        assert_eq!(Table::nested(inner).unwrap_err(), QueryError::MissingAlias);
    }

    #[test]
    fn test_nested_table_rejects_placeholders() {
        let inner = Query::new("t", ["a"])
            .where_(Condition::eq("a", 1))
            .alias("x");
        assert!(matches!(
            Query::from_query(inner, ["x.a"]),
            Err(QueryError::PlaceholdersNotAllowed(_))
        ));
    }

    #[test]
    fn test_nested_table_wraps_checked_query() {
        let inner = Query::new("t", ["a"]).alias("x");
        match Table::nested(inner).unwrap() {
            Table::Nested(nested) => assert_eq!(nested.query().alias_name(), Some("x")),
            Table::Named(name) => panic!("expected a nested table, got {}", name),
        }
    }

    #[test]
    fn test_or_ignores_empty_groups() {
        let or = Or::new().or("a = 1").or_all(Vec::<Clause>::new());
        assert_eq!(or.len(), 1);
    }

    #[test]
    fn test_render_is_cached_and_invalidated() {
        let q = Query::new("t", ["a"]).where_(Condition::eq("a", 1));
        let first = q.rendered();
        let second = q.rendered();
        assert!(Arc::ptr_eq(&first, &second));
        let q = q.where_("b IS NULL");
        let third = q.rendered();
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(third.sql.contains("b IS NULL"));
    }
}
