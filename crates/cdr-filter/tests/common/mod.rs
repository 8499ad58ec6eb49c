//! Scratch repository for the filter integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cdr_docs::schema::create_schema;
use cdr_docs::{Session, UserSession, ALL_ACTIONS};
use cdr_filter::transform::XSLT_NS;
use cdr_query::{Connection, Query, Role, SqliteConnection, SqliteProvider, Value};

pub const ALICE: i64 = 1;

pub struct Repo {
    _dir: tempfile::TempDir,
    pub provider: Arc<SqliteProvider>,
}

impl Repo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(SqliteProvider::new(dir.path().join("cdr.db")));
        let repo = Self {
            _dir: dir,
            provider,
        };
        let mut conn = repo.writer();
        create_schema(&mut conn).unwrap();
        conn.execute_batch("INSERT INTO usr (id, name, fullname) VALUES (1, 'alice', 'Alice A');")
            .unwrap();
        repo
    }

    pub fn writer(&self) -> SqliteConnection {
        self.provider
            .open(Role::Writer, Duration::from_secs(10))
            .unwrap()
    }

    pub fn session(&self) -> Arc<dyn Session> {
        Arc::new(UserSession::new(ALICE, "alice", self.provider.clone()).grant(ALL_ACTIONS))
    }

    fn last_id(conn: &mut SqliteConnection, table: &str) -> i64 {
        Query::new(table, ["MAX(id)"])
            .execute(conn)
            .unwrap()
            .scalar()
            .as_i64()
            .unwrap()
    }

    pub fn add_doc(&self, doctype: &str, title: &str, xml: &str) -> i64 {
        let mut conn = self.writer();
        conn.execute(
            "INSERT INTO document (doc_type, title, xml, comment) \
             SELECT id, ?, ?, 'initial' FROM doc_type WHERE name = ?",
            &[Value::from(title), Value::from(xml), Value::from(doctype)],
        )
        .unwrap();
        let id = Self::last_id(&mut conn, "document");
        conn.execute(
            "INSERT INTO audit_trail (document, dt, usr, action, program) \
             SELECT ?, '2020-01-01 00:00:00', 1, id, 'tests' FROM action WHERE name = 'ADD DOCUMENT'",
            &[Value::from(id)],
        )
        .unwrap();
        id
    }

    /// Stores a filter whose templates are `body`.
    pub fn add_filter(&self, title: &str, body: &str) -> i64 {
        self.add_doc("Filter", title, &stylesheet(body))
    }

    /// Replaces the working copy of a document.
    pub fn set_xml(&self, id: i64, xml: &str) {
        self.writer()
            .execute(
                "UPDATE document SET xml = ? WHERE id = ?",
                &[Value::from(xml), Value::from(id)],
            )
            .unwrap();
    }

    pub fn add_version(&self, id: i64, num: i64, dt: &str, publishable: bool, xml: &str) {
        let mut conn = self.writer();
        conn.execute(
            "INSERT INTO doc_version \
             (id, num, dt, updated_dt, usr, publishable, doc_type, title, xml, comment) \
             SELECT id, ?, ?, ?, 1, ?, doc_type, title, ?, NULL FROM document WHERE id = ?",
            &[
                Value::from(num),
                Value::from(dt),
                Value::from(dt),
                Value::from(if publishable { "Y" } else { "N" }),
                Value::from(xml),
                Value::from(id),
            ],
        )
        .unwrap();
    }

    /// Creates an empty filter set.
    pub fn add_set(&self, name: &str) -> i64 {
        let mut conn = self.writer();
        conn.execute(
            "INSERT INTO filter_set (name, description) VALUES (?, 'test set')",
            &[Value::from(name)],
        )
        .unwrap();
        Self::last_id(&mut conn, "filter_set")
    }

    pub fn add_member(&self, set: i64, position: i64, filter: Option<i64>, subset: Option<i64>) {
        let mut conn = self.writer();
        let optional = |v: Option<i64>| v.map_or(Value::Null, Value::from);
        conn.execute(
            "INSERT INTO filter_set_member (filter_set, position, filter, subset) VALUES (?, ?, ?, ?)",
            &[
                Value::from(set),
                Value::from(position),
                optional(filter),
                optional(subset),
            ],
        )
        .unwrap();
    }

    pub fn add_zip(&self, zip: &str) {
        let mut conn = self.writer();
        conn.execute("INSERT INTO zipcode (zip) VALUES (?)", &[Value::from(zip)])
            .unwrap();
    }
}

pub fn stylesheet(body: &str) -> String {
    format!(r#"<xsl:stylesheet xmlns:xsl="{XSLT_NS}" version="1.0">{body}</xsl:stylesheet>"#)
}

pub const IDENTITY: &str = r#"<xsl:template match="@*|node()"><xsl:copy><xsl:apply-templates select="@*|node()"/></xsl:copy></xsl:template>"#;

/// Wraps the document element in `<tag>`.
pub fn wrapper(tag: &str) -> String {
    format!(r#"<xsl:template match="/"><{tag}><xsl:copy-of select="/*"/></{tag}></xsl:template>"#)
}
