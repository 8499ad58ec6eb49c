//! Scratch repository shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cdr_docs::schema::create_schema;
use cdr_docs::{format_cdr_id, Session, StoreConfig, UserSession, ALL_ACTIONS};
use cdr_query::{Connection, Query, Role, SqliteConnection, SqliteProvider, Value};

pub const ALICE: i64 = 1;
pub const BOB: i64 = 2;

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
        conn.execute_batch(
            "INSERT INTO usr (id, name, fullname) VALUES (1, 'alice', 'Alice A');
             INSERT INTO usr (id, name, fullname) VALUES (2, 'bob', 'Bob B');",
        )
        .unwrap();
        repo
    }

    pub fn writer(&self) -> SqliteConnection {
        self.provider
            .open(Role::Writer, Duration::from_secs(10))
            .unwrap()
    }

    /// Session with every permission.
    pub fn session(&self, user_id: i64) -> Arc<dyn Session> {
        Arc::new(self.user(user_id).grant(ALL_ACTIONS))
    }

    pub fn session_with(&self, user_id: i64, config: StoreConfig) -> Arc<dyn Session> {
        Arc::new(self.user(user_id).grant(ALL_ACTIONS).with_config(config))
    }

    pub fn user(&self, user_id: i64) -> UserSession {
        let name = if user_id == ALICE { "alice" } else { "bob" };
        UserSession::new(user_id, name, self.provider.clone())
    }

    /// Adds a document created by alice on 2020-01-01.
    pub fn add_doc(&self, doctype: &str, title: &str, xml: &str) -> i64 {
        let mut conn = self.writer();
        conn.execute(
            "INSERT INTO document (doc_type, title, xml, comment) \
             SELECT id, ?, ?, 'initial' FROM doc_type WHERE name = ?",
            &[Value::from(title), Value::from(xml), Value::from(doctype)],
        )
        .unwrap();
        let id = Query::new("document", ["MAX(id)"])
            .execute(&mut conn)
            .unwrap()
            .scalar()
            .as_i64()
            .unwrap();
        self.audit(id, "ADD DOCUMENT", "2020-01-01 00:00:00", ALICE);
        id
    }

    /// Saves version `num` with the given xml.
    pub fn add_version(&self, id: i64, num: i64, dt: &str, publishable: bool, xml: &str) {
        let mut conn = self.writer();
        conn.execute(
            "INSERT INTO doc_version \
             (id, num, dt, updated_dt, usr, publishable, doc_type, title, xml, comment) \
             SELECT id, ?, ?, ?, 1, ?, doc_type, title, ?, ? FROM document WHERE id = ?",
            &[
                Value::from(num),
                Value::from(dt),
                Value::from(dt),
                Value::from(if publishable { "Y" } else { "N" }),
                Value::from(xml),
                Value::from(format!("version {}", num)),
                Value::from(id),
            ],
        )
        .unwrap();
    }

    pub fn audit(&self, id: i64, action: &str, dt: &str, user: i64) {
        let mut conn = self.writer();
        conn.execute(
            "INSERT INTO audit_trail (document, dt, usr, action, program) \
             SELECT ?, ?, ?, id, 'tests' FROM action WHERE name = ?",
            &[
                Value::from(id),
                Value::from(dt),
                Value::from(user),
                Value::from(action),
            ],
        )
        .unwrap();
    }

    pub fn label(&self, id: i64, num: i64, name: &str) {
        let mut conn = self.writer();
        conn.execute(
            "INSERT OR IGNORE INTO version_label (name) VALUES (?)",
            &[Value::from(name)],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO doc_version_label (label, document, num) \
             SELECT id, ?, ? FROM version_label WHERE name = ?",
            &[Value::from(id), Value::from(num), Value::from(name)],
        )
        .unwrap();
    }

    /// Attaches a blob to the working copy and, optionally, a version.
    pub fn add_blob(&self, id: i64, version: Option<i64>, data: &[u8]) {
        let mut conn = self.writer();
        conn.execute(
            "INSERT INTO doc_blob (data) VALUES (?)",
            &[Value::Blob(data.to_vec())],
        )
        .unwrap();
        let blob_id = Query::new("doc_blob", ["MAX(id)"])
            .execute(&mut conn)
            .unwrap()
            .scalar()
            .as_i64()
            .unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO doc_blob_usage (doc_id, blob_id) VALUES (?, ?)",
            &[Value::from(id), Value::from(blob_id)],
        )
        .unwrap();
        if let Some(num) = version {
            conn.execute(
                "INSERT INTO version_blob_usage (doc_id, doc_version, blob_id) VALUES (?, ?, ?)",
                &[Value::from(id), Value::from(num), Value::from(blob_id)],
            )
            .unwrap();
        }
    }

    pub fn count(&self, table: &str, condition: &str) -> i64 {
        let mut conn = self.writer();
        Query::new(table, ["COUNT(*)"])
            .where_(condition)
            .execute(&mut conn)
            .unwrap()
            .scalar()
            .as_i64()
            .unwrap()
    }

    /// Adds a Term document with a publishable first version.
    pub fn add_term(&self, name: &str, parents: &[i64]) -> i64 {
        let xml = term_xml(name, parents, &[]);
        let id = self.add_doc("Term", name, &xml);
        self.add_version(id, 1, "2020-01-02 00:00:00", true, &xml);
        id
    }
}

pub fn term_xml(name: &str, parents: &[i64], types: &[&str]) -> String {
    let mut xml = format!(
        "<Term xmlns:cdr=\"cips.nci.nih.gov/cdr\"><PreferredName>{}</PreferredName>",
        name
    );
    for term_type in types {
        xml.push_str(&format!(
            "<TermType><TermTypeName>{}</TermTypeName></TermType>",
            term_type
        ));
    }
    for parent in parents {
        xml.push_str(&format!(
            "<TermRelationship><ParentTerm><TermId cdr:ref=\"{}\"/></ParentTerm></TermRelationship>",
            format_cdr_id(*parent)
        ));
    }
    xml.push_str("</Term>");
    xml
}
