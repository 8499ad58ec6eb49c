//! Repository tables, for SQLite.
//!
//! Production databases are managed elsewhere; this bootstrap covers the
//! tables the document store, term cache and filter engine read and write.

use cdr_query::{Connection, QueryResult, Value};

/// Audit actions seeded into the `action` table.
pub const ACTIONS: [&str; 6] = [
    "ADD DOCUMENT",
    "MODIFY DOCUMENT",
    "DELETE DOCUMENT",
    "FORCE CHECKOUT",
    "FORCE CHECKIN",
    "UNLOCK",
];

/// Document types seeded into the `doc_type` table.
pub const DOC_TYPES: [&str; 3] = ["Filter", "Term", "Summary"];

const TABLES: [&str; 17] = [
    "CREATE TABLE IF NOT EXISTS usr (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        fullname TEXT
    )",
    "CREATE TABLE IF NOT EXISTS doc_type (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS action (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS document (
        id INTEGER PRIMARY KEY,
        val_status TEXT NOT NULL DEFAULT 'U',
        val_date TEXT,
        active_status TEXT NOT NULL DEFAULT 'A',
        doc_type INTEGER NOT NULL REFERENCES doc_type (id),
        title TEXT NOT NULL,
        xml TEXT NOT NULL,
        comment TEXT,
        first_pub TEXT
    )",
    "CREATE TABLE IF NOT EXISTS doc_version (
        id INTEGER NOT NULL REFERENCES document (id),
        num INTEGER NOT NULL,
        dt TEXT NOT NULL,
        updated_dt TEXT NOT NULL,
        usr INTEGER NOT NULL REFERENCES usr (id),
        val_status TEXT NOT NULL DEFAULT 'U',
        val_date TEXT,
        publishable TEXT NOT NULL DEFAULT 'N',
        doc_type INTEGER NOT NULL REFERENCES doc_type (id),
        title TEXT NOT NULL,
        xml TEXT NOT NULL,
        comment TEXT,
        PRIMARY KEY (id, num)
    )",
    "CREATE TABLE IF NOT EXISTS checkout (
        id INTEGER NOT NULL REFERENCES document (id),
        version INTEGER,
        dt_out TEXT NOT NULL,
        dt_in TEXT,
        usr INTEGER NOT NULL REFERENCES usr (id),
        comment TEXT
    )",
    "CREATE TABLE IF NOT EXISTS audit_trail (
        document INTEGER NOT NULL REFERENCES document (id),
        dt TEXT NOT NULL,
        usr INTEGER NOT NULL REFERENCES usr (id),
        action INTEGER NOT NULL REFERENCES action (id),
        program TEXT,
        comment TEXT
    )",
    "CREATE TABLE IF NOT EXISTS version_label (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        comment TEXT
    )",
    "CREATE TABLE IF NOT EXISTS doc_version_label (
        label INTEGER NOT NULL REFERENCES version_label (id),
        document INTEGER NOT NULL,
        num INTEGER NOT NULL,
        PRIMARY KEY (label, document)
    )",
    "CREATE TABLE IF NOT EXISTS doc_blob (
        id INTEGER PRIMARY KEY,
        data BLOB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS doc_blob_usage (
        doc_id INTEGER PRIMARY KEY REFERENCES document (id),
        blob_id INTEGER NOT NULL REFERENCES doc_blob (id)
    )",
    "CREATE TABLE IF NOT EXISTS version_blob_usage (
        doc_id INTEGER NOT NULL,
        doc_version INTEGER NOT NULL,
        blob_id INTEGER NOT NULL REFERENCES doc_blob (id),
        PRIMARY KEY (doc_id, doc_version)
    )",
    "CREATE TABLE IF NOT EXISTS ready_for_review (
        doc_id INTEGER PRIMARY KEY REFERENCES document (id)
    )",
    "CREATE TABLE IF NOT EXISTS zipcode (
        zip TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS filter_set (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        notes TEXT
    )",
    "CREATE TABLE IF NOT EXISTS filter_set_member (
        filter_set INTEGER NOT NULL REFERENCES filter_set (id),
        position INTEGER NOT NULL,
        filter INTEGER,
        subset INTEGER REFERENCES filter_set (id),
        PRIMARY KEY (filter_set, position)
    )",
    "CREATE INDEX IF NOT EXISTS checkout_open ON checkout (id, dt_in)",
];

/// Creates the tables and seeds the lookup rows.
///
/// Safe to run against a database which already has the schema.
pub fn create_schema(conn: &mut dyn Connection) -> QueryResult<()> {
    for statement in TABLES {
        conn.execute(statement, &[])?;
    }
    for name in ACTIONS {
        conn.execute(
            "INSERT OR IGNORE INTO action (name) VALUES (?)",
            &[Value::from(name)],
        )?;
    }
    for name in DOC_TYPES {
        conn.execute(
            "INSERT OR IGNORE INTO doc_type (name) VALUES (?)",
            &[Value::from(name)],
        )?;
    }
    log::debug!("schema ready ({} statements)", TABLES.len());
    Ok(())
}
