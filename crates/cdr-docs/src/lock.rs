//! Document checkout (locking).
//!
//! An open row in the `checkout` table (one with no `dt_in`) is the lock.
//! Re-locking a document you already hold is a no-op; taking a lock held by
//! someone else needs `force` plus the `FORCE CHECKOUT` permission, and
//! releasing someone else's lock needs `force` plus `FORCE CHECKIN`.

use chrono::Local;
use once_cell::sync::OnceCell;

use cdr_query::{transaction, Condition, Connection, Query, Role, Value};

use crate::doc::Doc;
use crate::error::{DocError, DocResult};

/// Permission needed to lock a document.
pub const MODIFY_DOCUMENT: &str = "MODIFY DOCUMENT";
/// Permission needed to take over someone else's lock.
pub const FORCE_CHECKOUT: &str = "FORCE CHECKOUT";
/// Permission needed to release someone else's lock.
pub const FORCE_CHECKIN: &str = "FORCE CHECKIN";
/// Audit action recorded for forced releases.
pub const UNLOCK_ACTION: &str = "UNLOCK";

const PROGRAM: &str = "cdr-docs";

/// Options for [`Doc::lock`].
#[derive(Debug, Clone, Default)]
pub struct LockOptions {
    /// Take the lock even if another account holds it.
    pub force: bool,
    /// Comment stored on the checkout row.
    pub comment: Option<String>,
}

impl LockOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the force flag.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Sets the comment.
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Options for [`Doc::unlock`].
#[derive(Debug, Clone, Default)]
pub struct UnlockOptions {
    /// Release the lock even if another account holds it.
    pub force: bool,
    /// Discard unversioned changes instead of saving them as a version.
    pub abandon: bool,
    /// Comment stored on the checkout row when it is closed.
    pub comment: Option<String>,
}

impl UnlockOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the force flag.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Sets the abandon flag.
    pub fn abandon(mut self, abandon: bool) -> Self {
        self.abandon = abandon;
        self
    }

    /// Sets the comment.
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Account holding an open checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct LockHolder {
    /// `usr.id` of the holder.
    pub user_id: i64,
    /// `usr.name` of the holder.
    pub user_name: String,
}

fn lock_holder(conn: &mut dyn Connection, id: i64) -> DocResult<Option<LockHolder>> {
    let query = Query::new("checkout c", ["c.usr", "u.name"])
        .join("usr u", ["u.id = c.usr"])
        .where_(Condition::eq("c.id", id))
        .where_("c.dt_in IS NULL");
    let rs = query.execute(conn)?;
    Ok(rs.fetchone().map(|row| LockHolder {
        user_id: row[0].as_i64().unwrap_or_default(),
        user_name: row[1].to_text().unwrap_or_default(),
    }))
}

fn now() -> Value {
    Value::Timestamp(Local::now().naive_local())
}

impl Doc {
    /// Current holder of the lock on this document.
    pub fn lock_holder(&self) -> DocResult<Option<LockHolder>> {
        let id = self.require_id()?;
        let mut conn = self.session().connect(Role::Guest)?;
        lock_holder(conn.as_mut(), id)
    }

    /// Checks the document out to the session's account.
    pub fn lock(&mut self, opts: LockOptions) -> DocResult<()> {
        let id = self.require_id()?;
        let doctype = self.doctype()?.to_string();
        let session = self.session().clone();
        if !session.can_do(MODIFY_DOCUMENT, Some(&doctype)) {
            return Err(DocError::Unauthorized(
                "User not authorized to modify document".into(),
            ));
        }

        let mut conn = session.connect(Role::Writer)?;
        if let Some(holder) = lock_holder(conn.as_mut(), id)? {
            if holder.user_id == session.user_id() {
                return Ok(());
            }
            if !opts.force {
                return Err(DocError::AlreadyLocked {
                    id: self.label(),
                    user: holder.user_name,
                });
            }
            if !session.can_do(FORCE_CHECKOUT, Some(&doctype)) {
                return Err(DocError::Unauthorized(
                    "User not authorized to force checkout".into(),
                ));
            }
            self.unlock(UnlockOptions::new().force(true).abandon(true))?;
        }

        let user_id = session.user_id();
        let label = self.label();
        transaction(conn.as_mut(), |c| {
            if let Some(holder) = lock_holder(c, id)? {
                if holder.user_id == user_id {
                    return Ok(());
                }
                return Err(DocError::AlreadyLocked {
                    id: label.clone(),
                    user: holder.user_name,
                });
            }
            c.execute(
                "INSERT INTO checkout (id, dt_out, usr, comment) VALUES (?, ?, ?, ?)",
                &[
                    Value::Integer(id),
                    now(),
                    Value::Integer(user_id),
                    Value::from(opts.comment.clone()),
                ],
            )?;
            Ok(())
        })?;
        log::info!("{} checked out by {}", label, session.user_name());
        Ok(())
    }

    /// Releases the lock on the document.
    ///
    /// Unless `abandon` is set, unversioned changes are saved as a new
    /// version first (blob included). A forced release which saves nothing
    /// is recorded in the audit trail.
    pub fn unlock(&mut self, opts: UnlockOptions) -> DocResult<()> {
        let id = self.require_id()?;
        let session = self.session().clone();
        let label = self.label();

        let mut conn = session.connect(Role::Writer)?;
        let holder = match lock_holder(conn.as_mut(), id)? {
            Some(holder) => holder,
            None => return Err(DocError::NotLocked(label)),
        };
        if holder.user_id != session.user_id() {
            let doctype = self.doctype()?.to_string();
            if !opts.force || !session.can_do(FORCE_CHECKIN, Some(&doctype)) {
                return Err(DocError::Unauthorized(format!(
                    "{} is checked out by {}",
                    label, holder.user_name
                )));
            }
        }

        let save_version = !opts.abandon && self.has_unversioned_changes()?;
        let user_id = session.user_id();
        let stamp = now();
        transaction(conn.as_mut(), |c| -> DocResult<()> {
            if save_version {
                let num = create_version(c, id, user_id, &stamp, opts.comment.as_deref())?;
                log::info!("saved version {} of {} on unlock", num, label);
            } else if opts.force {
                c.execute(
                    "INSERT INTO audit_trail (document, dt, usr, action, program, comment) \
                     SELECT ?, ?, ?, id, ?, ? FROM action WHERE name = ?",
                    &[
                        Value::Integer(id),
                        stamp.clone(),
                        Value::Integer(user_id),
                        Value::from(PROGRAM),
                        Value::from(opts.comment.clone()),
                        Value::from(UNLOCK_ACTION),
                    ],
                )?;
            }
            c.execute(
                "UPDATE checkout SET dt_in = ?, comment = COALESCE(?, comment) \
                 WHERE id = ? AND dt_in IS NULL",
                &[stamp.clone(), Value::from(opts.comment.clone()), Value::Integer(id)],
            )?;
            Ok(())
        })?;

        self.last_version = OnceCell::new();
        self.last_version_date = OnceCell::new();
        log::info!("{} released by {}", label, session.user_name());
        Ok(())
    }
}

fn create_version(
    conn: &mut dyn Connection,
    id: i64,
    user_id: i64,
    stamp: &Value,
    comment: Option<&str>,
) -> DocResult<i64> {
    let last = Query::new("doc_version", ["MAX(num)"])
        .where_(Condition::eq("id", id))
        .execute(conn)?
        .scalar()
        .as_i64()
        .unwrap_or(0);
    let num = last + 1;
    let inserted = conn.execute(
        "INSERT INTO doc_version \
         (id, num, dt, updated_dt, usr, val_status, val_date, publishable, \
          doc_type, title, xml, comment) \
         SELECT id, ?, ?, ?, ?, val_status, val_date, 'N', doc_type, title, xml, \
                COALESCE(?, comment) \
           FROM document WHERE id = ?",
        &[
            Value::Integer(num),
            stamp.clone(),
            stamp.clone(),
            Value::Integer(user_id),
            Value::from(comment),
            Value::Integer(id),
        ],
    )?;
    if inserted == 0 {
        return Err(DocError::NotFound(format!("document {} not found", id)));
    }
    conn.execute(
        "INSERT INTO version_blob_usage (blob_id, doc_id, doc_version) \
         SELECT blob_id, doc_id, ? FROM doc_blob_usage WHERE doc_id = ?",
        &[Value::Integer(num), Value::Integer(id)],
    )?;
    Ok(num)
}
