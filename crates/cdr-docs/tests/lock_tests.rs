//! Checkout protocol against a scratch repository.

mod common;

use std::sync::Arc;

use common::{Repo, ALICE, BOB};

use cdr_docs::{
    Doc, DocError, LockOptions, Session, UnlockOptions, VersionSpec, FORCE_CHECKIN,
    FORCE_CHECKOUT, MODIFY_DOCUMENT,
};

fn open_locks(repo: &Repo, id: i64) -> i64 {
    repo.count("checkout", &format!("id = {} AND dt_in IS NULL", id))
}

#[test]
fn test_relock_by_holder_is_noop() {
    let repo = Repo::new();
    let id = repo.add_doc("Summary", "Lockable", "<Summary/>");
    let mut doc = Doc::load(repo.session(ALICE), id, VersionSpec::Current);

    doc.lock(LockOptions::new().comment("editing")).unwrap();
    doc.lock(LockOptions::new()).unwrap();

    assert_eq!(open_locks(&repo, id), 1);
    assert_eq!(repo.count("checkout", "1 = 1"), 1);
    let holder = doc.lock_holder().unwrap().unwrap();
    assert_eq!(holder.user_id, ALICE);
    assert_eq!(holder.user_name, "alice");
    assert_eq!(doc.checked_out_by().unwrap().as_deref(), Some("alice"));
}

#[test]
fn test_lock_held_by_other_user() {
    let repo = Repo::new();
    let id = repo.add_doc("Summary", "Contested", "<Summary/>");
    Doc::load(repo.session(ALICE), id, VersionSpec::Current)
        .lock(LockOptions::new())
        .unwrap();

    let mut doc = Doc::load(repo.session(BOB), id, VersionSpec::Current);
    match doc.lock(LockOptions::new()) {
        Err(DocError::AlreadyLocked { user, .. }) => assert_eq!(user, "alice"),
        other => panic!("expected AlreadyLocked, got {:?}", other),
    }
    assert_eq!(open_locks(&repo, id), 1);
}

#[test]
fn test_forced_takeover_records_unlock() {
    let repo = Repo::new();
    let id = repo.add_doc("Summary", "Taken", "<Summary/>");
    Doc::load(repo.session(ALICE), id, VersionSpec::Current)
        .lock(LockOptions::new())
        .unwrap();

    let mut doc = Doc::load(repo.session(BOB), id, VersionSpec::Current);
    doc.lock(LockOptions::new().force(true).comment("taking over"))
        .unwrap();

    assert_eq!(open_locks(&repo, id), 1);
    assert_eq!(doc.lock_holder().unwrap().unwrap().user_id, BOB);
    assert_eq!(
        repo.count(
            "audit_trail",
            "action = (SELECT id FROM action WHERE name = 'UNLOCK') AND usr = 2"
        ),
        1
    );
}

#[test]
fn test_force_needs_permission() {
    let repo = Repo::new();
    let id = repo.add_doc("Summary", "Guarded", "<Summary/>");
    Doc::load(repo.session(ALICE), id, VersionSpec::Current)
        .lock(LockOptions::new())
        .unwrap();

    let bob: Arc<dyn Session> = Arc::new(repo.user(BOB).grant(MODIFY_DOCUMENT));
    let mut doc = Doc::load(bob, id, VersionSpec::Current);
    assert!(matches!(
        doc.lock(LockOptions::new().force(true)),
        Err(DocError::Unauthorized(_))
    ));
    assert!(matches!(
        doc.unlock(UnlockOptions::new().force(true)),
        Err(DocError::Unauthorized(_))
    ));
    assert_eq!(doc.lock_holder().unwrap().unwrap().user_id, ALICE);
}

#[test]
fn test_forced_takeover_needs_force_checkin_too() {
    let repo = Repo::new();
    let id = repo.add_doc("Summary", "Scoped", "<Summary/>");
    Doc::load(repo.session(ALICE), id, VersionSpec::Current)
        .lock(LockOptions::new())
        .unwrap();

    let checkout_only: Arc<dyn Session> = Arc::new(
        repo.user(BOB)
            .grant(MODIFY_DOCUMENT)
            .grant_for(FORCE_CHECKOUT, "Summary"),
    );
    let mut doc = Doc::load(checkout_only, id, VersionSpec::Current);
    assert!(matches!(
        doc.lock(LockOptions::new().force(true)),
        Err(DocError::Unauthorized(_))
    ));
    assert_eq!(open_locks(&repo, id), 1);
    assert_eq!(doc.lock_holder().unwrap().unwrap().user_id, ALICE);

    let both: Arc<dyn Session> = Arc::new(
        repo.user(BOB)
            .grant(MODIFY_DOCUMENT)
            .grant_for(FORCE_CHECKOUT, "Summary")
            .grant_for(FORCE_CHECKIN, "Summary"),
    );
    let mut doc = Doc::load(both, id, VersionSpec::Current);
    doc.lock(LockOptions::new().force(true)).unwrap();
    assert_eq!(open_locks(&repo, id), 1);
    assert_eq!(doc.lock_holder().unwrap().unwrap().user_id, BOB);
}

#[test]
fn test_lock_needs_modify_permission() {
    let repo = Repo::new();
    let id = repo.add_doc("Summary", "Read only", "<Summary/>");
    let reader: Arc<dyn Session> = Arc::new(repo.user(BOB).grant_for(MODIFY_DOCUMENT, "Term"));
    let mut doc = Doc::load(reader, id, VersionSpec::Current);
    assert!(matches!(
        doc.lock(LockOptions::new()),
        Err(DocError::Unauthorized(_))
    ));
    assert_eq!(open_locks(&repo, id), 0);
}

#[test]
fn test_unlock_requires_open_lock() {
    let repo = Repo::new();
    let id = repo.add_doc("Summary", "Free", "<Summary/>");
    let mut doc = Doc::load(repo.session(ALICE), id, VersionSpec::Current);
    assert!(matches!(
        doc.unlock(UnlockOptions::new()),
        Err(DocError::NotLocked(_))
    ));
}

#[test]
fn test_unlock_by_other_user_without_force() {
    let repo = Repo::new();
    let id = repo.add_doc("Summary", "Mine", "<Summary/>");
    Doc::load(repo.session(ALICE), id, VersionSpec::Current)
        .lock(LockOptions::new())
        .unwrap();
    let mut doc = Doc::load(repo.session(BOB), id, VersionSpec::Current);
    assert!(matches!(
        doc.unlock(UnlockOptions::new()),
        Err(DocError::Unauthorized(_))
    ));
    assert_eq!(open_locks(&repo, id), 1);
}

#[test]
fn test_unlock_saves_unversioned_changes() {
    let repo = Repo::new();
    let id = repo.add_doc("Summary", "Edited", "<Summary>working</Summary>");
    repo.add_version(id, 1, "2020-01-10 00:00:00", true, "<Summary>v1</Summary>");
    repo.audit(id, "MODIFY DOCUMENT", "2020-01-20 00:00:00", ALICE);
    repo.add_blob(id, Some(1), b"blob");
    let session = repo.session(ALICE);

    let mut doc = Doc::load(session.clone(), id, VersionSpec::Current);
    doc.lock(LockOptions::new()).unwrap();
    assert!(doc.has_unversioned_changes().unwrap());
    doc.unlock(UnlockOptions::new().comment("done")).unwrap();

    assert_eq!(open_locks(&repo, id), 0);
    assert_eq!(doc.last_version().unwrap(), Some(2));
    let saved = Doc::load(session, id, VersionSpec::Last);
    assert_eq!(saved.xml().unwrap(), "<Summary>working</Summary>");
    assert_eq!(saved.comment().unwrap(), Some("done"));
    assert_eq!(saved.publishable().unwrap(), Some(false));
    assert_eq!(saved.blob().unwrap(), Some(&b"blob"[..]));
}

#[test]
fn test_abandon_skips_version() {
    let repo = Repo::new();
    let id = repo.add_doc("Summary", "Abandoned", "<Summary>working</Summary>");
    repo.add_version(id, 1, "2020-01-10 00:00:00", true, "<Summary>v1</Summary>");
    repo.audit(id, "MODIFY DOCUMENT", "2020-01-20 00:00:00", ALICE);

    let mut doc = Doc::load(repo.session(ALICE), id, VersionSpec::Current);
    doc.lock(LockOptions::new()).unwrap();
    doc.unlock(UnlockOptions::new().abandon(true)).unwrap();

    assert_eq!(doc.last_version().unwrap(), Some(1));
    assert_eq!(open_locks(&repo, id), 0);
    assert_eq!(
        repo.count(
            "audit_trail",
            "action = (SELECT id FROM action WHERE name = 'UNLOCK')"
        ),
        0
    );
}
