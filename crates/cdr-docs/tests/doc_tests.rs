//! Version resolution, properties and the legacy representation.

mod common;

use common::{Repo, ALICE, BOB};

use cdr_docs::{
    parse_before_date, Denormalizer, Doc, DocError, DocOptions, DocResult, LegacyOptions,
    VersionSpec,
};

fn versioned(repo: &Repo) -> i64 {
    let id = repo.add_doc("Summary", "Breast Cancer Treatment", "<Summary>current</Summary>");
    repo.add_version(id, 1, "2020-01-01 10:00:00", true, "<Summary>one</Summary>");
    repo.add_version(id, 2, "2020-02-01 10:00:00", false, "<Summary>two</Summary>");
    repo.add_version(id, 3, "2020-03-01 10:00:00", false, "<Summary>three</Summary>");
    id
}

#[test]
fn test_symbolic_versions_resolve() {
    let repo = Repo::new();
    let id = versioned(&repo);
    let session = repo.session(ALICE);

    let doc = Doc::load(session.clone(), id, VersionSpec::Current);
    assert_eq!(doc.version().unwrap(), None);
    assert_eq!(doc.xml().unwrap(), "<Summary>current</Summary>");

    let doc = Doc::load(session.clone(), id, VersionSpec::Last);
    assert_eq!(doc.version().unwrap(), Some(3));
    assert_eq!(doc.xml().unwrap(), "<Summary>three</Summary>");

    let doc = Doc::load(session.clone(), id, VersionSpec::LastPublishable);
    assert_eq!(doc.version().unwrap(), Some(1));
    assert_eq!(doc.publishable().unwrap(), Some(true));

    let doc = Doc::load(session.clone(), id, 2);
    assert_eq!(doc.xml().unwrap(), "<Summary>two</Summary>");
    assert_eq!(doc.publishable().unwrap(), Some(false));
    assert_eq!(doc.comment().unwrap(), Some("version 2"));
}

#[test]
fn test_before_date_is_strict() {
    let repo = Repo::new();
    let id = versioned(&repo);
    let session = repo.session(ALICE);

    let spec = VersionSpec::parse("before 2020-02-15").unwrap();
    let doc = Doc::load(session.clone(), id, spec);
    assert_eq!(doc.version().unwrap(), Some(2));

    let spec = VersionSpec::parse("before 2020-02-01 10:00:00").unwrap();
    let doc = Doc::load(session.clone(), id, spec);
    assert_eq!(doc.version().unwrap(), Some(1));

    let spec = VersionSpec::parse("before 2019-12-31").unwrap();
    let doc = Doc::load(session.clone(), id, spec);
    assert!(matches!(doc.version(), Err(DocError::NoVersionBefore(_))));

    let when = parse_before_date("2020-04-01").unwrap();
    let doc = Doc::load(session, id, VersionSpec::Current);
    assert_eq!(doc.version_before(when, Some(true)).unwrap(), 1);
    assert_eq!(doc.version_before(when, Some(false)).unwrap(), 3);
}

#[test]
fn test_non_positive_version_number_is_working_copy() {
    let repo = Repo::new();
    let id = versioned(&repo);

    for n in [0, -4] {
        let doc = Doc::load(repo.session(ALICE), id, VersionSpec::Number(n));
        assert_eq!(doc.version().unwrap(), None);
        assert_eq!(doc.xml().unwrap(), "<Summary>current</Summary>");
    }
}

#[test]
fn test_labeled_version() {
    let repo = Repo::new();
    let id = versioned(&repo);
    repo.label(id, 2, "Approved");
    let session = repo.session(ALICE);

    let doc = Doc::load(session.clone(), id, VersionSpec::parse("label Approved").unwrap());
    assert_eq!(doc.version().unwrap(), Some(2));

    let doc = Doc::load(session, id, VersionSpec::Label("Missing".into()));
    assert!(matches!(doc.version(), Err(DocError::NoLabeledVersion(_))));
}

#[test]
fn test_unversioned_document_failures() {
    let repo = Repo::new();
    let id = repo.add_doc("Summary", "Draft", "<Summary/>");
    let session = repo.session(ALICE);

    let doc = Doc::load(session.clone(), id, VersionSpec::Last);
    assert!(matches!(doc.version(), Err(DocError::NotVersioned)));

    let doc = Doc::load(session.clone(), id, VersionSpec::LastPublishable);
    let err = doc.xml().unwrap_err();
    assert!(err.is_no_publishable_version());

    let doc = Doc::load(session, id, VersionSpec::Current);
    assert_eq!(doc.last_version().unwrap(), None);
    assert!(!doc.has_unversioned_changes().unwrap());
}

#[test]
fn test_publishable_never_picks_unpublishable() {
    let repo = Repo::new();
    let id = repo.add_doc("Summary", "Only drafts", "<Summary/>");
    repo.add_version(id, 1, "2020-01-01 00:00:00", false, "<Summary/>");
    repo.add_version(id, 2, "2020-01-02 00:00:00", false, "<Summary/>");
    let doc = Doc::load(repo.session(ALICE), id, VersionSpec::parse("lastp").unwrap());
    assert!(matches!(doc.version(), Err(DocError::NoPublishableVersion)));
}

#[test]
fn test_control_properties() {
    let repo = Repo::new();
    let id = versioned(&repo);
    repo.audit(id, "MODIFY DOCUMENT", "2020-03-05 09:00:00", BOB);
    repo.audit(id, "MODIFY DOCUMENT", "2020-02-05 09:00:00", ALICE);
    let doc = Doc::load(repo.session(ALICE), id, VersionSpec::Current);

    assert_eq!(doc.doctype().unwrap(), "Summary");
    assert_eq!(doc.title().unwrap(), Some("Breast Cancer Treatment"));
    assert_eq!(doc.creator().unwrap(), Some("alice"));
    assert_eq!(doc.modifier().unwrap(), Some("bob"));
    assert_eq!(
        doc.modified().unwrap(),
        parse_before_date("2020-03-05 09:00:00")
    );
    assert_eq!(doc.active_status().unwrap(), Some("A"));
    assert_eq!(doc.val_status().unwrap(), Some("U"));
    assert_eq!(doc.last_version().unwrap(), Some(3));
    assert!(doc.has_unversioned_changes().unwrap());
    assert_eq!(doc.checked_out_by().unwrap(), None);
    assert!(!doc.ready_for_review().unwrap());
    assert_eq!(doc.cdr_id().as_deref(), Some(cdr_docs::format_cdr_id(id).as_str()));
}

#[test]
fn test_blob_lookup_per_version() {
    let repo = Repo::new();
    let id = versioned(&repo);
    repo.add_blob(id, Some(2), b"image bytes");
    let session = repo.session(ALICE);

    let doc = Doc::load(session.clone(), id, 2);
    assert!(doc.has_blob().unwrap());
    assert_eq!(doc.blob().unwrap(), Some(&b"image bytes"[..]));

    let doc = Doc::load(session.clone(), id, 1);
    assert!(!doc.has_blob().unwrap());
    assert_eq!(doc.blob().unwrap(), None);

    let doc = Doc::load(session, id, VersionSpec::Current);
    assert!(doc.has_blob().unwrap());
}

#[test]
fn test_set_xml_discards_derived_state() {
    let repo = Repo::new();
    let id = versioned(&repo);
    let mut doc = Doc::load(repo.session(ALICE), id, VersionSpec::Last);
    assert_eq!(doc.root().unwrap().text(), "three");
    doc.set_xml("<Summary>edited</Summary>");
    assert_eq!(doc.root().unwrap().text(), "edited");
    assert_eq!(doc.version().unwrap(), Some(3));
}

#[test]
fn test_supplied_xml_needs_no_database() {
    let repo = Repo::new();
    let doc = Doc::new(
        repo.session(ALICE),
        DocOptions::new()
            .with_xml("<Term><PreferredName>x</PreferredName></Term>")
            .with_doctype("Term"),
    );
    assert_eq!(doc.id(), None);
    assert_eq!(doc.doctype().unwrap(), "Term");
    assert_eq!(doc.root().unwrap().find("PreferredName").unwrap().text(), "x");
    assert!(matches!(
        doc.legacy_document(LegacyOptions::new()),
        Err(DocError::MissingDocumentId)
    ));
}

#[test]
fn test_id_from_title() {
    let repo = Repo::new();
    let id = repo.add_doc("Filter", "Vendor Filter/Summary", "<x/>");
    repo.add_doc("Filter", "Twin", "<x/>");
    repo.add_doc("Filter", "Twin", "<x/>");
    let mut conn = repo.writer();

    assert_eq!(
        Doc::id_from_title("Vendor+Filter@@SLASH@@Summary", &mut conn).unwrap(),
        Some(id)
    );
    assert_eq!(Doc::id_from_title("Nobody", &mut conn).unwrap(), None);
    assert!(matches!(
        Doc::id_from_title("Twin", &mut conn),
        Err(DocError::AmbiguousTitle(_))
    ));
}

#[test]
fn test_legacy_document_read_only_mode() {
    let repo = Repo::new();
    let id = versioned(&repo);
    repo.add_blob(id, Some(1), &[0xFF; 60]);
    let doc = Doc::load(repo.session(ALICE), id, 1);

    let cdr_doc = doc
        .legacy_document(LegacyOptions::new().with_xml().with_blob())
        .unwrap();
    assert_eq!(cdr_doc.attr("Type"), Some("Summary"));
    assert_eq!(cdr_doc.attr("Id"), Some(cdr_docs::format_cdr_id(id).as_str()));

    let control = cdr_doc.find("CdrDocCtl").unwrap();
    let title = control.find("DocTitle").unwrap();
    assert_eq!(title.attr("readonly"), Some("yes"));
    let version = control.find("DocVersion").unwrap();
    assert_eq!(version.text(), "1");
    assert_eq!(version.attr("Publishable"), Some("Y"));
    assert!(control.find("Create").is_none());
    assert!(control.find("ReadyForReview").is_none());

    assert_eq!(cdr_doc.find("CdrDocXml").unwrap().text(), "<Summary>one</Summary>");
    let xml = cdr_doc.to_xml();
    assert!(xml.contains("<CdrDocXml><![CDATA[<Summary>one</Summary>]]></CdrDocXml>"));

    let blob = cdr_doc.find("CdrDocBlob").unwrap();
    assert_eq!(blob.attr("encoding"), Some("base64"));
    assert_eq!(blob.text().trim(), "/".repeat(76) + "\n" + &"/".repeat(4));
}

#[test]
fn test_legacy_document_filtering_mode() {
    let repo = Repo::new();
    let id = versioned(&repo);
    repo.audit(id, "MODIFY DOCUMENT", "2020-02-05 09:00:00", BOB);
    let doc = Doc::load(repo.session(ALICE), id, VersionSpec::Current);

    let control = doc.legacy_doc_control(true).unwrap();
    assert_eq!(control.find("DocTitle").unwrap().attr("readonly"), None);
    assert!(control.find("DocVersion").is_none());
    assert_eq!(control.find("Create/Date").unwrap().text(), "2020-01-01T00:00:00");
    assert_eq!(control.find("Create/User").unwrap().text(), "alice");
    assert_eq!(control.find("Modify/Date").unwrap().text(), "2020-02-05T09:00:00");
    assert_eq!(control.find("Modify/User").unwrap().text(), "bob");
    assert_eq!(
        control.find("DocModified").unwrap().text(),
        "2020-02-05T09:00:00"
    );
    assert!(control.find("FirstPub").is_none());
}

struct Upper;

impl Denormalizer for Upper {
    fn denormalize(&self, doc: &Doc) -> DocResult<String> {
        Ok(doc.xml()?.to_uppercase())
    }
}

#[test]
fn test_legacy_document_denormalized() {
    let repo = Repo::new();
    let id = versioned(&repo);
    let doc = Doc::load(repo.session(ALICE), id, 3);
    let cdr_doc = doc
        .legacy_document(LegacyOptions::new().denormalized(&Upper))
        .unwrap();
    assert_eq!(
        cdr_doc.find("CdrDocXml").unwrap().text(),
        "<SUMMARY>THREE</SUMMARY>"
    );
    assert_eq!(doc.denormalized_xml(&Upper).unwrap(), "<SUMMARY>THREE</SUMMARY>");
}
