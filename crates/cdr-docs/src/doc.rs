//! The versioned document entity.
//!
//! A [`Doc`] stands for either the current working copy of a document or one
//! numbered version of it; which one is decided by the [`VersionSpec`] given
//! at construction. Every property is loaded on first use and then kept for
//! the life of the object. Replacing the XML drops the parsed tree, the
//! resolved version number and the denormalized XML.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use once_cell::sync::OnceCell;

use cdr_query::{Condition, Connection, Query, ResultSet, Role, Value};

use crate::error::{DocError, DocResult};
use crate::session::Session;
use crate::version::VersionSpec;
use crate::xml::{self, Element};

/// Literal prefix of canonical document ids.
pub const CDR_ID_PREFIX: &str = "CDR";

/// Formats a document id in canonical form (`CDR0000012345`).
pub fn format_cdr_id(id: i64) -> String {
    format!("{}{:010}", CDR_ID_PREFIX, id)
}

/// Options used to construct a [`Doc`].
#[derive(Debug, Clone, Default)]
pub struct DocOptions {
    /// Id of an existing document.
    pub id: Option<i64>,
    /// XML supplied by the caller instead of loaded from the database.
    pub xml: Option<String>,
    /// Blob supplied by the caller.
    pub blob: Option<Vec<u8>>,
    /// Requested version.
    pub version: VersionSpec,
    /// Document type name supplied by the caller.
    pub doctype: Option<String>,
}

impl DocOptions {
    /// Options for a document with nothing set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the document id.
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Supplies the XML.
    pub fn with_xml(mut self, xml: impl Into<String>) -> Self {
        self.xml = Some(xml.into());
        self
    }

    /// Supplies the blob.
    pub fn with_blob(mut self, blob: Vec<u8>) -> Self {
        self.blob = Some(blob);
        self
    }

    /// Selects a version.
    pub fn with_version(mut self, version: impl Into<VersionSpec>) -> Self {
        self.version = version.into();
        self
    }

    /// Supplies the document type name.
    pub fn with_doctype(mut self, doctype: impl Into<String>) -> Self {
        self.doctype = Some(doctype.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct AuditEntry {
    pub(crate) when: Option<NaiveDateTime>,
    pub(crate) who: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct CommonProps {
    title: Option<String>,
    val_status: Option<String>,
    val_date: Option<NaiveDateTime>,
    comment: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct StatusProps {
    active_status: Option<String>,
    first_pub: Option<NaiveDateTime>,
}

/// A CDR document, or one version of it.
pub struct Doc {
    session: Arc<dyn Session>,
    id: Option<i64>,
    spec: VersionSpec,
    pub(crate) version: OnceCell<Option<i64>>,
    xml: OnceCell<String>,
    root: OnceCell<Element>,
    pub(crate) denormalized: OnceCell<String>,
    blob: OnceCell<Option<Vec<u8>>>,
    blob_id: OnceCell<Option<i64>>,
    doctype: OnceCell<String>,
    pub(crate) last_version: OnceCell<Option<i64>>,
    pub(crate) last_version_date: OnceCell<Option<NaiveDateTime>>,
    creation: OnceCell<AuditEntry>,
    modification: OnceCell<AuditEntry>,
    status: OnceCell<StatusProps>,
    common: OnceCell<CommonProps>,
    publishable: OnceCell<Option<bool>>,
    ready_for_review: OnceCell<bool>,
}

fn preset<T>(value: Option<T>) -> OnceCell<T> {
    let cell = OnceCell::new();
    if let Some(value) = value {
        let _ = cell.set(value);
    }
    cell
}

impl Doc {
    /// Creates a document object. Nothing is read from the database yet.
    pub fn new(session: Arc<dyn Session>, opts: DocOptions) -> Self {
        let blob = preset(opts.blob.map(Some));
        Self {
            session,
            id: opts.id,
            spec: opts.version,
            version: OnceCell::new(),
            xml: preset(opts.xml),
            root: OnceCell::new(),
            denormalized: OnceCell::new(),
            blob,
            blob_id: OnceCell::new(),
            doctype: preset(opts.doctype),
            last_version: OnceCell::new(),
            last_version_date: OnceCell::new(),
            creation: OnceCell::new(),
            modification: OnceCell::new(),
            status: OnceCell::new(),
            common: OnceCell::new(),
            publishable: OnceCell::new(),
            ready_for_review: OnceCell::new(),
        }
    }

    /// Shorthand for a stored document at a given version.
    pub fn load(session: Arc<dyn Session>, id: i64, version: impl Into<VersionSpec>) -> Self {
        Self::new(session, DocOptions::new().with_id(id).with_version(version))
    }

    /// Session the document was opened for.
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Integer id, if the document exists in the repository.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Canonical string id (`CDR0000012345`).
    pub fn cdr_id(&self) -> Option<String> {
        self.id.map(format_cdr_id)
    }

    /// Version specifier given at construction.
    pub fn version_spec(&self) -> &VersionSpec {
        &self.spec
    }

    pub(crate) fn require_id(&self) -> DocResult<i64> {
        self.id.ok_or(DocError::MissingDocumentId)
    }

    pub(crate) fn label(&self) -> String {
        self.cdr_id().unwrap_or_else(|| "new document".to_string())
    }

    /// Runs a query on a fresh read-only connection.
    pub(crate) fn fetch(&self, query: &Query) -> DocResult<ResultSet> {
        let mut conn = self.session.connect(Role::Guest)?;
        Ok(query.execute(conn.as_mut())?)
    }

    // =========================================================================
    // Version resolution
    // =========================================================================

    /// Version number this object stands for; `None` means the working copy.
    ///
    /// Resolved once and cached.
    pub fn version(&self) -> DocResult<Option<i64>> {
        self.version
            .get_or_try_init(|| self.resolve_version())
            .copied()
    }

    fn resolve_version(&self) -> DocResult<Option<i64>> {
        if self.id.is_none() {
            return Ok(None);
        }
        match &self.spec {
            VersionSpec::Number(n) if *n > 0 => Ok(Some(*n)),
            VersionSpec::Current | VersionSpec::Number(_) => Ok(None),
            VersionSpec::Last => match self.last_version()? {
                Some(n) => Ok(Some(n)),
                None => Err(DocError::NotVersioned),
            },
            VersionSpec::LastPublishable => match self.last_publishable_version()? {
                Some(n) => Ok(Some(n)),
                None => Err(DocError::NoPublishableVersion),
            },
            VersionSpec::Before(when) => self.version_before(*when, None).map(Some),
            VersionSpec::Label(label) => self.labeled_version(label).map(Some),
        }
    }

    /// Most recently saved version number.
    pub fn last_version(&self) -> DocResult<Option<i64>> {
        self.last_version
            .get_or_try_init(|| {
                let id = match self.id {
                    Some(id) => id,
                    None => return Ok(None),
                };
                let query = Query::new("doc_version", ["MAX(num)"]).where_(Condition::eq("id", id));
                Ok(self.fetch(&query)?.scalar().as_i64())
            })
            .copied()
    }

    /// When the most recent version was saved.
    pub fn last_version_date(&self) -> DocResult<Option<NaiveDateTime>> {
        self.last_version_date
            .get_or_try_init(|| {
                let (id, num) = match (self.id, self.last_version()?) {
                    (Some(id), Some(num)) => (id, num),
                    _ => return Ok(None),
                };
                let query = Query::new("doc_version", ["dt"])
                    .where_(Condition::eq("id", id))
                    .where_(Condition::eq("num", num));
                Ok(self.fetch(&query)?.scalar().as_datetime())
            })
            .copied()
    }

    /// Most recently saved publishable version number.
    ///
    /// Not cached; publishable versions can appear at any time.
    pub fn last_publishable_version(&self) -> DocResult<Option<i64>> {
        let id = match self.id {
            Some(id) => id,
            None => return Ok(None),
        };
        let query = Query::new("doc_version", ["MAX(num)"])
            .where_(Condition::eq("id", id))
            .where_("publishable = 'Y'");
        Ok(self.fetch(&query)?.scalar().as_i64())
    }

    /// Latest version created strictly before `when`.
    ///
    /// `publishable` restricts the search to publishable (`Some(true)`) or
    /// unpublishable (`Some(false)`) versions.
    pub fn version_before(&self, when: NaiveDateTime, publishable: Option<bool>) -> DocResult<i64> {
        let id = self.require_id()?;
        let mut query = Query::new("doc_version", ["MAX(num)"])
            .where_(Condition::eq("id", id))
            .where_(Condition::new("dt", when, "<"));
        match publishable {
            Some(true) => query = query.where_("publishable = 'Y'"),
            Some(false) => query = query.where_("publishable = 'N'"),
            None => {}
        }
        self.fetch(&query)?
            .scalar()
            .as_i64()
            .ok_or_else(|| DocError::NoVersionBefore(when.format("%Y-%m-%d %H:%M:%S").to_string()))
    }

    /// Latest version carrying `label`.
    pub fn labeled_version(&self, label: &str) -> DocResult<i64> {
        let id = self.require_id()?;
        let query = Query::new("doc_version v", ["MAX(v.num)"])
            .join("doc_version_label d", ["d.document = v.id", "d.num = v.num"])
            .join("version_label l", ["l.id = d.label"])
            .where_(Condition::eq("v.id", id))
            .where_(Condition::eq("l.name", label));
        self.fetch(&query)?
            .scalar()
            .as_i64()
            .ok_or_else(|| DocError::NoLabeledVersion(label.to_string()))
    }

    // =========================================================================
    // Content
    // =========================================================================

    /// The document's XML for this version.
    pub fn xml(&self) -> DocResult<&str> {
        self.xml
            .get_or_try_init(|| {
                let id = self.require_id()?;
                let query = match self.version()? {
                    Some(num) => Query::new("doc_version", ["xml"]).where_(Condition::eq("num", num)),
                    None => Query::new("document", ["xml"]),
                }
                .where_(Condition::eq("id", id));
                self.fetch(&query)?
                    .fetchone()
                    .and_then(|row| row[0].to_text())
                    .ok_or_else(|| DocError::NotFound(format!("no xml found for {}", self.label())))
            })
            .map(String::as_str)
    }

    /// Replaces the XML, discarding everything derived from the old value.
    pub fn set_xml(&mut self, xml: impl Into<String>) {
        self.xml = preset(Some(xml.into()));
        self.root = OnceCell::new();
        self.version = OnceCell::new();
        self.denormalized = OnceCell::new();
    }

    /// Parsed XML tree.
    pub fn root(&self) -> DocResult<&Element> {
        self.root.get_or_try_init(|| xml::parse(self.xml()?))
    }

    /// Whether this version has a blob, without loading the blob's bytes.
    pub fn has_blob(&self) -> DocResult<bool> {
        if let Some(blob) = self.blob.get() {
            return Ok(blob.is_some());
        }
        Ok(self.blob_id()?.is_some())
    }

    fn blob_id(&self) -> DocResult<Option<i64>> {
        self.blob_id
            .get_or_try_init(|| {
                let id = match self.id {
                    Some(id) => id,
                    None => return Ok(None),
                };
                let query = match self.version()? {
                    Some(num) => Query::new("version_blob_usage", ["blob_id"])
                        .where_(Condition::eq("doc_version", num)),
                    None => Query::new("doc_blob_usage", ["blob_id"]),
                }
                .where_(Condition::eq("doc_id", id));
                Ok(self.fetch(&query)?.scalar().as_i64())
            })
            .copied()
    }

    /// Bytes of this version's blob.
    pub fn blob(&self) -> DocResult<Option<&[u8]>> {
        self.blob
            .get_or_try_init(|| {
                let blob_id = match self.blob_id()? {
                    Some(blob_id) => blob_id,
                    None => return Ok(None),
                };
                let query = Query::new("doc_blob", ["data"]).where_(Condition::eq("id", blob_id));
                match self.fetch(&query)?.fetchone() {
                    Some(row) => Ok(row[0].as_bytes().map(<[u8]>::to_vec)),
                    None => Err(DocError::NotFound(format!("no blob found for {}", self.label()))),
                }
            })
            .map(|blob| blob.as_deref())
    }

    /// Replaces the blob.
    pub fn set_blob(&mut self, blob: Option<Vec<u8>>) {
        self.blob = preset(Some(blob));
    }

    /// Document type name (looked up on the version row for versions).
    pub fn doctype(&self) -> DocResult<&str> {
        self.doctype
            .get_or_try_init(|| {
                let id = self.require_id()?;
                let version = self.version()?;
                let table = if version.is_some() { "doc_version d" } else { "document d" };
                let mut query = Query::new("doc_type t", ["t.name"])
                    .join(table, ["d.doc_type = t.id"])
                    .where_(Condition::eq("d.id", id));
                if let Some(num) = version {
                    query = query.where_(Condition::eq("d.num", num));
                }
                let what = if version.is_some() { "version" } else { "document" };
                self.fetch(&query)?
                    .fetchone()
                    .and_then(|row| row[0].to_text())
                    .ok_or_else(|| DocError::NotFound(format!("{} not found for {}", what, self.label())))
            })
            .map(String::as_str)
    }

    // =========================================================================
    // Control information
    // =========================================================================

    /// Account currently holding a lock on the document.
    pub fn checked_out_by(&self) -> DocResult<Option<String>> {
        let id = match self.id {
            Some(id) => id,
            None => return Ok(None),
        };
        let query = Query::new("usr u", ["u.name"])
            .join("checkout c", ["c.usr = u.id"])
            .where_(Condition::eq("c.id", id))
            .where_("c.dt_in IS NULL");
        Ok(self.fetch(&query)?.scalar().to_text())
    }

    fn audit_entry(&self, action: &str, order: &str) -> DocResult<AuditEntry> {
        let id = match self.id {
            Some(id) => id,
            None => return Ok(AuditEntry::default()),
        };
        let query = Query::new("audit_trail t", ["t.dt", "u.name"])
            .join("usr u", ["u.id = t.usr"])
            .join("action a", ["a.id = t.action"])
            .where_(Condition::eq("t.document", id))
            .where_(Condition::eq("a.name", action))
            .order([order])?
            .limit(1)?;
        Ok(match self.fetch(&query)?.fetchone() {
            Some(row) => AuditEntry {
                when: row[0].as_datetime(),
                who: row[1].to_text(),
            },
            None => AuditEntry::default(),
        })
    }

    fn creation(&self) -> DocResult<&AuditEntry> {
        self.creation
            .get_or_try_init(|| self.audit_entry("ADD DOCUMENT", "t.dt"))
    }

    fn modification(&self) -> DocResult<&AuditEntry> {
        self.modification
            .get_or_try_init(|| self.audit_entry("MODIFY DOCUMENT", "t.dt DESC"))
    }

    /// Account which created the document.
    pub fn creator(&self) -> DocResult<Option<&str>> {
        Ok(self.creation()?.who.as_deref())
    }

    /// When the document was created.
    pub fn created(&self) -> DocResult<Option<NaiveDateTime>> {
        Ok(self.creation()?.when)
    }

    /// Account which most recently modified the document.
    pub fn modifier(&self) -> DocResult<Option<&str>> {
        Ok(self.modification()?.who.as_deref())
    }

    /// When the document was most recently modified, if ever.
    pub fn modified(&self) -> DocResult<Option<NaiveDateTime>> {
        Ok(self.modification()?.when)
    }

    /// Most recent save of any kind.
    pub fn last_saved(&self) -> DocResult<Option<NaiveDateTime>> {
        Ok(self.modified()?.or(self.created()?))
    }

    /// Whether the working copy was saved after the last version was made.
    pub fn has_unversioned_changes(&self) -> DocResult<bool> {
        Ok(match (self.last_version_date()?, self.last_saved()?) {
            (Some(versioned), Some(saved)) => versioned < saved,
            _ => false,
        })
    }

    fn status(&self) -> DocResult<&StatusProps> {
        self.status.get_or_try_init(|| {
            let id = match self.id {
                Some(id) => id,
                None => return Ok(StatusProps::default()),
            };
            let query = Query::new("document", ["active_status", "first_pub"])
                .where_(Condition::eq("id", id));
            Ok(match self.fetch(&query)?.fetchone() {
                Some(row) => StatusProps {
                    active_status: row[0].to_text(),
                    first_pub: row[1].as_datetime(),
                },
                None => StatusProps::default(),
            })
        })
    }

    /// `A` for active documents, `I` for blocked ones.
    pub fn active_status(&self) -> DocResult<Option<&str>> {
        Ok(self.status()?.active_status.as_deref())
    }

    /// When the document was first published, if known.
    pub fn first_pub(&self) -> DocResult<Option<NaiveDateTime>> {
        Ok(self.status()?.first_pub)
    }

    /// For numbered versions, whether the version is publishable.
    pub fn publishable(&self) -> DocResult<Option<bool>> {
        self.publishable
            .get_or_try_init(|| {
                let (id, num) = match (self.id, self.version()?) {
                    (Some(id), Some(num)) => (id, num),
                    _ => return Ok(None),
                };
                let query = Query::new("doc_version", ["publishable"])
                    .where_(Condition::eq("id", id))
                    .where_(Condition::eq("num", num));
                Ok(self
                    .fetch(&query)?
                    .fetchone()
                    .map(|row| row[0] == Value::from("Y")))
            })
            .copied()
    }

    /// Whether a new document is flagged as ready for review.
    pub fn ready_for_review(&self) -> DocResult<bool> {
        self.ready_for_review
            .get_or_try_init(|| {
                let id = match self.id {
                    Some(id) => id,
                    None => return Ok(false),
                };
                let query = Query::new("ready_for_review", ["doc_id"])
                    .where_(Condition::eq("doc_id", id));
                Ok(!self.fetch(&query)?.is_empty())
            })
            .copied()
    }

    fn common(&self) -> DocResult<&CommonProps> {
        self.common.get_or_try_init(|| {
            let id = match self.id {
                Some(id) => id,
                None => return Ok(CommonProps::default()),
            };
            let version = self.version()?;
            let table = if version.is_some() { "doc_version" } else { "document" };
            let mut query = Query::new(table, ["title", "val_status", "val_date", "comment"])
                .where_(Condition::eq("id", id));
            if let Some(num) = version {
                query = query.where_(Condition::eq("num", num));
            }
            Ok(match self.fetch(&query)?.fetchone() {
                Some(row) => CommonProps {
                    title: row[0].to_text(),
                    val_status: row[1].to_text(),
                    val_date: row[2].as_datetime(),
                    comment: row[3].to_text(),
                },
                None => CommonProps::default(),
            })
        })
    }

    /// Title of this version.
    pub fn title(&self) -> DocResult<Option<&str>> {
        Ok(self.common()?.title.as_deref())
    }

    /// `V` (valid), `I` (invalid) or `U` (unvalidated).
    pub fn val_status(&self) -> DocResult<Option<&str>> {
        Ok(self.common()?.val_status.as_deref())
    }

    /// When this version was last validated.
    pub fn val_date(&self) -> DocResult<Option<NaiveDateTime>> {
        Ok(self.common()?.val_date)
    }

    /// Comment describing this version.
    pub fn comment(&self) -> DocResult<Option<&str>> {
        Ok(self.common()?.comment.as_deref())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Pulls the integer id out of forms like `CDR0000012345#F1` or `12345`.
    pub fn extract_id(arg: &str) -> DocResult<i64> {
        let head = arg.split('#').next().unwrap_or("");
        let digits: String = head.chars().filter(char::is_ascii_digit).collect();
        match digits.parse::<i64>() {
            Ok(id) if id > 0 => Ok(id),
            _ => Err(DocError::InvalidDocumentId(arg.to_string())),
        }
    }

    /// Finds the document with a title.
    ///
    /// `@@SLASH@@` stands for `/` and `+` for a space, as titles arrive
    /// inside URIs. Fails if more than one document has the title.
    pub fn id_from_title(title: &str, conn: &mut dyn Connection) -> DocResult<Option<i64>> {
        let title = title.replace("@@SLASH@@", "/").replace('+', " ");
        let query = Query::new("document", ["id"]).where_(Condition::eq("title", title.as_str()));
        let rows = query.execute(conn)?.into_rows();
        if rows.len() > 1 {
            return Err(DocError::AmbiguousTitle(title));
        }
        Ok(rows.first().and_then(|row| row[0].as_i64()))
    }

    /// Concatenated text of an optional element.
    pub fn get_text(node: Option<&Element>) -> Option<String> {
        xml::get_text(node)
    }
}

/// Formats a date or date/time string the way XML expects.
///
/// Keeps at most 19 characters and puts `T` between date and time:
/// `2020-01-02` stays as is, `2020-01-02 03:04:05.123` becomes
/// `2020-01-02T03:04:05`.
pub fn make_xml_date_string(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    let truncated: String = value.chars().take(19).collect();
    Some(truncated.replace(' ', "T"))
}

/// [`make_xml_date_string`] for a date/time value.
pub fn xml_date(value: Option<NaiveDateTime>) -> Option<String> {
    let text = value.map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string());
    make_xml_date_string(text.as_deref())
}

impl fmt::Debug for Doc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Doc")
            .field("id", &self.id)
            .field("version", &self.spec)
            .field("user", &self.session.user_name())
            .finish_non_exhaustive()
    }
}
