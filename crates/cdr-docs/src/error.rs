//! Error types for document access, locking and term resolution.

use cdr_query::QueryError;
use thiserror::Error;

/// Errors raised by document store operations.
#[derive(Error, Debug)]
pub enum DocError {
    /// The version specifier is not one of the recognized forms.
    #[error("invalid version spec {0:?}")]
    InvalidVersionSpec(String),

    /// "last" was requested for a document with no saved versions.
    #[error("document not versioned")]
    NotVersioned,

    /// "lastp" was requested for a document with no publishable versions.
    #[error("no publishable version found")]
    NoPublishableVersion,

    /// No version was created before the requested date.
    #[error("no version before {0}")]
    NoVersionBefore(String),

    /// No version carries the requested label.
    #[error("no version labeled {0}")]
    NoLabeledVersion(String),

    /// The acting account lacks a required permission.
    #[error("{0}")]
    Unauthorized(String),

    /// The document is checked out by another account.
    #[error("document {id} is checked out by {user}")]
    AlreadyLocked {
        /// Canonical document id.
        id: String,
        /// Account holding the lock.
        user: String,
    },

    /// Unlock was requested for a document which is not checked out.
    #[error("document {0} is not checked out")]
    NotLocked(String),

    /// More than one document shares a title.
    #[error("multiple documents with title {0}")]
    AmbiguousTitle(String),

    /// A document reference did not name a document.
    #[error("no document specified")]
    MissingDocumentId,

    /// No document matched a title or id.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// A required row or value was missing from the database.
    #[error("{0}")]
    NotFound(String),

    /// Document ids must be positive integers (optionally CDR-prefixed).
    #[error("invalid document id {0:?}")]
    InvalidDocumentId(String),

    /// Term parents nest too deeply or refer back to themselves.
    #[error("term hierarchy cycle or depth exceeded at {0}")]
    CycleOrExcessiveDepth(String),

    /// A parent term reference lacks its `cdr:ref` attribute.
    #[error("no cdr:ref for parent of Term {0}")]
    MissingParentRef(String),

    /// The document XML could not be parsed.
    #[error("XML error: {0}")]
    Xml(String),

    /// The denormalization filters failed.
    #[error("denormalization failed: {0}")]
    Denormalization(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Error from the query layer.
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl DocError {
    /// True if the error reports a document without publishable versions.
    pub fn is_no_publishable_version(&self) -> bool {
        matches!(self, DocError::NoPublishableVersion)
    }
}

impl From<quick_xml::Error> for DocError {
    fn from(err: quick_xml::Error) -> Self {
        DocError::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for DocError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        DocError::Xml(err.to_string())
    }
}

/// Result type for document operations.
pub type DocResult<T> = std::result::Result<T, DocError>;
