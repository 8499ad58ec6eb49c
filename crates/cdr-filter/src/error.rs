//! Error types for filtering and entity resolution.

use cdr_docs::DocError;
use cdr_query::QueryError;
use thiserror::Error;

/// Errors raised while assembling, fetching or applying filters.
#[derive(Error, Debug)]
pub enum FilterError {
    /// A resolver URI uses an unknown scheme or path form.
    #[error("unsupported url {0:?}")]
    UnsupportedUri(String),

    /// A `cdrutil:` URI names an unknown function.
    #[error("unsupported function {function:?} in {uri:?}")]
    UnsupportedResolverFunction {
        /// Function name taken from the URI.
        function: String,
        /// Decoded URI.
        uri: String,
    },

    /// An ad-hoc query contains a data-modifying keyword.
    #[error("query contains disallowed sql keywords: {0}")]
    DisallowedSqlKeyword(String),

    /// An ad-hoc query's placeholders and values do not line up.
    #[error("wrong number of sql query placeholder values: {placeholders} placeholders, {values} values")]
    PlaceholderMismatch {
        /// Number of `?` placeholders in the query.
        placeholders: usize,
        /// Number of values supplied.
        values: usize,
    },

    /// Filter references and an inline filter were both given.
    #[error("inline filter cannot be combined with filter references")]
    ConflictingFilters,

    /// Nothing to apply.
    #[error("no filters specified")]
    NoFilters,

    /// A `name:` reference matched no document.
    #[error("filter not found: {0}")]
    FilterNotFound(String),

    /// A `set:` reference matched no filter set.
    #[error("filter set not found: {0}")]
    FilterSetNotFound(String),

    /// Filter sets nest too deeply (or include themselves).
    #[error("filter set nesting too deep at {0}")]
    FilterSetDepth(String),

    /// An XPath expression or pattern could not be parsed.
    #[error("XPath parse error at position {position}: {message}")]
    XPath {
        /// Byte offset of the failure.
        position: usize,
        /// Error message.
        message: String,
    },

    /// A stylesheet uses something the engine cannot compile.
    #[error("stylesheet error: {0}")]
    Stylesheet(String),

    /// Evaluation failed while transforming.
    #[error("transform error: {0}")]
    Transform(String),

    /// The stylesheet stopped the transform with `xsl:message terminate="yes"`.
    #[error("transform terminated: {0}")]
    Terminated(String),

    /// Invalid regular expression.
    #[error(transparent)]
    Pattern(#[from] regex::Error),

    /// Error from the document store.
    #[error(transparent)]
    Doc(#[from] DocError),

    /// Error from the query layer.
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl FilterError {
    /// The underlying document store error, if any.
    pub fn as_doc_error(&self) -> Option<&DocError> {
        match self {
            FilterError::Doc(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FilterError> for DocError {
    fn from(err: FilterError) -> Self {
        match err {
            FilterError::Doc(e) => e,
            FilterError::Query(e) => DocError::Query(e),
            other => DocError::Denormalization(Box::new(other)),
        }
    }
}

/// Result type for filter operations.
pub type FilterResult<T> = std::result::Result<T, FilterError>;
