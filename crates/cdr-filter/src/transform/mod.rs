//! Stylesheet transformation.
//!
//! [`TransformEngine`] is the seam between the filter engine and whatever
//! applies the stylesheets. [`XsltLite`] is the built-in implementation: an
//! XSLT 1.0 subset compiled from the stylesheet tree into an instruction
//! list and run against an arena copy of the input.

pub mod eval;
pub mod tree;
pub mod xpath;
mod xslt;

pub use xslt::{XsltLite, XSLT_NS};

use cdr_docs::Node;

use crate::error::FilterResult;

/// Supplies the XML behind URIs used by `document()`, `xsl:import` and
/// `xsl:include`.
pub trait UriResolver {
    /// Returns the XML for `uri`, or `None` if there is nothing there.
    fn resolve(&self, uri: &str) -> FilterResult<Option<String>>;
}

/// Result of one transform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOutput {
    /// Result tree, as top-level nodes.
    pub nodes: Vec<Node>,
    /// Text of each `xsl:message`.
    pub messages: Vec<String>,
}

/// Applies a stylesheet to a document.
pub trait TransformEngine: Send + Sync {
    /// Transforms `source` with `stylesheet`.
    ///
    /// `params` override top-level `xsl:param` values and are passed as
    /// strings.
    fn transform(
        &self,
        stylesheet: &str,
        source: &[Node],
        params: &[(String, String)],
        resolver: &dyn UriResolver,
    ) -> FilterResult<TransformOutput>;
}
