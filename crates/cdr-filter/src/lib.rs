//! # cdr-filter
//!
//! Stylesheet filters for CDR documents.
//!
//! Filters are stored as documents of the `Filter` doctype and applied in
//! chains. While a stylesheet runs, the repository is reachable through
//! resolver URIs (`cdr:`, `cdrx:`, `cdrutil:`) answered by the
//! [`EntityResolver`].
//!
//! ## Quick Start
//!
//! ```rust
//! use cdr_filter::transform::{TransformEngine, UriResolver, XsltLite, XSLT_NS};
//! use cdr_filter::{escape_uri, FilterResult};
//! use cdr_docs::{xml, Node};
//!
//! struct Nothing;
//!
//! impl UriResolver for Nothing {
//!     fn resolve(&self, _uri: &str) -> FilterResult<Option<String>> {
//!         Ok(None)
//!     }
//! }
//!
//! let sheet = format!(
//!     r#"<xsl:stylesheet xmlns:xsl="{XSLT_NS}" version="1.0">
//!          <xsl:template match="/Term"><Name><xsl:value-of select="PreferredName"/></Name></xsl:template>
//!        </xsl:stylesheet>"#
//! );
//! let source = xml::parse("<Term><PreferredName>lung cancer</PreferredName></Term>").unwrap();
//! let output = XsltLite.transform(&sheet, &[Node::Element(source)], &[], &Nothing).unwrap();
//! assert_eq!(output.nodes, vec![Node::Element(xml::parse("<Name>lung cancer</Name>").unwrap())]);
//!
//! assert_eq!(escape_uri("a+b c"), "a%40%40PLUS%40%40b%20c");
//! ```
//!
//! ## Modules
//!
//! - [`FilterEngine`]: filter chains and denormalization
//! - [`FilterCache`]: shelf-life cache of filter documents
//! - [`FilterRef`]: `name:`, `set:` and id references
//! - [`EntityResolver`]: resolver URIs
//! - [`transform`]: the [`transform::TransformEngine`] seam and the
//!   built-in XSLT engine

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod cache;
mod config;
mod engine;
mod error;
mod filters;
mod resolver;
pub mod transform;
mod uri;

pub use cache::{rewrite_hrefs, Filter, FilterCache, FilterKey};
pub use config::{
    FilterConfig, FilterConfigBuilder, DEFAULT_CACHE_CAPACITY, DOCTYPE_PLACEHOLDER,
    MAX_FILTER_SET_DEPTH, SHELF_LIFE, SHELF_LIFE_ENV,
};
pub use engine::{FilterEngine, FilterOptions, FilteredDoc};
pub use error::{FilterError, FilterResult};
pub use filters::{assemble, select_version, FilterRef};
pub use resolver::{
    dedup_ids, ContextGuard, EntityResolver, FilterContext, SafeQuery, FILTER_DOCTYPE,
};
pub use uri::{
    escape_uri, escape_uri_parts, unescape_uri, ResolverUri, UtilFunction, PLUS_PLACEHOLDER,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        let _: Option<FilterEngine> = None;
        let _: Option<FilterResult<()>> = None;
        let _: Option<Box<dyn transform::TransformEngine>> = None;
        let _ = FilterOptions::default();
        assert_eq!(FilterConfig::default().max_set_depth, MAX_FILTER_SET_DEPTH);
        assert_eq!(FILTER_DOCTYPE, "Filter");
    }
}
