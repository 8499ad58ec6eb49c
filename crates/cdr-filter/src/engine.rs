//! The filter engine.
//!
//! Applies a chain of stylesheets to a document. Each pass sees the output
//! of the previous one; `xsl:message` text from every pass is collected.

use std::sync::Arc;

use chrono::NaiveDateTime;

use cdr_docs::{Denormalizer, Doc, DocResult, Element, Node, StoreConfig, TermCache, VersionSpec};

use crate::cache::{rewrite_hrefs, FilterCache};
use crate::config::FilterConfig;
use crate::error::{FilterError, FilterResult};
use crate::filters::{assemble, select_version, FilterRef};
use crate::resolver::{EntityResolver, FilterContext};
use crate::transform::{TransformEngine, XsltLite};

// ============================================================================
// Options and results
// ============================================================================

/// Options for [`FilterEngine::filter`].
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOptions {
    /// Top-level stylesheet parameters, passed as strings.
    pub parms: Vec<(String, String)>,
    /// Return the transformed document; when false only messages come back.
    pub output: bool,
    /// Which version of each filter to use.
    pub version: Option<VersionSpec>,
    /// Only use filter versions created before this moment.
    pub date: Option<NaiveDateTime>,
    /// Inline stylesheet used instead of stored filters.
    pub filter: Option<String>,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            parms: Vec::new(),
            output: true,
            version: None,
            date: None,
            filter: None,
        }
    }
}

impl FilterOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stylesheet parameter.
    pub fn with_parm(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parms.push((name.into(), value.into()));
        self
    }

    /// Asks for the messages only.
    pub fn messages_only(mut self) -> Self {
        self.output = false;
        self
    }

    /// Selects filter versions.
    pub fn with_version(mut self, version: impl Into<VersionSpec>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Restricts filters to versions created before `date`.
    pub fn with_date(mut self, date: NaiveDateTime) -> Self {
        self.date = Some(date);
        self
    }

    /// Uses an inline stylesheet.
    pub fn with_filter(mut self, xml: impl Into<String>) -> Self {
        self.filter = Some(xml.into());
        self
    }
}

/// Outcome of [`FilterEngine::filter`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredDoc {
    /// Result of the last pass, unless only messages were requested.
    pub result: Option<Vec<Node>>,
    /// Messages from all passes, in order.
    pub messages: Vec<String>,
}

impl FilteredDoc {
    /// Serialized result; empty when only messages were requested.
    pub fn xml(&self) -> String {
        let mut out = String::new();
        for node in self.result.iter().flatten() {
            cdr_docs::xml::write_node(node, &mut out);
        }
        out
    }

    /// Top-level element of the result.
    pub fn root(&self) -> Option<&Element> {
        self.result.iter().flatten().find_map(|node| match node {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Runs filters against documents.
pub struct FilterEngine {
    config: FilterConfig,
    cache: Arc<FilterCache>,
    terms: Arc<TermCache>,
    transformer: Box<dyn TransformEngine>,
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

impl FilterEngine {
    /// Creates an engine with its own caches and the built-in XSLT engine.
    pub fn new(config: FilterConfig) -> Self {
        Self {
            cache: Arc::new(FilterCache::new(&config)),
            terms: Arc::new(TermCache::new(&StoreConfig::default())),
            transformer: Box::new(XsltLite),
            config,
        }
    }

    /// Shares a term cache with other components.
    pub fn with_term_cache(mut self, terms: Arc<TermCache>) -> Self {
        self.terms = terms;
        self
    }

    /// Shares a filter cache with other engines.
    pub fn with_filter_cache(mut self, cache: Arc<FilterCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the transform engine.
    pub fn with_transformer(mut self, transformer: impl TransformEngine + 'static) -> Self {
        self.transformer = Box::new(transformer);
        self
    }

    /// Engine settings.
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Filter cache.
    pub fn filter_cache(&self) -> &Arc<FilterCache> {
        &self.cache
    }

    /// Term cache used for `denormalizeTerm` requests.
    pub fn term_cache(&self) -> &Arc<TermCache> {
        &self.terms
    }

    /// Applies filters to `doc`.
    ///
    /// `refs` are `name:<title>`, `set:<name>` or document ids; they are
    /// mutually exclusive with [`FilterOptions::filter`].
    pub fn filter(&self, doc: &Doc, refs: &[&str], opts: &FilterOptions) -> FilterResult<FilteredDoc> {
        let stylesheets = self.stylesheets(doc, refs, opts)?;

        let context = FilterContext::new();
        let _current = context.enter(doc);
        let resolver = EntityResolver::new(&context, &self.cache, &self.terms);

        let mut nodes = vec![Node::Element(doc.root()?.clone())];
        let mut messages = Vec::new();
        for (pass, stylesheet) in stylesheets.iter().enumerate() {
            let output = self
                .transformer
                .transform(stylesheet, &nodes, &opts.parms, &resolver)?;
            log::debug!(
                "filter pass {} on {:?}: {} messages",
                pass + 1,
                doc.cdr_id(),
                output.messages.len()
            );
            nodes = output.nodes;
            messages.extend(output.messages);
        }

        Ok(FilteredDoc {
            result: opts.output.then_some(nodes),
            messages,
        })
    }

    fn stylesheets(&self, doc: &Doc, refs: &[&str], opts: &FilterOptions) -> FilterResult<Vec<String>> {
        if let Some(inline) = &opts.filter {
            if !refs.is_empty() {
                return Err(FilterError::ConflictingFilters);
            }
            return Ok(vec![rewrite_hrefs(inline)?]);
        }
        if refs.is_empty() {
            return Err(FilterError::NoFilters);
        }

        let refs = refs
            .iter()
            .map(|r| FilterRef::parse(r))
            .collect::<FilterResult<Vec<_>>>()?;
        let session = doc.session();
        let mut stylesheets = Vec::new();
        for id in assemble(session, &refs, self.config.max_set_depth)? {
            let version = select_version(session, id, opts.version.as_ref(), opts.date)?;
            stylesheets.push(self.cache.get_filter(session, id, version)?.xml.clone());
        }
        Ok(stylesheets)
    }
}

impl Denormalizer for FilterEngine {
    /// Runs the doctype's denormalization set; a doctype without one is
    /// returned unchanged.
    fn denormalize(&self, doc: &Doc) -> DocResult<String> {
        let set = self.config.denormalization_filter(doc.doctype()?);
        match self.filter(doc, &[set.as_str()], &FilterOptions::new()) {
            Ok(result) => Ok(result.xml()),
            Err(FilterError::FilterSetNotFound(name)) => {
                log::debug!("no denormalization filters in {}", name);
                Ok(doc.xml()?.to_string())
            }
            Err(e) => Err(e.into()),
        }
    }
}
