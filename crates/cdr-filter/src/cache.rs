//! Filter cache.
//!
//! Filters are keyed by document id and optional version number. An entry
//! is dropped when it has gone unused for longer than the shelf life; every
//! lookup restarts its clock. Capacity is bounded by an LRU policy.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use cdr_docs::{Doc, Session, VersionSpec};

use crate::config::FilterConfig;
use crate::error::FilterResult;

/// Cache key: filter document id and version (`None` for the working copy).
pub type FilterKey = (i64, Option<i64>);

/// A filter document ready to hand to the transform engine.
#[derive(Debug)]
pub struct Filter {
    /// Filter document id.
    pub doc_id: i64,
    /// Version number, or `None` for the working copy.
    pub version: Option<i64>,
    /// Stylesheet XML with `import`/`include` hrefs made URI safe.
    pub xml: String,
    last_used: Mutex<Instant>,
}

impl Filter {
    /// Wraps a stylesheet.
    pub fn new(doc_id: i64, version: Option<i64>, xml: impl Into<String>) -> Self {
        Self {
            doc_id,
            version,
            xml: xml.into(),
            last_used: Mutex::new(Instant::now()),
        }
    }

    /// Whether the filter went unused for longer than `shelf_life`.
    ///
    /// Checking counts as a use.
    pub fn stale(&self, shelf_life: Duration) -> bool {
        let mut last_used = self.last_used.lock();
        let now = Instant::now();
        let stale = now.duration_since(*last_used) > shelf_life;
        *last_used = now;
        stale
    }
}

/// Percent-encodes spaces in the `href` of top-level `import` and `include`
/// elements.
pub fn rewrite_hrefs(xml: &str) -> FilterResult<String> {
    let mut root = cdr_docs::xml::parse(xml)?;
    for child in root.elements_mut() {
        if !matches!(child.local_name(), "import" | "include") {
            continue;
        }
        if let Some(href) = child.attr("href").map(|h| h.replace(' ', "%20")) {
            child.set_attr("href", href);
        }
    }
    Ok(root.to_xml())
}

/// Process-wide cache of filter documents.
pub struct FilterCache {
    inner: Mutex<LruCache<FilterKey, Arc<Filter>>>,
    shelf_life: Duration,
}

impl Default for FilterCache {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

impl FilterCache {
    /// Creates an empty cache.
    pub fn new(config: &FilterConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            shelf_life: config.shelf_life,
        }
    }

    /// Returns a filter, fetching it when missing or stale.
    ///
    /// The fetch runs without holding the lock. If another caller installs
    /// the same filter first, that copy is returned instead.
    pub fn get_filter(
        &self,
        session: &Arc<dyn Session>,
        doc_id: i64,
        version: Option<i64>,
    ) -> FilterResult<Arc<Filter>> {
        let key = (doc_id, version);
        {
            let mut cache = self.inner.lock();
            if let Some(filter) = cache.get(&key).cloned() {
                if !filter.stale(self.shelf_life) {
                    return Ok(filter);
                }
                log::debug!("filter {:?} went stale", key);
                cache.pop(&key);
            }
        }

        let fresh = Arc::new(Self::fetch(session, doc_id, version)?);

        let mut cache = self.inner.lock();
        if let Some(existing) = cache.get(&key) {
            return Ok(Arc::clone(existing));
        }
        cache.put(key, Arc::clone(&fresh));
        Ok(fresh)
    }

    fn fetch(session: &Arc<dyn Session>, doc_id: i64, version: Option<i64>) -> FilterResult<Filter> {
        let spec = version.map_or(VersionSpec::Current, VersionSpec::Number);
        let doc = Doc::load(Arc::clone(session), doc_id, spec);
        let xml = rewrite_hrefs(doc.xml()?)?;
        log::debug!("loaded filter {} version {:?}", doc_id, version);
        Ok(Filter::new(doc_id, version, xml))
    }

    /// Number of cached filters.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached filter.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
