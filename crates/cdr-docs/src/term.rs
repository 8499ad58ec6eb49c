//! Denormalized term hierarchies.
//!
//! A [`Term`] is built from the last publishable version of a Term document
//! and carries every ancestor reachable through
//! `TermRelationship/ParentTerm/TermId/@cdr:ref`. Resolution walks the
//! parent links depth first, bounded by [`StoreConfig::term_max_depth`],
//! and rejects a chain which leads back to a term already on the path.
//!
//! Built terms can be shared through a [`TermCache`]. The cache is switched
//! on and off with nested [`TermCache::enable`]/[`TermCache::disable`]
//! calls and is flushed as a whole once it outlives its maximum age.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::StoreConfig;
use crate::doc::{format_cdr_id, Doc};
use crate::error::{DocError, DocResult};
use crate::session::Session;
use crate::version::VersionSpec;
use crate::xml::{Element, CDR_NS, CDR_REF};

/// Term type names which keep a term out of the denormalized output.
pub const EXCLUDED_TERM_TYPES: [&str; 2] = ["Header term", "Obsolete term"];

/// A term with its resolved ancestors.
#[derive(Debug)]
pub struct Term {
    /// Integer id of the Term document.
    pub doc_id: i64,
    /// Canonical id of the Term document.
    pub cdr_id: String,
    /// Preferred name.
    pub name: String,
    /// External key, if the term has one.
    pub pdq_key: Option<String>,
    /// False for header and obsolete terms.
    pub include: bool,
    /// Every ancestor, keyed by document id.
    pub parents: BTreeMap<i64, Arc<Term>>,
    serialized: Mutex<Option<Serialized>>,
}

#[derive(Debug, Clone)]
struct Serialized {
    compact: String,
    full: String,
}

impl Term {
    /// Serialized term.
    ///
    /// With `with_upcoding` the element also lists every included ancestor
    /// as a child `Term`; without it only the name (and key) are written.
    pub fn get_xml(&self, with_upcoding: bool) -> String {
        let cached = self.serialized.lock().clone();
        let serialized = match cached {
            Some(serialized) => serialized,
            None => {
                let fresh = self.serialize();
                self.serialized.lock().get_or_insert(fresh).clone()
            }
        };
        if with_upcoding {
            serialized.full
        } else {
            serialized.compact
        }
    }

    fn element(&self) -> Element {
        let mut term = Element::new("Term").with_attr(CDR_REF, self.cdr_id.as_str());
        if let Some(key) = &self.pdq_key {
            term.set_attr("PdqKey", format!("Term:{}", key));
        }
        term.with_child(Element::new("PreferredName").with_text(self.name.as_str()))
    }

    fn serialize(&self) -> Serialized {
        let mut term = self.element();
        term.attributes.insert(0, ("xmlns:cdr".to_string(), CDR_NS.to_string()));
        let compact = term.to_xml();
        for parent in self.parents.values().filter(|p| p.include) {
            term.push_element(parent.element());
        }
        Serialized {
            compact,
            full: term.to_xml(),
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    use_count: usize,
    started: Option<Instant>,
    terms: HashMap<i64, Option<Arc<Term>>>,
}

/// Shared store of built terms.
#[derive(Debug)]
pub struct TermCache {
    max_depth: usize,
    max_age: Duration,
    state: Mutex<CacheState>,
}

impl Default for TermCache {
    fn default() -> Self {
        Self::new(&StoreConfig::default())
    }
}

impl TermCache {
    /// Creates a disabled cache using the configured limits.
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            max_depth: config.term_max_depth,
            max_age: config.term_cache_max_age,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Turns caching on (or deepens an existing enable). Returns whether
    /// caching was already on.
    pub fn enable(&self) -> bool {
        let mut state = self.state.lock();
        let previous = state.use_count > 0;
        state.use_count += 1;
        if !previous {
            state.started = Some(Instant::now());
        }
        previous
    }

    /// Undoes one [`enable`](Self::enable). The last one clears the cache.
    /// Returns whether caching was on before the call.
    pub fn disable(&self) -> bool {
        let mut state = self.state.lock();
        let previous = state.use_count > 0;
        state.use_count = state.use_count.saturating_sub(1);
        if state.use_count == 0 {
            state.terms.clear();
            state.started = None;
        }
        previous
    }

    /// Whether caching is on.
    pub fn is_enabled(&self) -> bool {
        self.state.lock().use_count > 0
    }

    /// Number of cached lookups (including misses).
    pub fn len(&self) -> usize {
        self.state.lock().terms.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds (or fetches from the cache) the term for a document.
    ///
    /// Returns `None` for a term without a preferred name. A document with
    /// no publishable version fails with [`DocError::NoPublishableVersion`]
    /// here; as a parent it is skipped.
    pub fn get_term(&self, session: &Arc<dyn Session>, doc_id: i64) -> DocResult<Option<Arc<Term>>> {
        self.resolve(session, doc_id, &mut Vec::new())
    }

    fn resolve(
        &self,
        session: &Arc<dyn Session>,
        doc_id: i64,
        path: &mut Vec<i64>,
    ) -> DocResult<Option<Arc<Term>>> {
        if path.len() > self.max_depth || path.contains(&doc_id) {
            return Err(DocError::CycleOrExcessiveDepth(format_cdr_id(doc_id)));
        }

        {
            let mut state = self.state.lock();
            if state.use_count > 0 {
                let expired = state
                    .started
                    .map_or(false, |started| started.elapsed() > self.max_age);
                if expired {
                    log::info!("term cache expired; flushing {} entries", state.terms.len());
                    state.terms.clear();
                    state.started = Some(Instant::now());
                }
                if let Some(term) = state.terms.get(&doc_id) {
                    return Ok(term.clone());
                }
            }
        }

        let term = match self.build(session, doc_id, path) {
            Ok(term) => term.map(Arc::new),
            Err(e) if e.is_no_publishable_version() && !path.is_empty() => None,
            Err(e) => return Err(e),
        };

        let mut state = self.state.lock();
        if state.use_count > 0 {
            return Ok(state.terms.entry(doc_id).or_insert(term).clone());
        }
        Ok(term)
    }

    fn build(
        &self,
        session: &Arc<dyn Session>,
        doc_id: i64,
        path: &mut Vec<i64>,
    ) -> DocResult<Option<Term>> {
        let doc = Doc::load(session.clone(), doc_id, VersionSpec::LastPublishable);
        let root = doc.root()?;
        let name = match Doc::get_text(root.find("PreferredName")) {
            Some(name) if !name.is_empty() => name,
            _ => return Ok(None),
        };
        let pdq_key = Doc::get_text(root.find("PdqKey")).filter(|k| !k.is_empty());
        let include = !root
            .find_all("TermType/TermTypeName")
            .into_iter()
            .any(|node| EXCLUDED_TERM_TYPES.contains(&node.text().as_str()));

        let cdr_id = format_cdr_id(doc_id);
        let mut parents = BTreeMap::new();
        path.push(doc_id);
        let resolved = self.resolve_parents(session, root, &cdr_id, path, &mut parents);
        path.pop();
        resolved?;

        log::debug!("built term {} with {} ancestors", cdr_id, parents.len());
        Ok(Some(Term {
            doc_id,
            cdr_id,
            name,
            pdq_key,
            include,
            parents,
            serialized: Mutex::new(None),
        }))
    }

    fn resolve_parents(
        &self,
        session: &Arc<dyn Session>,
        root: &Element,
        cdr_id: &str,
        path: &mut Vec<i64>,
        parents: &mut BTreeMap<i64, Arc<Term>>,
    ) -> DocResult<()> {
        for node in root.find_all("TermRelationship/ParentTerm/TermId") {
            let parent_id = node
                .attr(CDR_REF)
                .and_then(|r| Doc::extract_id(r).ok())
                .ok_or_else(|| DocError::MissingParentRef(cdr_id.to_string()))?;
            if parents.contains_key(&parent_id) {
                continue;
            }
            if let Some(parent) = self.resolve(session, parent_id, path)? {
                for (id, ancestor) in &parent.parents {
                    parents.insert(*id, ancestor.clone());
                }
                parents.insert(parent_id, parent);
            }
        }
        Ok(())
    }
}
