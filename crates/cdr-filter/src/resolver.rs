//! Entity resolver.
//!
//! Answers the `cdr:`, `cdrx:` and `cdrutil:` URIs a stylesheet loads
//! while a document is being filtered. Every answer is an XML string.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use regex::Regex;

use cdr_docs::{Doc, Element, Session, TermCache, VersionSpec};
use cdr_query::{Role, Value};

use crate::cache::FilterCache;
use crate::error::{FilterError, FilterResult};
use crate::transform::UriResolver;
use crate::uri::{ResolverUri, UtilFunction};

/// Doctype whose documents are stylesheets.
pub const FILTER_DOCTYPE: &str = "Filter";

const EMPTY: &str = "<empty/>";

// ============================================================================
// Filter context
// ============================================================================

/// Stack of documents being filtered; the innermost one answers `cdr:*`
/// and `cdrutil:/docid` requests.
#[derive(Default)]
pub struct FilterContext<'d> {
    docs: RefCell<Vec<&'d Doc>>,
}

/// Pops its document off the [`FilterContext`] when dropped.
#[must_use]
pub struct ContextGuard<'c, 'd> {
    context: &'c FilterContext<'d>,
}

impl<'d> FilterContext<'d> {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `doc` the current document until the guard is dropped.
    pub fn enter<'c>(&'c self, doc: &'d Doc) -> ContextGuard<'c, 'd> {
        self.docs.borrow_mut().push(doc);
        ContextGuard { context: self }
    }

    /// The innermost document.
    pub fn current(&self) -> Option<&'d Doc> {
        self.docs.borrow().last().copied()
    }

    /// Number of documents on the stack.
    pub fn depth(&self) -> usize {
        self.docs.borrow().len()
    }
}

impl Drop for ContextGuard<'_, '_> {
    fn drop(&mut self) {
        self.context.docs.borrow_mut().pop();
    }
}

// ============================================================================
// Restricted ad-hoc queries
// ============================================================================

fn unsafe_sql() -> FilterResult<&'static Regex> {
    static UNSAFE: OnceCell<Regex> = OnceCell::new();
    Ok(UNSAFE.get_or_try_init(|| {
        Regex::new(r"(?i)(insert|update|delete|create|alter)\s|exec(ute)?[(\s]")
    })?)
}

/// A read-only query that passed the keyword and placeholder checks.
#[derive(Debug, Clone, PartialEq)]
pub struct SafeQuery {
    sql: String,
    values: Vec<String>,
}

impl SafeQuery {
    /// Validates `query~value1~value2...`.
    ///
    /// Fails with [`FilterError::DisallowedSqlKeyword`] if the query
    /// contains a data-modifying keyword (in any case), and with
    /// [`FilterError::PlaceholderMismatch`] if the number of `?`
    /// placeholders differs from the number of values.
    pub fn parse(args: &str) -> FilterResult<Self> {
        let (sql, values) = match args.split_once('~') {
            Some((sql, values)) => (sql, values.split('~').map(str::to_string).collect()),
            None => (args, Vec::new()),
        };
        if let Some(found) = unsafe_sql()?.find(sql) {
            return Err(FilterError::DisallowedSqlKeyword(found.as_str().trim().to_string()));
        }
        let placeholders = sql.matches('?').count();
        if placeholders != values.len() {
            return Err(FilterError::PlaceholderMismatch {
                placeholders,
                values: values.len(),
            });
        }
        Ok(Self {
            sql: sql.to_string(),
            values,
        })
    }

    /// The query text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Values bound to the placeholders, in order.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Runs the query on a read-only connection, returning
    /// `<SqlResult><row id="1"><col id="0" name="...">...</col></row></SqlResult>`.
    pub fn run(&self, session: &dyn Session) -> FilterResult<Element> {
        let mut conn = session.connect(Role::Guest)?;
        let params: Vec<Value> = self.values.iter().map(|v| Value::Text(v.clone())).collect();
        log::debug!("sql-query {} {:?}", self.sql, params);
        let result = conn.query(&self.sql, &params)?;

        let mut root = Element::new("SqlResult");
        for (r, values) in result.rows.iter().enumerate() {
            let mut row = Element::new("row").with_attr("id", (r + 1).to_string());
            for (c, value) in values.iter().enumerate() {
                let name = result.columns.get(c).cloned().unwrap_or_default();
                let mut col = Element::new("col")
                    .with_attr("id", c.to_string())
                    .with_attr("name", name);
                match value.to_text() {
                    Some(text) => col.push_text(text),
                    None => col.set_attr("null", "Y"),
                }
                row.push_element(col);
            }
            root.push_element(row);
        }
        Ok(root)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn id_key(id: &str) -> String {
    id.to_uppercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Secondary ids whose normalized key is new, in order.
///
/// `args` is `<primary>~~<secondary>`, each a `~`-separated list. Keys are
/// uppercased with everything but ASCII letters and digits removed; ids
/// with an empty key are skipped. Without `~~` nothing is returned.
pub fn dedup_ids(args: &str) -> Vec<String> {
    let (primary, secondary) = match args.split_once("~~") {
        Some(parts) => parts,
        None => return Vec::new(),
    };
    let mut seen: HashSet<String> = primary.split('~').map(id_key).collect();
    let mut ids = Vec::new();
    for id in secondary.split('~') {
        let key = id_key(id);
        if !key.is_empty() && seen.insert(key) {
            ids.push(id.to_string());
        }
    }
    ids
}

fn version_spec(version: &Option<String>) -> FilterResult<VersionSpec> {
    Ok(match version {
        Some(v) => VersionSpec::parse(v)?,
        None => VersionSpec::Current,
    })
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolves repository URIs for the transform engine.
pub struct EntityResolver<'a, 'd> {
    context: &'a FilterContext<'d>,
    filters: &'a FilterCache,
    terms: &'a TermCache,
}

impl<'a, 'd> EntityResolver<'a, 'd> {
    /// Creates a resolver over a filter context and the shared caches.
    pub fn new(context: &'a FilterContext<'d>, filters: &'a FilterCache, terms: &'a TermCache) -> Self {
        Self {
            context,
            filters,
            terms,
        }
    }

    fn doc(&self) -> FilterResult<&'d Doc> {
        self.context
            .current()
            .ok_or_else(|| FilterError::Transform("no document is being filtered".to_string()))
    }

    fn session(&self) -> FilterResult<&'d Arc<dyn Session>> {
        Ok(self.doc()?.session())
    }

    /// Resolves a parsed URI.
    pub fn resolve_uri(&self, uri: &ResolverUri) -> FilterResult<Option<String>> {
        match uri {
            ResolverUri::Last => Ok(Some(EMPTY.to_string())),
            ResolverUri::CurrentControl => Ok(Some(self.doc()?.legacy_doc_control(true)?.to_xml())),
            ResolverUri::CurrentTitle => {
                let mut title = Element::new("CdrDocTitle");
                if let Some(text) = self.doc()?.title()? {
                    title.push_text(text);
                }
                Ok(Some(title.to_xml()))
            }
            ResolverUri::ByTitle { title, version } => self.by_title(title, version),
            ResolverUri::ById { id, version } => {
                if id.is_empty() {
                    return Err(cdr_docs::DocError::MissingDocumentId.into());
                }
                let doc = Doc::load(
                    Arc::clone(self.session()?),
                    Doc::extract_id(id)?,
                    version_spec(version)?,
                );
                Ok(Some(doc.xml()?.to_string()))
            }
            ResolverUri::Function(function) => self.function(function).map(Some),
        }
    }

    fn by_title(&self, title: &str, version: &Option<String>) -> FilterResult<Option<String>> {
        let session = self.session()?;
        let id = {
            let mut conn = session.connect(Role::Guest)?;
            Doc::id_from_title(title, conn.as_mut())?
        };
        let id = match id {
            Some(id) => id,
            None => {
                log::debug!("no document titled {:?}", title);
                return Ok(None);
            }
        };
        let doc = Doc::load(Arc::clone(session), id, version_spec(version)?);
        if doc.doctype()? == FILTER_DOCTYPE {
            let filter = self.filters.get_filter(session, id, doc.version()?)?;
            return Ok(Some(filter.xml.clone()));
        }
        Ok(Some(doc.xml()?.to_string()))
    }

    fn function(&self, function: &UtilFunction) -> FilterResult<String> {
        match function {
            UtilFunction::DocId => {
                let mut element = Element::new("DocId");
                if let Some(id) = self.doc()?.cdr_id() {
                    element.push_text(id);
                }
                Ok(element.to_xml())
            }
            UtilFunction::SqlQuery(args) => {
                let query = SafeQuery::parse(args)?;
                Ok(query.run(self.session()?.as_ref())?.to_xml())
            }
            UtilFunction::PubVerNumber(id) => {
                let doc = Doc::load(Arc::clone(self.session()?), Doc::extract_id(id)?, VersionSpec::Current);
                let number = doc.last_publishable_version()?.unwrap_or(0);
                Ok(Element::new("PubVerNumber").with_text(number.to_string()).to_xml())
            }
            UtilFunction::DenormalizeTerm { id, upcode } => {
                let term = self.terms.get_term(self.session()?, Doc::extract_id(id)?)?;
                Ok(match term {
                    Some(term) => term.get_xml(*upcode),
                    None => EMPTY.to_string(),
                })
            }
            UtilFunction::DedupIds(args) => {
                let mut result = Element::new("result");
                for id in dedup_ids(args) {
                    result.push_element(Element::new("id").with_text(id));
                }
                Ok(result.to_xml())
            }
            UtilFunction::ValidZip(zip) => {
                let found = cdr_query::Query::new("zipcode", ["zip"])
                    .where_(cdr_query::Condition::eq("zip", zip.as_str()))
                    .execute_with(self.session()?.provider())?
                    .scalar()
                    .to_text();
                let mut element = Element::new("ValidZip");
                if let Some(zip) = found.filter(|z| !z.is_empty()) {
                    element.push_text(zip.chars().take(5).collect::<String>());
                }
                Ok(element.to_xml())
            }
        }
    }
}

impl UriResolver for EntityResolver<'_, '_> {
    fn resolve(&self, uri: &str) -> FilterResult<Option<String>> {
        let parsed = ResolverUri::parse(uri)?;
        log::debug!("resolving {} as {:?}", uri, parsed);
        self.resolve_uri(&parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_ids() {
        assert_eq!(dedup_ids("a~b~~a~c~d"), vec!["c", "d"]);
        assert_eq!(dedup_ids("CDR-1~~cdr1~x~X~"), vec!["x"]);
        assert!(dedup_ids("a~b~c").is_empty());
    }

    #[test]
    fn test_safe_query_gate() {
        for sql in [
            "DELETE FROM x",
            "select 1; delete from x",
            "Insert into x values (1)",
            "exec(sp_who)",
            "EXECUTE sp_who",
            "select sp_exec(1)",
            "SELECT 1; xp_exec 'dir'",
            "select last_update from t",
        ] {
            assert!(
                matches!(SafeQuery::parse(sql), Err(FilterError::DisallowedSqlKeyword(_))),
                "{} should be rejected",
                sql
            );
        }
        let ok = SafeQuery::parse("SELECT updated_dt FROM doc_version WHERE id = ?~42").unwrap();
        assert_eq!(ok.values(), ["42".to_string()]);
        assert!(SafeQuery::parse("SELECT executor_id FROM job").is_ok());
        assert!(matches!(
            SafeQuery::parse("SELECT * FROM t WHERE a = ? AND b = ?~1"),
            Err(FilterError::PlaceholderMismatch {
                placeholders: 2,
                values: 1
            })
        ));
    }

    #[test]
    fn test_context_stack() {
        let context = FilterContext::new();
        assert!(context.current().is_none());
        assert_eq!(context.depth(), 0);
    }
}
