//! Filter references and filter sets.
//!
//! A filter is named in one of three ways: `name:<title>`, `set:<name>`
//! (an ordered, possibly nested list of filters), or a document id such as
//! `CDR0000000123`. [`assemble`] expands a list of references into filter
//! document ids in application order.

use std::sync::Arc;

use chrono::NaiveDateTime;

use cdr_docs::{Doc, Session, VersionSpec};
use cdr_query::{Condition, Connection, Query, Role};

use crate::error::{FilterError, FilterResult};

/// One way of naming filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterRef {
    /// A filter document found by title.
    Name(String),
    /// A named filter set.
    Set(String),
    /// A filter document id.
    Id(i64),
}

impl FilterRef {
    /// Classifies a reference string.
    pub fn parse(reference: &str) -> FilterResult<Self> {
        if let Some(title) = reference.strip_prefix("name:") {
            return Ok(FilterRef::Name(title.to_string()));
        }
        if let Some(name) = reference.strip_prefix("set:") {
            return Ok(FilterRef::Set(name.to_string()));
        }
        Ok(FilterRef::Id(Doc::extract_id(reference)?))
    }
}

/// Expands references into filter document ids, in order.
pub fn assemble(
    session: &Arc<dyn Session>,
    refs: &[FilterRef],
    max_set_depth: usize,
) -> FilterResult<Vec<i64>> {
    let mut conn = session.connect(Role::Guest)?;
    let mut ids = Vec::new();
    for reference in refs {
        match reference {
            FilterRef::Id(id) => ids.push(*id),
            FilterRef::Name(title) => match Doc::id_from_title(title, conn.as_mut())? {
                Some(id) => ids.push(id),
                None => return Err(FilterError::FilterNotFound(title.clone())),
            },
            FilterRef::Set(name) => {
                let set_id = Query::new("filter_set", ["id"])
                    .where_(Condition::eq("name", name.as_str()))
                    .execute(conn.as_mut())?
                    .scalar()
                    .as_i64()
                    .ok_or_else(|| FilterError::FilterSetNotFound(name.clone()))?;
                expand_set(conn.as_mut(), name, set_id, 1, max_set_depth, &mut ids)?;
            }
        }
    }
    log::debug!("assembled filters {:?}", ids);
    Ok(ids)
}

fn expand_set(
    conn: &mut dyn Connection,
    name: &str,
    set_id: i64,
    depth: usize,
    max_depth: usize,
    ids: &mut Vec<i64>,
) -> FilterResult<()> {
    if depth > max_depth {
        return Err(FilterError::FilterSetDepth(name.to_string()));
    }
    let members = Query::new("filter_set_member", ["filter", "subset"])
        .where_(Condition::eq("filter_set", set_id))
        .order(["position"])?
        .execute(conn)?
        .into_rows();
    for member in members {
        match (member[0].as_i64(), member[1].as_i64()) {
            (Some(filter), _) => ids.push(filter),
            (None, Some(subset)) => expand_set(conn, name, subset, depth + 1, max_depth, ids)?,
            (None, None) => log::warn!("filter set {} has an empty member", name),
        }
    }
    Ok(())
}

/// Picks the version of a filter to apply.
///
/// With a date, `lastp` means the last publishable version before it, a
/// number is used as is and anything else means the last version before
/// it. Without a date the specifier is resolved normally; no specifier
/// means the working copy.
pub fn select_version(
    session: &Arc<dyn Session>,
    doc_id: i64,
    version: Option<&VersionSpec>,
    date: Option<NaiveDateTime>,
) -> FilterResult<Option<i64>> {
    let doc = Doc::load(Arc::clone(session), doc_id, version.cloned().unwrap_or_default());
    match (date, version) {
        (Some(_), Some(VersionSpec::Number(n))) if *n > 0 => Ok(Some(*n)),
        (Some(date), Some(VersionSpec::LastPublishable)) => Ok(Some(doc.version_before(date, Some(true))?)),
        (Some(date), _) => Ok(Some(doc.version_before(date, None)?)),
        (None, _) => Ok(doc.version()?),
    }
}
