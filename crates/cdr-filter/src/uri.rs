//! Resolver URIs.
//!
//! Stylesheets reach back into the repository through three schemes:
//!
//! | URI | Meaning |
//! |-----|---------|
//! | `cdrx:/last` | empty placeholder element |
//! | `cdr:*/CdrCtl` | control block of the document being filtered |
//! | `cdr:*/DocTitle` | title of the document being filtered |
//! | `cdr:name:<title>[/<version>]` | document (or filter) found by title |
//! | `cdr:<id>[/<version>]` | document found by id |
//! | `cdrutil:/<function>[/<args>]` | one of the [`UtilFunction`]s |
//!
//! `cdrx:` is accepted wherever `cdr:` is.

use crate::error::{FilterError, FilterResult};

/// Stand-in for a literal `+` while a value travels inside a URI.
pub const PLUS_PLACEHOLDER: &str = "@@PLUS@@";

/// Escapes a value for embedding in a resolver URI.
///
/// Literal `+` characters are first replaced by [`PLUS_PLACEHOLDER`] so that
/// they are not read back as encoded spaces; everything but unreserved
/// characters and `/` is then percent-encoded.
pub fn escape_uri(value: &str) -> String {
    percent_encode(&value.replace('+', PLUS_PLACEHOLDER))
}

/// [`escape_uri`] applied to the concatenation of several strings.
pub fn escape_uri_parts<S: AsRef<str>>(parts: &[S]) -> String {
    let joined: String = parts.iter().map(AsRef::as_ref).collect();
    escape_uri(&joined)
}

/// Reverses [`escape_uri`]: `+` means space, `%XX` is decoded and the plus
/// placeholder is restored.
pub fn unescape_uri(uri: &str) -> String {
    percent_decode(&uri.replace('+', " ")).replace(PLUS_PLACEHOLDER, "+")
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'.' | b'-' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Functions reachable through `cdrutil:` URIs.
#[derive(Debug, Clone, PartialEq)]
pub enum UtilFunction {
    /// `docid`: canonical id of the document being filtered.
    DocId,
    /// `sql-query/<query>~<value>...`: restricted ad-hoc query.
    SqlQuery(String),
    /// `get-pv-num/<id>`: latest publishable version number.
    PubVerNumber(String),
    /// `denormalizeTerm/<id>[/<anything>]`: serialized term; a trailing
    /// segment asks for the form without ancestors.
    DenormalizeTerm {
        /// Term document id.
        id: String,
        /// Include ancestor terms.
        upcode: bool,
    },
    /// `dedup-ids/<primary>~~<secondary>`: secondary ids not already seen.
    DedupIds(String),
    /// `valid-zip/<zip>`: base ZIP code if known.
    ValidZip(String),
}

/// A parsed resolver URI.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolverUri {
    /// `cdrx:/last`.
    Last,
    /// `cdr:*/CdrCtl`.
    CurrentControl,
    /// `cdr:*/DocTitle`.
    CurrentTitle,
    /// `cdr:name:<title>[/<version>]`.
    ByTitle {
        /// Title, with `@@SLASH@@` still encoded.
        title: String,
        /// Version specifier, if given.
        version: Option<String>,
    },
    /// `cdr:<id>[/<version>]`.
    ById {
        /// Document id as written.
        id: String,
        /// Version specifier, if given.
        version: Option<String>,
    },
    /// `cdrutil:/...`.
    Function(UtilFunction),
}

fn split_version(spec: &str) -> (String, Option<String>) {
    match spec.split_once('/') {
        Some((head, version)) => (head.to_string(), Some(version.to_string())),
        None => (spec.to_string(), None),
    }
}

impl ResolverUri {
    /// Decodes and classifies a URI handed to the resolver.
    pub fn parse(uri: &str) -> FilterResult<Self> {
        if uri == "cdrx:/last" {
            return Ok(ResolverUri::Last);
        }
        let decoded = unescape_uri(uri);
        let (scheme, rest) = decoded
            .split_once(':')
            .ok_or_else(|| FilterError::UnsupportedUri(decoded.clone()))?;
        let parms = rest.trim_matches('/');
        match scheme {
            "cdr" | "cdrx" => Self::document(parms, &decoded),
            "cdrutil" => Self::function(parms, &decoded).map(ResolverUri::Function),
            _ => Err(FilterError::UnsupportedUri(decoded.clone())),
        }
    }

    fn document(parms: &str, decoded: &str) -> FilterResult<Self> {
        if parms.starts_with('*') {
            if parms.contains("/CdrCtl") {
                return Ok(ResolverUri::CurrentControl);
            }
            if parms.contains("/DocTitle") {
                return Ok(ResolverUri::CurrentTitle);
            }
            return Err(FilterError::UnsupportedUri(decoded.to_string()));
        }
        if let Some(spec) = parms.strip_prefix("name:") {
            let (title, version) = split_version(spec);
            return Ok(ResolverUri::ByTitle { title, version });
        }
        let (id, version) = split_version(parms);
        Ok(ResolverUri::ById { id, version })
    }

    fn function(parms: &str, decoded: &str) -> FilterResult<UtilFunction> {
        let (name, args) = match parms.split_once('/') {
            Some((name, args)) => (name, args.to_string()),
            None => (parms, String::new()),
        };
        Ok(match name {
            "docid" => UtilFunction::DocId,
            "sql-query" => UtilFunction::SqlQuery(args),
            "get-pv-num" => UtilFunction::PubVerNumber(args),
            "denormalizeTerm" => match args.split_once('/') {
                Some((id, _)) => UtilFunction::DenormalizeTerm {
                    id: id.to_string(),
                    upcode: false,
                },
                None => UtilFunction::DenormalizeTerm {
                    id: args,
                    upcode: true,
                },
            },
            "dedup-ids" => UtilFunction::DedupIds(args),
            "valid-zip" => UtilFunction::ValidZip(args),
            _ => {
                return Err(FilterError::UnsupportedResolverFunction {
                    function: name.to_string(),
                    uri: decoded.to_string(),
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_uri_protects_plus() {
        assert_eq!(escape_uri("a+b c/d"), "a%40%40PLUS%40%40b%20c/d");
        assert_eq!(unescape_uri(&escape_uri("a+b c/d")), "a+b c/d");
        assert_eq!(escape_uri_parts(&["x", "+", "y"]), escape_uri("x+y"));
    }

    #[test]
    fn test_unescape_treats_plus_as_space() {
        assert_eq!(unescape_uri("Vendor+Filter%2FSummary"), "Vendor Filter/Summary");
        assert_eq!(unescape_uri("100%"), "100%");
        assert_eq!(unescape_uri("%zz"), "%zz");
    }

    #[test]
    fn test_document_forms() {
        assert_eq!(ResolverUri::parse("cdrx:/last").unwrap(), ResolverUri::Last);
        assert_eq!(
            ResolverUri::parse("cdr:*/CdrCtl").unwrap(),
            ResolverUri::CurrentControl
        );
        assert_eq!(
            ResolverUri::parse("cdrx:/*/DocTitle").unwrap(),
            ResolverUri::CurrentTitle
        );
        assert_eq!(
            ResolverUri::parse("cdr:name:Module%20Filter/lastp").unwrap(),
            ResolverUri::ByTitle {
                title: "Module Filter".into(),
                version: Some("lastp".into())
            }
        );
        assert_eq!(
            ResolverUri::parse("cdr:CDR0000012345").unwrap(),
            ResolverUri::ById {
                id: "CDR0000012345".into(),
                version: None
            }
        );
        assert!(matches!(
            ResolverUri::parse("cdr:*/Other"),
            Err(FilterError::UnsupportedUri(_))
        ));
    }

    #[test]
    fn test_function_forms() {
        assert_eq!(
            ResolverUri::parse("cdrutil:/docid").unwrap(),
            ResolverUri::Function(UtilFunction::DocId)
        );
        assert_eq!(
            ResolverUri::parse("cdrutil:/denormalizeTerm/CDR0000000042/Y").unwrap(),
            ResolverUri::Function(UtilFunction::DenormalizeTerm {
                id: "CDR0000000042".into(),
                upcode: false
            })
        );
        assert_eq!(
            ResolverUri::parse("cdrutil:/sql-query/SELECT+1~x").unwrap(),
            ResolverUri::Function(UtilFunction::SqlQuery("SELECT 1~x".into()))
        );
        assert!(matches!(
            ResolverUri::parse("cdrutil:/launch-missiles"),
            Err(FilterError::UnsupportedResolverFunction { .. })
        ));
        assert!(matches!(
            ResolverUri::parse("http://example.com/x"),
            Err(FilterError::UnsupportedUri(_))
        ));
        assert!(matches!(
            ResolverUri::parse("no scheme"),
            Err(FilterError::UnsupportedUri(_))
        ));
    }
}
