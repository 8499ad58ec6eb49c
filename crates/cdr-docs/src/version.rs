//! Version specifiers.
//!
//! A specifier names a version symbolically; [`crate::Doc::version`]
//! resolves it against the version history exactly once.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;

use crate::error::{DocError, DocResult};

/// Requested version of a document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VersionSpec {
    /// The current working copy.
    #[default]
    Current,
    /// The most recently saved version.
    Last,
    /// The most recently saved publishable version.
    LastPublishable,
    /// The latest version created strictly before a date.
    Before(NaiveDateTime),
    /// The latest version carrying a label.
    Label(String),
    /// A specific version number. Numbers below one mean the working copy,
    /// as they do for [`VersionSpec::from`].
    Number(i64),
}

impl VersionSpec {
    /// Parses a specifier, case-insensitively.
    ///
    /// Accepted forms are `current`, `last`/`lastversion`, anything starting
    /// with `lastp`, `before <date>`, `label <name>` and integers. An empty
    /// string and integers below one mean the current working copy.
    pub fn parse(spec: &str) -> DocResult<Self> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Ok(VersionSpec::Current);
        }
        let lower = trimmed.to_lowercase();
        if lower == "current" {
            return Ok(VersionSpec::Current);
        }
        if lower == "last" || lower == "lastversion" {
            return Ok(VersionSpec::Last);
        }
        if lower.starts_with("lastp") {
            return Ok(VersionSpec::LastPublishable);
        }
        if lower.starts_with("before ") {
            let date = trimmed.get("before ".len()..).unwrap_or("").trim();
            return parse_before_date(date)
                .map(VersionSpec::Before)
                .ok_or_else(|| DocError::InvalidVersionSpec(spec.to_string()));
        }
        if lower.starts_with("label ") {
            let label = trimmed.get("label ".len()..).unwrap_or("").trim();
            if label.is_empty() {
                return Err(DocError::InvalidVersionSpec(spec.to_string()));
            }
            return Ok(VersionSpec::Label(label.to_string()));
        }
        match trimmed.parse::<i64>() {
            Ok(n) => Ok(VersionSpec::from(n)),
            Err(_) => Err(DocError::InvalidVersionSpec(spec.to_string())),
        }
    }
}

/// Parses the date of a `before` specifier.
///
/// Accepts `YYYY-MM-DD` (midnight), and `YYYY-MM-DD HH:MM[:SS[.fff]]` with
/// either a space or `T` between date and time.
pub fn parse_before_date(text: &str) -> Option<NaiveDateTime> {
    cdr_query::parse_timestamp(text)
}

impl From<i64> for VersionSpec {
    fn from(n: i64) -> Self {
        if n > 0 {
            VersionSpec::Number(n)
        } else {
            VersionSpec::Current
        }
    }
}

impl From<i32> for VersionSpec {
    fn from(n: i32) -> Self {
        VersionSpec::from(i64::from(n))
    }
}

impl FromStr for VersionSpec {
    type Err = DocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionSpec::parse(s)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Current => write!(f, "current"),
            VersionSpec::Last => write!(f, "last"),
            VersionSpec::LastPublishable => write!(f, "lastp"),
            VersionSpec::Before(when) => write!(f, "before {}", when.format("%Y-%m-%d %H:%M:%S")),
            VersionSpec::Label(label) => write!(f, "label {}", label),
            VersionSpec::Number(n) => write!(f, "{}", n),
        }
    }
}
