//! # cdr-docs
//!
//! Versioned XML documents for the CDR repository.
//!
//! A [`Doc`] is opened for a [`Session`] with an id and a [`VersionSpec`].
//! The specifier (`"last"`, `"lastp"`, `"before 2020-01-01"`,
//! `"label Approved"`, a number) is resolved against the version history
//! once, on first use, and every other property is loaded lazily after
//! that.
//!
//! ## Quick Start
//!
//! ```rust
//! use cdr_docs::{format_cdr_id, VersionSpec};
//!
//! let spec: VersionSpec = "LastPublishableVersion".parse().unwrap();
//! assert_eq!(spec, VersionSpec::LastPublishable);
//! assert_eq!(format_cdr_id(12345), "CDR0000012345");
//! ```
//!
//! ## Modules
//!
//! - [`Doc`]: version resolution, content and control properties
//! - [`LockOptions`]/[`UnlockOptions`]: checkout protocol
//! - [`LegacyOptions`]: the `CdrDoc` representation
//! - [`TermCache`]: denormalized term hierarchies
//! - [`schema`]: SQLite bootstrap for the repository tables

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod config;
mod doc;
mod error;
mod legacy;
mod lock;
pub mod schema;
mod session;
mod term;
mod version;
pub mod xml;

pub use config::{
    StoreConfig, StoreConfigBuilder, TERM_CACHE_MAX_AGE, TERM_MAX_DEPTH, TIMEOUT_ENV,
};
pub use doc::{format_cdr_id, make_xml_date_string, xml_date, Doc, DocOptions, CDR_ID_PREFIX};
pub use error::{DocError, DocResult};
pub use legacy::{Denormalizer, LegacyOptions};
pub use lock::{
    LockHolder, LockOptions, UnlockOptions, FORCE_CHECKIN, FORCE_CHECKOUT, MODIFY_DOCUMENT,
    UNLOCK_ACTION,
};
pub use session::{Session, UserSession, ALL_ACTIONS};
pub use term::{Term, TermCache, EXCLUDED_TERM_TYPES};
pub use version::{parse_before_date, VersionSpec};
pub use xml::{Element, Node, CDR_NS, CDR_REF};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        let _: Option<Doc> = None;
        let _: Option<DocResult<()>> = None;
        let _: Option<Box<dyn Session>> = None;
        let _ = StoreConfig::default();
        assert_eq!(CDR_ID_PREFIX, "CDR");
    }
}
