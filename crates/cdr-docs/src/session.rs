//! Identity and permission context for document operations.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use cdr_query::{Connection, ConnectionProvider, QueryResult, Role};

use crate::config::StoreConfig;

/// Wildcard action granting every permission.
pub const ALL_ACTIONS: &str = "*";

/// Caller identity, permissions and database access for a request.
pub trait Session: Send + Sync {
    /// Primary key of the account in the `usr` table.
    fn user_id(&self) -> i64;

    /// Login name of the account.
    fn user_name(&self) -> &str;

    /// Whether the account may perform `action`, optionally on a doctype.
    fn can_do(&self, action: &str, doctype: Option<&str>) -> bool;

    /// Source of database connections.
    fn provider(&self) -> &dyn ConnectionProvider;

    /// Store settings.
    fn config(&self) -> &StoreConfig;

    /// Opens a connection with the configured timeout.
    fn connect(&self, role: Role) -> QueryResult<Box<dyn Connection>> {
        self.provider().connect(role, self.config().timeout)
    }
}

/// Session backed by an in-memory permission set.
#[derive(Clone)]
pub struct UserSession {
    user_id: i64,
    user_name: String,
    grants: HashSet<(String, Option<String>)>,
    provider: Arc<dyn ConnectionProvider>,
    config: StoreConfig,
}

impl UserSession {
    /// Creates a session for an account with no permissions.
    pub fn new(
        user_id: i64,
        user_name: impl Into<String>,
        provider: Arc<dyn ConnectionProvider>,
    ) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
            grants: HashSet::new(),
            provider,
            config: StoreConfig::default(),
        }
    }

    /// Grants an action on every doctype. `"*"` grants everything.
    pub fn grant(mut self, action: impl Into<String>) -> Self {
        self.grants.insert((action.into(), None));
        self
    }

    /// Grants an action on one doctype.
    pub fn grant_for(mut self, action: impl Into<String>, doctype: impl Into<String>) -> Self {
        self.grants.insert((action.into(), Some(doctype.into())));
        self
    }

    /// Replaces the store settings.
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }
}

impl fmt::Debug for UserSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSession")
            .field("user_id", &self.user_id)
            .field("user_name", &self.user_name)
            .field("grants", &self.grants)
            .finish_non_exhaustive()
    }
}

impl Session for UserSession {
    fn user_id(&self) -> i64 {
        self.user_id
    }

    fn user_name(&self) -> &str {
        &self.user_name
    }

    fn can_do(&self, action: &str, doctype: Option<&str>) -> bool {
        if self.grants.contains(&(ALL_ACTIONS.to_string(), None)) {
            return true;
        }
        if self.grants.contains(&(action.to_string(), None)) {
            return true;
        }
        match doctype {
            Some(doctype) => self
                .grants
                .contains(&(action.to_string(), Some(doctype.to_string()))),
            None => false,
        }
    }

    fn provider(&self) -> &dyn ConnectionProvider {
        self.provider.as_ref()
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdr_query::SqliteProvider;

    fn session() -> UserSession {
        UserSession::new(1, "alice", Arc::new(SqliteProvider::new("unused.db")))
    }

    #[test]
    fn test_no_grants_denies() {
        assert!(!session().can_do("MODIFY DOCUMENT", Some("Term")));
    }

    #[test]
    fn test_doctype_grant_is_scoped() {
        let s = session().grant_for("MODIFY DOCUMENT", "Term");
        assert!(s.can_do("MODIFY DOCUMENT", Some("Term")));
        assert!(!s.can_do("MODIFY DOCUMENT", Some("Summary")));
        assert!(!s.can_do("MODIFY DOCUMENT", None));
    }

    #[test]
    fn test_wildcard_grants_everything() {
        let s = session().grant(ALL_ACTIONS);
        assert!(s.can_do("FORCE CHECKIN", Some("Summary")));
        assert_eq!(s.user_name(), "alice");
    }
}
