//! Configuration for the document store.

use std::time::Duration;

use cdr_query::DEFAULT_TIMEOUT;

/// Environment variable overriding the query timeout, in seconds.
pub const TIMEOUT_ENV: &str = "CDR_DB_TIMEOUT";

/// Deepest parent chain a term may have.
pub const TERM_MAX_DEPTH: usize = 15;

/// Age after which the term cache is flushed.
pub const TERM_CACHE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Settings shared by document store operations.
///
/// # Example
///
/// ```rust
/// use cdr_docs::StoreConfig;
/// use std::time::Duration;
///
/// let config = StoreConfig::builder()
///     .with_timeout(Duration::from_secs(30))
///     .with_term_max_depth(10)
///     .build();
/// assert_eq!(config.term_max_depth, 10);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StoreConfig {
    /// Timeout applied to every database statement.
    pub timeout: Duration,
    /// Maximum depth of term parent resolution.
    pub term_max_depth: usize,
    /// Maximum age of the term cache before it is flushed.
    pub term_cache_max_age: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            term_max_depth: TERM_MAX_DEPTH,
            term_cache_max_age: TERM_CACHE_MAX_AGE,
        }
    }
}

impl StoreConfig {
    /// Creates a new builder for StoreConfig.
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Defaults, with the timeout taken from `CDR_DB_TIMEOUT` when it holds
    /// a whole number of seconds.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = std::env::var(TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        config
    }
}

/// Builder for StoreConfig.
#[derive(Debug, Clone, Default)]
pub struct StoreConfigBuilder {
    timeout: Option<Duration>,
    term_max_depth: Option<usize>,
    term_cache_max_age: Option<Duration>,
}

impl StoreConfigBuilder {
    /// Sets the statement timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the maximum term depth.
    pub fn with_term_max_depth(mut self, depth: usize) -> Self {
        self.term_max_depth = Some(depth);
        self
    }

    /// Sets the term cache age ceiling.
    pub fn with_term_cache_max_age(mut self, age: Duration) -> Self {
        self.term_cache_max_age = Some(age);
        self
    }

    /// Builds the StoreConfig.
    pub fn build(self) -> StoreConfig {
        let defaults = StoreConfig::default();
        StoreConfig {
            timeout: self.timeout.unwrap_or(defaults.timeout),
            term_max_depth: self.term_max_depth.unwrap_or(defaults.term_max_depth),
            term_cache_max_age: self
                .term_cache_max_age
                .unwrap_or(defaults.term_cache_max_age),
        }
    }
}
