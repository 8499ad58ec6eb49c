//! Configuration for the filter engine.

use std::time::Duration;

/// Environment variable overriding the filter shelf life, in seconds.
pub const SHELF_LIFE_ENV: &str = "CDR_FILTER_SHELF_LIFE";

/// Seconds a cached filter stays fresh without being used.
pub const SHELF_LIFE: Duration = Duration::from_secs(60);

/// Deepest nesting of filter sets.
pub const MAX_FILTER_SET_DEPTH: usize = 20;

/// Default number of filters kept in the cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Placeholder replaced by the document type in
/// [`FilterConfig::denormalization_filter`].
pub const DOCTYPE_PLACEHOLDER: &str = "{doctype}";

/// Settings for [`crate::FilterEngine`].
///
/// # Example
///
/// ```rust
/// use cdr_filter::FilterConfig;
/// use std::time::Duration;
///
/// let config = FilterConfig::builder()
///     .with_shelf_life(Duration::from_secs(5))
///     .with_cache_capacity(16)
///     .build();
/// assert_eq!(config.denormalization_filter("Summary"), "set:Denormalization Summary Set");
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterConfig {
    /// How long a cached filter stays fresh between uses.
    pub shelf_life: Duration,
    /// Maximum number of cached filters.
    pub cache_capacity: usize,
    /// Deepest allowed filter set nesting.
    pub max_set_depth: usize,
    /// Filter reference used to denormalize documents; `{doctype}` is
    /// replaced by the document type name.
    pub denormalization_template: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            shelf_life: SHELF_LIFE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_set_depth: MAX_FILTER_SET_DEPTH,
            denormalization_template: "set:Denormalization {doctype} Set".to_string(),
        }
    }
}

impl FilterConfig {
    /// Creates a new builder for FilterConfig.
    pub fn builder() -> FilterConfigBuilder {
        FilterConfigBuilder::default()
    }

    /// Defaults, with the shelf life taken from `CDR_FILTER_SHELF_LIFE`
    /// when it holds a whole number of seconds.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = std::env::var(SHELF_LIFE_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.shelf_life = Duration::from_secs(secs);
        }
        config
    }

    /// Filter reference which denormalizes documents of `doctype`.
    pub fn denormalization_filter(&self, doctype: &str) -> String {
        self.denormalization_template
            .replace(DOCTYPE_PLACEHOLDER, doctype)
    }
}

/// Builder for FilterConfig.
#[derive(Debug, Clone, Default)]
pub struct FilterConfigBuilder {
    shelf_life: Option<Duration>,
    cache_capacity: Option<usize>,
    max_set_depth: Option<usize>,
    denormalization_template: Option<String>,
}

impl FilterConfigBuilder {
    /// Sets the shelf life.
    pub fn with_shelf_life(mut self, shelf_life: Duration) -> Self {
        self.shelf_life = Some(shelf_life);
        self
    }

    /// Sets the cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    /// Sets the maximum filter set depth.
    pub fn with_max_set_depth(mut self, depth: usize) -> Self {
        self.max_set_depth = Some(depth);
        self
    }

    /// Sets the denormalization filter template.
    pub fn with_denormalization_template(mut self, template: impl Into<String>) -> Self {
        self.denormalization_template = Some(template.into());
        self
    }

    /// Builds the FilterConfig.
    pub fn build(self) -> FilterConfig {
        let defaults = FilterConfig::default();
        FilterConfig {
            shelf_life: self.shelf_life.unwrap_or(defaults.shelf_life),
            cache_capacity: self.cache_capacity.unwrap_or(defaults.cache_capacity),
            max_set_depth: self.max_set_depth.unwrap_or(defaults.max_set_depth),
            denormalization_template: self
                .denormalization_template
                .unwrap_or(defaults.denormalization_template),
        }
    }
}
