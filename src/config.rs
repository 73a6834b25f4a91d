//! Store configuration
//!
//! Table names are bound once, from a validated prefix, when the store is built.
//! Nothing at runtime can change the schema shape a manager talks to.

use crate::error::{PolicyStoreError, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

/// Validated table name prefix
///
/// # Rules
/// - ASCII letter first, then letters, digits or underscores
/// - Length: 1-48 characters (suffixes are appended per table)
///
/// # Examples
///
/// ```
/// use policy_store::TablePrefix;
///
/// let prefix = TablePrefix::new("hyd_pol").unwrap();
/// assert_eq!(prefix.as_str(), "hyd_pol");
///
/// assert!(TablePrefix::new("1pol").is_err());
/// assert!(TablePrefix::new("pol; DROP TABLE x").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TablePrefix(String);

impl TablePrefix {
    const PATTERN: &'static str = r"^[A-Za-z][A-Za-z0-9_]*$";

    const MAX_LENGTH: usize = 48;

    /// Prefix used when none is configured
    pub const DEFAULT: &'static str = "hydpol";

    /// Create a new validated prefix
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        Self::validate(&prefix)?;
        Ok(TablePrefix(prefix))
    }

    fn validate(prefix: &str) -> Result<()> {
        if prefix.is_empty() {
            return Err(PolicyStoreError::InvalidConfig(
                "table prefix cannot be empty".to_string(),
            ));
        }

        if prefix.len() > Self::MAX_LENGTH {
            return Err(PolicyStoreError::InvalidConfig(format!(
                "table prefix too long (max {} characters)",
                Self::MAX_LENGTH
            )));
        }

        let re = Regex::new(Self::PATTERN)
            .map_err(|e| PolicyStoreError::InvalidConfig(e.to_string()))?;
        if !re.is_match(prefix) {
            return Err(PolicyStoreError::InvalidConfig(format!(
                "table prefix '{}' must start with a letter and contain only letters, digits and underscores",
                prefix
            )));
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TablePrefix {
    fn default() -> Self {
        TablePrefix(Self::DEFAULT.to_string())
    }
}

impl AsRef<str> for TablePrefix {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TablePrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn serialize_prefix<S>(prefix: &TablePrefix, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(prefix.as_str())
}

fn deserialize_prefix<'de, D>(deserializer: D) -> std::result::Result<TablePrefix, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    TablePrefix::new(s).map_err(serde::de::Error::custom)
}

/// What Create does when the policy ID already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicyId {
    /// Fail with a constraint violation
    #[default]
    Reject,
    /// Succeed without touching the stored policy
    Ignore,
}

/// Policy store configuration
///
/// # Examples
///
/// ```
/// use policy_store::{DuplicatePolicyId, StoreConfig};
///
/// let config = StoreConfig::from_toml_str(r#"
///     table_prefix = "acl"
///     on_duplicate_id = "ignore"
/// "#).unwrap();
///
/// assert_eq!(config.table_prefix.as_str(), "acl");
/// assert_eq!(config.on_duplicate_id, DuplicatePolicyId::Ignore);
/// assert!(!config.legacy_pagination_reset);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(
        serialize_with = "serialize_prefix",
        deserialize_with = "deserialize_prefix"
    )]
    pub table_prefix: TablePrefix,

    pub on_duplicate_id: DuplicatePolicyId,

    /// Reset to the full set when `offset + limit` overruns it (old GetAll behavior)
    pub legacy_pagination_reset: bool,

    /// Compiled matchers kept for candidate queries
    pub pattern_cache_capacity: usize,

    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            table_prefix: TablePrefix::default(),
            on_duplicate_id: DuplicatePolicyId::default(),
            legacy_pagination_reset: false,
            pattern_cache_capacity: 256,
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Parse configuration from a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Check values serde cannot reject on its own
    pub fn validate(&self) -> Result<()> {
        if self.pattern_cache_capacity == 0 {
            return Err(PolicyStoreError::InvalidConfig(
                "pattern_cache_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`StoreConfig`]
///
/// # Examples
///
/// ```
/// use policy_store::StoreConfigBuilder;
///
/// let config = StoreConfigBuilder::new()
///     .table_prefix("hyd_pol")
///     .legacy_pagination_reset()
///     .build()
///     .unwrap();
///
/// assert_eq!(config.table_prefix.as_str(), "hyd_pol");
/// ```
#[derive(Debug, Default)]
pub struct StoreConfigBuilder {
    table_prefix: Option<String>,
    on_duplicate_id: DuplicatePolicyId,
    legacy_pagination_reset: bool,
    pattern_cache_capacity: Option<usize>,
    busy_timeout_ms: Option<u64>,
}

impl StoreConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the table prefix (validated on build)
    pub fn table_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.table_prefix = Some(prefix.into());
        self
    }

    pub fn on_duplicate_id(mut self, mode: DuplicatePolicyId) -> Self {
        self.on_duplicate_id = mode;
        self
    }

    /// Enable the GetAll pagination reset quirk
    pub fn legacy_pagination_reset(mut self) -> Self {
        self.legacy_pagination_reset = true;
        self
    }

    pub fn pattern_cache_capacity(mut self, capacity: usize) -> Self {
        self.pattern_cache_capacity = Some(capacity);
        self
    }

    pub fn busy_timeout_ms(mut self, millis: u64) -> Self {
        self.busy_timeout_ms = Some(millis);
        self
    }

    pub fn build(self) -> Result<StoreConfig> {
        let defaults = StoreConfig::default();
        let table_prefix = match self.table_prefix {
            Some(prefix) => TablePrefix::new(prefix)?,
            None => defaults.table_prefix,
        };

        let config = StoreConfig {
            table_prefix,
            on_duplicate_id: self.on_duplicate_id,
            legacy_pagination_reset: self.legacy_pagination_reset,
            pattern_cache_capacity: self
                .pattern_cache_capacity
                .unwrap_or(defaults.pattern_cache_capacity),
            busy_timeout_ms: self.busy_timeout_ms.unwrap_or(defaults.busy_timeout_ms),
        };
        config.validate()?;
        Ok(config)
    }
}
