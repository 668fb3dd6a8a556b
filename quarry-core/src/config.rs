//! Configuration types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::schema::validate_identifier;
use crate::StructureKey;

// ============================================================================
// CACHE CONSUME MODE
// ============================================================================

/// Policy for id-based reads against an enabled cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheConsumeMode {
    /// Serve hits from cache; misses read the database without writing back.
    ReadOnly,
    /// Serve hits from cache; misses read the database and populate the cache.
    #[default]
    UpdateCacheWithDbResult,
    /// Always read the database and never touch the cache.
    IgnoreCache,
}

impl CacheConsumeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheConsumeMode::ReadOnly => "read_only",
            CacheConsumeMode::UpdateCacheWithDbResult => "update_cache_with_db_result",
            CacheConsumeMode::IgnoreCache => "ignore_cache",
        }
    }

    pub fn writes_back(&self) -> bool {
        matches!(self, CacheConsumeMode::UpdateCacheWithDbResult)
    }
}

impl fmt::Display for CacheConsumeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheConsumeMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "read_only" | "readonly" => Ok(CacheConsumeMode::ReadOnly),
            "update_cache_with_db_result" | "update" => Ok(CacheConsumeMode::UpdateCacheWithDbResult),
            "ignore_cache" | "ignore" => Ok(CacheConsumeMode::IgnoreCache),
            _ => Err(ConfigError::InvalidValue {
                field: "cache.consume_mode".to_string(),
                value: s.to_string(),
                reason: "expected read_only, update_cache_with_db_result or ignore_cache"
                    .to_string(),
            }),
        }
    }
}

// ============================================================================
// CONFIG STRUCTS
// ============================================================================

/// Cache layer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether the database gets a cache provider at all.
    pub enabled: bool,
    /// Every structure type implicitly gets a cache entry on first lookup.
    pub auto_enable: bool,
    /// Default consume mode for new sessions.
    pub consume_mode: CacheConsumeMode,
    /// Structure keys enabled up front.
    pub enabled_structures: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_enable: false,
            consume_mode: CacheConsumeMode::UpdateCacheWithDbResult,
            enabled_structures: Vec::new(),
        }
    }
}

/// Serializer configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializerConfig {
    /// Top-level members stripped from every payload (members holding
    /// other structures, stored on their own).
    pub excluded_members: Vec<String>,
}

/// Master configuration of a database instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    pub cache: CacheConfig,
    pub serializer: SerializerConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: "quarry".to_string(),
            cache: CacheConfig::default(),
            serializer: SerializerConfig::default(),
        }
    }
}

impl DatabaseConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Enable caching with the given consume mode.
    pub fn with_cache(mut self, consume_mode: CacheConsumeMode) -> Self {
        self.cache.enabled = true;
        self.cache.consume_mode = consume_mode;
        self
    }

    pub fn with_auto_enable(mut self, auto_enable: bool) -> Self {
        self.cache.auto_enable = auto_enable;
        self
    }

    pub fn with_cached_structure(mut self, key: impl Into<String>) -> Self {
        self.cache.enabled_structures.push(key.into());
        self
    }

    pub fn with_excluded_member(mut self, member: impl Into<String>) -> Self {
        self.serializer.excluded_members.push(member.into());
        self
    }

    /// Build a configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from a key lookup, falling back to defaults for
    /// absent keys. Present but malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("QUARRY_DB_NAME") {
            config.name = name;
        }
        if let Some(enabled) = lookup("QUARRY_CACHE_ENABLED") {
            config.cache.enabled = parse_bool("QUARRY_CACHE_ENABLED", &enabled)?;
        }
        if let Some(auto) = lookup("QUARRY_CACHE_AUTO_ENABLE") {
            config.cache.auto_enable = parse_bool("QUARRY_CACHE_AUTO_ENABLE", &auto)?;
        }
        if let Some(mode) = lookup("QUARRY_CACHE_CONSUME_MODE") {
            config.cache.consume_mode = mode.parse()?;
        }
        if let Some(structures) = lookup("QUARRY_CACHE_STRUCTURES") {
            config.cache.enabled_structures = structures
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "name".to_string(),
            });
        }
        validate_identifier(&self.name).map_err(|e| ConfigError::InvalidValue {
            field: "name".to_string(),
            value: self.name.clone(),
            reason: e.to_string(),
        })?;
        for key in &self.cache.enabled_structures {
            StructureKey::parse(key).map_err(|e| ConfigError::InvalidValue {
                field: "cache.enabled_structures".to_string(),
                value: key.clone(),
                reason: e.to_string(),
            })?;
        }
        if !self.cache.enabled && (self.cache.auto_enable || !self.cache.enabled_structures.is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "cache.enabled".to_string(),
                value: "false".to_string(),
                reason: "auto_enable and enabled_structures require the cache to be enabled"
                    .to_string(),
            });
        }
        Ok(())
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
