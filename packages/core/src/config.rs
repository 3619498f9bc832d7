//! Runtime Configuration
//!
//! Database location and cache TTLs. Values come from serde defaults and can
//! be overridden through environment variables:
//!
//! - `SERVICEAREA_DB_PATH`
//! - `SERVICEAREA_CACHE_ENTITY_TTL_SECS`
//! - `SERVICEAREA_CACHE_LIST_TTL_SECS`
//! - `SERVICEAREA_CACHE_GEO_TTL_SECS`
//! - `SERVICEAREA_CACHE_MAX_ENTRIES`

use crate::cache::DEFAULT_MAX_ENTRIES;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DB_PATH_ENV: &str = "SERVICEAREA_DB_PATH";
pub const ENTITY_TTL_ENV: &str = "SERVICEAREA_CACHE_ENTITY_TTL_SECS";
pub const LIST_TTL_ENV: &str = "SERVICEAREA_CACHE_LIST_TTL_SECS";
pub const GEO_TTL_ENV: &str = "SERVICEAREA_CACHE_GEO_TTL_SECS";
pub const MAX_ENTRIES_ENV: &str = "SERVICEAREA_CACHE_MAX_ENTRIES";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {var}: expected a whole number")]
    InvalidNumber { var: String, value: String },
}

fn default_entity_ttl_secs() -> u64 {
    300
}

fn default_list_ttl_secs() -> u64 {
    60
}

fn default_geo_ttl_secs() -> u64 {
    30
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

/// Default database file: `~/.servicearea/database/servicearea.db`
///
/// Falls back to the working directory when no home directory is set.
pub fn default_database_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".servicearea")
        .join("database")
        .join("servicearea.db")
}

/// Cache TTLs per key family, plus the in-process entry cap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_entity_ttl_secs")]
    pub entity_ttl_secs: u64,
    #[serde(default = "default_list_ttl_secs")]
    pub list_ttl_secs: u64,
    #[serde(default = "default_geo_ttl_secs")]
    pub geo_ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entity_ttl_secs: default_entity_ttl_secs(),
            list_ttl_secs: default_list_ttl_secs(),
            geo_ttl_secs: default_geo_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

impl CacheConfig {
    pub fn entity_ttl(&self) -> Duration {
        Duration::from_secs(self.entity_ttl_secs)
    }

    /// TTL for list, search and tree results
    pub fn list_ttl(&self) -> Duration {
        Duration::from_secs(self.list_ttl_secs)
    }

    pub fn geo_ttl(&self) -> Duration {
        Duration::from_secs(self.geo_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAreaConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for ServiceAreaConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            cache: CacheConfig::default(),
        }
    }
}

impl ServiceAreaConfig {
    /// Defaults overridden by whatever `SERVICEAREA_*` variables are set
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from any lookup function
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(DB_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            config.database_path = PathBuf::from(path);
        }
        if let Some(secs) = parse_number(&lookup, ENTITY_TTL_ENV)? {
            config.cache.entity_ttl_secs = secs;
        }
        if let Some(secs) = parse_number(&lookup, LIST_TTL_ENV)? {
            config.cache.list_ttl_secs = secs;
        }
        if let Some(secs) = parse_number(&lookup, GEO_TTL_ENV)? {
            config.cache.geo_ttl_secs = secs;
        }
        if let Some(max) = parse_number(&lookup, MAX_ENTRIES_ENV)? {
            config.cache.max_entries = usize::try_from(max).unwrap_or(usize::MAX);
        }

        tracing::debug!(
            database_path = %config.database_path.display(),
            entity_ttl = config.cache.entity_ttl_secs,
            list_ttl = config.cache.list_ttl_secs,
            geo_ttl = config.cache.geo_ttl_secs,
            max_entries = config.cache.max_entries,
            "Loaded service area configuration"
        );
        Ok(config)
    }
}

/// Whole-number variable, if set
fn parse_number<F>(lookup: &F, var: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber {
                var: var.to_string(),
                value: raw,
            }),
    }
}
