//! Cache Layer
//!
//! Key/value caching with TTL expiry and glob-pattern invalidation, used by
//! the services for read-through / write-invalidate (cache-aside) access.
//!
//! # Architecture
//!
//! - [`CacheStore`] - the narrow async interface any backing cache implements
//! - [`MemoryCache`] - in-process implementation (tokio `RwLock<HashMap>`)
//! - [`CacheAside`] - JSON read-through helper that treats cache failures as misses
//! - [`keys`] - key composition for every namespace the services use

mod cache_aside;
pub mod keys;
mod memory;

pub use cache_aside::CacheAside;
pub use memory::{MemoryCache, MemoryCacheStats, DEFAULT_MAX_ENTRIES};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Cache backend errors
///
/// Never surfaced to service callers: [`CacheAside`] logs them and falls back
/// to the store.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid cache key pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Failed to (de)serialize cached value: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key/value cache with TTL and pattern deletion
///
/// Values are opaque strings; namespacing is the caller's job (see [`keys`]).
/// `delete_pattern` takes a glob where `*` matches any run of characters.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every key matching `pattern`; returns how many were removed
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;
}
