//! Read-through / write-invalidate helper
//!
//! Services never talk to a [`CacheStore`] directly. Reads go through
//! [`CacheAside::get_or_load`], writes call the `invalidate*` methods after the
//! store commits. A failing or unreachable cache only costs a store round trip:
//! errors are logged and treated as misses.

use super::{keys, CacheStore, MemoryCache};
use crate::config::CacheConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct CacheAside {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
}

impl std::fmt::Debug for CacheAside {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAside")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CacheAside {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// In-process cache with default TTLs
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()), CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn entity_ttl(&self) -> Duration {
        self.config.entity_ttl()
    }

    pub fn list_ttl(&self) -> Duration {
        self.config.list_ttl()
    }

    pub fn geo_ttl(&self) -> Duration {
        self.config.geo_ttl()
    }

    /// Return the cached value for `key`, or run `load` and cache its result
    ///
    /// Load errors propagate untouched and nothing is cached for them.
    pub async fn get_or_load<T, E, F, Fut>(&self, key: &str, ttl: Duration, load: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.read(key).await {
            return Ok(value);
        }
        let value = load().await?;
        self.write(key, &value, ttl).await;
        Ok(value)
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    tracing::debug!(key, "cache hit");
                    Some(value)
                }
                Err(e) => {
                    tracing::warn!(key, error = %e, "Dropping undecodable cache entry");
                    self.delete(key).await;
                    None
                }
            },
            Ok(None) => {
                tracing::debug!(key, "cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache read failed, falling back to store");
                None
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "Skipping cache write for unserializable value");
                return;
            }
        };
        if let Err(e) = self.store.set(key, raw, ttl).await {
            tracing::warn!(key, error = %e, "Cache write failed");
        }
    }

    /// Drop one key
    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            tracing::warn!(key, error = %e, "Cache delete failed");
        }
    }

    /// Drop every key matching a `*` glob
    pub async fn delete_pattern(&self, pattern: &str) {
        match self.store.delete_pattern(pattern).await {
            Ok(removed) => tracing::debug!(pattern, removed, "cache invalidated"),
            Err(e) => tracing::warn!(pattern, error = %e, "Cache pattern delete failed"),
        }
    }

    pub async fn invalidate_address_component(&self, id: &str) {
        self.delete(&keys::address_component(id)).await;
        self.delete(&keys::links_by_component(id)).await;
        self.delete_pattern(&keys::address_component_lists()).await;
        // Joined link views embed the component
        self.delete_pattern(&format!("{}:components:*", keys::LOCATION_PREFIX))
            .await;
    }

    pub async fn invalidate_all_address_components(&self) {
        self.delete_pattern(&format!("{}:*", keys::ADDRESS_COMPONENT_PREFIX))
            .await;
        self.delete_pattern(&format!("{}:component:*", keys::LINK_PREFIX))
            .await;
        self.delete_pattern(&format!("{}:components:*", keys::LOCATION_PREFIX))
            .await;
    }

    /// Entity, list and tree keys for one location; `geometry` also drops spatial results
    pub async fn invalidate_location(&self, id: &str, geometry: bool) {
        self.delete(&keys::location(id)).await;
        self.delete(&keys::location_components(id)).await;
        self.delete(&keys::links_by_location(id)).await;
        self.delete_pattern(&keys::location_lists()).await;
        self.delete_pattern(&keys::location_trees()).await;
        if geometry {
            self.invalidate_geo().await;
        }
    }

    /// Everything under `location:*` plus spatial results (moves, bulk writes)
    pub async fn invalidate_all_locations(&self) {
        self.delete_pattern(&format!("{}:*", keys::LOCATION_PREFIX))
            .await;
        self.delete_pattern(&format!("{}:location:*", keys::LINK_PREFIX))
            .await;
        self.invalidate_geo().await;
    }

    pub async fn invalidate_link(&self, link_id: &str, location_id: &str, component_id: &str) {
        self.delete(&keys::link(link_id)).await;
        self.delete(&keys::links_by_location(location_id)).await;
        self.delete(&keys::links_by_component(component_id)).await;
        self.delete(&keys::location_components(location_id)).await;
    }

    /// Every link family key; used by bulk link writes
    pub async fn invalidate_all_links(&self) {
        self.delete_pattern(&format!("{}:*", keys::LINK_PREFIX)).await;
        self.delete_pattern(&format!("{}:components:*", keys::LOCATION_PREFIX))
            .await;
    }

    pub async fn invalidate_geo(&self) {
        self.delete_pattern(&keys::geo_all()).await;
    }
}
