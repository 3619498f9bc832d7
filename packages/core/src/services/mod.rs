//! Business Services
//!
//! This module contains the business logic layer of the catalog:
//!
//! - `AddressComponentService` - address taxonomy CRUD, upserts and tree walks
//! - `LocationService` - location hierarchy CRUD, moves, subtrees and listings
//! - `LinkageService` - location ↔ address component links and the primary flag
//! - `GeoQueryService` - radius, nearest, containment, overlap, area and GeoJSON
//!
//! Services validate payloads, delegate SQL to [`DatabaseService`], read
//! through [`CacheAside`] and invalidate it after every committed write.
//! Both handles are injected; nothing in this layer is a global.

pub mod address_component_service;
pub mod deadline;
pub mod error;
pub mod geo_query_service;
pub mod linkage_service;
pub mod location_service;

pub use address_component_service::AddressComponentService;
pub use deadline::with_deadline;
pub use error::ServiceError;
pub use geo_query_service::GeoQueryService;
pub use linkage_service::LinkageService;
pub use location_service::LocationService;

use crate::cache::{CacheAside, MemoryCache};
use crate::config::ServiceAreaConfig;
use crate::db::DatabaseService;
use std::sync::Arc;

/// All four services sharing one store handle and one cache handle
#[derive(Debug, Clone)]
pub struct ServiceAreaServices {
    pub address_components: AddressComponentService,
    pub locations: LocationService,
    pub linkages: LinkageService,
    pub geo: GeoQueryService,
}

impl ServiceAreaServices {
    pub fn new(db: Arc<DatabaseService>, cache: CacheAside) -> Self {
        Self {
            address_components: AddressComponentService::new(db.clone(), cache.clone()),
            locations: LocationService::new(db.clone(), cache.clone()),
            linkages: LinkageService::new(db.clone(), cache.clone()),
            geo: GeoQueryService::new(db, cache),
        }
    }

    /// Open the configured database with an in-process cache
    pub async fn open(config: &ServiceAreaConfig) -> Result<Self, ServiceError> {
        let db = Arc::new(DatabaseService::new(config.database_path.clone()).await?);
        let cache = CacheAside::new(
            Arc::new(MemoryCache::with_max_entries(config.cache.max_entries)),
            config.cache.clone(),
        );
        Ok(Self::new(db, cache))
    }
}
