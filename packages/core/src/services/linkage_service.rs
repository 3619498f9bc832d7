//! Linkage Service
//!
//! Ordered, flagged links between locations and address components.
//!
//! At most one link per location is primary. Promoting a link demotes the
//! previous primary inside the same `BEGIN IMMEDIATE` transaction, and the
//! schema's partial unique index rejects any commit that would leave two.

use crate::cache::{keys, CacheAside};
use crate::db::DatabaseService;
use crate::models::{
    BulkUpsertResult, DeleteResult, LinkedAddressComponent, LocationAddressComponent,
    LocationAddressComponentUpdate, NewLocationAddressComponent, ValidationError,
};
use crate::services::ServiceError;
use std::collections::HashSet;
use std::sync::Arc;

const ENTITY: &str = "LocationAddressComponent";

#[derive(Debug, Clone)]
pub struct LinkageService {
    db: Arc<DatabaseService>,
    cache: CacheAside,
}

impl LinkageService {
    pub fn new(db: Arc<DatabaseService>, cache: CacheAside) -> Self {
        Self { db, cache }
    }

    async fn invalidate(&self, link: &LocationAddressComponent, geometry: bool) {
        self.cache
            .invalidate_link(&link.id, &link.location_id, &link.address_component_id)
            .await;
        if geometry {
            self.cache.invalidate_geo().await;
        }
    }

    pub async fn get_link(&self, id: &str) -> Result<LocationAddressComponent, ServiceError> {
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::link(id),
                self.cache.entity_ttl(),
                || async move {
                    db.db_get_link(id)
                        .await?
                        .ok_or_else(|| ServiceError::not_found(ENTITY, id))
                },
            )
            .await
    }

    /// Create a link; a primary link demotes the location's previous primary
    pub async fn create_link(
        &self,
        payload: NewLocationAddressComponent,
    ) -> Result<LocationAddressComponent, ServiceError> {
        payload.validate()?;
        let created = self.db.db_create_link(&payload).await?;
        if created.is_primary {
            // The demoted link's own entry is stale as well
            self.cache.invalidate_all_links().await;
        }
        // A demoted primary may sit in cached spatial results
        self.invalidate(&created, created.center_point.is_some() || created.is_primary)
            .await;
        tracing::debug!(
            "Linked location {} to address component {} (primary: {})",
            created.location_id,
            created.address_component_id,
            created.is_primary
        );
        Ok(created)
    }

    pub async fn update_link(
        &self,
        id: &str,
        update: LocationAddressComponentUpdate,
    ) -> Result<LocationAddressComponent, ServiceError> {
        update.validate()?;
        if update.is_empty() {
            return self.get_link(id).await;
        }
        let updated = self.db.db_update_link(id, &update).await?;
        if update.is_primary == Some(true) {
            self.cache.invalidate_all_links().await;
        }
        // Nearby-component results embed the whole link
        self.invalidate(&updated, true).await;
        Ok(updated)
    }

    pub async fn delete_link(&self, id: &str) -> Result<DeleteResult, ServiceError> {
        let Some(existing) = self.db.db_get_link(id).await? else {
            return Ok(DeleteResult::not_found());
        };
        if !self.db.db_delete_link(id).await? {
            return Ok(DeleteResult::not_found());
        }
        self.invalidate(&existing, existing.center_point.is_some()).await;
        Ok(DeleteResult::existed())
    }

    /// Delete many links in one transaction; returns how many were removed
    pub async fn bulk_delete_links(&self, ids: &[String]) -> Result<u64, ServiceError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let deleted = self.db.db_bulk_delete_links(ids).await?;
        if deleted > 0 {
            self.cache.invalidate_all_links().await;
            self.cache.invalidate_geo().await;
        }
        tracing::info!("Bulk deleted {} location link(s)", deleted);
        Ok(deleted)
    }

    /// Links of a location ordered by sequence (unsequenced last), then creation
    pub async fn get_by_location(
        &self,
        location_id: &str,
    ) -> Result<Vec<LocationAddressComponent>, ServiceError> {
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::links_by_location(location_id),
                self.cache.entity_ttl(),
                || async move {
                    Ok::<_, ServiceError>(db.db_get_links_by_location(location_id).await?)
                },
            )
            .await
    }

    pub async fn get_by_address_component(
        &self,
        address_component_id: &str,
    ) -> Result<Vec<LocationAddressComponent>, ServiceError> {
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::links_by_component(address_component_id),
                self.cache.entity_ttl(),
                || async move {
                    Ok::<_, ServiceError>(
                        db.db_get_links_by_component(address_component_id).await?,
                    )
                },
            )
            .await
    }

    /// The location's primary link with its address component, if any
    pub async fn get_primary_component(
        &self,
        location_id: &str,
    ) -> Result<Option<LinkedAddressComponent>, ServiceError> {
        let Some(link) = self.db.db_get_primary_link(location_id).await? else {
            return Ok(None);
        };
        let component = self
            .db
            .db_get_address_component(&link.address_component_id)
            .await?
            .ok_or_else(|| {
                ServiceError::not_found("AddressComponent", &link.address_component_id)
            })?;
        Ok(Some(LinkedAddressComponent { link, component }))
    }

    /// Upsert a batch keyed on `(location_id, address_component_id)`, all or nothing
    pub async fn bulk_upsert_links(
        &self,
        payloads: Vec<NewLocationAddressComponent>,
    ) -> Result<BulkUpsertResult, ServiceError> {
        let mut seen = HashSet::new();
        for payload in &payloads {
            payload.validate()?;
            if !seen.insert(payload.natural_key()) {
                return Err(ServiceError::constraint_violation(
                    ValidationError::DuplicateKey(format!(
                        "({}, {})",
                        payload.location_id, payload.address_component_id
                    ))
                    .to_string(),
                ));
            }
        }
        if payloads.is_empty() {
            return Ok(BulkUpsertResult::default());
        }

        let result = self.db.db_bulk_upsert_links(&payloads).await?;
        self.cache.invalidate_all_links().await;
        self.cache.invalidate_geo().await;
        tracing::info!(
            "Bulk upserted location links: {} inserted, {} updated",
            result.inserted,
            result.updated
        );
        Ok(result)
    }

    /// Assign `sequence = 1..N` in the given order; unlisted links follow
    pub async fn reorder_sequences(
        &self,
        location_id: &str,
        ordered_ids: &[String],
    ) -> Result<Vec<LocationAddressComponent>, ServiceError> {
        let links = self
            .db
            .db_reorder_link_sequences(location_id, ordered_ids)
            .await?;
        for link in &links {
            self.cache.delete(&keys::link(&link.id)).await;
        }
        self.cache.delete(&keys::links_by_location(location_id)).await;
        self.cache
            .delete(&keys::location_components(location_id))
            .await;
        self.cache
            .delete_pattern(&format!("{}:component:*", keys::LINK_PREFIX))
            .await;
        self.cache.invalidate_geo().await;
        Ok(links)
    }
}

#[cfg(test)]
#[path = "linkage_service_test.rs"]
mod linkage_service_test;
