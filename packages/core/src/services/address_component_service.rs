//! Address Component Service
//!
//! CRUD and hierarchy operations over the address taxonomy:
//!
//! - Idempotent upserts keyed on `(type, value, parent)`
//! - Ancestor/descendant walks over the parent-pointer tree
//! - Cycle-checked moves
//! - Cache-aside reads; every write invalidates the component's keys and
//!   the component list family

use crate::cache::{keys, CacheAside};
use crate::db::DatabaseService;
use crate::models::{
    AddressComponent, AddressComponentFilter, AddressComponentUpdate, BulkUpsertResult,
    DeleteResult, NewAddressComponent, Paginated, ValidationError,
};
use crate::services::ServiceError;
use std::collections::HashSet;
use std::sync::Arc;

const ENTITY: &str = "AddressComponent";

#[derive(Debug, Clone)]
pub struct AddressComponentService {
    db: Arc<DatabaseService>,
    cache: CacheAside,
}

impl AddressComponentService {
    pub fn new(db: Arc<DatabaseService>, cache: CacheAside) -> Self {
        Self { db, cache }
    }

    pub async fn get(&self, id: &str) -> Result<AddressComponent, ServiceError> {
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::address_component(id),
                self.cache.entity_ttl(),
                || async move {
                    db.db_get_address_component(id)
                        .await?
                        .ok_or_else(|| ServiceError::not_found(ENTITY, id))
                },
            )
            .await
    }

    pub async fn create(
        &self,
        payload: NewAddressComponent,
    ) -> Result<AddressComponent, ServiceError> {
        payload.validate()?;
        let created = self.db.db_create_address_component(&payload).await?;
        self.cache.invalidate_address_component(&created.id).await;
        tracing::debug!(
            "Created address component {} ({} = {})",
            created.id,
            created.component_type,
            created.value
        );
        Ok(created)
    }

    /// Partial update; a parent change is cycle-checked like [`move_component`](Self::move_component)
    pub async fn update(
        &self,
        id: &str,
        update: AddressComponentUpdate,
    ) -> Result<AddressComponent, ServiceError> {
        update.validate()?;
        if update.is_empty() {
            return self.get(id).await;
        }
        let updated = self.db.db_update_address_component(id, &update).await?;
        if update.parent_component_id.is_some() {
            // Ancestor and descendant results of other components change too
            self.cache.invalidate_all_address_components().await;
        } else {
            self.cache.invalidate_address_component(id).await;
        }
        Ok(updated)
    }

    /// Delete one component
    ///
    /// Rejected while the component has children or is referenced by a link.
    pub async fn delete(&self, id: &str) -> Result<DeleteResult, ServiceError> {
        let existed = self.db.db_delete_address_component(id).await?;
        if existed {
            self.cache.invalidate_address_component(id).await;
            Ok(DeleteResult::existed())
        } else {
            Ok(DeleteResult::not_found())
        }
    }

    /// Delete many components atomically; returns how many were removed
    pub async fn bulk_delete(&self, ids: &[String]) -> Result<u64, ServiceError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let deleted = self.db.db_bulk_delete_address_components(ids).await?;
        if deleted > 0 {
            self.cache.invalidate_all_address_components().await;
        }
        tracing::info!("Bulk deleted {} address component(s)", deleted);
        Ok(deleted)
    }

    /// Exact natural-key lookup; `None` parent matches roots only
    pub async fn get_by_type_and_value(
        &self,
        component_type: &str,
        value: &str,
        parent_component_id: Option<&str>,
    ) -> Result<Option<AddressComponent>, ServiceError> {
        Ok(self
            .db
            .db_get_address_component_by_key(component_type, value, parent_component_id)
            .await?)
    }

    pub async fn list_by_types(
        &self,
        types: &[String],
    ) -> Result<Vec<AddressComponent>, ServiceError> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let mut sorted = types.to_vec();
        sorted.sort();
        sorted.dedup();
        let sorted_ref = &sorted;
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::address_component_list(&("types", sorted_ref)),
                self.cache.list_ttl(),
                || async move {
                    Ok::<_, ServiceError>(db.db_list_address_components_by_types(sorted_ref).await?)
                },
            )
            .await
    }

    /// Direct children of `parent_id`, or root components for `None`
    pub async fn get_children(
        &self,
        parent_id: Option<&str>,
    ) -> Result<Vec<AddressComponent>, ServiceError> {
        if let Some(parent_id) = parent_id {
            self.get(parent_id).await?;
        }
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::address_component_list(&("children", parent_id)),
                self.cache.list_ttl(),
                || async move {
                    Ok::<_, ServiceError>(
                        db.db_get_address_component_children(parent_id).await?,
                    )
                },
            )
            .await
    }

    /// Ancestors root-first, excluding the component itself
    pub async fn get_ancestors(&self, id: &str) -> Result<Vec<AddressComponent>, ServiceError> {
        self.get(id).await?;
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::address_component_list(&("ancestors", id)),
                self.cache.list_ttl(),
                || async move {
                    Ok::<_, ServiceError>(
                        db.db_get_address_component_ancestors(id).await?,
                    )
                },
            )
            .await
    }

    /// Descendants breadth-first, excluding the component itself
    pub async fn get_descendants(&self, id: &str) -> Result<Vec<AddressComponent>, ServiceError> {
        self.get(id).await?;
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::address_component_list(&("descendants", id)),
                self.cache.list_ttl(),
                || async move {
                    Ok::<_, ServiceError>(
                        db.db_get_address_component_descendants(id).await?,
                    )
                },
            )
            .await
    }

    /// Re-parent a component; `None` makes it a root
    pub async fn move_component(
        &self,
        id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<AddressComponent, ServiceError> {
        if new_parent_id == Some(id) {
            return Err(ServiceError::cycle_detected(format!(
                "address component {} cannot be its own parent",
                id
            )));
        }
        let moved = self
            .db
            .db_move_address_component(id, new_parent_id)
            .await?;
        self.cache.invalidate_all_address_components().await;
        tracing::info!(
            "Moved address component {} under {}",
            id,
            new_parent_id.unwrap_or("<root>")
        );
        Ok(moved)
    }

    /// Return the row for the natural key, inserting it when absent
    ///
    /// Calling this twice with the same key yields the same id and one row.
    pub async fn upsert_by_type_value_parent(
        &self,
        payload: NewAddressComponent,
    ) -> Result<AddressComponent, ServiceError> {
        payload.validate()?;
        let (component, inserted) = self.db.db_upsert_address_component(&payload).await?;
        self.cache.invalidate_address_component(&component.id).await;
        tracing::debug!(
            "Upserted address component {} (inserted: {})",
            component.id,
            inserted
        );
        Ok(component)
    }

    /// Upsert a batch in one transaction
    pub async fn bulk_upsert(
        &self,
        payloads: Vec<NewAddressComponent>,
    ) -> Result<BulkUpsertResult, ServiceError> {
        let mut keys_seen = HashSet::new();
        for payload in &payloads {
            payload.validate()?;
            let key = payload.natural_key();
            if !keys_seen.insert(key.clone()) {
                return Err(ServiceError::constraint_violation(
                    ValidationError::DuplicateKey(format!("({}, {}, {:?})", key.0, key.1, key.2))
                        .to_string(),
                ));
            }
        }
        if payloads.is_empty() {
            return Ok(BulkUpsertResult::default());
        }

        let result = self.db.db_bulk_upsert_address_components(&payloads).await?;
        self.cache.invalidate_all_address_components().await;
        tracing::info!(
            "Bulk upserted address components: {} inserted, {} updated",
            result.inserted,
            result.updated
        );
        Ok(result)
    }

    pub async fn search_paginated(
        &self,
        filter: AddressComponentFilter,
    ) -> Result<Paginated<AddressComponent>, ServiceError> {
        let db = &self.db;
        let filter_ref = &filter;
        self.cache
            .get_or_load(
                &keys::address_component_list(&("search", filter_ref)),
                self.cache.list_ttl(),
                || async move {
                    let (data, total) = db.db_search_address_components(filter_ref).await?;
                    Ok::<_, ServiceError>(Paginated::new(data, filter_ref.page, total))
                },
            )
            .await
    }
}

#[cfg(test)]
#[path = "address_component_service_test.rs"]
mod address_component_service_test;
