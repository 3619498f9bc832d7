//! Location Service
//!
//! This module provides the business logic layer for the location hierarchy:
//!
//! - CRUD with tri-state geometry updates (`Unchanged | Clear | Set`)
//! - Hierarchy reads served from the closure table (ancestors, descendants,
//!   nested subtrees, the whole forest)
//! - Cycle-checked moves that rewrite the closure rows of the moved subtree
//! - Filtered, sorted and paginated listings
//!
//! # Soft Delete
//!
//! Deleting a location stamps `deleted_at`, removes its links and drops its
//! closure rows. A location with live children cannot be deleted.
//!
//! # Caching
//!
//! Reads go through [`CacheAside`]. Writes invalidate the location's own keys,
//! every list and tree, and (for geometry or hierarchy changes) all spatial
//! query results.

use crate::cache::{keys, CacheAside};
use crate::db::DatabaseService;
use crate::models::{
    BulkUpsertResult, DeleteResult, GeometryUpdate, LinkedAddressComponent, Location,
    LocationFilter, LocationTree, LocationUpdate, NewLocation, Paginated, ValidationError,
};
use crate::services::ServiceError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const ENTITY: &str = "Location";

/// Nest a flat list into trees
///
/// `locations` must list every parent before its children and siblings in
/// display order; `roots` selects which entries start a tree.
fn assemble_trees(roots: &[String], locations: Vec<Location>) -> Vec<LocationTree> {
    let mut by_id: HashMap<String, Location> = HashMap::new();
    let mut children_of: HashMap<String, Vec<String>> = HashMap::new();
    for location in locations {
        if let Some(parent_id) = &location.parent_id {
            children_of
                .entry(parent_id.clone())
                .or_default()
                .push(location.id.clone());
        }
        by_id.insert(location.id.clone(), location);
    }

    fn build(
        id: &str,
        by_id: &mut HashMap<String, Location>,
        children_of: &HashMap<String, Vec<String>>,
    ) -> Option<LocationTree> {
        let location = by_id.remove(id)?;
        let children = children_of
            .get(id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|child| build(child, by_id, children_of))
                    .collect()
            })
            .unwrap_or_default();
        Some(LocationTree { location, children })
    }

    roots
        .iter()
        .filter_map(|id| build(id, &mut by_id, &children_of))
        .collect()
}

#[derive(Debug, Clone)]
pub struct LocationService {
    db: Arc<DatabaseService>,
    cache: CacheAside,
}

impl LocationService {
    pub fn new(db: Arc<DatabaseService>, cache: CacheAside) -> Self {
        Self { db, cache }
    }

    pub async fn get(&self, id: &str) -> Result<Location, ServiceError> {
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::location(id),
                self.cache.entity_ttl(),
                || async move {
                    db.db_get_location(id)
                        .await?
                        .ok_or_else(|| ServiceError::not_found(ENTITY, id))
                },
            )
            .await
    }

    pub async fn get_by_name_and_county(
        &self,
        local_area_name: &str,
        county: &str,
    ) -> Result<Option<Location>, ServiceError> {
        Ok(self
            .db
            .db_get_location_by_name_and_county(local_area_name, county)
            .await?)
    }

    /// Create a location and its closure rows
    pub async fn create(&self, payload: NewLocation) -> Result<Location, ServiceError> {
        payload.validate()?;
        let created = self.db.db_create_location(&payload).await?;
        let has_geometry = created.center_point.is_some() || created.geofence.is_some();
        self.cache.invalidate_location(&created.id, has_geometry).await;
        tracing::debug!(
            "Created location {} '{}' under {}",
            created.id,
            created.local_area_name,
            created.parent_id.as_deref().unwrap_or("<root>")
        );
        Ok(created)
    }

    /// Partial update; omitted fields and `Unchanged` geometry are left as stored
    pub async fn update(&self, id: &str, update: LocationUpdate) -> Result<Location, ServiceError> {
        update.validate()?;
        if update.is_empty() {
            return self.get(id).await;
        }
        let updated = self.db.db_update_location(id, &update).await?;
        // Spatial results embed the whole location and `nearest` filters by county
        self.cache.invalidate_location(id, true).await;
        Ok(updated)
    }

    pub async fn clear_center_point(&self, id: &str) -> Result<Location, ServiceError> {
        self.update(
            id,
            LocationUpdate {
                center_point: GeometryUpdate::Clear,
                ..Default::default()
            },
        )
        .await
    }

    pub async fn clear_geofence(&self, id: &str) -> Result<Location, ServiceError> {
        self.update(
            id,
            LocationUpdate {
                geofence: GeometryUpdate::Clear,
                ..Default::default()
            },
        )
        .await
    }

    /// Soft-delete one location together with its links
    pub async fn delete(&self, id: &str) -> Result<DeleteResult, ServiceError> {
        let existed = self.db.db_delete_location(id).await?;
        if !existed {
            return Ok(DeleteResult::not_found());
        }
        self.cache.invalidate_location(id, true).await;
        self.cache.invalidate_all_links().await;
        tracing::info!("Soft-deleted location {}", id);
        Ok(DeleteResult::existed())
    }

    /// Soft-delete many locations atomically; returns how many were removed
    pub async fn bulk_delete(&self, ids: &[String]) -> Result<u64, ServiceError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let deleted = self.db.db_bulk_delete_locations(ids).await?;
        if deleted > 0 {
            self.cache.invalidate_all_locations().await;
            self.cache.invalidate_all_links().await;
        }
        tracing::info!("Bulk soft-deleted {} location(s)", deleted);
        Ok(deleted)
    }

    /// Insert or overwrite by `(local_area_name, county)`
    pub async fn upsert(&self, payload: NewLocation) -> Result<Location, ServiceError> {
        payload.validate()?;
        let (location, inserted) = self.db.db_upsert_location(&payload).await?;
        // An upsert may re-parent, which reshapes other locations' trees
        self.cache.invalidate_all_locations().await;
        tracing::debug!("Upserted location {} (inserted: {})", location.id, inserted);
        Ok(location)
    }

    /// Upsert a batch in one transaction
    pub async fn bulk_upsert(
        &self,
        payloads: Vec<NewLocation>,
    ) -> Result<BulkUpsertResult, ServiceError> {
        let mut seen = HashSet::new();
        for payload in &payloads {
            payload.validate()?;
            if !seen.insert((payload.local_area_name.clone(), payload.county.clone())) {
                return Err(ServiceError::constraint_violation(
                    ValidationError::DuplicateKey(format!(
                        "({}, {})",
                        payload.local_area_name, payload.county
                    ))
                    .to_string(),
                ));
            }
        }
        if payloads.is_empty() {
            return Ok(Default::default());
        }

        let result = self.db.db_bulk_upsert_locations(&payloads).await?;
        self.cache.invalidate_all_locations().await;
        tracing::info!(
            "Bulk upserted locations: {} inserted, {} updated",
            result.inserted,
            result.updated
        );
        Ok(result)
    }

    pub async fn list_with_filters(
        &self,
        filter: LocationFilter,
    ) -> Result<Paginated<Location>, ServiceError> {
        let db = &self.db;
        let filter_ref = &filter;
        self.cache
            .get_or_load(
                &keys::location_list(&("filter", filter_ref)),
                self.cache.list_ttl(),
                || async move {
                    let (data, total) = db.db_list_locations(filter_ref).await?;
                    Ok::<_, ServiceError>(Paginated::new(data, filter_ref.page, total))
                },
            )
            .await
    }

    pub async fn list_by_counties(
        &self,
        counties: &[String],
    ) -> Result<Vec<Location>, ServiceError> {
        if counties.is_empty() {
            return Ok(Vec::new());
        }
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::location_list(&("counties", counties)),
                self.cache.list_ttl(),
                || async move {
                    Ok::<_, ServiceError>(db.db_list_locations_by_counties(counties).await?)
                },
            )
            .await
    }

    /// Direct children of `parent_id`, or root locations for `None`
    pub async fn get_children(
        &self,
        parent_id: Option<&str>,
    ) -> Result<Vec<Location>, ServiceError> {
        if let Some(parent_id) = parent_id {
            self.get(parent_id).await?;
        }
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::location_list(&("children", parent_id)),
                self.cache.list_ttl(),
                || async move {
                    Ok::<_, ServiceError>(db.db_get_location_children(parent_id).await?)
                },
            )
            .await
    }

    /// Ancestors root-first, excluding the location itself
    pub async fn get_ancestors(&self, id: &str) -> Result<Vec<Location>, ServiceError> {
        self.get(id).await?;
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::location_list(&("ancestors", id)),
                self.cache.list_ttl(),
                || async move {
                    Ok::<_, ServiceError>(db.db_get_location_ancestors(id).await?)
                },
            )
            .await
    }

    /// Descendants shallowest-first, excluding the location itself
    pub async fn get_descendants(&self, id: &str) -> Result<Vec<Location>, ServiceError> {
        self.get(id).await?;
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::location_list(&("descendants", id)),
                self.cache.list_ttl(),
                || async move {
                    Ok::<_, ServiceError>(db.db_get_location_descendants(id).await?)
                },
            )
            .await
    }

    /// The location with its fully nested subtree
    pub async fn get_subtree(&self, id: &str) -> Result<LocationTree, ServiceError> {
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::location_tree(Some(id)),
                self.cache.list_ttl(),
                || async move {
                    let flat = db.db_get_location_subtree(id).await?;
                    assemble_trees(&[id.to_string()], flat)
                        .into_iter()
                        .next()
                        .ok_or_else(|| ServiceError::not_found(ENTITY, id))
                },
            )
            .await
    }

    /// One tree per root location, ordered by name
    pub async fn get_root_trees(&self) -> Result<Vec<LocationTree>, ServiceError> {
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::location_tree(None),
                self.cache.list_ttl(),
                || async move {
                    let all = db.db_get_all_locations().await?;
                    let roots: Vec<String> = all
                        .iter()
                        .filter(|location| location.is_root())
                        .map(|location| location.id.clone())
                        .collect();
                    Ok::<_, ServiceError>(assemble_trees(&roots, all))
                },
            )
            .await
    }

    /// Re-parent a location and its subtree; `None` makes it a root
    pub async fn move_location(
        &self,
        id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<Location, ServiceError> {
        if new_parent_id == Some(id) {
            return Err(ServiceError::cycle_detected(format!(
                "location {} cannot be its own parent",
                id
            )));
        }
        let moved = self.db.db_move_location(id, new_parent_id).await?;
        self.cache.invalidate_all_locations().await;
        Ok(moved)
    }

    /// Links of a location joined with their address components, in sequence order
    pub async fn get_address_components(
        &self,
        location_id: &str,
    ) -> Result<Vec<LinkedAddressComponent>, ServiceError> {
        self.get(location_id).await?;
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::location_components(location_id),
                self.cache.entity_ttl(),
                || async move {
                    Ok::<_, ServiceError>(db.db_get_linked_components(location_id).await?)
                },
            )
            .await
    }
}

#[cfg(test)]
#[path = "location_service_test.rs"]
mod location_service_test;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn location(id: &str, parent: Option<&str>) -> Location {
        Location {
            id: id.to_string(),
            local_area_name: id.to_string(),
            county: "Nairobi".to_string(),
            town: None,
            street: None,
            coverage_details: None,
            parent_id: parent.map(str::to_string),
            center_point: None,
            geofence: None,
            metadata: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_assemble_trees_nests_in_input_order() {
        let flat = vec![
            location("root", None),
            location("a", Some("root")),
            location("b", Some("root")),
            location("a1", Some("a")),
        ];
        let trees = assemble_trees(&["root".to_string()], flat);
        assert_eq!(trees.len(), 1);
        let root = &trees[0];
        assert_eq!(root.size(), 4);
        let child_ids: Vec<&str> = root
            .children
            .iter()
            .map(|c| c.location.id.as_str())
            .collect();
        assert_eq!(child_ids, vec!["a", "b"]);
        assert_eq!(root.children[0].children[0].location.id, "a1");
    }

    #[test]
    fn test_assemble_trees_multiple_roots_and_missing_root() {
        let flat = vec![
            location("kiambu", None),
            location("nairobi", None),
            location("cbd", Some("nairobi")),
        ];
        let trees = assemble_trees(
            &[
                "kiambu".to_string(),
                "nairobi".to_string(),
                "ghost".to_string(),
            ],
            flat,
        );
        assert_eq!(trees.len(), 2);
        assert!(trees[0].children.is_empty());
        assert_eq!(trees[1].children[0].location.id, "cbd");
    }
}
