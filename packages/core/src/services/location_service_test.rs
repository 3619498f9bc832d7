//! Tests for LocationService
//!
//! Tests cover:
//! - Closure consistency across creates and moves
//! - Nested subtree and forest assembly
//! - Geometry tri-state updates and the clear shorthands
//! - Soft delete rules
//! - Filtered listings served through the cache

#[cfg(test)]
mod tests {
    use crate::cache::CacheAside;
    use crate::db::DatabaseService;
    use crate::models::{
        BoundingBox, GeoPoint, GeoPolygon, GeometryUpdate, LocationFilter, LocationSortField,
        LocationUpdate, NewAddressComponent, NewLocation, NewLocationAddressComponent,
        PageRequest, SortOrder,
    };
    use crate::services::{LocationService, ServiceError};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn create_test_service() -> (Arc<DatabaseService>, LocationService, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            DatabaseService::new(temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );
        let service = LocationService::new(db.clone(), CacheAside::in_memory());
        (db, service, temp_dir)
    }

    fn names(locations: &[crate::models::Location]) -> Vec<&str> {
        locations
            .iter()
            .map(|l| l.local_area_name.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_nairobi_hierarchy_reads() {
        let (_db, service, _temp) = create_test_service().await;

        let nairobi = service
            .create(NewLocation::new("Nairobi", "Nairobi"))
            .await
            .unwrap();
        let cbd = service
            .create(NewLocation::new("Nairobi CBD", "Nairobi").with_parent(nairobi.id.clone()))
            .await
            .unwrap();

        let descendants = service.get_descendants(&nairobi.id).await.unwrap();
        assert_eq!(names(&descendants), vec!["Nairobi CBD"]);
        let ancestors = service.get_ancestors(&cbd.id).await.unwrap();
        assert_eq!(names(&ancestors), vec!["Nairobi"]);

        let tree = service.get_subtree(&nairobi.id).await.unwrap();
        assert_eq!(tree.location.id, nairobi.id);
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].location.id, cbd.id);

        let forest = service.get_root_trees().await.unwrap();
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].size(), 2);
    }

    #[tokio::test]
    async fn test_move_rewrites_closure_and_invalidates_trees() {
        let (db, service, _temp) = create_test_service().await;

        let nairobi = service
            .create(NewLocation::new("Nairobi", "Nairobi"))
            .await
            .unwrap();
        let kiambu = service
            .create(NewLocation::new("Kiambu", "Kiambu"))
            .await
            .unwrap();
        let westlands = service
            .create(NewLocation::new("Westlands", "Nairobi").with_parent(nairobi.id.clone()))
            .await
            .unwrap();
        let parklands = service
            .create(NewLocation::new("Parklands", "Nairobi").with_parent(westlands.id.clone()))
            .await
            .unwrap();

        // Prime caches before the move
        assert_eq!(service.get_subtree(&nairobi.id).await.unwrap().size(), 3);
        assert_eq!(service.get_ancestors(&parklands.id).await.unwrap().len(), 2);

        let moved = service
            .move_location(&westlands.id, Some(&kiambu.id))
            .await
            .unwrap();
        assert_eq!(moved.parent_id.as_deref(), Some(kiambu.id.as_str()));

        let ancestors = service.get_ancestors(&parklands.id).await.unwrap();
        assert_eq!(names(&ancestors), vec!["Kiambu", "Westlands"]);
        assert_eq!(service.get_subtree(&nairobi.id).await.unwrap().size(), 1);
        assert_eq!(service.get_subtree(&kiambu.id).await.unwrap().size(), 3);

        let closure = db.db_get_closure_rows(&parklands.id).await.unwrap();
        let ancestor_ids: Vec<&str> = closure.iter().map(|(a, _)| a.as_str()).collect();
        assert_eq!(
            ancestor_ids,
            vec![
                parklands.id.as_str(),
                westlands.id.as_str(),
                kiambu.id.as_str()
            ]
        );
    }

    #[tokio::test]
    async fn test_move_rejects_cycles() {
        let (_db, service, _temp) = create_test_service().await;

        let nairobi = service
            .create(NewLocation::new("Nairobi", "Nairobi"))
            .await
            .unwrap();
        let cbd = service
            .create(NewLocation::new("Nairobi CBD", "Nairobi").with_parent(nairobi.id.clone()))
            .await
            .unwrap();

        let error = service
            .move_location(&nairobi.id, Some(&cbd.id))
            .await
            .unwrap_err();
        assert!(matches!(error, ServiceError::CycleDetected { .. }));

        let error = service
            .move_location(&nairobi.id, Some(&nairobi.id))
            .await
            .unwrap_err();
        assert!(matches!(error, ServiceError::CycleDetected { .. }));

        for location in [&nairobi, &cbd] {
            let ancestors = service.get_ancestors(&location.id).await.unwrap();
            assert!(ancestors.iter().all(|a| a.id != location.id));
        }
    }

    #[tokio::test]
    async fn test_geometry_tri_state() {
        let (_db, service, _temp) = create_test_service().await;

        let point = GeoPoint::new(36.7834, -1.2921);
        let fence = GeoPolygon::from_bbox(&BoundingBox::new(36.77, -1.30, 36.80, -1.28));
        let kilimani = service
            .create(
                NewLocation::new("Kilimani Area", "Nairobi")
                    .with_center_point(point.clone())
                    .with_geofence(fence.clone()),
            )
            .await
            .unwrap();

        let renamed = service
            .update(
                &kilimani.id,
                LocationUpdate {
                    local_area_name: Some("Kilimani".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.center_point.as_ref(), Some(&point));
        assert_eq!(renamed.geofence.as_ref(), Some(&fence));

        let moved_point = GeoPoint::new(36.7850, -1.2900);
        let replaced = service
            .update(
                &kilimani.id,
                LocationUpdate {
                    center_point: GeometryUpdate::Set(moved_point.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(replaced.center_point.as_ref(), Some(&moved_point));

        let cleared = service.clear_center_point(&kilimani.id).await.unwrap();
        assert!(cleared.center_point.is_none());
        assert_eq!(cleared.geofence.as_ref(), Some(&fence));

        let no_fence = service.clear_geofence(&kilimani.id).await.unwrap();
        assert!(no_fence.geofence.is_none());
        assert_eq!(service.get(&kilimani.id).await.unwrap(), no_fence);
    }

    #[tokio::test]
    async fn test_invalid_geometry_is_rejected() {
        let (_db, service, _temp) = create_test_service().await;

        let error = service
            .create(
                NewLocation::new("Nowhere", "Nairobi").with_center_point(GeoPoint::new(0.0, 95.0)),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, ServiceError::Validation(_)));

        let open_ring = GeoPolygon::from_exterior(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]);
        let error = service
            .create(NewLocation::new("Open", "Nairobi").with_geofence(open_ring))
            .await
            .unwrap_err();
        assert_eq!(error.status_code(), 400);
    }

    #[tokio::test]
    async fn test_soft_delete_rules() {
        let (db, service, _temp) = create_test_service().await;

        let nairobi = service
            .create(NewLocation::new("Nairobi", "Nairobi"))
            .await
            .unwrap();
        let cbd = service
            .create(NewLocation::new("Nairobi CBD", "Nairobi").with_parent(nairobi.id.clone()))
            .await
            .unwrap();
        let component = db
            .db_create_address_component(&NewAddressComponent::new("estate", "CBD"))
            .await
            .unwrap();
        db.db_create_link(&NewLocationAddressComponent::new(
            cbd.id.clone(),
            component.id.clone(),
        ))
        .await
        .unwrap();
        assert_eq!(service.get_address_components(&cbd.id).await.unwrap().len(), 1);

        let blocked = service.delete(&nairobi.id).await.unwrap_err();
        assert!(matches!(blocked, ServiceError::HierarchyViolation(_)));

        assert!(service.delete(&cbd.id).await.unwrap().existed);
        assert!(service.get(&cbd.id).await.unwrap_err().is_not_found());
        assert!(service.get_descendants(&nairobi.id).await.unwrap().is_empty());
        assert!(db.db_get_links_by_location(&cbd.id).await.unwrap().is_empty());

        assert!(service.delete(&nairobi.id).await.unwrap().existed);
        assert!(!service.delete(&nairobi.id).await.unwrap().existed);
    }

    #[tokio::test]
    async fn test_bulk_delete_is_all_or_nothing() {
        let (_db, service, _temp) = create_test_service().await;

        let nairobi = service
            .create(NewLocation::new("Nairobi", "Nairobi"))
            .await
            .unwrap();
        let cbd = service
            .create(NewLocation::new("Nairobi CBD", "Nairobi").with_parent(nairobi.id.clone()))
            .await
            .unwrap();
        let kiambu = service
            .create(NewLocation::new("Kiambu", "Kiambu"))
            .await
            .unwrap();

        let blocked = service
            .bulk_delete(&[nairobi.id.clone(), kiambu.id.clone()])
            .await
            .unwrap_err();
        assert!(matches!(blocked, ServiceError::HierarchyViolation(_)));
        assert!(service.get(&kiambu.id).await.is_ok());

        let deleted = service
            .bulk_delete(&[nairobi.id.clone(), cbd.id.clone()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(service.get_root_trees().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_upsert_rolls_back_after_partial_write() {
        let (db, service, _temp) = create_test_service().await;

        let err = service
            .bulk_upsert(vec![
                NewLocation::new("Nairobi", "Nairobi"),
                NewLocation::new("Nairobi CBD", "Nairobi").with_parent("missing-parent"),
            ])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(db.db_count_rows("locations").await.unwrap(), 0);
        assert_eq!(db.db_count_rows("location_closure").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_by_name_and_county() {
        let (db, service, _temp) = create_test_service().await;

        let first = service
            .upsert(NewLocation::new("Kilimani Area", "Nairobi").with_town("Nairobi"))
            .await
            .unwrap();
        let second = service
            .upsert(NewLocation::new("Kilimani Area", "Nairobi").with_town("Kilimani"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.town.as_deref(), Some("Kilimani"));

        let found = service
            .get_by_name_and_county("Kilimani Area", "Nairobi")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);

        let batch = vec![
            NewLocation::new("Kilimani Area", "Nairobi"),
            NewLocation::new("Ruaka", "Kiambu"),
        ];
        let counts = service.bulk_upsert(batch).await.unwrap();
        assert_eq!((counts.inserted, counts.updated), (1, 1));
        assert_eq!(db.db_count_rows("locations").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_with_filters() {
        let (_db, service, _temp) = create_test_service().await;

        let nairobi = service
            .create(NewLocation::new("Nairobi", "Nairobi"))
            .await
            .unwrap();
        for name in ["Westlands", "Kilimani", "Karen"] {
            service
                .create(NewLocation::new(name, "Nairobi").with_parent(nairobi.id.clone()))
                .await
                .unwrap();
        }
        service
            .create(
                NewLocation::new("Ruaka", "Kiambu")
                    .with_geofence(GeoPolygon::from_bbox(&BoundingBox::new(36.7, -1.2, 36.8, -1.1))),
            )
            .await
            .unwrap();

        let page = service
            .list_with_filters(LocationFilter {
                county: Some("nairobi".to_string()),
                sort_by: LocationSortField::LocalAreaName,
                sort_order: SortOrder::Desc,
                page: PageRequest::new(1, 2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.total_pages, 2);
        assert_eq!(names(&page.data), vec!["Westlands", "Nairobi"]);

        let roots = service
            .list_with_filters(LocationFilter {
                root_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(names(&roots.data), vec!["Nairobi", "Ruaka"]);

        let fenced = service
            .list_with_filters(LocationFilter {
                has_geofence: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(names(&fenced.data), vec!["Ruaka"]);

        // A new row must show up despite the cached first page
        service
            .create(NewLocation::new("Lavington", "Nairobi").with_parent(nairobi.id.clone()))
            .await
            .unwrap();
        let refreshed = service
            .list_with_filters(LocationFilter {
                county: Some("nairobi".to_string()),
                sort_by: LocationSortField::LocalAreaName,
                sort_order: SortOrder::Desc,
                page: PageRequest::new(1, 2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(refreshed.total, 5);

        let by_county = service
            .list_by_counties(&["Kiambu".to_string()])
            .await
            .unwrap();
        assert_eq!(names(&by_county), vec!["Ruaka"]);

        let children = service.get_children(Some(&nairobi.id)).await.unwrap();
        assert_eq!(
            names(&children),
            vec!["Karen", "Kilimani", "Lavington", "Westlands"]
        );
    }
}
