//! Tests for LinkageService
//!
//! Primary exclusivity, natural-key bulk upserts and sequence reordering.

#[cfg(test)]
mod tests {
    use crate::cache::CacheAside;
    use crate::db::DatabaseService;
    use crate::models::{
        AddressComponent, GeoPoint, Location, LocationAddressComponentUpdate, NewAddressComponent,
        NewLocation, NewLocationAddressComponent,
    };
    use crate::services::{LinkageService, ServiceError};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn create_test_service() -> (Arc<DatabaseService>, LinkageService, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            DatabaseService::new(temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );
        let service = LinkageService::new(db.clone(), CacheAside::in_memory());
        (db, service, temp_dir)
    }

    /// One location plus the given estates as address components
    async fn seed(db: &DatabaseService, estates: &[&str]) -> (Location, Vec<AddressComponent>) {
        let location = db
            .db_create_location(&NewLocation::new("Kilimani Area", "Nairobi"))
            .await
            .unwrap();
        let mut components = Vec::new();
        for estate in estates {
            components.push(
                db.db_create_address_component(&NewAddressComponent::new("estate", *estate))
                    .await
                    .unwrap(),
            );
        }
        (location, components)
    }

    #[tokio::test]
    async fn test_primary_flag_is_exclusive() {
        let (db, service, _temp) = create_test_service().await;
        let (location, components) = seed(&db, &["Kilimani", "Yaya"]).await;

        let first = service
            .create_link(
                NewLocationAddressComponent::new(location.id.clone(), components[0].id.clone())
                    .primary(),
            )
            .await
            .unwrap();
        // Cache the first link while it is still primary
        assert!(service.get_link(&first.id).await.unwrap().is_primary);

        let second = service
            .create_link(
                NewLocationAddressComponent::new(location.id.clone(), components[1].id.clone())
                    .primary(),
            )
            .await
            .unwrap();
        assert!(second.is_primary);
        assert!(!service.get_link(&first.id).await.unwrap().is_primary);

        let primary = service
            .get_primary_component(&location.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(primary.link.id, second.id);
        assert_eq!(primary.component.value, "Yaya");

        // Promoting through an update moves the flag back
        service
            .update_link(
                &first.id,
                LocationAddressComponentUpdate {
                    is_primary: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let links = service.get_by_location(&location.id).await.unwrap();
        let primaries: Vec<&str> = links
            .iter()
            .filter(|l| l.is_primary)
            .map(|l| l.id.as_str())
            .collect();
        assert_eq!(primaries, vec![first.id.as_str()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_primary_links_leave_one_primary() {
        let (db, service, _temp) = create_test_service().await;
        let (location, components) = seed(&db, &["Kilimani", "Yaya"]).await;

        let handles: Vec<_> = components
            .iter()
            .map(|component| {
                let service = service.clone();
                let payload =
                    NewLocationAddressComponent::new(location.id.clone(), component.id.clone())
                        .primary();
                tokio::spawn(async move { service.create_link(payload).await })
            })
            .collect();
        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }
        assert!(succeeded >= 1);

        let links = db.db_get_links_by_location(&location.id).await.unwrap();
        assert_eq!(links.iter().filter(|l| l.is_primary).count(), 1);
    }

    #[tokio::test]
    async fn test_no_primary_is_none() {
        let (db, service, _temp) = create_test_service().await;
        let (location, components) = seed(&db, &["Kilimani"]).await;
        service
            .create_link(NewLocationAddressComponent::new(
                location.id.clone(),
                components[0].id.clone(),
            ))
            .await
            .unwrap();

        assert!(service
            .get_primary_component(&location.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_create_link_requires_endpoints_and_unique_pair() {
        let (db, service, _temp) = create_test_service().await;
        let (location, components) = seed(&db, &["Kilimani"]).await;

        let missing = service
            .create_link(NewLocationAddressComponent::new(
                location.id.clone(),
                "missing",
            ))
            .await
            .unwrap_err();
        assert!(missing.is_not_found());

        let payload = NewLocationAddressComponent::new(location.id.clone(), components[0].id.clone());
        service.create_link(payload.clone()).await.unwrap();
        let duplicate = service.create_link(payload).await.unwrap_err();
        assert!(matches!(duplicate, ServiceError::ConstraintViolation { .. }));
    }

    #[tokio::test]
    async fn test_bulk_upsert_is_idempotent() {
        let (db, service, _temp) = create_test_service().await;
        let (location, components) = seed(&db, &["Kilimani", "Yaya", "Adams"]).await;

        let batch: Vec<NewLocationAddressComponent> = components
            .iter()
            .enumerate()
            .map(|(i, component)| {
                NewLocationAddressComponent::new(location.id.clone(), component.id.clone())
                    .with_sequence(i as i64 + 1)
            })
            .collect();

        let first = service.bulk_upsert_links(batch.clone()).await.unwrap();
        assert_eq!((first.inserted, first.updated), (3, 0));
        let second = service.bulk_upsert_links(batch).await.unwrap();
        assert_eq!((second.inserted, second.updated), (0, 3));
        assert_eq!(
            db.db_count_rows("location_address_components").await.unwrap(),
            3
        );

        let duplicated = service
            .bulk_upsert_links(vec![
                NewLocationAddressComponent::new(location.id.clone(), components[0].id.clone()),
                NewLocationAddressComponent::new(location.id.clone(), components[0].id.clone())
                    .with_label("again"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(duplicated, ServiceError::ConstraintViolation { .. }));
    }

    #[tokio::test]
    async fn test_bulk_upsert_rolls_back_after_partial_write() {
        let (db, service, _temp) = create_test_service().await;
        let (location, components) = seed(&db, &["Kilimani", "Yaya"]).await;

        let err = service
            .bulk_upsert_links(vec![
                NewLocationAddressComponent::new(location.id.clone(), components[0].id.clone())
                    .primary(),
                NewLocationAddressComponent::new("missing-location", components[1].id.clone()),
            ])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            db.db_count_rows("location_address_components").await.unwrap(),
            0
        );
        assert!(service
            .get_primary_component(&location.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reorder_sequences() {
        let (db, service, _temp) = create_test_service().await;
        let (location, components) = seed(&db, &["Kilimani", "Yaya", "Adams"]).await;

        let mut links = Vec::new();
        for (i, component) in components.iter().enumerate() {
            links.push(
                service
                    .create_link(
                        NewLocationAddressComponent::new(location.id.clone(), component.id.clone())
                            .with_sequence(i as i64 + 1),
                    )
                    .await
                    .unwrap(),
            );
        }
        // Prime the per-location list
        assert_eq!(service.get_by_location(&location.id).await.unwrap().len(), 3);

        let reordered = service
            .reorder_sequences(&location.id, &[links[2].id.clone(), links[0].id.clone()])
            .await
            .unwrap();
        let order: Vec<(&str, Option<i64>)> = reordered
            .iter()
            .map(|l| (l.id.as_str(), l.sequence))
            .collect();
        assert_eq!(
            order,
            vec![
                (links[2].id.as_str(), Some(1)),
                (links[0].id.as_str(), Some(2)),
                (links[1].id.as_str(), Some(3)),
            ]
        );

        let listed = service.get_by_location(&location.id).await.unwrap();
        assert_eq!(listed[0].id, links[2].id);

        let foreign = service
            .reorder_sequences(&location.id, &["not-a-link".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(foreign, ServiceError::Validation(_)));

        let repeated = service
            .reorder_sequences(&location.id, &[links[0].id.clone(), links[0].id.clone()])
            .await
            .unwrap_err();
        assert!(matches!(repeated, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_geometry_update_and_delete() {
        let (db, service, _temp) = create_test_service().await;
        let (location, components) = seed(&db, &["Kilimani", "Yaya"]).await;

        let link = service
            .create_link(
                NewLocationAddressComponent::new(location.id.clone(), components[0].id.clone())
                    .with_center_point(GeoPoint::new(36.7834, -1.2921)),
            )
            .await
            .unwrap();
        let by_component = service
            .get_by_address_component(&components[0].id)
            .await
            .unwrap();
        assert_eq!(by_component.len(), 1);

        let labelled = service
            .update_link(
                &link.id,
                LocationAddressComponentUpdate {
                    label: Some(Some("Main gate".to_string())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(labelled.label.as_deref(), Some("Main gate"));
        assert!(labelled.center_point.is_some());

        let other = service
            .create_link(NewLocationAddressComponent::new(
                location.id.clone(),
                components[1].id.clone(),
            ))
            .await
            .unwrap();

        assert!(service.delete_link(&link.id).await.unwrap().existed);
        assert!(!service.delete_link(&link.id).await.unwrap().existed);
        assert!(service
            .get_by_address_component(&components[0].id)
            .await
            .unwrap()
            .is_empty());

        let removed = service
            .bulk_delete_links(&[other.id.clone(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(service.get_by_location(&location.id).await.unwrap().is_empty());
    }
}
