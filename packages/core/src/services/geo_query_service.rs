//! Geospatial Query Service
//!
//! Read-only spatial operations over location and link geometry.
//!
//! # Two-phase evaluation
//!
//! 1. The database narrows candidates with a bounding-box range scan over
//!    the derived coordinate columns (see `db::spatial`).
//! 2. Candidates are refined exactly in memory with `geo`: geodesic (WGS84)
//!    distances for radius queries, polygon intersection and containment for
//!    geofence queries.
//!
//! Rows with no geometry never become candidates, so queries over missing
//! geometry come back empty instead of failing.
//!
//! `get_nearest_locations` is the exception: it ranks by planar squared
//! degree distance in SQL and is meant for "closest N" pickers, not for
//! accurate radius cut-offs.

use crate::cache::{keys, CacheAside};
use crate::db::DatabaseService;
use crate::models::{
    BoundingBox, GeoPoint, GeoPolygon, Location, LocationAddressComponent, NearbyComponentLink,
    NearbyLocation,
};
use crate::services::ServiceError;
use geo::{Contains, Distance, Geodesic, GeodesicArea, Intersects};
use serde_json::{json, Value};
use std::sync::Arc;

pub const MIN_NEAREST_LIMIT: u32 = 1;
pub const MAX_NEAREST_LIMIT: u32 = 100;

fn validate_radius(distance_meters: f64) -> Result<(), ServiceError> {
    if !distance_meters.is_finite() || distance_meters < 0.0 {
        return Err(ServiceError::validation(format!(
            "distance must be a finite, non-negative number of meters (got {})",
            distance_meters
        )));
    }
    Ok(())
}

/// Geodesic distance in meters between two points
pub fn geodesic_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    Geodesic::distance(a.to_geo(), b.to_geo())
}

/// Keep candidates within `distance_meters` of `origin`, nearest first
///
/// Ties keep the candidates' input order.
pub fn refine_within_radius<T>(
    origin: &GeoPoint,
    distance_meters: f64,
    candidates: Vec<T>,
    point_of: impl Fn(&T) -> Option<&GeoPoint>,
) -> Vec<(T, f64)> {
    let mut hits: Vec<(T, f64)> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let distance = geodesic_distance(origin, point_of(&candidate)?);
            (distance <= distance_meters).then_some((candidate, distance))
        })
        .collect();
    hits.sort_by(|a, b| a.1.total_cmp(&b.1));
    hits
}

#[derive(Debug, Clone)]
pub struct GeoQueryService {
    db: Arc<DatabaseService>,
    cache: CacheAside,
}

impl GeoQueryService {
    pub fn new(db: Arc<DatabaseService>, cache: CacheAside) -> Self {
        Self { db, cache }
    }

    /// Up to `limit` (clamped to 1..=100) locations by planar distance
    pub async fn get_nearest_locations(
        &self,
        point: &GeoPoint,
        limit: u32,
        county: Option<&str>,
    ) -> Result<Vec<Location>, ServiceError> {
        point.validate()?;
        let limit = limit.clamp(MIN_NEAREST_LIMIT, MAX_NEAREST_LIMIT);
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::geo("nearest", &(point.coordinates, limit, county)),
                self.cache.geo_ttl(),
                || async move {
                    Ok::<_, ServiceError>(db.db_nearest_locations(point, limit, county).await?)
                },
            )
            .await
    }

    /// Locations whose center point is within `distance_meters` (geodesic), nearest first
    pub async fn get_locations_near_point(
        &self,
        point: &GeoPoint,
        distance_meters: f64,
    ) -> Result<Vec<NearbyLocation>, ServiceError> {
        point.validate()?;
        validate_radius(distance_meters)?;
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::geo("near", &(point.coordinates, distance_meters)),
                self.cache.geo_ttl(),
                || async move {
                    let mut candidates = Vec::new();
                    for bbox in BoundingBox::around(point, distance_meters) {
                        candidates.extend(db.db_locations_with_center_in(&bbox).await?);
                    }
                    let scanned = candidates.len();
                    let hits = refine_within_radius(point, distance_meters, candidates, |l| {
                        l.center_point.as_ref()
                    });
                    tracing::debug!(
                        "Radius query {}m: {} candidate(s), {} within range",
                        distance_meters,
                        scanned,
                        hits.len()
                    );
                    Ok::<_, ServiceError>(
                        hits.into_iter()
                            .map(|(location, distance_meters)| NearbyLocation {
                                location,
                                distance_meters,
                            })
                            .collect(),
                    )
                },
            )
            .await
    }

    /// Locations whose geofence intersects `polygon` (partial overlap counts)
    pub async fn get_locations_in_geofence(
        &self,
        polygon: &GeoPolygon,
    ) -> Result<Vec<Location>, ServiceError> {
        polygon.validate()?;
        let bbox = polygon
            .bbox()
            .ok_or_else(|| ServiceError::validation("polygon has no exterior ring"))?;
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::geo("in_geofence", &polygon.coordinates),
                self.cache.geo_ttl(),
                || async move {
                    let query = polygon.to_geo();
                    let candidates = db.db_locations_with_geofence_overlapping(&bbox).await?;
                    Ok::<_, ServiceError>(
                        candidates
                            .into_iter()
                            .filter(|location| {
                                location
                                    .geofence
                                    .as_ref()
                                    .is_some_and(|fence| fence.to_geo().intersects(&query))
                            })
                            .collect(),
                    )
                },
            )
            .await
    }

    /// Locations whose geofence contains `point` (boundary points excluded)
    pub async fn get_locations_containing_point(
        &self,
        point: &GeoPoint,
    ) -> Result<Vec<Location>, ServiceError> {
        point.validate()?;
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::geo("containing", &point.coordinates),
                self.cache.geo_ttl(),
                || async move {
                    let bbox = BoundingBox::new(point.lng(), point.lat(), point.lng(), point.lat());
                    let target = point.to_geo();
                    let candidates = db.db_locations_with_geofence_overlapping(&bbox).await?;
                    Ok::<_, ServiceError>(
                        candidates
                            .into_iter()
                            .filter(|location| {
                                location
                                    .geofence
                                    .as_ref()
                                    .is_some_and(|fence| fence.to_geo().contains(&target))
                            })
                            .collect(),
                    )
                },
            )
            .await
    }

    /// Locations whose geofence overlaps the axis-aligned box
    pub async fn get_locations_within_bbox(
        &self,
        bbox: &BoundingBox,
    ) -> Result<Vec<Location>, ServiceError> {
        bbox.validate()?;
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::geo("bbox", bbox),
                self.cache.geo_ttl(),
                || async move {
                    let rect = bbox.to_rect();
                    let candidates = db.db_locations_with_geofence_overlapping(bbox).await?;
                    Ok::<_, ServiceError>(
                        candidates
                            .into_iter()
                            .filter(|location| {
                                location
                                    .geofence
                                    .as_ref()
                                    .is_some_and(|fence| fence.to_geo().intersects(&rect))
                            })
                            .collect(),
                    )
                },
            )
            .await
    }

    /// Geodesic area of the location's geofence in square meters; `None` without one
    pub async fn get_geofence_area_sq_meters(&self, id: &str) -> Result<Option<f64>, ServiceError> {
        let location = self.require_location(id).await?;
        Ok(location
            .geofence
            .map(|fence| fence.to_geo().geodesic_area_unsigned()))
    }

    /// GeoJSON `FeatureCollection` with one feature per present geometry
    pub async fn export_geojson(&self, id: &str) -> Result<Value, ServiceError> {
        let location = self.require_location(id).await?;
        let feature = |role: &str, geometry: Value| {
            json!({
                "type": "Feature",
                "geometry": geometry,
                "properties": {
                    "id": location.id,
                    "localAreaName": location.local_area_name,
                    "county": location.county,
                    "role": role,
                }
            })
        };

        let mut features = Vec::new();
        if let Some(point) = &location.center_point {
            features.push(feature("centerPoint", json!(point)));
        }
        if let Some(fence) = &location.geofence {
            features.push(feature("geofence", json!(fence)));
        }
        Ok(json!({
            "type": "FeatureCollection",
            "features": features,
        }))
    }

    /// Links whose center point is within `distance_meters` (geodesic), nearest first
    pub async fn find_components_near_point(
        &self,
        point: &GeoPoint,
        distance_meters: f64,
    ) -> Result<Vec<NearbyComponentLink>, ServiceError> {
        point.validate()?;
        validate_radius(distance_meters)?;
        let db = &self.db;
        self.cache
            .get_or_load(
                &keys::geo("components_near", &(point.coordinates, distance_meters)),
                self.cache.geo_ttl(),
                || async move {
                    let mut candidates: Vec<LocationAddressComponent> = Vec::new();
                    for bbox in BoundingBox::around(point, distance_meters) {
                        candidates.extend(db.db_links_with_center_in(&bbox).await?);
                    }
                    let hits = refine_within_radius(point, distance_meters, candidates, |link| {
                        link.center_point.as_ref()
                    });
                    Ok::<_, ServiceError>(
                        hits.into_iter()
                            .map(|(link, distance_meters)| NearbyComponentLink {
                                link,
                                distance_meters,
                            })
                            .collect(),
                    )
                },
            )
            .await
    }

    async fn require_location(&self, id: &str) -> Result<Location, ServiceError> {
        self.db
            .db_get_location(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Location", id))
    }
}

#[cfg(test)]
#[path = "geo_query_service_test.rs"]
mod geo_query_service_test;

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Destination;

    #[test]
    fn test_refine_within_radius_orders_and_cuts() {
        let origin = GeoPoint::new(36.8219, -1.2921);
        let at = |meters: f64| {
            let p = Geodesic::destination(origin.to_geo(), 90.0, meters);
            GeoPoint::new(p.x(), p.y())
        };
        let candidates = vec![
            ("far", Some(at(1001.0))),
            ("near", Some(at(10.0))),
            ("edge", Some(at(999.0))),
            ("none", None),
        ];
        let hits = refine_within_radius(&origin, 1000.0, candidates, |c| c.1.as_ref());
        let names: Vec<&str> = hits.iter().map(|(c, _)| c.0).collect();
        assert_eq!(names, vec!["near", "edge"]);
        assert!((hits[1].1 - 999.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_radius() {
        assert!(validate_radius(0.0).is_ok());
        assert!(validate_radius(-1.0).is_err());
        assert!(validate_radius(f64::NAN).is_err());
        assert!(validate_radius(f64::INFINITY).is_err());
    }
}
