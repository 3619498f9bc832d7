//! Spatial Candidate Queries
//!
//! SQLite has no geometry type, so the derived scalar columns
//! (`center_lng`/`center_lat`, `geofence_min_*`/`geofence_max_*`) stand in for
//! a spatial index. These queries only narrow candidates with B-tree range
//! scans; exact predicates (geodesic distance, containment, intersection) are
//! evaluated by the geo query service. Rows whose geometry is NULL never match.

use crate::db::database::DatabaseService;
use crate::db::error::DatabaseError;
use crate::db::rows::{query_all, row_to_link, row_to_location, LINK_COLUMNS, LOCATION_COLUMNS};
use crate::models::{BoundingBox, GeoPoint, Location, LocationAddressComponent};
use libsql::Value;

fn bbox_params(bbox: &BoundingBox) -> Vec<Value> {
    vec![
        Value::Real(bbox.min_lng),
        Value::Real(bbox.max_lng),
        Value::Real(bbox.min_lat),
        Value::Real(bbox.max_lat),
    ]
}

impl DatabaseService {
    /// Up to `limit` locations ordered by planar (squared degree) distance
    ///
    /// Approximate ordering for "nearest N" lists, not a geodesic ranking.
    pub async fn db_nearest_locations(
        &self,
        point: &GeoPoint,
        limit: u32,
        county: Option<&str>,
    ) -> Result<Vec<Location>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        let mut params = vec![Value::Real(point.lng()), Value::Real(point.lat())];
        let county_clause = match county {
            Some(county) => {
                params.push(Value::Text(county.to_string()));
                "AND LOWER(l.county) = LOWER(?3)"
            }
            None => "",
        };
        params.push(Value::Integer(i64::from(limit)));
        let limit_param = params.len();

        query_all(
            &conn,
            &format!(
                "SELECT {} FROM locations l
                 WHERE l.deleted_at IS NULL AND l.center_lng IS NOT NULL {}
                 ORDER BY (l.center_lng - ?1) * (l.center_lng - ?1)
                        + (l.center_lat - ?2) * (l.center_lat - ?2), l.id
                 LIMIT ?{}",
                LOCATION_COLUMNS, county_clause, limit_param
            ),
            params,
            row_to_location,
        )
        .await
    }

    /// Live locations whose center point lies inside `bbox`
    pub async fn db_locations_with_center_in(
        &self,
        bbox: &BoundingBox,
    ) -> Result<Vec<Location>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM locations l
                 WHERE l.deleted_at IS NULL
                   AND l.center_lng BETWEEN ?1 AND ?2
                   AND l.center_lat BETWEEN ?3 AND ?4",
                LOCATION_COLUMNS
            ),
            bbox_params(bbox),
            row_to_location,
        )
        .await
    }

    /// Live locations whose geofence bounding box overlaps `bbox`
    pub async fn db_locations_with_geofence_overlapping(
        &self,
        bbox: &BoundingBox,
    ) -> Result<Vec<Location>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM locations l
                 WHERE l.deleted_at IS NULL
                   AND l.geofence_min_lng <= ?2 AND l.geofence_max_lng >= ?1
                   AND l.geofence_min_lat <= ?4 AND l.geofence_max_lat >= ?3
                 ORDER BY l.local_area_name, l.id",
                LOCATION_COLUMNS
            ),
            bbox_params(bbox),
            row_to_location,
        )
        .await
    }

    /// Links whose center point lies inside `bbox`
    pub async fn db_links_with_center_in(
        &self,
        bbox: &BoundingBox,
    ) -> Result<Vec<LocationAddressComponent>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM location_address_components lac
                 WHERE lac.center_lng BETWEEN ?1 AND ?2
                   AND lac.center_lat BETWEEN ?3 AND ?4",
                LINK_COLUMNS
            ),
            bbox_params(bbox),
            row_to_link,
        )
        .await
    }
}
