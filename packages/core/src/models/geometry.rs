//! Geometry Value Types
//!
//! GeoJSON-shaped point and polygon values stored on locations and linkage rows,
//! plus the tri-state update marker used by every mutable geometry field.
//!
//! # Coordinate Order
//!
//! Coordinates are decimal degrees in `[longitude, latitude]` order, matching
//! GeoJSON. Conversions into `geo_types` map longitude to `x` and latitude to `y`.
//!
//! # Examples
//!
//! ```rust
//! use servicearea_core::models::{GeoPoint, GeoPolygon, GeometryUpdate};
//!
//! let point = GeoPoint::new(36.8219, -1.2921);
//! assert!(point.validate().is_ok());
//!
//! let fence = GeoPolygon::from_exterior(vec![
//!     [36.80, -1.30],
//!     [36.85, -1.30],
//!     [36.85, -1.25],
//!     [36.80, -1.25],
//!     [36.80, -1.30],
//! ]);
//! assert!(fence.validate().is_ok());
//!
//! let update: GeometryUpdate<GeoPoint> = GeometryUpdate::Set(point);
//! assert!(update.is_set());
//! ```

use super::ValidationError;
use geo_types::{coord, LineString, Point, Polygon, Rect};
use serde::{Deserialize, Serialize};

const POINT_TYPE: &str = "Point";
const POLYGON_TYPE: &str = "Polygon";

/// A single `[longitude, latitude]` position
pub type Position = [f64; 2];

fn validate_position(position: &Position) -> Result<(), ValidationError> {
    let [lng, lat] = *position;
    if !lng.is_finite() || !lat.is_finite() {
        return Err(ValidationError::InvalidGeometry(format!(
            "non-finite coordinate [{}, {}]",
            lng, lat
        )));
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(ValidationError::InvalidGeometry(format!(
            "longitude {} out of range [-180, 180]",
            lng
        )));
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(ValidationError::InvalidGeometry(format!(
            "latitude {} out of range [-90, 90]",
            lat
        )));
    }
    Ok(())
}

/// GeoJSON point: `{"type": "Point", "coordinates": [lng, lat]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Position,
}

impl GeoPoint {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self {
            kind: POINT_TYPE.to_string(),
            coordinates: [lng, lat],
        }
    }

    pub fn lng(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn lat(&self) -> f64 {
        self.coordinates[1]
    }

    /// Check the type tag and coordinate ranges
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.kind != POINT_TYPE {
            return Err(ValidationError::InvalidGeometry(format!(
                "expected type '{}', got '{}'",
                POINT_TYPE, self.kind
            )));
        }
        validate_position(&self.coordinates)
    }

    pub fn to_geo(&self) -> Point<f64> {
        Point::new(self.lng(), self.lat())
    }

    /// Serialize to the GeoJSON text stored in geometry columns
    pub fn to_json_string(&self) -> Result<String, ValidationError> {
        serde_json::to_string(self).map_err(|e| ValidationError::InvalidGeometry(e.to_string()))
    }

    /// Parse and validate GeoJSON text read from a geometry column
    pub fn from_json_str(raw: &str) -> Result<Self, ValidationError> {
        let point: GeoPoint = serde_json::from_str(raw)
            .map_err(|e| ValidationError::InvalidGeometry(format!("bad point JSON: {}", e)))?;
        point.validate()?;
        Ok(point)
    }
}

/// GeoJSON polygon: exterior ring first, then optional holes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPolygon {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<Position>>,
}

impl GeoPolygon {
    pub fn new(rings: Vec<Vec<Position>>) -> Self {
        Self {
            kind: POLYGON_TYPE.to_string(),
            coordinates: rings,
        }
    }

    pub fn from_exterior(exterior: Vec<Position>) -> Self {
        Self::new(vec![exterior])
    }

    /// Axis-aligned box as a closed, counter-clockwise polygon
    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        Self::from_exterior(vec![
            [bbox.min_lng, bbox.min_lat],
            [bbox.max_lng, bbox.min_lat],
            [bbox.max_lng, bbox.max_lat],
            [bbox.min_lng, bbox.max_lat],
            [bbox.min_lng, bbox.min_lat],
        ])
    }

    /// Check the type tag, ring closure, ring length and coordinate ranges
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.kind != POLYGON_TYPE {
            return Err(ValidationError::InvalidGeometry(format!(
                "expected type '{}', got '{}'",
                POLYGON_TYPE, self.kind
            )));
        }
        if self.coordinates.is_empty() {
            return Err(ValidationError::InvalidGeometry(
                "polygon has no rings".to_string(),
            ));
        }
        for (index, ring) in self.coordinates.iter().enumerate() {
            if ring.len() < 4 {
                return Err(ValidationError::InvalidGeometry(format!(
                    "ring {} has {} positions, at least 4 required",
                    index,
                    ring.len()
                )));
            }
            for position in ring {
                validate_position(position)?;
            }
            if ring.first() != ring.last() {
                return Err(ValidationError::InvalidGeometry(format!(
                    "ring {} is not closed",
                    index
                )));
            }
        }
        Ok(())
    }

    pub fn to_geo(&self) -> Polygon<f64> {
        let mut rings = self.coordinates.iter().map(|ring| {
            LineString::from(
                ring.iter()
                    .map(|[lng, lat]| (*lng, *lat))
                    .collect::<Vec<(f64, f64)>>(),
            )
        });
        let exterior = rings.next().unwrap_or_else(|| LineString::new(Vec::new()));
        Polygon::new(exterior, rings.collect())
    }

    /// Bounding box of the exterior ring (holes never extend past it)
    pub fn bbox(&self) -> Option<BoundingBox> {
        let exterior = self.coordinates.first()?;
        let mut positions = exterior.iter();
        let [first_lng, first_lat] = *positions.next()?;
        let mut bbox = BoundingBox {
            min_lng: first_lng,
            min_lat: first_lat,
            max_lng: first_lng,
            max_lat: first_lat,
        };
        for [lng, lat] in positions {
            bbox.min_lng = bbox.min_lng.min(*lng);
            bbox.min_lat = bbox.min_lat.min(*lat);
            bbox.max_lng = bbox.max_lng.max(*lng);
            bbox.max_lat = bbox.max_lat.max(*lat);
        }
        Some(bbox)
    }

    pub fn to_json_string(&self) -> Result<String, ValidationError> {
        serde_json::to_string(self).map_err(|e| ValidationError::InvalidGeometry(e.to_string()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ValidationError> {
        let polygon: GeoPolygon = serde_json::from_str(raw)
            .map_err(|e| ValidationError::InvalidGeometry(format!("bad polygon JSON: {}", e)))?;
        polygon.validate()?;
        Ok(polygon)
    }
}

/// Axis-aligned bounding box in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> Self {
        Self {
            min_lng,
            min_lat,
            max_lng,
            max_lat,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_position(&[self.min_lng, self.min_lat])?;
        validate_position(&[self.max_lng, self.max_lat])?;
        if self.min_lng > self.max_lng || self.min_lat > self.max_lat {
            return Err(ValidationError::InvalidGeometry(format!(
                "bbox minimum ({}, {}) exceeds maximum ({}, {})",
                self.min_lng, self.min_lat, self.max_lng, self.max_lat
            )));
        }
        Ok(())
    }

    /// Boxes covering roughly `meters` around `center`, used to prefilter radius queries.
    ///
    /// Widened by 10% so the exact geodesic check never misses a row the boxes cut off.
    /// A range crossing the antimeridian comes back as two boxes, one per side. When
    /// the range reaches a pole or spans every longitude, one full-width box is returned.
    pub fn around(center: &GeoPoint, meters: f64) -> Vec<Self> {
        const METERS_PER_DEGREE_LAT: f64 = 110_574.0;
        let lat_delta = meters * 1.1 / METERS_PER_DEGREE_LAT;
        let south = center.lat() - lat_delta;
        let north = center.lat() + lat_delta;
        let min_lat = south.max(-90.0);
        let max_lat = north.min(90.0);

        let cos_lat = center.lat().to_radians().cos().abs().max(1e-6);
        let lng_delta = meters * 1.1 / (111_320.0 * cos_lat);
        if south <= -90.0 || north >= 90.0 || lng_delta >= 180.0 {
            return vec![Self::new(-180.0, min_lat, 180.0, max_lat)];
        }

        let west = center.lng() - lng_delta;
        let east = center.lng() + lng_delta;
        if west < -180.0 {
            vec![
                Self::new(-180.0, min_lat, east, max_lat),
                Self::new(west + 360.0, min_lat, 180.0, max_lat),
            ]
        } else if east > 180.0 {
            vec![
                Self::new(west, min_lat, 180.0, max_lat),
                Self::new(-180.0, min_lat, east - 360.0, max_lat),
            ]
        } else {
            vec![Self::new(west, min_lat, east, max_lat)]
        }
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lng <= other.max_lng
            && self.max_lng >= other.min_lng
            && self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min_lng, y: self.min_lat },
            coord! { x: self.max_lng, y: self.max_lat },
        )
    }
}

/// Tri-state change marker for a nullable geometry field
///
/// - `Unchanged`: leave the stored value untouched (the default)
/// - `Clear`: set the column to NULL
/// - `Set(value)`: replace the stored value
///
/// Serialized as `"unchanged"`, `"clear"` or `{"set": <geometry>}` so that
/// clearing never depends on how a transport encodes `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GeometryUpdate<T> {
    Unchanged,
    Clear,
    Set(T),
}

impl<T> Default for GeometryUpdate<T> {
    fn default() -> Self {
        GeometryUpdate::Unchanged
    }
}

impl<T> GeometryUpdate<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, GeometryUpdate::Unchanged)
    }

    pub fn is_set(&self) -> bool {
        matches!(self, GeometryUpdate::Set(_))
    }

    /// Resolve against the current value
    pub fn apply(self, current: Option<T>) -> Option<T> {
        match self {
            GeometryUpdate::Unchanged => current,
            GeometryUpdate::Clear => None,
            GeometryUpdate::Set(value) => Some(value),
        }
    }

    pub fn as_ref(&self) -> GeometryUpdate<&T> {
        match self {
            GeometryUpdate::Unchanged => GeometryUpdate::Unchanged,
            GeometryUpdate::Clear => GeometryUpdate::Clear,
            GeometryUpdate::Set(value) => GeometryUpdate::Set(value),
        }
    }
}

impl GeometryUpdate<GeoPoint> {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            GeometryUpdate::Set(point) => point.validate(),
            _ => Ok(()),
        }
    }
}

impl GeometryUpdate<GeoPolygon> {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            GeometryUpdate::Set(polygon) => polygon.validate(),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square() -> GeoPolygon {
        GeoPolygon::from_exterior(vec![
            [36.0, -1.0],
            [37.0, -1.0],
            [37.0, 0.0],
            [36.0, 0.0],
            [36.0, -1.0],
        ])
    }

    #[test]
    fn test_point_serializes_as_geojson() {
        let point = GeoPoint::new(36.8219, -1.2921);
        let value = serde_json::to_value(&point).unwrap();
        assert_eq!(value, json!({"type": "Point", "coordinates": [36.8219, -1.2921]}));
    }

    #[test]
    fn test_point_rejects_out_of_range_latitude() {
        let point = GeoPoint::new(36.0, 91.0);
        assert!(matches!(
            point.validate(),
            Err(ValidationError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_point_rejects_wrong_type_tag() {
        let point: GeoPoint =
            serde_json::from_value(json!({"type": "LineString", "coordinates": [1.0, 2.0]}))
                .unwrap();
        assert!(point.validate().is_err());
    }

    #[test]
    fn test_point_rejects_nan() {
        assert!(GeoPoint::new(f64::NAN, 0.0).validate().is_err());
    }

    #[test]
    fn test_polygon_requires_closed_ring() {
        let open = GeoPolygon::from_exterior(vec![
            [36.0, -1.0],
            [37.0, -1.0],
            [37.0, 0.0],
            [36.0, 0.0],
        ]);
        let err = open.validate().unwrap_err();
        assert!(err.to_string().contains("not closed"));
    }

    #[test]
    fn test_polygon_requires_four_positions() {
        let short = GeoPolygon::from_exterior(vec![[36.0, -1.0], [37.0, -1.0], [36.0, -1.0]]);
        assert!(short.validate().is_err());
        assert!(GeoPolygon::new(Vec::new()).validate().is_err());
    }

    #[test]
    fn test_polygon_bbox() {
        let bbox = square().bbox().unwrap();
        assert_eq!(bbox, BoundingBox::new(36.0, -1.0, 37.0, 0.0));
    }

    #[test]
    fn test_polygon_round_trips_through_column_text() {
        let polygon = square();
        let raw = polygon.to_json_string().unwrap();
        assert_eq!(GeoPolygon::from_json_str(&raw).unwrap(), polygon);
    }

    #[test]
    fn test_bbox_validation_rejects_inverted_box() {
        assert!(BoundingBox::new(37.0, -1.0, 36.0, 0.0).validate().is_err());
        assert!(BoundingBox::new(36.0, -1.0, 37.0, 0.0).validate().is_ok());
    }

    #[test]
    fn test_bbox_around_contains_center() {
        let center = GeoPoint::new(36.8, -1.3);
        let boxes = BoundingBox::around(&center, 1_000.0);
        assert_eq!(boxes.len(), 1);
        let bbox = boxes[0];
        assert!(bbox.min_lng < 36.8 && bbox.max_lng > 36.8);
        assert!(bbox.min_lat < -1.3 && bbox.max_lat > -1.3);
        // ~1km is roughly 0.009 degrees
        assert!(bbox.max_lat - bbox.min_lat < 0.05);
    }

    #[test]
    fn test_bbox_around_splits_at_antimeridian() {
        let boxes = BoundingBox::around(&GeoPoint::new(179.999, 0.0), 1_000.0);
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].max_lng, 180.0);
        assert_eq!(boxes[1].min_lng, -180.0);
        assert!(boxes[1].max_lng > -180.0 && boxes[1].max_lng < -179.99);
        assert!(boxes.iter().all(|b| b.validate().is_ok()));

        let west = BoundingBox::around(&GeoPoint::new(-179.999, 0.0), 1_000.0);
        assert_eq!(west.len(), 2);
        assert_eq!(west[0].min_lng, -180.0);
        assert_eq!(west[1].max_lng, 180.0);
    }

    #[test]
    fn test_bbox_around_polar_or_huge_radius_spans_all_longitudes() {
        let polar = BoundingBox::around(&GeoPoint::new(10.0, 89.99), 5_000.0);
        assert_eq!(polar, vec![BoundingBox::new(-180.0, polar[0].min_lat, 180.0, 90.0)]);

        let huge = BoundingBox::around(&GeoPoint::new(36.8, -1.3), 25_000_000.0);
        assert_eq!(huge.len(), 1);
        assert_eq!((huge[0].min_lng, huge[0].max_lng), (-180.0, 180.0));
    }

    #[test]
    fn test_geometry_update_serde_shapes() {
        let unchanged: GeometryUpdate<GeoPoint> = serde_json::from_value(json!("unchanged")).unwrap();
        assert!(unchanged.is_unchanged());

        let clear: GeometryUpdate<GeoPoint> = serde_json::from_value(json!("clear")).unwrap();
        assert_eq!(clear, GeometryUpdate::Clear);

        let set: GeometryUpdate<GeoPoint> = serde_json::from_value(
            json!({"set": {"type": "Point", "coordinates": [1.0, 2.0]}}),
        )
        .unwrap();
        assert_eq!(set, GeometryUpdate::Set(GeoPoint::new(1.0, 2.0)));
    }

    #[test]
    fn test_geometry_update_apply() {
        let current = Some(GeoPoint::new(1.0, 1.0));
        assert_eq!(
            GeometryUpdate::Unchanged.apply(current.clone()),
            current.clone()
        );
        assert_eq!(GeometryUpdate::Clear.apply(current.clone()), None);
        assert_eq!(
            GeometryUpdate::Set(GeoPoint::new(2.0, 2.0)).apply(current),
            Some(GeoPoint::new(2.0, 2.0))
        );
    }
}
