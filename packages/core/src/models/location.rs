//! Location Data Structures
//!
//! A location is a named service area (region, county, neighborhood) placed in a
//! hierarchy whose ancestor/descendant pairs are materialized in a closure table.
//! Each location may carry a center point and a geofence polygon; the two are
//! independently nullable.

use super::{
    deserialize_optional_field, require_text, GeoPoint, GeoPolygon, GeometryUpdate, PageRequest,
    ValidationError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: String,
    pub local_area_name: String,
    pub county: String,
    pub town: Option<String>,
    pub street: Option<String>,
    pub coverage_details: Option<String>,
    pub parent_id: Option<String>,
    pub center_point: Option<GeoPoint>,
    pub geofence: Option<GeoPolygon>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Location {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A location with its fully expanded subtree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationTree {
    pub location: Location,
    pub children: Vec<LocationTree>,
}

impl LocationTree {
    pub fn leaf(location: Location) -> Self {
        Self {
            location,
            children: Vec::new(),
        }
    }

    /// Number of nodes in this tree, including the root
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(LocationTree::size).sum::<usize>()
    }

    /// Find a node anywhere in the tree by id
    pub fn find(&self, id: &str) -> Option<&LocationTree> {
        if self.location.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

/// A location matched by a radius query, with its geodesic distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyLocation {
    pub location: Location,
    pub distance_meters: f64,
}

/// Payload for creating or upserting a location
///
/// # Examples
///
/// ```rust
/// use servicearea_core::models::{GeoPoint, NewLocation};
///
/// let cbd = NewLocation::new("Nairobi CBD", "Nairobi")
///     .with_parent("nairobi-id")
///     .with_center_point(GeoPoint::new(36.8219, -1.2864));
/// assert!(cbd.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLocation {
    pub local_area_name: String,
    pub county: String,
    #[serde(default)]
    pub town: Option<String>,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub coverage_details: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub center_point: Option<GeoPoint>,
    #[serde(default)]
    pub geofence: Option<GeoPolygon>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl NewLocation {
    pub fn new(local_area_name: impl Into<String>, county: impl Into<String>) -> Self {
        Self {
            local_area_name: local_area_name.into(),
            county: county.into(),
            town: None,
            street: None,
            coverage_details: None,
            parent_id: None,
            center_point: None,
            geofence: None,
            metadata: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_town(mut self, town: impl Into<String>) -> Self {
        self.town = Some(town.into());
        self
    }

    pub fn with_center_point(mut self, point: GeoPoint) -> Self {
        self.center_point = Some(point);
        self
    }

    pub fn with_geofence(mut self, geofence: GeoPolygon) -> Self {
        self.geofence = Some(geofence);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("localAreaName", &self.local_area_name)?;
        require_text("county", &self.county)?;
        if let Some(point) = &self.center_point {
            point.validate()?;
        }
        if let Some(geofence) = &self.geofence {
            geofence.validate()?;
        }
        Ok(())
    }
}

/// Partial update for a location
///
/// Nullable text fields use the double-Option pattern (`None` = unchanged,
/// `Some(None)` = set NULL). Geometry fields use [`GeometryUpdate`], so clearing
/// a geometry is an explicit `Clear` signal rather than a null payload value.
/// Hierarchy changes go through `move` instead of this struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_area_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub county: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub town: Option<Option<String>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub street: Option<Option<String>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub coverage_details: Option<Option<String>>,

    #[serde(default, skip_serializing_if = "GeometryUpdate::is_unchanged")]
    pub center_point: GeometryUpdate<GeoPoint>,

    #[serde(default, skip_serializing_if = "GeometryUpdate::is_unchanged")]
    pub geofence: GeometryUpdate<GeoPolygon>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl LocationUpdate {
    pub fn is_empty(&self) -> bool {
        self.local_area_name.is_none()
            && self.county.is_none()
            && self.town.is_none()
            && self.street.is_none()
            && self.coverage_details.is_none()
            && self.center_point.is_unchanged()
            && self.geofence.is_unchanged()
            && self.metadata.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.local_area_name {
            require_text("localAreaName", name)?;
        }
        if let Some(county) = &self.county {
            require_text("county", county)?;
        }
        self.center_point.validate()?;
        self.geofence.validate()?;
        Ok(())
    }
}

/// Sortable columns for location listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LocationSortField {
    #[default]
    LocalAreaName,
    County,
    CreatedAt,
    UpdatedAt,
}

impl LocationSortField {
    pub fn column(&self) -> &'static str {
        match self {
            LocationSortField::LocalAreaName => "l.local_area_name",
            LocationSortField::County => "l.county",
            LocationSortField::CreatedAt => "l.created_at",
            LocationSortField::UpdatedAt => "l.updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filters for `list_with_filters`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationFilter {
    /// Case-insensitive substring match on name, town, street or coverage details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub county: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub town: Option<String>,

    /// Only top-level locations
    #[serde(default)]
    pub root_only: bool,

    /// `Some(true)`: only with a geofence, `Some(false)`: only without
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_geofence: Option<bool>,

    #[serde(default)]
    pub sort_by: LocationSortField,

    #[serde(default)]
    pub sort_order: SortOrder,

    #[serde(flatten)]
    pub page: PageRequest,
}
