//! Location ↔ Address Component Links
//!
//! A link joins one location to one address component. Links carry an optional
//! label, a caller-controlled `sequence`, an optional center point and an
//! `is_primary` flag; at most one link per location may be primary.

use super::{
    deserialize_optional_field, AddressComponent, GeoPoint, GeometryUpdate, ValidationError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored link row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationAddressComponent {
    pub id: String,
    pub location_id: String,
    pub address_component_id: String,
    pub label: Option<String>,
    pub sequence: Option<i64>,
    pub is_primary: bool,
    pub center_point: Option<GeoPoint>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A link together with the address component it points at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedAddressComponent {
    pub link: LocationAddressComponent,
    pub component: AddressComponent,
}

/// A link matched by a radius query, with its geodesic distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyComponentLink {
    pub link: LocationAddressComponent,
    pub distance_meters: f64,
}

/// Payload for creating or upserting a link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLocationAddressComponent {
    pub location_id: String,
    pub address_component_id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub sequence: Option<i64>,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub center_point: Option<GeoPoint>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl NewLocationAddressComponent {
    pub fn new(location_id: impl Into<String>, address_component_id: impl Into<String>) -> Self {
        Self {
            location_id: location_id.into(),
            address_component_id: address_component_id.into(),
            label: None,
            sequence: None,
            is_primary: false,
            center_point: None,
            metadata: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_sequence(mut self, sequence: i64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_center_point(mut self, point: GeoPoint) -> Self {
        self.center_point = Some(point);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.location_id.trim().is_empty() {
            return Err(ValidationError::MissingField("locationId".to_string()));
        }
        if self.address_component_id.trim().is_empty() {
            return Err(ValidationError::MissingField(
                "addressComponentId".to_string(),
            ));
        }
        if let Some(sequence) = self.sequence {
            if sequence < 0 {
                return Err(ValidationError::invalid_value(
                    "sequence",
                    "must not be negative",
                ));
            }
        }
        if let Some(point) = &self.center_point {
            point.validate()?;
        }
        Ok(())
    }

    pub fn natural_key(&self) -> (String, String) {
        (self.location_id.clone(), self.address_component_id.clone())
    }
}

/// Partial update for a link
///
/// Endpoints are immutable; delete and recreate to re-point a link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationAddressComponentUpdate {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub label: Option<Option<String>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub sequence: Option<Option<i64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_primary: Option<bool>,

    #[serde(default, skip_serializing_if = "GeometryUpdate::is_unchanged")]
    pub center_point: GeometryUpdate<GeoPoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl LocationAddressComponentUpdate {
    pub fn is_empty(&self) -> bool {
        self.label.is_none()
            && self.sequence.is_none()
            && self.is_primary.is_none()
            && self.center_point.is_unchanged()
            && self.metadata.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(Some(sequence)) = self.sequence {
            if sequence < 0 {
                return Err(ValidationError::invalid_value(
                    "sequence",
                    "must not be negative",
                ));
            }
        }
        self.center_point.validate()
    }
}
