//! Data Models
//!
//! This module contains the core data structures of the service area catalog:
//!
//! - `AddressComponent` - typed address fragment in a parent-pointer taxonomy
//! - `Location` - service area node in a closure-table hierarchy
//! - `LocationAddressComponent` - ordered, flagged link between the two
//! - Geometry values (`GeoPoint`, `GeoPolygon`) and the `GeometryUpdate` tri-state
//! - Pagination envelopes shared by list operations

mod address_component;
mod geometry;
mod linkage;
mod location;
mod pagination;

pub use address_component::{
    AddressComponent, AddressComponentFilter, AddressComponentUpdate, NewAddressComponent,
};
pub use geometry::{BoundingBox, GeoPoint, GeoPolygon, GeometryUpdate, Position};
pub use linkage::{
    LinkedAddressComponent, LocationAddressComponent, LocationAddressComponentUpdate,
    NearbyComponentLink, NewLocationAddressComponent,
};
pub use location::{
    Location, LocationFilter, LocationSortField, LocationTree, LocationUpdate, NearbyLocation,
    NewLocation, SortOrder,
};
pub use pagination::{BulkUpsertResult, DeleteResult, PageRequest, Paginated};

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Validation errors for model payloads
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Duplicate key in batch: {0}")]
    DuplicateKey(String),
}

impl ValidationError {
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Reject empty or whitespace-only required text
pub(crate) fn require_text(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field.to_string()));
    }
    Ok(())
}

/// Custom deserializer for optional fields that accepts both plain values and nulls
///
/// Maps three input formats to the double-Option pattern:
/// - Missing field → None (don't update)
/// - null → Some(None) (set to NULL)
/// - "value" → Some(Some("value")) (set to value)
pub(crate) fn deserialize_optional_field<'de, D, T>(
    deserializer: D,
) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    // Missing field is handled by #[serde(default)] on the struct field
    Ok(Some(Option::<T>::deserialize(deserializer)?))
}
