//! Address Component Data Structures
//!
//! Address components are typed fragments of an address (county, town, estate,
//! street, ...) arranged as a parent-pointer tree. The natural key of a
//! component is `(type, value, parent_component_id)`; a missing parent is a
//! distinct key value, not a wildcard.

use super::{deserialize_optional_field, require_text, PageRequest, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored address component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressComponent {
    pub id: String,
    #[serde(rename = "type")]
    pub component_type: String,
    pub value: String,
    pub parent_component_id: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AddressComponent {
    pub fn is_root(&self) -> bool {
        self.parent_component_id.is_none()
    }

    /// Natural key used for idempotent upserts
    pub fn natural_key(&self) -> (String, String, Option<String>) {
        (
            self.component_type.clone(),
            self.value.clone(),
            self.parent_component_id.clone(),
        )
    }
}

/// Payload for creating or upserting an address component
///
/// # Examples
///
/// ```rust
/// use servicearea_core::models::NewAddressComponent;
///
/// let county = NewAddressComponent::new("county", "Nairobi");
/// assert!(county.validate().is_ok());
///
/// let estate = NewAddressComponent::new("estate", "Kilimani").with_parent("county-id");
/// assert_eq!(estate.parent_component_id.as_deref(), Some("county-id"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAddressComponent {
    #[serde(rename = "type")]
    pub component_type: String,
    pub value: String,
    #[serde(default)]
    pub parent_component_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl NewAddressComponent {
    pub fn new(component_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            component_type: component_type.into(),
            value: value.into(),
            parent_component_id: None,
            metadata: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_component_id = Some(parent_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("type", &self.component_type)?;
        require_text("value", &self.value)?;
        Ok(())
    }

    pub fn natural_key(&self) -> (String, String, Option<String>) {
        (
            self.component_type.clone(),
            self.value.clone(),
            self.parent_component_id.clone(),
        )
    }
}

/// Partial update for an address component
///
/// `parent_component_id` uses the double-Option pattern:
/// - `None`: don't change the parent
/// - `Some(None)`: make the component a root
/// - `Some(Some(id))`: re-parent (cycle-checked like a move)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressComponentUpdate {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub component_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub parent_component_id: Option<Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AddressComponentUpdate {
    pub fn is_empty(&self) -> bool {
        self.component_type.is_none()
            && self.value.is_none()
            && self.parent_component_id.is_none()
            && self.metadata.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(component_type) = &self.component_type {
            require_text("type", component_type)?;
        }
        if let Some(value) = &self.value {
            require_text("value", value)?;
        }
        Ok(())
    }
}

/// Filter for paginated address component search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressComponentFilter {
    /// Case-insensitive substring match on `value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,

    /// Match any of these types (empty = all types)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,

    /// `None`: any parent, `Some(None)`: roots only, `Some(Some(id))`: children of id
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub parent_component_id: Option<Option<String>>,

    #[serde(flatten)]
    pub page: PageRequest,
}
