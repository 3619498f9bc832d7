//! Cache key composition
//!
//! Every key starts with its namespace so whole families can be dropped with
//! a single `delete_pattern`. Filter-keyed entries embed the filter's JSON.

use serde::Serialize;

pub const ADDRESS_COMPONENT_PREFIX: &str = "address_component";
pub const LOCATION_PREFIX: &str = "location";
pub const LINK_PREFIX: &str = "link";
pub const GEO_PREFIX: &str = "geo";

pub fn address_component(id: &str) -> String {
    format!("{}:{}", ADDRESS_COMPONENT_PREFIX, id)
}

pub fn address_component_list<T: Serialize>(filter: &T) -> String {
    format!("{}:list:{}", ADDRESS_COMPONENT_PREFIX, filter_json(filter))
}

/// Lists, searches and hierarchy reads of address components
pub fn address_component_lists() -> String {
    format!("{}:list:*", ADDRESS_COMPONENT_PREFIX)
}

pub fn location(id: &str) -> String {
    format!("{}:{}", LOCATION_PREFIX, id)
}

pub fn location_list<T: Serialize>(filter: &T) -> String {
    format!("{}:list:{}", LOCATION_PREFIX, filter_json(filter))
}

pub fn location_lists() -> String {
    format!("{}:list:*", LOCATION_PREFIX)
}

/// Subtree of one location, or the whole forest for `None`
pub fn location_tree(id: Option<&str>) -> String {
    format!("{}:tree:{}", LOCATION_PREFIX, id.unwrap_or("roots"))
}

pub fn location_trees() -> String {
    format!("{}:tree:*", LOCATION_PREFIX)
}

pub fn location_components(location_id: &str) -> String {
    format!("{}:components:{}", LOCATION_PREFIX, location_id)
}

pub fn link(id: &str) -> String {
    format!("{}:{}", LINK_PREFIX, id)
}

pub fn links_by_location(location_id: &str) -> String {
    format!("{}:location:{}", LINK_PREFIX, location_id)
}

pub fn links_by_component(address_component_id: &str) -> String {
    format!("{}:component:{}", LINK_PREFIX, address_component_id)
}

pub fn geo<T: Serialize>(operation: &str, args: &T) -> String {
    format!("{}:{}:{}", GEO_PREFIX, operation, filter_json(args))
}

pub fn geo_all() -> String {
    format!("{}:*", GEO_PREFIX)
}

fn filter_json<T: Serialize>(value: &T) -> String {
    // Serializing plain filter structs cannot fail; fall back to a key that never repeats
    serde_json::to_string(value).unwrap_or_else(|_| uuid::Uuid::new_v4().to_string())
}
