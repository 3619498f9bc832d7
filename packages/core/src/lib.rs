//! Service Area Core
//!
//! This crate provides data management for a geospatial location catalog:
//! a hierarchy of named service areas (regions, counties, neighborhoods) with
//! point/polygon geometry, cross-referenced against a typed address taxonomy.
//!
//! # Architecture
//!
//! - **Closure table**: location ancestor/descendant pairs are materialized on
//!   write, so tree reads are single indexed queries
//! - **Adjacency list**: address components store only their parent and are
//!   walked with recursive CTEs
//! - **libsql**: embedded SQLite-compatible store; geometry is GeoJSON text with
//!   derived, indexed coordinate columns used as a spatial prefilter
//! - **Cache-aside**: services read through an injected cache and invalidate
//!   it on every write
//!
//! # Modules
//!
//! - [`models`] - Data structures (AddressComponent, Location, links, geometry)
//! - [`db`] - Database layer with libsql integration
//! - [`cache`] - Cache store trait, in-memory store and cache-aside helper
//! - [`services`] - Business services (locations, taxonomy, links, spatial queries)
//! - [`config`] - Database path and cache TTL configuration

pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::{CacheConfig, ServiceAreaConfig};
pub use models::*;
pub use services::*;
