//! Database Layer
//!
//! This module handles all database interactions using libsql (embedded,
//! SQLite-compatible):
//!
//! - Database initialization and connection management
//! - Adjacency-list storage for address components (recursive CTE walks)
//! - Closure-table storage for the location hierarchy
//! - Location ↔ address component links with the single-primary rule
//! - Bounding-box candidate queries backing the spatial engine
//!
//! # Architecture
//!
//! All SQL lives on [`DatabaseService`] as `db_*` methods split across one
//! file per table family. Services above this layer add validation, caching
//! and error mapping; they never build SQL themselves.

mod address_components;
mod database;
mod error;
mod linkages;
mod locations;
mod rows;
mod spatial;

pub use database::DatabaseService;
pub use error::DatabaseError;
