//! Database Connection Management
//!
//! This module provides the core database connection and initialization
//! functionality using libsql (embedded, SQLite-compatible) for the service
//! area catalog.
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any valid PathBuf
//! - **WAL mode**: Write-Ahead Logging for concurrent readers during writes
//! - **Foreign keys**: Enabled on every connection for referential integrity
//! - **Spatial prefilter columns**: Geometry is stored as GeoJSON text next to
//!   indexed scalar coordinate / bounding-box columns derived on write
//!
//! # Database Connection Patterns
//!
//! **ALWAYS use `connect_with_timeout()` in async functions.** It sets the
//! 5-second busy timeout and enables foreign keys on the new connection, so
//! concurrent writers wait instead of failing with `SQLITE_BUSY`.
//!
//! ```no_run
//! # use servicearea_core::db::DatabaseService;
//! # use std::path::PathBuf;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_service = DatabaseService::new(PathBuf::from("./data/servicearea.db")).await?;
//! let conn = db_service.connect_with_timeout().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Transactions
//!
//! Multi-row writes run inside `BEGIN IMMEDIATE` on a single connection via
//! [`DatabaseService::begin_immediate`] / [`DatabaseService::finish`]. If the
//! surrounding future is dropped (deadline expired, caller cancelled) the
//! connection is dropped with it and SQLite rolls the open transaction back.

use crate::db::error::DatabaseError;
use libsql::{Builder, Connection, Database};
use std::path::PathBuf;
use std::sync::Arc;

/// SQL expression producing an RFC3339 UTC timestamp with milliseconds
pub(crate) const NOW_SQL: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

/// Tables and indexes, in creation order
const SCHEMA_STATEMENTS: &[(&str, &str)] = &[
    (
        "address_components",
        "CREATE TABLE IF NOT EXISTS address_components (
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            value TEXT NOT NULL,
            parent_component_id TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            -- Deletion with children is refused by the service layer, never cascaded
            FOREIGN KEY (parent_component_id) REFERENCES address_components(id) ON DELETE RESTRICT
        )",
    ),
    (
        "idx_address_components_natural_key",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_address_components_natural_key
         ON address_components(type, value, COALESCE(parent_component_id, ''))",
    ),
    (
        "idx_address_components_parent",
        "CREATE INDEX IF NOT EXISTS idx_address_components_parent
         ON address_components(parent_component_id)",
    ),
    (
        "idx_address_components_type",
        "CREATE INDEX IF NOT EXISTS idx_address_components_type ON address_components(type)",
    ),
    (
        "locations",
        "CREATE TABLE IF NOT EXISTS locations (
            id TEXT PRIMARY KEY,
            local_area_name TEXT NOT NULL,
            county TEXT NOT NULL,
            town TEXT,
            street TEXT,
            coverage_details TEXT,
            parent_id TEXT,
            center_point TEXT,
            center_lng REAL,
            center_lat REAL,
            geofence TEXT,
            geofence_min_lng REAL,
            geofence_min_lat REAL,
            geofence_max_lng REAL,
            geofence_max_lat REAL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            deleted_at TEXT,
            FOREIGN KEY (parent_id) REFERENCES locations(id) ON DELETE RESTRICT
        )",
    ),
    (
        "idx_locations_parent",
        "CREATE INDEX IF NOT EXISTS idx_locations_parent ON locations(parent_id)",
    ),
    (
        "idx_locations_name_county",
        "CREATE INDEX IF NOT EXISTS idx_locations_name_county ON locations(local_area_name, county)",
    ),
    (
        "idx_locations_county_town",
        "CREATE INDEX IF NOT EXISTS idx_locations_county_town ON locations(county, town)",
    ),
    (
        "idx_locations_center",
        "CREATE INDEX IF NOT EXISTS idx_locations_center ON locations(center_lng, center_lat)",
    ),
    (
        "idx_locations_geofence_bbox",
        "CREATE INDEX IF NOT EXISTS idx_locations_geofence_bbox
         ON locations(geofence_min_lng, geofence_max_lng, geofence_min_lat, geofence_max_lat)",
    ),
    (
        "location_closure",
        "CREATE TABLE IF NOT EXISTS location_closure (
            ancestor_id TEXT NOT NULL,
            descendant_id TEXT NOT NULL,
            depth INTEGER NOT NULL,
            PRIMARY KEY (ancestor_id, descendant_id),
            FOREIGN KEY (ancestor_id) REFERENCES locations(id) ON DELETE CASCADE,
            FOREIGN KEY (descendant_id) REFERENCES locations(id) ON DELETE CASCADE
        )",
    ),
    (
        "idx_location_closure_descendant",
        "CREATE INDEX IF NOT EXISTS idx_location_closure_descendant
         ON location_closure(descendant_id, depth)",
    ),
    (
        "location_address_components",
        "CREATE TABLE IF NOT EXISTS location_address_components (
            id TEXT PRIMARY KEY,
            location_id TEXT NOT NULL,
            address_component_id TEXT NOT NULL,
            label TEXT,
            sequence INTEGER,
            is_primary INTEGER NOT NULL DEFAULT 0,
            center_point TEXT,
            center_lng REAL,
            center_lat REAL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            FOREIGN KEY (location_id) REFERENCES locations(id) ON DELETE RESTRICT,
            FOREIGN KEY (address_component_id) REFERENCES address_components(id) ON DELETE RESTRICT
        )",
    ),
    (
        "idx_lac_pair",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_lac_pair
         ON location_address_components(location_id, address_component_id)",
    ),
    (
        // At most one primary link per location, even for out-of-band writers
        "idx_lac_single_primary",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_lac_single_primary
         ON location_address_components(location_id) WHERE is_primary = 1",
    ),
    (
        "idx_lac_component",
        "CREATE INDEX IF NOT EXISTS idx_lac_component
         ON location_address_components(address_component_id)",
    ),
    (
        "idx_lac_center",
        "CREATE INDEX IF NOT EXISTS idx_lac_center
         ON location_address_components(center_lng, center_lat)",
    ),
];

/// Database service for managing the libsql connection and schema
///
/// # Examples
///
/// ```no_run
/// use servicearea_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db_service = DatabaseService::new(PathBuf::from("/path/to/servicearea.db")).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,
}

impl DatabaseService {
    /// Create a new DatabaseService with the specified database path
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Initialize the schema (CREATE TABLE IF NOT EXISTS)
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the parent directory cannot be created, the
    /// connection fails, or schema initialization fails.
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
        };

        service.initialize_schema().await?;

        tracing::info!("Opened service area database at {}", service.db_path.display());

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Initialize database schema and configuration
    ///
    /// Idempotent: safe to call on every open.
    async fn initialize_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        for (name, sql) in SCHEMA_STATEMENTS {
            conn.execute(sql, ()).await.map_err(|e| {
                DatabaseError::initialization_failed(format!("Failed to create '{}': {}", name, e))
            })?;
        }

        Ok(())
    }

    /// Get a synchronous connection to the database
    ///
    /// Only for single-threaded contexts; async code should use
    /// `connect_with_timeout()`.
    pub fn connect(&self) -> Result<Connection, DatabaseError> {
        self.db
            .connect()
            .map_err(|e| DatabaseError::connection_failed(self.db_path.clone(), e))
    }

    /// Get an async connection with busy timeout and foreign keys configured
    ///
    /// **✅ RECOMMENDED** for every async operation. `foreign_keys` is a
    /// per-connection pragma in SQLite, so it is set here rather than once at
    /// initialization.
    pub async fn connect_with_timeout(&self) -> Result<Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON")
            .await?;

        Ok(conn)
    }

    /// Start a write transaction that takes the database write lock up front
    ///
    /// `IMMEDIATE` serializes writers, so read-then-write sequences inside the
    /// transaction (primary flag flips, natural-key upserts, closure rewrites)
    /// cannot interleave with another writer.
    pub async fn begin_immediate(&self, conn: &Connection) -> Result<(), DatabaseError> {
        conn.execute("BEGIN IMMEDIATE", ()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to begin transaction: {}", e))
        })?;
        Ok(())
    }

    /// Commit on success, roll back on failure, and hand the result back
    pub async fn finish<T>(
        &self,
        conn: &Connection,
        result: Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        match result {
            Ok(value) => {
                if let Err(e) = conn.execute("COMMIT", ()).await {
                    let _rollback = conn.execute("ROLLBACK", ()).await;
                    return Err(DatabaseError::sql_execution(format!(
                        "Failed to commit transaction: {}",
                        e
                    )));
                }
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = conn.execute("ROLLBACK", ()).await {
                    tracing::warn!("Rollback after '{}' failed: {}", error, rollback_error);
                }
                Err(error)
            }
        }
    }

    /// Count rows of a table (diagnostics and tests)
    pub async fn db_count_rows(&self, table: &str) -> Result<u64, DatabaseError> {
        if !SCHEMA_STATEMENTS.iter().any(|(name, _)| *name == table) {
            return Err(DatabaseError::sql_execution(format!(
                "Unknown table '{}'",
                table
            )));
        }

        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query(&format!("SELECT COUNT(*) FROM {}", table), ())
            .await
            .map_err(|e| DatabaseError::from_statement("Failed to count rows", e))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            Some(row) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::row_decode(e.to_string()))?;
                Ok(count.max(0) as u64)
            }
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn query_strings(conn: &Connection, sql: &str) -> Vec<String> {
        let mut rows = conn.query(sql, ()).await.unwrap();
        let mut values = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            let value: String = row.get(0).unwrap();
            values.push(value);
        }
        values
    }

    #[tokio::test]
    async fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db_service = DatabaseService::new(db_path.clone()).await.unwrap();

        assert_eq!(db_service.db_path, db_path);
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect_with_timeout().await.unwrap();

        let tables = query_strings(
            &conn,
            "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
        )
        .await;

        for expected in [
            "address_components",
            "location_address_components",
            "location_closure",
            "locations",
        ] {
            assert!(
                tables.contains(&expected.to_string()),
                "missing table {}",
                expected
            );
        }
    }

    #[tokio::test]
    async fn test_indexes_created() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect_with_timeout().await.unwrap();

        let indexes = query_strings(
            &conn,
            "SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'",
        )
        .await;

        assert!(indexes.contains(&"idx_address_components_natural_key".to_string()));
        assert!(indexes.contains(&"idx_lac_pair".to_string()));
        assert!(indexes.contains(&"idx_lac_single_primary".to_string()));
        assert!(indexes.contains(&"idx_locations_center".to_string()));
        assert!(indexes.contains(&"idx_locations_geofence_bbox".to_string()));
        assert!(indexes.contains(&"idx_location_closure_descendant".to_string()));
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled_per_connection() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect_with_timeout().await.unwrap();

        let mut rows = conn.query("PRAGMA foreign_keys", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let enabled: i64 = row.get(0).unwrap();
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_idempotent_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let first = DatabaseService::new(db_path.clone()).await.unwrap();
        drop(first);
        let second = DatabaseService::new(db_path).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_parent_directory_creation() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("nested").join("dirs").join("test.db");

        let _db_service = DatabaseService::new(nested_path.clone()).await.unwrap();

        assert!(nested_path.exists());
    }

    #[tokio::test]
    async fn test_finish_rolls_back_on_error() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect_with_timeout().await.unwrap();

        db_service.begin_immediate(&conn).await.unwrap();
        conn.execute(
            "INSERT INTO address_components (id, type, value) VALUES ('a', 'county', 'Nairobi')",
            (),
        )
        .await
        .unwrap();
        let result: Result<(), DatabaseError> =
            Err(DatabaseError::sql_execution("simulated failure"));
        assert!(db_service.finish(&conn, result).await.is_err());

        assert_eq!(
            db_service.db_count_rows("address_components").await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_natural_key_index_treats_null_parent_as_value() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect_with_timeout().await.unwrap();

        conn.execute(
            "INSERT INTO address_components (id, type, value) VALUES ('a', 'county', 'Nairobi')",
            (),
        )
        .await
        .unwrap();
        let duplicate = conn
            .execute(
                "INSERT INTO address_components (id, type, value) VALUES ('b', 'county', 'Nairobi')",
                (),
            )
            .await;
        assert!(duplicate.is_err());
    }
}
