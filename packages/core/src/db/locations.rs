//! Location Persistence
//!
//! SQL for `locations` and its closure table. Every live location owns a
//! depth-0 self row in `location_closure` plus one row per ancestor, so
//! ancestor, descendant and subtree reads are single joins. Re-parenting
//! rewrites the closure rows of the whole moved subtree in one transaction.
//!
//! Locations are soft-deleted (`deleted_at`); every read filters them out.

use crate::db::database::{DatabaseService, NOW_SQL};
use crate::db::error::DatabaseError;
use crate::db::rows::{
    like_contains_pattern, metadata_text, point_values, polygon_values, query_all, query_count,
    query_exists, query_optional, row_to_location, text_value, LOCATION_COLUMNS,
};
use crate::models::{
    BulkUpsertResult, GeoPoint, GeoPolygon, GeometryUpdate, Location, LocationFilter,
    LocationUpdate, NewLocation,
};
use libsql::{Connection, Value};
use std::collections::HashSet;

const ENTITY: &str = "Location";

async fn fetch_tx(conn: &Connection, id: &str) -> Result<Option<Location>, DatabaseError> {
    query_optional(
        conn,
        &format!(
            "SELECT {} FROM locations l WHERE l.id = ? AND l.deleted_at IS NULL",
            LOCATION_COLUMNS
        ),
        [id],
        row_to_location,
    )
    .await
}

async fn require_tx(conn: &Connection, id: &str) -> Result<Location, DatabaseError> {
    fetch_tx(conn, id)
        .await?
        .ok_or_else(|| DatabaseError::row_not_found(ENTITY, id))
}

async fn fetch_by_name_and_county_tx(
    conn: &Connection,
    local_area_name: &str,
    county: &str,
) -> Result<Option<Location>, DatabaseError> {
    query_optional(
        conn,
        &format!(
            "SELECT {} FROM locations l
             WHERE l.local_area_name = ? AND l.county = ? AND l.deleted_at IS NULL
             ORDER BY l.created_at, l.id LIMIT 1",
            LOCATION_COLUMNS
        ),
        [local_area_name, county],
        row_to_location,
    )
    .await
}

fn point_assignments(
    update: &GeometryUpdate<GeoPoint>,
    assignments: &mut Vec<String>,
    params: &mut Vec<Value>,
) -> Result<(), DatabaseError> {
    let point = match update {
        GeometryUpdate::Unchanged => return Ok(()),
        GeometryUpdate::Clear => None,
        GeometryUpdate::Set(point) => Some(point),
    };
    let [json, lng, lat] = point_values(point)?;
    assignments.extend(
        ["center_point = ?", "center_lng = ?", "center_lat = ?"]
            .iter()
            .map(|s| s.to_string()),
    );
    params.extend([json, lng, lat]);
    Ok(())
}

fn geofence_assignments(
    update: &GeometryUpdate<GeoPolygon>,
    assignments: &mut Vec<String>,
    params: &mut Vec<Value>,
) -> Result<(), DatabaseError> {
    let polygon = match update {
        GeometryUpdate::Unchanged => return Ok(()),
        GeometryUpdate::Clear => None,
        GeometryUpdate::Set(polygon) => Some(polygon),
    };
    assignments.extend(
        [
            "geofence = ?",
            "geofence_min_lng = ?",
            "geofence_min_lat = ?",
            "geofence_max_lng = ?",
            "geofence_max_lat = ?",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    params.extend(polygon_values(polygon)?);
    Ok(())
}

async fn insert_tx(conn: &Connection, payload: &NewLocation) -> Result<Location, DatabaseError> {
    if let Some(parent_id) = payload.parent_id.as_deref() {
        require_tx(conn, parent_id).await?;
    }

    let id = uuid::Uuid::new_v4().to_string();
    let mut params = vec![
        Value::Text(id.clone()),
        Value::Text(payload.local_area_name.clone()),
        Value::Text(payload.county.clone()),
        text_value(payload.town.as_deref()),
        text_value(payload.street.as_deref()),
        text_value(payload.coverage_details.as_deref()),
        text_value(payload.parent_id.as_deref()),
    ];
    params.extend(point_values(payload.center_point.as_ref())?);
    params.extend(polygon_values(payload.geofence.as_ref())?);
    params.push(Value::Text(metadata_text(payload.metadata.as_ref())?));

    conn.execute(
        "INSERT INTO locations (
            id, local_area_name, county, town, street, coverage_details, parent_id,
            center_point, center_lng, center_lat,
            geofence, geofence_min_lng, geofence_min_lat, geofence_max_lng, geofence_max_lat,
            metadata
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params,
    )
    .await
    .map_err(|e| DatabaseError::from_statement("Failed to insert location", e))?;

    // Self row plus one row per ancestor of the parent
    conn.execute(
        "INSERT INTO location_closure (ancestor_id, descendant_id, depth)
         SELECT ancestor_id, ?1, depth + 1 FROM location_closure WHERE descendant_id = ?2
         UNION ALL
         SELECT ?1, ?1, 0",
        vec![
            Value::Text(id.clone()),
            text_value(payload.parent_id.as_deref()),
        ],
    )
    .await
    .map_err(|e| DatabaseError::from_statement("Failed to insert closure rows", e))?;

    require_tx(conn, &id).await
}

async fn update_tx(
    conn: &Connection,
    id: &str,
    update: &LocationUpdate,
) -> Result<Location, DatabaseError> {
    require_tx(conn, id).await?;

    let mut assignments: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(name) = &update.local_area_name {
        assignments.push("local_area_name = ?".to_string());
        params.push(Value::Text(name.clone()));
    }
    if let Some(county) = &update.county {
        assignments.push("county = ?".to_string());
        params.push(Value::Text(county.clone()));
    }
    for (column, value) in [
        ("town", &update.town),
        ("street", &update.street),
        ("coverage_details", &update.coverage_details),
    ] {
        if let Some(value) = value {
            assignments.push(format!("{} = ?", column));
            params.push(text_value(value.as_deref()));
        }
    }
    point_assignments(&update.center_point, &mut assignments, &mut params)?;
    geofence_assignments(&update.geofence, &mut assignments, &mut params)?;
    if let Some(metadata) = &update.metadata {
        assignments.push("metadata = ?".to_string());
        params.push(Value::Text(metadata_text(Some(metadata))?));
    }

    assignments.push(format!("updated_at = {}", NOW_SQL));
    params.push(Value::Text(id.to_string()));

    conn.execute(
        &format!("UPDATE locations SET {} WHERE id = ?", assignments.join(", ")),
        params,
    )
    .await
    .map_err(|e| DatabaseError::from_statement("Failed to update location", e))?;

    require_tx(conn, id).await
}

async fn move_tx(
    conn: &Connection,
    id: &str,
    new_parent_id: Option<&str>,
) -> Result<Location, DatabaseError> {
    let current = require_tx(conn, id).await?;

    if let Some(parent_id) = new_parent_id {
        require_tx(conn, parent_id).await?;
        // The depth-0 self row makes this catch `parent_id == id` too
        let inside_subtree = query_exists(
            conn,
            "SELECT 1 FROM location_closure WHERE ancestor_id = ? AND descendant_id = ? LIMIT 1",
            [id, parent_id],
        )
        .await?;
        if inside_subtree {
            return Err(DatabaseError::cycle_detected(format!(
                "location {} cannot be moved under its own descendant {}",
                id, parent_id
            )));
        }
    }

    if current.parent_id.as_deref() == new_parent_id {
        return Ok(current);
    }

    // Detach the subtree from every ancestor outside it
    conn.execute(
        "DELETE FROM location_closure
         WHERE descendant_id IN (SELECT descendant_id FROM location_closure WHERE ancestor_id = ?1)
           AND ancestor_id NOT IN (SELECT descendant_id FROM location_closure WHERE ancestor_id = ?1)",
        [id],
    )
    .await
    .map_err(|e| DatabaseError::from_statement("Failed to detach closure rows", e))?;

    // Attach it under the new parent's ancestor chain
    if let Some(parent_id) = new_parent_id {
        conn.execute(
            "INSERT INTO location_closure (ancestor_id, descendant_id, depth)
             SELECT p.ancestor_id, s.descendant_id, p.depth + s.depth + 1
             FROM location_closure p CROSS JOIN location_closure s
             WHERE p.descendant_id = ?1 AND s.ancestor_id = ?2",
            [parent_id, id],
        )
        .await
        .map_err(|e| DatabaseError::from_statement("Failed to attach closure rows", e))?;
    }

    conn.execute(
        &format!(
            "UPDATE locations SET parent_id = ?, updated_at = {} WHERE id = ?",
            NOW_SQL
        ),
        vec![text_value(new_parent_id), Value::Text(id.to_string())],
    )
    .await
    .map_err(|e| DatabaseError::from_statement("Failed to update parent", e))?;

    tracing::info!(
        "Moved location {} from {:?} to {:?}",
        id,
        current.parent_id,
        new_parent_id
    );

    require_tx(conn, id).await
}

/// Insert or replace by `(local_area_name, county)`; `true` when inserted
///
/// An existing row takes every field of the payload; metadata is kept when
/// the payload carries none. A parent change is applied as a move.
async fn upsert_tx(
    conn: &Connection,
    payload: &NewLocation,
) -> Result<(Location, bool), DatabaseError> {
    let existing =
        fetch_by_name_and_county_tx(conn, &payload.local_area_name, &payload.county).await?;

    let current = match existing {
        Some(current) => current,
        None => return Ok((insert_tx(conn, payload).await?, true)),
    };

    if current.parent_id != payload.parent_id {
        move_tx(conn, &current.id, payload.parent_id.as_deref()).await?;
    }

    let update = LocationUpdate {
        town: Some(payload.town.clone()),
        street: Some(payload.street.clone()),
        coverage_details: Some(payload.coverage_details.clone()),
        center_point: match &payload.center_point {
            Some(point) => GeometryUpdate::Set(point.clone()),
            None => GeometryUpdate::Clear,
        },
        geofence: match &payload.geofence {
            Some(polygon) => GeometryUpdate::Set(polygon.clone()),
            None => GeometryUpdate::Clear,
        },
        metadata: payload.metadata.clone(),
        ..Default::default()
    };
    Ok((update_tx(conn, &current.id, &update).await?, false))
}

async fn count_live_children_tx(conn: &Connection, id: &str) -> Result<u64, DatabaseError> {
    query_count(
        conn,
        "SELECT COUNT(*) FROM locations WHERE parent_id = ? AND deleted_at IS NULL",
        [id],
    )
    .await
}

/// Soft-delete a childless location, dropping its links and closure rows
async fn soft_delete_tx(conn: &Connection, id: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM location_address_components WHERE location_id = ?",
        [id],
    )
    .await
    .map_err(|e| DatabaseError::from_statement("Failed to delete location links", e))?;

    conn.execute(
        &format!(
            "UPDATE locations SET deleted_at = {now}, updated_at = {now} WHERE id = ?",
            now = NOW_SQL
        ),
        [id],
    )
    .await
    .map_err(|e| DatabaseError::from_statement("Failed to delete location", e))?;

    conn.execute(
        "DELETE FROM location_closure WHERE descendant_id = ?1 OR ancestor_id = ?1",
        [id],
    )
    .await
    .map_err(|e| DatabaseError::from_statement("Failed to delete closure rows", e))?;

    Ok(())
}

impl DatabaseService {
    pub async fn db_get_location(&self, id: &str) -> Result<Option<Location>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        fetch_tx(&conn, id).await
    }

    pub async fn db_get_location_by_name_and_county(
        &self,
        local_area_name: &str,
        county: &str,
    ) -> Result<Option<Location>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        fetch_by_name_and_county_tx(&conn, local_area_name, county).await
    }

    /// Insert a location and its closure rows
    pub async fn db_create_location(
        &self,
        payload: &NewLocation,
    ) -> Result<Location, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;
        let result = insert_tx(&conn, payload).await;
        self.finish(&conn, result).await
    }

    /// Apply a partial update
    ///
    /// Columns whose field is omitted (or whose geometry is `Unchanged`) are
    /// not part of the UPDATE statement at all.
    pub async fn db_update_location(
        &self,
        id: &str,
        update: &LocationUpdate,
    ) -> Result<Location, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;
        let result = update_tx(&conn, id, update).await;
        self.finish(&conn, result).await
    }

    pub async fn db_move_location(
        &self,
        id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<Location, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;
        let result = move_tx(&conn, id, new_parent_id).await;
        self.finish(&conn, result).await
    }

    /// Soft-delete one location; `false` if it did not exist
    pub async fn db_delete_location(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;
        let result = async {
            if fetch_tx(&conn, id).await?.is_none() {
                return Ok(false);
            }
            let children = count_live_children_tx(&conn, id).await?;
            if children > 0 {
                return Err(DatabaseError::has_dependents(format!(
                    "location {} has {} child location(s)",
                    id, children
                )));
            }
            soft_delete_tx(&conn, id).await?;
            Ok::<_, DatabaseError>(true)
        }
        .await;
        self.finish(&conn, result).await
    }

    /// Soft-delete many locations leaves-first, all or nothing
    pub async fn db_bulk_delete_locations(&self, ids: &[String]) -> Result<u64, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;
        let result = async {
            let mut pending: Vec<&str> = Vec::new();
            let mut seen = HashSet::new();
            for id in ids {
                if seen.insert(id.as_str()) && fetch_tx(&conn, id).await?.is_some() {
                    pending.push(id.as_str());
                }
            }

            let mut deleted = 0u64;
            while !pending.is_empty() {
                let mut remaining = Vec::new();
                for id in pending.iter().copied() {
                    if count_live_children_tx(&conn, id).await? > 0 {
                        remaining.push(id);
                    } else {
                        soft_delete_tx(&conn, id).await?;
                        deleted += 1;
                    }
                }
                if remaining.len() == pending.len() {
                    return Err(DatabaseError::has_dependents(format!(
                        "location(s) {} still have children outside the batch",
                        remaining.join(", ")
                    )));
                }
                pending = remaining;
            }
            Ok::<_, DatabaseError>(deleted)
        }
        .await;
        self.finish(&conn, result).await
    }

    /// Insert or replace by `(local_area_name, county)`; `true` when inserted
    pub async fn db_upsert_location(
        &self,
        payload: &NewLocation,
    ) -> Result<(Location, bool), DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;
        let result = upsert_tx(&conn, payload).await;
        self.finish(&conn, result).await
    }

    /// Upsert a batch atomically, rejecting repeated `(name, county)` keys
    pub async fn db_bulk_upsert_locations(
        &self,
        payloads: &[NewLocation],
    ) -> Result<BulkUpsertResult, DatabaseError> {
        let mut keys = HashSet::new();
        for payload in payloads {
            if !keys.insert((payload.local_area_name.as_str(), payload.county.as_str())) {
                return Err(DatabaseError::constraint_violation(format!(
                    "duplicate natural key in batch: ({}, {})",
                    payload.local_area_name, payload.county
                )));
            }
        }

        let conn = self.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;
        let result = async {
            let mut counts = BulkUpsertResult::default();
            for payload in payloads {
                let (_, inserted) = upsert_tx(&conn, payload).await?;
                if inserted {
                    counts.inserted += 1;
                } else {
                    counts.updated += 1;
                }
            }
            Ok::<_, DatabaseError>(counts)
        }
        .await;
        self.finish(&conn, result).await
    }

    /// Filtered, sorted page plus the total match count
    pub async fn db_list_locations(
        &self,
        filter: &LocationFilter,
    ) -> Result<(Vec<Location>, u64), DatabaseError> {
        let page = filter.page.normalized();
        let mut conditions: Vec<String> = vec!["l.deleted_at IS NULL".to_string()];
        let mut params: Vec<Value> = Vec::new();

        if let Some(search) = filter.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                conditions.push(
                    "(LOWER(l.local_area_name) LIKE ? ESCAPE '\\' \
                     OR LOWER(COALESCE(l.town, '')) LIKE ? ESCAPE '\\' \
                     OR LOWER(COALESCE(l.street, '')) LIKE ? ESCAPE '\\' \
                     OR LOWER(COALESCE(l.coverage_details, '')) LIKE ? ESCAPE '\\')"
                        .to_string(),
                );
                let pattern = like_contains_pattern(search);
                params.extend((0..4).map(|_| Value::Text(pattern.clone())));
            }
        }
        if let Some(county) = &filter.county {
            conditions.push("LOWER(l.county) = LOWER(?)".to_string());
            params.push(Value::Text(county.clone()));
        }
        if let Some(town) = &filter.town {
            conditions.push("LOWER(l.town) = LOWER(?)".to_string());
            params.push(Value::Text(town.clone()));
        }
        if filter.root_only {
            conditions.push("l.parent_id IS NULL".to_string());
        }
        match filter.has_geofence {
            Some(true) => conditions.push("l.geofence IS NOT NULL".to_string()),
            Some(false) => conditions.push("l.geofence IS NULL".to_string()),
            None => {}
        }

        let where_clause = conditions.join(" AND ");
        let conn = self.connect_with_timeout().await?;
        let total = query_count(
            &conn,
            &format!("SELECT COUNT(*) FROM locations l WHERE {}", where_clause),
            params.clone(),
        )
        .await?;

        params.push(Value::Integer(i64::from(page.limit)));
        params.push(Value::Integer(page.offset() as i64));
        let data = query_all(
            &conn,
            &format!(
                "SELECT {} FROM locations l WHERE {} ORDER BY {} {}, l.id LIMIT ? OFFSET ?",
                LOCATION_COLUMNS,
                where_clause,
                filter.sort_by.column(),
                filter.sort_order.keyword()
            ),
            params,
            row_to_location,
        )
        .await?;

        Ok((data, total))
    }

    pub async fn db_list_locations_by_counties(
        &self,
        counties: &[String],
    ) -> Result<Vec<Location>, DatabaseError> {
        if counties.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.connect_with_timeout().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM locations l
                 WHERE l.county IN ({}) AND l.deleted_at IS NULL
                 ORDER BY l.county, l.local_area_name, l.id",
                LOCATION_COLUMNS,
                vec!["?"; counties.len()].join(", ")
            ),
            counties
                .iter()
                .map(|c| Value::Text(c.clone()))
                .collect::<Vec<_>>(),
            row_to_location,
        )
        .await
    }

    /// Direct children of `parent_id`, or root locations for `None`
    pub async fn db_get_location_children(
        &self,
        parent_id: Option<&str>,
    ) -> Result<Vec<Location>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM locations l
                 WHERE l.parent_id IS ? AND l.deleted_at IS NULL
                 ORDER BY l.local_area_name, l.id",
                LOCATION_COLUMNS
            ),
            vec![text_value(parent_id)],
            row_to_location,
        )
        .await
    }

    /// Ancestors from the closure table, root first
    pub async fn db_get_location_ancestors(&self, id: &str) -> Result<Vec<Location>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM location_closure c JOIN locations l ON l.id = c.ancestor_id
                 WHERE c.descendant_id = ? AND c.depth > 0 AND l.deleted_at IS NULL
                 ORDER BY c.depth DESC",
                LOCATION_COLUMNS
            ),
            [id],
            row_to_location,
        )
        .await
    }

    /// Descendants from the closure table, shallowest first
    pub async fn db_get_location_descendants(
        &self,
        id: &str,
    ) -> Result<Vec<Location>, DatabaseError> {
        self.closure_descendants(id, 1).await
    }

    /// The location itself followed by all of its descendants
    pub async fn db_get_location_subtree(&self, id: &str) -> Result<Vec<Location>, DatabaseError> {
        self.closure_descendants(id, 0).await
    }

    async fn closure_descendants(
        &self,
        id: &str,
        min_depth: i64,
    ) -> Result<Vec<Location>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM location_closure c JOIN locations l ON l.id = c.descendant_id
                 WHERE c.ancestor_id = ? AND c.depth >= ? AND l.deleted_at IS NULL
                 ORDER BY c.depth, l.local_area_name, l.id",
                LOCATION_COLUMNS
            ),
            vec![Value::Text(id.to_string()), Value::Integer(min_depth)],
            row_to_location,
        )
        .await
    }

    /// Every live location ordered by name (input for whole-forest trees)
    pub async fn db_get_all_locations(&self) -> Result<Vec<Location>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM locations l WHERE l.deleted_at IS NULL
                 ORDER BY l.local_area_name, l.id",
                LOCATION_COLUMNS
            ),
            (),
            row_to_location,
        )
        .await
    }

    /// `(ancestor_id, descendant_id, depth)` rows for one location (diagnostics and tests)
    pub async fn db_get_closure_rows(
        &self,
        descendant_id: &str,
    ) -> Result<Vec<(String, i64)>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        query_all(
            &conn,
            "SELECT ancestor_id, depth FROM location_closure WHERE descendant_id = ? ORDER BY depth",
            [descendant_id],
            |row| {
                let ancestor: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::row_decode(e.to_string()))?;
                let depth: i64 = row
                    .get(1)
                    .map_err(|e| DatabaseError::row_decode(e.to_string()))?;
                Ok((ancestor, depth))
            },
        )
        .await
    }
}
