//! Location ↔ Address Component Link Persistence
//!
//! SQL for `location_address_components`. The single-primary rule is applied
//! inside the writing transaction: the current primary of the location is
//! demoted before another row is promoted, and the partial unique index
//! `idx_lac_single_primary` rejects any commit that would still leave two.

use crate::db::database::{DatabaseService, NOW_SQL};
use crate::db::error::DatabaseError;
use crate::db::rows::{
    metadata_text, point_values, query_all, query_exists, query_optional, row_to_link,
    row_to_linked_component, text_value, ADDRESS_COMPONENT_COLUMNS, LINK_COLUMNS,
};
use crate::models::{
    BulkUpsertResult, GeometryUpdate, LinkedAddressComponent, LocationAddressComponent,
    LocationAddressComponentUpdate, NewLocationAddressComponent,
};
use libsql::{Connection, Value};
use std::collections::HashSet;

const ENTITY: &str = "LocationAddressComponent";

/// Caller-defined sequence first, unsequenced links last in creation order
const LINK_ORDER: &str = "lac.sequence IS NULL, lac.sequence, lac.created_at, lac.id";

async fn fetch_tx(
    conn: &Connection,
    id: &str,
) -> Result<Option<LocationAddressComponent>, DatabaseError> {
    query_optional(
        conn,
        &format!(
            "SELECT {} FROM location_address_components lac WHERE lac.id = ?",
            LINK_COLUMNS
        ),
        [id],
        row_to_link,
    )
    .await
}

async fn require_tx(conn: &Connection, id: &str) -> Result<LocationAddressComponent, DatabaseError> {
    fetch_tx(conn, id)
        .await?
        .ok_or_else(|| DatabaseError::row_not_found(ENTITY, id))
}

async fn fetch_by_pair_tx(
    conn: &Connection,
    location_id: &str,
    address_component_id: &str,
) -> Result<Option<LocationAddressComponent>, DatabaseError> {
    query_optional(
        conn,
        &format!(
            "SELECT {} FROM location_address_components lac
             WHERE lac.location_id = ? AND lac.address_component_id = ?",
            LINK_COLUMNS
        ),
        [location_id, address_component_id],
        row_to_link,
    )
    .await
}

async fn links_by_location_tx(
    conn: &Connection,
    location_id: &str,
) -> Result<Vec<LocationAddressComponent>, DatabaseError> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM location_address_components lac WHERE lac.location_id = ?
             ORDER BY {}",
            LINK_COLUMNS, LINK_ORDER
        ),
        [location_id],
        row_to_link,
    )
    .await
}

async fn require_endpoints_tx(
    conn: &Connection,
    location_id: &str,
    address_component_id: &str,
) -> Result<(), DatabaseError> {
    let location_exists = query_exists(
        conn,
        "SELECT 1 FROM locations WHERE id = ? AND deleted_at IS NULL",
        [location_id],
    )
    .await?;
    if !location_exists {
        return Err(DatabaseError::row_not_found("Location", location_id));
    }

    let component_exists = query_exists(
        conn,
        "SELECT 1 FROM address_components WHERE id = ?",
        [address_component_id],
    )
    .await?;
    if !component_exists {
        return Err(DatabaseError::row_not_found(
            "AddressComponent",
            address_component_id,
        ));
    }
    Ok(())
}

/// Demote the location's current primary link, other than `keep_id`
async fn demote_primary_tx(
    conn: &Connection,
    location_id: &str,
    keep_id: Option<&str>,
) -> Result<(), DatabaseError> {
    let demoted = conn
        .execute(
            &format!(
                "UPDATE location_address_components SET is_primary = 0, updated_at = {}
                 WHERE location_id = ? AND is_primary = 1 AND id IS NOT ?",
                NOW_SQL
            ),
            vec![Value::Text(location_id.to_string()), text_value(keep_id)],
        )
        .await
        .map_err(|e| DatabaseError::from_statement("Failed to demote primary link", e))?;

    if demoted > 0 {
        tracing::debug!("Demoted previous primary link of location {}", location_id);
    }
    Ok(())
}

async fn insert_tx(
    conn: &Connection,
    payload: &NewLocationAddressComponent,
) -> Result<LocationAddressComponent, DatabaseError> {
    require_endpoints_tx(conn, &payload.location_id, &payload.address_component_id).await?;

    if payload.is_primary {
        demote_primary_tx(conn, &payload.location_id, None).await?;
    }

    let id = uuid::Uuid::new_v4().to_string();
    let mut params = vec![
        Value::Text(id.clone()),
        Value::Text(payload.location_id.clone()),
        Value::Text(payload.address_component_id.clone()),
        text_value(payload.label.as_deref()),
        payload.sequence.map(Value::Integer).unwrap_or(Value::Null),
        Value::Integer(i64::from(payload.is_primary)),
    ];
    params.extend(point_values(payload.center_point.as_ref())?);
    params.push(Value::Text(metadata_text(payload.metadata.as_ref())?));

    conn.execute(
        "INSERT INTO location_address_components (
            id, location_id, address_component_id, label, sequence, is_primary,
            center_point, center_lng, center_lat, metadata
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params,
    )
    .await
    .map_err(|e| DatabaseError::from_statement("Failed to insert location link", e))?;

    require_tx(conn, &id).await
}

async fn update_tx(
    conn: &Connection,
    id: &str,
    update: &LocationAddressComponentUpdate,
) -> Result<LocationAddressComponent, DatabaseError> {
    let current = require_tx(conn, id).await?;

    let mut assignments: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(label) = &update.label {
        assignments.push("label = ?".to_string());
        params.push(text_value(label.as_deref()));
    }
    if let Some(sequence) = update.sequence {
        assignments.push("sequence = ?".to_string());
        params.push(sequence.map(Value::Integer).unwrap_or(Value::Null));
    }
    if let Some(is_primary) = update.is_primary {
        if is_primary && !current.is_primary {
            demote_primary_tx(conn, &current.location_id, Some(id)).await?;
        }
        assignments.push("is_primary = ?".to_string());
        params.push(Value::Integer(i64::from(is_primary)));
    }
    let point = match &update.center_point {
        GeometryUpdate::Unchanged => None,
        GeometryUpdate::Clear => Some(None),
        GeometryUpdate::Set(point) => Some(Some(point)),
    };
    if let Some(point) = point {
        assignments.extend(
            ["center_point = ?", "center_lng = ?", "center_lat = ?"]
                .iter()
                .map(|s| s.to_string()),
        );
        params.extend(point_values(point)?);
    }
    if let Some(metadata) = &update.metadata {
        assignments.push("metadata = ?".to_string());
        params.push(Value::Text(metadata_text(Some(metadata))?));
    }

    assignments.push(format!("updated_at = {}", NOW_SQL));
    params.push(Value::Text(id.to_string()));

    conn.execute(
        &format!(
            "UPDATE location_address_components SET {} WHERE id = ?",
            assignments.join(", ")
        ),
        params,
    )
    .await
    .map_err(|e| DatabaseError::from_statement("Failed to update location link", e))?;

    require_tx(conn, id).await
}

/// Insert or overwrite by `(location_id, address_component_id)`; `true` when inserted
///
/// An existing link takes every field of the payload; metadata is kept when
/// the payload carries none.
async fn upsert_tx(
    conn: &Connection,
    payload: &NewLocationAddressComponent,
) -> Result<(LocationAddressComponent, bool), DatabaseError> {
    let existing =
        fetch_by_pair_tx(conn, &payload.location_id, &payload.address_component_id).await?;

    match existing {
        Some(current) => {
            let update = LocationAddressComponentUpdate {
                label: Some(payload.label.clone()),
                sequence: Some(payload.sequence),
                is_primary: Some(payload.is_primary),
                center_point: match &payload.center_point {
                    Some(point) => GeometryUpdate::Set(point.clone()),
                    None => GeometryUpdate::Clear,
                },
                metadata: payload.metadata.clone(),
            };
            Ok((update_tx(conn, &current.id, &update).await?, false))
        }
        None => Ok((insert_tx(conn, payload).await?, true)),
    }
}

impl DatabaseService {
    pub async fn db_get_link(
        &self,
        id: &str,
    ) -> Result<Option<LocationAddressComponent>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        fetch_tx(&conn, id).await
    }

    /// Links of one location by sequence (unsequenced last), then creation time
    pub async fn db_get_links_by_location(
        &self,
        location_id: &str,
    ) -> Result<Vec<LocationAddressComponent>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        links_by_location_tx(&conn, location_id).await
    }

    pub async fn db_get_links_by_component(
        &self,
        address_component_id: &str,
    ) -> Result<Vec<LocationAddressComponent>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM location_address_components lac
                 WHERE lac.address_component_id = ?
                 ORDER BY lac.created_at, lac.id",
                LINK_COLUMNS
            ),
            [address_component_id],
            row_to_link,
        )
        .await
    }

    /// Links of one location joined with their components, in link order
    pub async fn db_get_linked_components(
        &self,
        location_id: &str,
    ) -> Result<Vec<LinkedAddressComponent>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {}, {} FROM location_address_components lac
                 JOIN address_components ac ON ac.id = lac.address_component_id
                 WHERE lac.location_id = ?
                 ORDER BY {}",
                LINK_COLUMNS, ADDRESS_COMPONENT_COLUMNS, LINK_ORDER
            ),
            [location_id],
            row_to_linked_component,
        )
        .await
    }

    pub async fn db_get_primary_link(
        &self,
        location_id: &str,
    ) -> Result<Option<LocationAddressComponent>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        query_optional(
            &conn,
            &format!(
                "SELECT {} FROM location_address_components lac
                 WHERE lac.location_id = ? AND lac.is_primary = 1",
                LINK_COLUMNS
            ),
            [location_id],
            row_to_link,
        )
        .await
    }

    /// Insert a link, demoting the location's previous primary when needed
    pub async fn db_create_link(
        &self,
        payload: &NewLocationAddressComponent,
    ) -> Result<LocationAddressComponent, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;
        let result = insert_tx(&conn, payload).await;
        self.finish(&conn, result).await
    }

    pub async fn db_update_link(
        &self,
        id: &str,
        update: &LocationAddressComponentUpdate,
    ) -> Result<LocationAddressComponent, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;
        let result = update_tx(&conn, id, update).await;
        self.finish(&conn, result).await
    }

    /// Delete one link; `false` if it did not exist
    pub async fn db_delete_link(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        let affected = conn
            .execute("DELETE FROM location_address_components WHERE id = ?", [id])
            .await
            .map_err(|e| DatabaseError::from_statement("Failed to delete location link", e))?;
        Ok(affected > 0)
    }

    /// Delete many links in one transaction; unknown ids are skipped
    pub async fn db_bulk_delete_links(&self, ids: &[String]) -> Result<u64, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;
        let result = async {
            let mut deleted = 0u64;
            let mut seen = HashSet::new();
            for id in ids.iter().filter(|id| seen.insert(id.as_str())) {
                deleted += conn
                    .execute(
                        "DELETE FROM location_address_components WHERE id = ?",
                        [id.as_str()],
                    )
                    .await
                    .map_err(|e| {
                        DatabaseError::from_statement("Failed to delete location link", e)
                    })?;
            }
            Ok::<_, DatabaseError>(deleted)
        }
        .await;
        self.finish(&conn, result).await
    }

    /// Upsert a batch of links atomically, rejecting repeated pairs
    pub async fn db_bulk_upsert_links(
        &self,
        payloads: &[NewLocationAddressComponent],
    ) -> Result<BulkUpsertResult, DatabaseError> {
        let mut keys = HashSet::new();
        for payload in payloads {
            if !keys.insert(payload.natural_key()) {
                return Err(DatabaseError::constraint_violation(format!(
                    "duplicate link in batch: ({}, {})",
                    payload.location_id, payload.address_component_id
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

    /// Renumber a location's links densely
    ///
    /// `ordered_ids` get `1..=N` in the given order; the location's other links
    /// follow as `N+1..` in their previous order. Every id must belong to the
    /// location and appear once (`InvalidInput` otherwise).
    pub async fn db_reorder_link_sequences(
        &self,
        location_id: &str,
        ordered_ids: &[String],
    ) -> Result<Vec<LocationAddressComponent>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;
        let result = async {
            let location_exists = query_exists(
                &conn,
                "SELECT 1 FROM locations WHERE id = ? AND deleted_at IS NULL",
                [location_id],
            )
            .await?;
            if !location_exists {
                return Err(DatabaseError::row_not_found("Location", location_id));
            }

            let current = links_by_location_tx(&conn, location_id).await?;
            let owned: HashSet<&str> = current.iter().map(|link| link.id.as_str()).collect();

            let mut listed = HashSet::new();
            for id in ordered_ids {
                if !owned.contains(id.as_str()) {
                    return Err(DatabaseError::invalid_input(format!(
                        "link {} does not belong to location {}",
                        id, location_id
                    )));
                }
                if !listed.insert(id.as_str()) {
                    return Err(DatabaseError::invalid_input(format!(
                        "link {} listed more than once",
                        id
                    )));
                }
            }

            let order = ordered_ids.iter().map(String::as_str).chain(
                current
                    .iter()
                    .map(|link| link.id.as_str())
                    .filter(|id| !listed.contains(id)),
            );
            for (position, id) in order.enumerate() {
                conn.execute(
                    &format!(
                        "UPDATE location_address_components SET sequence = ?, updated_at = {}
                         WHERE id = ?",
                        NOW_SQL
                    ),
                    vec![
                        Value::Integer(position as i64 + 1),
                        Value::Text(id.to_string()),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::from_statement("Failed to update sequence", e))?;
            }

            links_by_location_tx(&conn, location_id).await
        }
        .await;
        self.finish(&conn, result).await
    }
}
