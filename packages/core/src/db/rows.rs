//! Row Conversion
//!
//! Column lists and `libsql::Row` → model conversions shared by every store.
//! Queries select one of the `*_COLUMNS` lists (optionally followed by extra
//! columns) so the converters can read by position.

use crate::db::error::DatabaseError;
use crate::models::{
    AddressComponent, GeoPoint, GeoPolygon, LinkedAddressComponent, Location,
    LocationAddressComponent,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::params::IntoParams;
use libsql::{Connection, Row, Value};
use serde_json::Value as JsonValue;

/// `address_components` columns, aliased `ac`
pub(crate) const ADDRESS_COMPONENT_COLUMNS: &str =
    "ac.id, ac.type, ac.value, ac.parent_component_id, ac.metadata, ac.created_at, ac.updated_at";

/// `locations` columns, aliased `l`
pub(crate) const LOCATION_COLUMNS: &str = "l.id, l.local_area_name, l.county, l.town, l.street, \
     l.coverage_details, l.parent_id, l.center_point, l.geofence, l.metadata, l.created_at, l.updated_at";

/// `location_address_components` columns, aliased `lac`
pub(crate) const LINK_COLUMNS: &str = "lac.id, lac.location_id, lac.address_component_id, lac.label, \
     lac.sequence, lac.is_primary, lac.center_point, lac.metadata, lac.created_at, lac.updated_at";
pub(crate) const LINK_COLUMN_COUNT: i32 = 10;

/// Parse timestamp from database - handles both SQLite and RFC3339 formats
///
/// Rows written by this crate use `strftime('%Y-%m-%dT%H:%M:%fZ')` (RFC3339);
/// rows written with `CURRENT_TIMESTAMP` use "YYYY-MM-DD HH:MM:SS".
pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }

    Err(DatabaseError::row_decode(format!(
        "Unable to parse timestamp '{}' as RFC3339 or SQLite format",
        s
    )))
}

fn value_column(row: &Row, idx: i32, name: &str) -> Result<Value, DatabaseError> {
    row.get_value(idx)
        .map_err(|e| DatabaseError::row_decode(format!("Failed to get {}: {}", name, e)))
}

fn optional_text_column(row: &Row, idx: i32, name: &str) -> Result<Option<String>, DatabaseError> {
    match value_column(row, idx, name)? {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(text)),
        Value::Integer(i) => Ok(Some(i.to_string())),
        Value::Real(f) => Ok(Some(f.to_string())),
        Value::Blob(_) => Err(DatabaseError::row_decode(format!(
            "Column {} holds a blob, expected text",
            name
        ))),
    }
}

fn text_column(row: &Row, idx: i32, name: &str) -> Result<String, DatabaseError> {
    optional_text_column(row, idx, name)?
        .ok_or_else(|| DatabaseError::row_decode(format!("Column {} is NULL", name)))
}

fn optional_integer_column(row: &Row, idx: i32, name: &str) -> Result<Option<i64>, DatabaseError> {
    match value_column(row, idx, name)? {
        Value::Null => Ok(None),
        Value::Integer(i) => Ok(Some(i)),
        Value::Real(f) => Ok(Some(f as i64)),
        other => Err(DatabaseError::row_decode(format!(
            "Column {} holds {:?}, expected integer",
            name, other
        ))),
    }
}

fn timestamp_column(row: &Row, idx: i32, name: &str) -> Result<DateTime<Utc>, DatabaseError> {
    let raw = text_column(row, idx, name)?;
    parse_timestamp(&raw)
}

fn metadata_column(row: &Row, idx: i32) -> Result<JsonValue, DatabaseError> {
    let raw = optional_text_column(row, idx, "metadata")?;
    match raw {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| DatabaseError::row_decode(format!("Failed to parse metadata JSON: {}", e))),
        None => Ok(JsonValue::Object(Default::default())),
    }
}

fn point_column(row: &Row, idx: i32, name: &str) -> Result<Option<GeoPoint>, DatabaseError> {
    let raw = optional_text_column(row, idx, name)?;
    raw.map(|raw| {
        GeoPoint::from_json_str(&raw)
            .map_err(|e| DatabaseError::row_decode(format!("Failed to parse {}: {}", name, e)))
    })
    .transpose()
}

fn polygon_column(row: &Row, idx: i32, name: &str) -> Result<Option<GeoPolygon>, DatabaseError> {
    let raw = optional_text_column(row, idx, name)?;
    raw.map(|raw| {
        GeoPolygon::from_json_str(&raw)
            .map_err(|e| DatabaseError::row_decode(format!("Failed to parse {}: {}", name, e)))
    })
    .transpose()
}

/// Convert a row selected with [`ADDRESS_COMPONENT_COLUMNS`] starting at `offset`
pub(crate) fn row_to_address_component_at(
    row: &Row,
    offset: i32,
) -> Result<AddressComponent, DatabaseError> {
    Ok(AddressComponent {
        id: text_column(row, offset, "id")?,
        component_type: text_column(row, offset + 1, "type")?,
        value: text_column(row, offset + 2, "value")?,
        parent_component_id: optional_text_column(row, offset + 3, "parent_component_id")?,
        metadata: metadata_column(row, offset + 4)?,
        created_at: timestamp_column(row, offset + 5, "created_at")?,
        updated_at: timestamp_column(row, offset + 6, "updated_at")?,
    })
}

pub(crate) fn row_to_address_component(row: &Row) -> Result<AddressComponent, DatabaseError> {
    row_to_address_component_at(row, 0)
}

/// Convert a row selected with [`LOCATION_COLUMNS`]
pub(crate) fn row_to_location(row: &Row) -> Result<Location, DatabaseError> {
    Ok(Location {
        id: text_column(row, 0, "id")?,
        local_area_name: text_column(row, 1, "local_area_name")?,
        county: text_column(row, 2, "county")?,
        town: optional_text_column(row, 3, "town")?,
        street: optional_text_column(row, 4, "street")?,
        coverage_details: optional_text_column(row, 5, "coverage_details")?,
        parent_id: optional_text_column(row, 6, "parent_id")?,
        center_point: point_column(row, 7, "center_point")?,
        geofence: polygon_column(row, 8, "geofence")?,
        metadata: metadata_column(row, 9)?,
        created_at: timestamp_column(row, 10, "created_at")?,
        updated_at: timestamp_column(row, 11, "updated_at")?,
    })
}

/// Convert a row selected with [`LINK_COLUMNS`]
pub(crate) fn row_to_link(row: &Row) -> Result<LocationAddressComponent, DatabaseError> {
    let is_primary = optional_integer_column(row, 5, "is_primary")?.unwrap_or(0);
    Ok(LocationAddressComponent {
        id: text_column(row, 0, "id")?,
        location_id: text_column(row, 1, "location_id")?,
        address_component_id: text_column(row, 2, "address_component_id")?,
        label: optional_text_column(row, 3, "label")?,
        sequence: optional_integer_column(row, 4, "sequence")?,
        is_primary: is_primary != 0,
        center_point: point_column(row, 6, "center_point")?,
        metadata: metadata_column(row, 7)?,
        created_at: timestamp_column(row, 8, "created_at")?,
        updated_at: timestamp_column(row, 9, "updated_at")?,
    })
}

/// Convert a row selected with `LINK_COLUMNS, ADDRESS_COMPONENT_COLUMNS`
pub(crate) fn row_to_linked_component(row: &Row) -> Result<LinkedAddressComponent, DatabaseError> {
    Ok(LinkedAddressComponent {
        link: row_to_link(row)?,
        component: row_to_address_component_at(row, LINK_COLUMN_COUNT)?,
    })
}

/// Run a query and convert every row
pub(crate) async fn query_all<T>(
    conn: &Connection,
    sql: &str,
    params: impl IntoParams,
    convert: fn(&Row) -> Result<T, DatabaseError>,
) -> Result<Vec<T>, DatabaseError> {
    let mut rows = conn
        .query(sql, params)
        .await
        .map_err(|e| DatabaseError::from_statement("Query failed", e))?;

    let mut items = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to read row: {}", e)))?
    {
        items.push(convert(&row)?);
    }
    Ok(items)
}

/// Run a query and convert the first row, if any
pub(crate) async fn query_optional<T>(
    conn: &Connection,
    sql: &str,
    params: impl IntoParams,
    convert: fn(&Row) -> Result<T, DatabaseError>,
) -> Result<Option<T>, DatabaseError> {
    let mut rows = conn
        .query(sql, params)
        .await
        .map_err(|e| DatabaseError::from_statement("Query failed", e))?;

    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to read row: {}", e)))?
    {
        Some(row) => Ok(Some(convert(&row)?)),
        None => Ok(None),
    }
}

/// Run a `SELECT COUNT(*)`-shaped query
pub(crate) async fn query_count(
    conn: &Connection,
    sql: &str,
    params: impl IntoParams,
) -> Result<u64, DatabaseError> {
    let count = query_optional(conn, sql, params, |row| {
        optional_integer_column(row, 0, "count")
    })
    .await?;
    Ok(count.flatten().unwrap_or(0).max(0) as u64)
}

/// Run an existence check (`SELECT 1 ... LIMIT 1`)
pub(crate) async fn query_exists(
    conn: &Connection,
    sql: &str,
    params: impl IntoParams,
) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(sql, params)
        .await
        .map_err(|e| DatabaseError::from_statement("Query failed", e))?;
    let first = rows
        .next()
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to read row: {}", e)))?;
    Ok(first.is_some())
}

pub(crate) fn text_value(value: Option<&str>) -> Value {
    match value {
        Some(text) => Value::Text(text.to_string()),
        None => Value::Null,
    }
}

/// Lowercased `%term%` pattern with LIKE wildcards escaped; pair with `ESCAPE '\'`
pub(crate) fn like_contains_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.to_lowercase().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

pub(crate) fn metadata_text(metadata: Option<&JsonValue>) -> Result<String, DatabaseError> {
    match metadata {
        Some(value) => serde_json::to_string(value)
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to serialize metadata: {}", e))),
        None => Ok("{}".to_string()),
    }
}

/// GeoJSON text plus the derived `(lng, lat)` index columns for a point
pub(crate) fn point_values(point: Option<&GeoPoint>) -> Result<[Value; 3], DatabaseError> {
    match point {
        Some(point) => {
            let json = point
                .to_json_string()
                .map_err(|e| DatabaseError::sql_execution(e.to_string()))?;
            Ok([
                Value::Text(json),
                Value::Real(point.lng()),
                Value::Real(point.lat()),
            ])
        }
        None => Ok([Value::Null, Value::Null, Value::Null]),
    }
}

/// GeoJSON text plus the derived bounding-box index columns for a polygon
pub(crate) fn polygon_values(polygon: Option<&GeoPolygon>) -> Result<[Value; 5], DatabaseError> {
    match polygon {
        Some(polygon) => {
            let json = polygon
                .to_json_string()
                .map_err(|e| DatabaseError::sql_execution(e.to_string()))?;
            let bbox = polygon.bbox().ok_or_else(|| {
                DatabaseError::sql_execution("Geofence has no positions".to_string())
            })?;
            Ok([
                Value::Text(json),
                Value::Real(bbox.min_lng),
                Value::Real(bbox.min_lat),
                Value::Real(bbox.max_lng),
                Value::Real(bbox.max_lat),
            ])
        }
        None => Ok([Value::Null, Value::Null, Value::Null, Value::Null, Value::Null]),
    }
}
