//! Address Component Persistence
//!
//! SQL for the `address_components` adjacency list. Ancestors and descendants
//! are resolved per call with recursive CTEs walking `parent_component_id`.
//! Multi-row writes run inside `BEGIN IMMEDIATE` on one connection; the
//! `*_tx` helpers expect to be called inside that transaction.

use crate::db::database::{DatabaseService, NOW_SQL};
use crate::db::error::DatabaseError;
use crate::db::rows::{
    like_contains_pattern, metadata_text, query_all, query_count, query_exists, query_optional,
    row_to_address_component, text_value, ADDRESS_COMPONENT_COLUMNS,
};
use crate::models::{
    AddressComponent, AddressComponentFilter, AddressComponentUpdate, BulkUpsertResult,
    NewAddressComponent,
};
use libsql::{Connection, Value};
use std::collections::HashSet;

const ENTITY: &str = "AddressComponent";

/// Every id below `?1`, as a set
///
/// `UNION` drops rows already produced, so the walk ends even if stored data
/// contains a cycle.
const SUBTREE_CTE: &str = "WITH RECURSIVE subtree(id) AS (
        SELECT id FROM address_components WHERE parent_component_id = ?1
        UNION
        SELECT c.id FROM address_components c JOIN subtree s ON c.parent_component_id = s.id
    )";

/// Upper bound for depth-tracking walks: no acyclic path is longer than the table
async fn depth_bound_tx(conn: &Connection) -> Result<i64, DatabaseError> {
    Ok(query_count(conn, "SELECT COUNT(*) FROM address_components", ()).await? as i64)
}

async fn fetch_tx(conn: &Connection, id: &str) -> Result<Option<AddressComponent>, DatabaseError> {
    query_optional(
        conn,
        &format!(
            "SELECT {} FROM address_components ac WHERE ac.id = ?",
            ADDRESS_COMPONENT_COLUMNS
        ),
        [id],
        row_to_address_component,
    )
    .await
}

async fn require_tx(conn: &Connection, id: &str) -> Result<AddressComponent, DatabaseError> {
    fetch_tx(conn, id)
        .await?
        .ok_or_else(|| DatabaseError::row_not_found(ENTITY, id))
}

async fn fetch_by_key_tx(
    conn: &Connection,
    component_type: &str,
    value: &str,
    parent_component_id: Option<&str>,
) -> Result<Option<AddressComponent>, DatabaseError> {
    // `IS` compares NULL parents as equal, matching the COALESCE unique index
    query_optional(
        conn,
        &format!(
            "SELECT {} FROM address_components ac
             WHERE ac.type = ?1 AND ac.value = ?2 AND ac.parent_component_id IS ?3",
            ADDRESS_COMPONENT_COLUMNS
        ),
        vec![
            Value::Text(component_type.to_string()),
            Value::Text(value.to_string()),
            text_value(parent_component_id),
        ],
        row_to_address_component,
    )
    .await
}

/// Would `new_parent_id` sit inside the subtree rooted at `id`?
async fn creates_cycle_tx(
    conn: &Connection,
    id: &str,
    new_parent_id: &str,
) -> Result<bool, DatabaseError> {
    if id == new_parent_id {
        return Ok(true);
    }
    query_exists(
        conn,
        &format!("{} SELECT 1 FROM subtree WHERE id = ?2 LIMIT 1", SUBTREE_CTE),
        [id, new_parent_id],
    )
    .await
}

async fn insert_tx(
    conn: &Connection,
    payload: &NewAddressComponent,
) -> Result<AddressComponent, DatabaseError> {
    if let Some(parent_id) = payload.parent_component_id.as_deref() {
        require_tx(conn, parent_id).await?;
    }

    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO address_components (id, type, value, parent_component_id, metadata)
         VALUES (?, ?, ?, ?, ?)",
        vec![
            Value::Text(id.clone()),
            Value::Text(payload.component_type.clone()),
            Value::Text(payload.value.clone()),
            text_value(payload.parent_component_id.as_deref()),
            Value::Text(metadata_text(payload.metadata.as_ref())?),
        ],
    )
    .await
    .map_err(|e| DatabaseError::from_statement("Failed to insert address component", e))?;

    require_tx(conn, &id).await
}

/// Insert or update by natural key; returns the row and whether it was inserted
async fn upsert_tx(
    conn: &Connection,
    payload: &NewAddressComponent,
) -> Result<(AddressComponent, bool), DatabaseError> {
    let existing = fetch_by_key_tx(
        conn,
        &payload.component_type,
        &payload.value,
        payload.parent_component_id.as_deref(),
    )
    .await?;

    match existing {
        Some(current) => {
            conn.execute(
                &format!(
                    "UPDATE address_components
                     SET metadata = COALESCE(?1, metadata), updated_at = {}
                     WHERE id = ?2",
                    NOW_SQL
                ),
                vec![
                    match &payload.metadata {
                        Some(metadata) => Value::Text(metadata_text(Some(metadata))?),
                        None => Value::Null,
                    },
                    Value::Text(current.id.clone()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::from_statement("Failed to update address component", e))?;
            Ok((require_tx(conn, &current.id).await?, false))
        }
        None => Ok((insert_tx(conn, payload).await?, true)),
    }
}

async fn update_tx(
    conn: &Connection,
    id: &str,
    update: &AddressComponentUpdate,
) -> Result<AddressComponent, DatabaseError> {
    require_tx(conn, id).await?;

    let mut assignments: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(component_type) = &update.component_type {
        assignments.push("type = ?".to_string());
        params.push(Value::Text(component_type.clone()));
    }
    if let Some(value) = &update.value {
        assignments.push("value = ?".to_string());
        params.push(Value::Text(value.clone()));
    }
    if let Some(parent) = &update.parent_component_id {
        if let Some(parent_id) = parent.as_deref() {
            require_tx(conn, parent_id).await?;
            if creates_cycle_tx(conn, id, parent_id).await? {
                return Err(DatabaseError::cycle_detected(format!(
                    "address component {} cannot be placed under its descendant {}",
                    id, parent_id
                )));
            }
        }
        assignments.push("parent_component_id = ?".to_string());
        params.push(text_value(parent.as_deref()));
    }
    if let Some(metadata) = &update.metadata {
        assignments.push("metadata = ?".to_string());
        params.push(Value::Text(metadata_text(Some(metadata))?));
    }

    assignments.push(format!("updated_at = {}", NOW_SQL));
    params.push(Value::Text(id.to_string()));

    conn.execute(
        &format!(
            "UPDATE address_components SET {} WHERE id = ?",
            assignments.join(", ")
        ),
        params,
    )
    .await
    .map_err(|e| DatabaseError::from_statement("Failed to update address component", e))?;

    require_tx(conn, id).await
}

async fn count_children_tx(conn: &Connection, id: &str) -> Result<u64, DatabaseError> {
    query_count(
        conn,
        "SELECT COUNT(*) FROM address_components WHERE parent_component_id = ?",
        [id],
    )
    .await
}

async fn count_links_tx(conn: &Connection, id: &str) -> Result<u64, DatabaseError> {
    query_count(
        conn,
        "SELECT COUNT(*) FROM location_address_components WHERE address_component_id = ?",
        [id],
    )
    .await
}

impl DatabaseService {
    pub async fn db_get_address_component(
        &self,
        id: &str,
    ) -> Result<Option<AddressComponent>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        fetch_tx(&conn, id).await
    }

    pub async fn db_get_address_component_by_key(
        &self,
        component_type: &str,
        value: &str,
        parent_component_id: Option<&str>,
    ) -> Result<Option<AddressComponent>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        fetch_by_key_tx(&conn, component_type, value, parent_component_id).await
    }

    /// Insert a new component
    ///
    /// Fails with `RowNotFound` for an unknown parent and `ConstraintViolation`
    /// when the natural key already exists.
    pub async fn db_create_address_component(
        &self,
        payload: &NewAddressComponent,
    ) -> Result<AddressComponent, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;
        let result = insert_tx(&conn, payload).await;
        self.finish(&conn, result).await
    }

    pub async fn db_update_address_component(
        &self,
        id: &str,
        update: &AddressComponentUpdate,
    ) -> Result<AddressComponent, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;
        let result = update_tx(&conn, id, update).await;
        self.finish(&conn, result).await
    }

    /// Delete one component
    ///
    /// Returns `false` if the id did not exist. Refuses (`HasDependents`) while
    /// the component has children and (`ConstraintViolation`) while any link
    /// still references it.
    pub async fn db_delete_address_component(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;
        let result = async {
            if fetch_tx(&conn, id).await?.is_none() {
                return Ok(false);
            }
            let children = count_children_tx(&conn, id).await?;
            if children > 0 {
                return Err(DatabaseError::has_dependents(format!(
                    "address component {} has {} child component(s)",
                    id, children
                )));
            }
            let links = count_links_tx(&conn, id).await?;
            if links > 0 {
                return Err(DatabaseError::constraint_violation(format!(
                    "address component {} is referenced by {} location link(s)",
                    id, links
                )));
            }
            conn.execute("DELETE FROM address_components WHERE id = ?", [id])
                .await
                .map_err(|e| {
                    DatabaseError::from_statement("Failed to delete address component", e)
                })?;
            Ok::<_, DatabaseError>(true)
        }
        .await;
        self.finish(&conn, result).await
    }

    /// Delete many components in one transaction
    ///
    /// Components are removed leaves-first, so a parent and its children may
    /// be deleted together. Any remaining child outside the batch, or any link
    /// to a listed component, aborts the whole batch. Unknown ids are skipped.
    pub async fn db_bulk_delete_address_components(
        &self,
        ids: &[String],
    ) -> Result<u64, DatabaseError> {
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

            for id in &pending {
                let links = count_links_tx(&conn, id).await?;
                if links > 0 {
                    return Err(DatabaseError::constraint_violation(format!(
                        "address component {} is referenced by {} location link(s)",
                        id, links
                    )));
                }
            }

            let mut deleted = 0u64;
            loop {
                let mut remaining = Vec::new();
                for id in pending.iter().copied() {
                    let affected = conn
                        .execute(
                            "DELETE FROM address_components WHERE id = ?1
                             AND NOT EXISTS (
                                SELECT 1 FROM address_components c WHERE c.parent_component_id = ?1
                             )",
                            [id],
                        )
                        .await
                        .map_err(|e| {
                            DatabaseError::from_statement("Failed to delete address component", e)
                        })?;
                    if affected > 0 {
                        deleted += affected;
                    } else {
                        remaining.push(id);
                    }
                }
                if remaining.is_empty() {
                    break;
                }
                if remaining.len() == pending.len() {
                    return Err(DatabaseError::has_dependents(format!(
                        "address component(s) {} still have children outside the batch",
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

    /// Components whose type is any of `types`, ordered by type then value
    pub async fn db_list_address_components_by_types(
        &self,
        types: &[String],
    ) -> Result<Vec<AddressComponent>, DatabaseError> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.connect_with_timeout().await?;
        let placeholders = vec!["?"; types.len()].join(", ");
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM address_components ac WHERE ac.type IN ({})
                 ORDER BY ac.type, ac.value, ac.id",
                ADDRESS_COMPONENT_COLUMNS, placeholders
            ),
            types
                .iter()
                .map(|t| Value::Text(t.clone()))
                .collect::<Vec<_>>(),
            row_to_address_component,
        )
        .await
    }

    /// Direct children of `parent_id`, or root components for `None`
    pub async fn db_get_address_component_children(
        &self,
        parent_id: Option<&str>,
    ) -> Result<Vec<AddressComponent>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM address_components ac WHERE ac.parent_component_id IS ?
                 ORDER BY ac.value, ac.id",
                ADDRESS_COMPONENT_COLUMNS
            ),
            vec![text_value(parent_id)],
            row_to_address_component,
        )
        .await
    }

    /// Ancestors of `id`, root first, excluding `id` itself
    pub async fn db_get_address_component_ancestors(
        &self,
        id: &str,
    ) -> Result<Vec<AddressComponent>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        let bound = depth_bound_tx(&conn).await?;
        query_all(
            &conn,
            &format!(
                "WITH RECURSIVE chain(id, parent_id, depth) AS (
                    SELECT id, parent_component_id, 0 FROM address_components WHERE id = ?1
                    UNION
                    SELECT a.id, a.parent_component_id, c.depth + 1
                    FROM address_components a JOIN chain c ON a.id = c.parent_id
                    WHERE c.depth < ?2
                )
                SELECT {} FROM chain c JOIN address_components ac ON ac.id = c.id
                WHERE ac.id != ?1
                GROUP BY ac.id
                ORDER BY MIN(c.depth) DESC",
                ADDRESS_COMPONENT_COLUMNS
            ),
            vec![Value::Text(id.to_string()), Value::Integer(bound)],
            row_to_address_component,
        )
        .await
    }

    /// Descendants of `id`, breadth-first (depth, then value), excluding `id`
    pub async fn db_get_address_component_descendants(
        &self,
        id: &str,
    ) -> Result<Vec<AddressComponent>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        let bound = depth_bound_tx(&conn).await?;
        query_all(
            &conn,
            &format!(
                "WITH RECURSIVE levels(id, depth) AS (
                    SELECT id, 1 FROM address_components WHERE parent_component_id = ?1
                    UNION
                    SELECT c.id, l.depth + 1
                    FROM address_components c JOIN levels l ON c.parent_component_id = l.id
                    WHERE l.depth < ?2
                )
                SELECT {} FROM levels l JOIN address_components ac ON ac.id = l.id
                WHERE ac.id != ?1
                GROUP BY ac.id
                ORDER BY MIN(l.depth), ac.value, ac.id",
                ADDRESS_COMPONENT_COLUMNS
            ),
            vec![Value::Text(id.to_string()), Value::Integer(bound)],
            row_to_address_component,
        )
        .await
    }

    /// Re-parent a component, refusing moves under its own subtree
    pub async fn db_move_address_component(
        &self,
        id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<AddressComponent, DatabaseError> {
        let update = AddressComponentUpdate {
            parent_component_id: Some(new_parent_id.map(str::to_string)),
            ..Default::default()
        };
        self.db_update_address_component(id, &update).await
    }

    /// Insert or update by `(type, value, parent)`; `true` when inserted
    pub async fn db_upsert_address_component(
        &self,
        payload: &NewAddressComponent,
    ) -> Result<(AddressComponent, bool), DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.begin_immediate(&conn).await?;
        let result = upsert_tx(&conn, payload).await;
        self.finish(&conn, result).await
    }

    /// Upsert a batch atomically
    ///
    /// A natural key appearing twice in the batch is rejected before any write.
    pub async fn db_bulk_upsert_address_components(
        &self,
        payloads: &[NewAddressComponent],
    ) -> Result<BulkUpsertResult, DatabaseError> {
        let mut keys = HashSet::new();
        for payload in payloads {
            if !keys.insert(payload.natural_key()) {
                return Err(DatabaseError::constraint_violation(format!(
                    "duplicate natural key in batch: ({}, {}, {})",
                    payload.component_type,
                    payload.value,
                    payload.parent_component_id.as_deref().unwrap_or("null")
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

    /// Filtered page plus the total match count
    pub async fn db_search_address_components(
        &self,
        filter: &AddressComponentFilter,
    ) -> Result<(Vec<AddressComponent>, u64), DatabaseError> {
        let page = filter.page.normalized();
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if let Some(search) = filter.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                conditions.push("LOWER(ac.value) LIKE ? ESCAPE '\\'".to_string());
                params.push(Value::Text(like_contains_pattern(search)));
            }
        }
        if !filter.types.is_empty() {
            conditions.push(format!(
                "ac.type IN ({})",
                vec!["?"; filter.types.len()].join(", ")
            ));
            params.extend(filter.types.iter().map(|t| Value::Text(t.clone())));
        }
        match &filter.parent_component_id {
            Some(Some(parent_id)) => {
                conditions.push("ac.parent_component_id = ?".to_string());
                params.push(Value::Text(parent_id.clone()));
            }
            Some(None) => conditions.push("ac.parent_component_id IS NULL".to_string()),
            None => {}
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let conn = self.connect_with_timeout().await?;
        let total = query_count(
            &conn,
            &format!(
                "SELECT COUNT(*) FROM address_components ac {}",
                where_clause
            ),
            params.clone(),
        )
        .await?;

        params.push(Value::Integer(i64::from(page.limit)));
        params.push(Value::Integer(page.offset() as i64));
        let data = query_all(
            &conn,
            &format!(
                "SELECT {} FROM address_components ac {}
                 ORDER BY ac.type, ac.value, ac.id LIMIT ? OFFSET ?",
                ADDRESS_COMPONENT_COLUMNS, where_clause
            ),
            params,
            row_to_address_component,
        )
        .await?;

        Ok((data, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewLocation, NewLocationAddressComponent};
    use tempfile::TempDir;

    async fn create_test_db() -> (DatabaseService, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        (db, temp_dir)
    }

    #[tokio::test]
    async fn test_natural_key_lookup_distinguishes_null_parent() {
        let (db, _temp) = create_test_db().await;
        let county = db
            .db_create_address_component(&NewAddressComponent::new("county", "Nairobi"))
            .await
            .unwrap();
        let nested = db
            .db_create_address_component(
                &NewAddressComponent::new("county", "Nairobi").with_parent(&county.id),
            )
            .await
            .unwrap();

        let root_hit = db
            .db_get_address_component_by_key("county", "Nairobi", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(root_hit.id, county.id);

        let nested_hit = db
            .db_get_address_component_by_key("county", "Nairobi", Some(&county.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(nested_hit.id, nested.id);
    }

    #[tokio::test]
    async fn test_create_duplicate_key_is_constraint_violation() {
        let (db, _temp) = create_test_db().await;
        let payload = NewAddressComponent::new("county", "Nairobi");
        db.db_create_address_component(&payload).await.unwrap();
        let err = db.db_create_address_component(&payload).await.unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation { .. }));
    }

    #[tokio::test]
    async fn test_create_with_unknown_parent() {
        let (db, _temp) = create_test_db().await;
        let err = db
            .db_create_address_component(
                &NewAddressComponent::new("estate", "Kilimani").with_parent("missing"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::RowNotFound { .. }));
    }

    #[tokio::test]
    async fn test_recursive_walks() {
        let (db, _temp) = create_test_db().await;
        let county = db
            .db_create_address_component(&NewAddressComponent::new("county", "Nairobi"))
            .await
            .unwrap();
        let estate = db
            .db_create_address_component(
                &NewAddressComponent::new("estate", "Kilimani").with_parent(&county.id),
            )
            .await
            .unwrap();
        let street = db
            .db_create_address_component(
                &NewAddressComponent::new("street", "Argwings Kodhek").with_parent(&estate.id),
            )
            .await
            .unwrap();

        let ancestors = db
            .db_get_address_component_ancestors(&street.id)
            .await
            .unwrap();
        let ids: Vec<&str> = ancestors.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![county.id.as_str(), estate.id.as_str()]);

        let descendants = db
            .db_get_address_component_descendants(&county.id)
            .await
            .unwrap();
        let ids: Vec<&str> = descendants.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![estate.id.as_str(), street.id.as_str()]);
    }

    #[tokio::test]
    async fn test_move_under_descendant_is_cycle() {
        let (db, _temp) = create_test_db().await;
        let county = db
            .db_create_address_component(&NewAddressComponent::new("county", "Nairobi"))
            .await
            .unwrap();
        let estate = db
            .db_create_address_component(
                &NewAddressComponent::new("estate", "Kilimani").with_parent(&county.id),
            )
            .await
            .unwrap();

        let err = db
            .db_move_address_component(&county.id, Some(&estate.id))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::CycleDetected { .. }));

        let err = db
            .db_move_address_component(&county.id, Some(&county.id))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::CycleDetected { .. }));
    }

    #[tokio::test]
    async fn test_walks_and_cycle_check_ignore_depth() {
        let (db, _temp) = create_test_db().await;
        let mut chain: Vec<AddressComponent> = Vec::new();
        for i in 0..71 {
            let mut payload = NewAddressComponent::new("level", format!("n{}", i));
            if let Some(parent) = chain.last() {
                payload = payload.with_parent(&parent.id);
            }
            chain.push(db.db_create_address_component(&payload).await.unwrap());
        }
        let root = &chain[0];
        let leaf = &chain[70];

        let descendants = db
            .db_get_address_component_descendants(&root.id)
            .await
            .unwrap();
        assert_eq!(descendants.len(), 70);
        assert_eq!(descendants[69].id, leaf.id);

        let ancestors = db
            .db_get_address_component_ancestors(&leaf.id)
            .await
            .unwrap();
        assert_eq!(ancestors.len(), 70);
        assert_eq!(ancestors[0].id, root.id);

        let err = db
            .db_move_address_component(&root.id, Some(&leaf.id))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::CycleDetected { .. }));
        assert!(db
            .db_get_address_component(&root.id)
            .await
            .unwrap()
            .unwrap()
            .parent_component_id
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_refuses_children_and_links() {
        let (db, _temp) = create_test_db().await;
        let county = db
            .db_create_address_component(&NewAddressComponent::new("county", "Nairobi"))
            .await
            .unwrap();
        let estate = db
            .db_create_address_component(
                &NewAddressComponent::new("estate", "Kilimani").with_parent(&county.id),
            )
            .await
            .unwrap();

        let err = db.db_delete_address_component(&county.id).await.unwrap_err();
        assert!(matches!(err, DatabaseError::HasDependents { .. }));

        let location = db
            .db_create_location(&NewLocation::new("Kilimani Area", "Nairobi"))
            .await
            .unwrap();
        db.db_create_link(&NewLocationAddressComponent::new(&location.id, &estate.id))
            .await
            .unwrap();
        let err = db.db_delete_address_component(&estate.id).await.unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation { .. }));

        assert!(!db.db_delete_address_component("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_bulk_delete_removes_subtree_leaves_first() {
        let (db, _temp) = create_test_db().await;
        let county = db
            .db_create_address_component(&NewAddressComponent::new("county", "Nairobi"))
            .await
            .unwrap();
        let estate = db
            .db_create_address_component(
                &NewAddressComponent::new("estate", "Kilimani").with_parent(&county.id),
            )
            .await
            .unwrap();

        let deleted = db
            .db_bulk_delete_address_components(&[county.id.clone(), estate.id.clone()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(db.db_count_rows("address_components").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bulk_delete_is_all_or_nothing() {
        let (db, _temp) = create_test_db().await;
        let county = db
            .db_create_address_component(&NewAddressComponent::new("county", "Nairobi"))
            .await
            .unwrap();
        db.db_create_address_component(
            &NewAddressComponent::new("estate", "Kilimani").with_parent(&county.id),
        )
        .await
        .unwrap();
        let other = db
            .db_create_address_component(&NewAddressComponent::new("county", "Mombasa"))
            .await
            .unwrap();

        let err = db
            .db_bulk_delete_address_components(&[other.id.clone(), county.id.clone()])
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::HasDependents { .. }));
        assert_eq!(db.db_count_rows("address_components").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_search_filters_and_counts() {
        let (db, _temp) = create_test_db().await;
        let county = db
            .db_create_address_component(&NewAddressComponent::new("county", "Nairobi"))
            .await
            .unwrap();
        for estate in ["Kilimani", "Kileleshwa", "Lavington"] {
            db.db_create_address_component(
                &NewAddressComponent::new("estate", estate).with_parent(&county.id),
            )
            .await
            .unwrap();
        }

        let filter = AddressComponentFilter {
            search: Some("KIL".to_string()),
            types: vec!["estate".to_string()],
            ..Default::default()
        };
        let (data, total) = db.db_search_address_components(&filter).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(data.len(), 2);

        let roots = AddressComponentFilter {
            parent_component_id: Some(None),
            ..Default::default()
        };
        let (data, total) = db.db_search_address_components(&roots).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(data[0].id, county.id);

        // LIKE wildcards in the search text match literally
        db.db_create_address_component(&NewAddressComponent::new("estate", "100% Estate"))
            .await
            .unwrap();
        let literal = AddressComponentFilter {
            search: Some("%".to_string()),
            ..Default::default()
        };
        let (data, total) = db.db_search_address_components(&literal).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(data[0].value, "100% Estate");
        let underscore = AddressComponentFilter {
            search: Some("_".to_string()),
            ..Default::default()
        };
        assert_eq!(
            db.db_search_address_components(&underscore).await.unwrap().1,
            0
        );
    }
}
