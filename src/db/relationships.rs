// src/db/relationships.rs
// Database operations for code relationships (one-hop graph queries)

use rusqlite::{Connection, params, params_from_iter};

/// A directed relationship between two code entities.
#[derive(Debug, Clone)]
pub struct RelationshipRow {
    pub id: i64,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relationship_type: String,
    pub custom_metadata: Option<String>,
}

fn relationship_from_row(row: &rusqlite::Row) -> rusqlite::Result<RelationshipRow> {
    Ok(RelationshipRow {
        id: row.get(0)?,
        source_entity_id: row.get(1)?,
        target_entity_id: row.get(2)?,
        relationship_type: row.get(3)?,
        custom_metadata: row.get(4)?,
    })
}

/// One-hop relationships where the entity is source or target, optionally
/// restricted to a relationship-type whitelist.
pub fn relationships_for_entity_sync(
    conn: &Connection,
    entity_id: &str,
    type_filter: &[String],
) -> rusqlite::Result<Vec<RelationshipRow>> {
    if type_filter.is_empty() {
        let mut stmt = conn.prepare_cached(
            "SELECT id, source_entity_id, target_entity_id, relationship_type, custom_metadata
             FROM code_relationships
             WHERE source_entity_id = ?1 OR target_entity_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![entity_id], relationship_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        return Ok(rows);
    }

    let placeholders = vec!["?"; type_filter.len()].join(",");
    let sql = format!(
        "SELECT id, source_entity_id, target_entity_id, relationship_type, custom_metadata
         FROM code_relationships
         WHERE (source_entity_id = ?1 OR target_entity_id = ?1)
           AND relationship_type IN ({placeholders})"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut bind: Vec<&str> = vec![entity_id];
    bind.extend(type_filter.iter().map(|s| s.as_str()));
    let rows = stmt
        .query_map(params_from_iter(bind), relationship_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Insert a relationship (used by tests and ingestion helpers).
pub fn insert_relationship_sync(
    conn: &Connection,
    source_entity_id: &str,
    target_entity_id: &str,
    relationship_type: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO code_relationships
            (source_entity_id, target_entity_id, relationship_type)
         VALUES (?1, ?2, ?3)",
        params![source_entity_id, target_entity_id, relationship_type],
    )?;
    Ok(())
}
