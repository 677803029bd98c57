// src/db/entities.rs
// Database operations for indexed code entities and the keyword index

use rusqlite::{Connection, params, params_from_iter};

/// Full code-entity record as deposited by the indexing collaborator.
#[derive(Debug, Clone)]
pub struct CodeEntityRow {
    pub id: String,
    pub file_path: String,
    pub name: Option<String>,
    pub entity_type: String,
    pub language: Option<String>,
    pub raw_content: Option<String>,
    pub summary: Option<String>,
    pub ai_status: String,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
    pub custom_metadata: Option<String>,
    pub updated_at: String,
}

fn entity_from_row(row: &rusqlite::Row) -> rusqlite::Result<CodeEntityRow> {
    Ok(CodeEntityRow {
        id: row.get(0)?,
        file_path: row.get(1)?,
        name: row.get(2)?,
        entity_type: row.get(3)?,
        language: row.get(4)?,
        raw_content: row.get(5)?,
        summary: row.get(6)?,
        ai_status: row.get(7)?,
        start_line: row.get(8)?,
        end_line: row.get(9)?,
        custom_metadata: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

const ENTITY_COLUMNS: &str = "id, file_path, name, entity_type, language, raw_content, \
     summary, ai_status, start_line, end_line, custom_metadata, updated_at";

/// A full-text hit: entity id plus the engine's highlighted excerpt.
/// Results come back in rank order (best first).
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub id: String,
    pub highlight: Option<String>,
}

/// Full-text search over code entities. `match_expr` must already be a
/// valid FTS5 expression (see retrieval::tokenize).
pub fn entity_fts_search_sync(
    conn: &Connection,
    match_expr: &str,
    limit: usize,
) -> rusqlite::Result<Vec<FtsHit>> {
    let mut stmt = conn.prepare_cached(
        "SELECT e.id, snippet(code_entities_fts, -1, '', '', '…', 16)
         FROM code_entities_fts f
         JOIN code_entities e ON e.rowid = f.rowid
         WHERE code_entities_fts MATCH ?1
         ORDER BY rank
         LIMIT ?2",
    )?;
    let hits = stmt
        .query_map(params![match_expr, limit as i64], |row| {
            Ok(FtsHit {
                id: row.get(0)?,
                highlight: row.get::<_, Option<String>>(1)?.filter(|s| !s.is_empty()),
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(hits)
}

/// Hydrate full entity records for a set of ids. Order is unspecified;
/// callers index the result by id.
pub fn get_entities_by_ids_sync(
    conn: &Connection,
    ids: &[String],
) -> rusqlite::Result<Vec<CodeEntityRow>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM code_entities WHERE id IN ({placeholders})");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(ids.iter()), entity_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Aggregated keyword-index hit for one entity id. The id may refer to a
/// code entity or a project document; resolution happens at hydration.
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub entity_id: String,
    pub total_weight: f64,
    pub match_count: i64,
}

/// Keyword-index search: exact keyword matches aggregated per entity,
/// heaviest first.
pub fn keyword_search_sync(
    conn: &Connection,
    terms: &[String],
    limit: usize,
) -> rusqlite::Result<Vec<KeywordHit>> {
    if terms.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; terms.len()].join(",");
    let sql = format!(
        "SELECT entity_id, SUM(weight) AS total_weight, COUNT(*) AS match_count
         FROM entity_keywords
         WHERE keyword IN ({placeholders})
         GROUP BY entity_id
         ORDER BY total_weight DESC
         LIMIT {limit}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let hits = stmt
        .query_map(params_from_iter(terms.iter()), |row| {
            Ok(KeywordHit {
                entity_id: row.get(0)?,
                total_weight: row.get(1)?,
                match_count: row.get(2)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(hits)
}

/// Store enrichment output: summary, refreshed keywords, status completed.
pub fn set_entity_enrichment_sync(
    conn: &Connection,
    entity_id: &str,
    summary: &str,
    keywords: &[(String, f64)],
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE code_entities
         SET summary = ?2, ai_status = 'completed', updated_at = datetime('now')
         WHERE id = ?1",
        params![entity_id, summary],
    )?;
    conn.execute(
        "DELETE FROM entity_keywords WHERE entity_id = ?1",
        params![entity_id],
    )?;
    for (keyword, weight) in keywords {
        conn.execute(
            "INSERT OR REPLACE INTO entity_keywords (entity_id, keyword, weight)
             VALUES (?1, ?2, ?3)",
            params![entity_id, keyword.to_lowercase(), weight],
        )?;
    }
    Ok(())
}

/// Mirror a job status onto the target entity (rate_limited, failed_ai).
pub fn set_entity_ai_status_sync(
    conn: &Connection,
    entity_id: &str,
    ai_status: &str,
    error: Option<&str>,
) -> rusqlite::Result<()> {
    match error {
        Some(err) => conn.execute(
            "UPDATE code_entities
             SET ai_status = ?2,
                 custom_metadata = json_set(COALESCE(custom_metadata, '{}'), '$.lastError', ?3),
                 updated_at = datetime('now')
             WHERE id = ?1",
            params![entity_id, ai_status, err],
        )?,
        None => conn.execute(
            "UPDATE code_entities
             SET ai_status = ?2, updated_at = datetime('now')
             WHERE id = ?1",
            params![entity_id, ai_status],
        )?,
    };
    Ok(())
}

/// (entity_count, language_list) for the project structure summary.
pub fn entity_stats_sync(conn: &Connection) -> rusqlite::Result<(i64, Vec<(String, i64)>)> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM code_entities", [], |row| row.get(0))?;
    let mut stmt = conn.prepare(
        "SELECT language, COUNT(*) AS n FROM code_entities
         WHERE language IS NOT NULL
         GROUP BY language ORDER BY n DESC",
    )?;
    let langs = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();
    Ok((total, langs))
}

/// Distinct top-level path segments, most populated first. Feeds the
/// project structure summary.
pub fn top_level_paths_sync(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT CASE WHEN instr(file_path, '/') > 0
                     THEN substr(file_path, 1, instr(file_path, '/') - 1)
                     ELSE file_path END AS top, COUNT(*) AS n
         FROM code_entities
         GROUP BY top ORDER BY n DESC LIMIT ?1",
    )?;
    let paths = stmt
        .query_map([limit as i64], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(paths)
}
