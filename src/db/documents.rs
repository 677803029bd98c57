// src/db/documents.rs
// Database operations for project documents

use super::entities::FtsHit;
use rusqlite::{Connection, params, params_from_iter};

/// Full project-document record.
#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: String,
    pub file_path: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub ai_status: String,
    pub purpose_tag: Option<String>,
    pub keywords: Option<String>,
    pub updated_at: String,
}

fn document_from_row(row: &rusqlite::Row) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        id: row.get(0)?,
        file_path: row.get(1)?,
        content: row.get(2)?,
        summary: row.get(3)?,
        ai_status: row.get(4)?,
        purpose_tag: row.get(5)?,
        keywords: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const DOCUMENT_COLUMNS: &str =
    "id, file_path, content, summary, ai_status, purpose_tag, keywords, updated_at";

/// Full-text search over project documents, rank order.
pub fn document_fts_search_sync(
    conn: &Connection,
    match_expr: &str,
    limit: usize,
) -> rusqlite::Result<Vec<FtsHit>> {
    let mut stmt = conn.prepare_cached(
        "SELECT d.id, snippet(project_documents_fts, -1, '', '', '…', 16)
         FROM project_documents_fts f
         JOIN project_documents d ON d.rowid = f.rowid
         WHERE project_documents_fts MATCH ?1
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

/// Hydrate full document records for a set of ids.
pub fn get_documents_by_ids_sync(
    conn: &Connection,
    ids: &[String],
) -> rusqlite::Result<Vec<DocumentRow>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql =
        format!("SELECT {DOCUMENT_COLUMNS} FROM project_documents WHERE id IN ({placeholders})");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(ids.iter()), document_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Store enrichment output on a document.
pub fn set_document_enrichment_sync(
    conn: &Connection,
    document_id: &str,
    summary: &str,
    keywords: &[String],
) -> rusqlite::Result<()> {
    let keywords_json = serde_json::to_string(keywords).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "UPDATE project_documents
         SET summary = ?2, keywords = ?3, ai_status = 'completed', updated_at = datetime('now')
         WHERE id = ?1",
        params![document_id, summary, keywords_json],
    )?;
    Ok(())
}

/// Mirror a job status onto the target document.
pub fn set_document_ai_status_sync(
    conn: &Connection,
    document_id: &str,
    ai_status: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE project_documents
         SET ai_status = ?2, updated_at = datetime('now')
         WHERE id = ?1",
        params![document_id, ai_status],
    )?;
    Ok(())
}

/// Most recent completed summaries, optionally restricted to a purpose tag.
/// Feeds the architecture section of conversation initialization.
pub fn recent_completed_summaries_sync(
    conn: &Connection,
    purpose_tag: Option<&str>,
    limit: usize,
) -> rusqlite::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT file_path, summary FROM project_documents
         WHERE ai_status = 'completed' AND summary IS NOT NULL
           AND (?1 IS NULL OR purpose_tag = ?1)
         ORDER BY updated_at DESC
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![purpose_tag, limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Document count for the project structure summary.
pub fn document_count_sync(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM project_documents", [], |row| {
        row.get(0)
    })
}
