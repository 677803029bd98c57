// src/db/git.rs
// Database operations for git commit history deposited by the monitor

use rusqlite::{Connection, params};

/// A recorded commit.
#[derive(Debug, Clone)]
pub struct CommitRow {
    pub commit_hash: String,
    pub message: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub commit_date: String,
}

/// A file touched by a commit, joined with the commit's message and date.
#[derive(Debug, Clone)]
pub struct FileChangeRow {
    pub commit_hash: String,
    pub file_path: String,
    pub status: String,
    pub message: Option<String>,
    pub commit_date: String,
}

fn commit_from_row(row: &rusqlite::Row) -> rusqlite::Result<CommitRow> {
    Ok(CommitRow {
        commit_hash: row.get(0)?,
        message: row.get(1)?,
        author_name: row.get(2)?,
        author_email: row.get(3)?,
        commit_date: row.get(4)?,
    })
}

/// Most recent commits; the retrieval layer scores them against the query.
pub fn recent_commits_sync(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<CommitRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT commit_hash, message, author_name, author_email, commit_date
         FROM git_commits
         ORDER BY commit_date DESC
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], commit_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// File changes whose path matches any LIKE pattern, newest commits first.
/// With no patterns, returns the most recent changes.
pub fn candidate_file_changes_sync(
    conn: &Connection,
    patterns: &[String],
    pool_limit: usize,
) -> rusqlite::Result<Vec<FileChangeRow>> {
    let map_row = |row: &rusqlite::Row| -> rusqlite::Result<FileChangeRow> {
        Ok(FileChangeRow {
            commit_hash: row.get(0)?,
            file_path: row.get(1)?,
            status: row.get(2)?,
            message: row.get(3)?,
            commit_date: row.get(4)?,
        })
    };

    if patterns.is_empty() {
        let mut stmt = conn.prepare_cached(
            "SELECT f.commit_hash, f.file_path, f.status, c.message, c.commit_date
             FROM git_commit_files f
             JOIN git_commits c ON c.commit_hash = f.commit_hash
             ORDER BY c.commit_date DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([pool_limit as i64], map_row)?
            .filter_map(|r| r.ok())
            .collect();
        return Ok(rows);
    }

    let mut rows: Vec<FileChangeRow> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut stmt = conn.prepare_cached(
        "SELECT f.commit_hash, f.file_path, f.status, c.message, c.commit_date
         FROM git_commit_files f
         JOIN git_commits c ON c.commit_hash = f.commit_hash
         WHERE LOWER(f.file_path) LIKE ?1
         ORDER BY c.commit_date DESC
         LIMIT ?2",
    )?;
    for pattern in patterns {
        for row in stmt
            .query_map(params![pattern, pool_limit as i64], map_row)?
            .filter_map(|r| r.ok())
        {
            let key = format!("{}:{}", row.commit_hash, row.file_path);
            if seen.insert(key) {
                rows.push(row);
            }
        }
        if rows.len() >= pool_limit {
            break;
        }
    }
    rows.truncate(pool_limit);
    Ok(rows)
}

/// Record a commit and its files idempotently. Returns true when the
/// commit row was newly inserted.
pub fn insert_commit_sync(
    conn: &Connection,
    commit: &CommitRow,
    files: &[(String, String)],
) -> rusqlite::Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO git_commits
            (commit_hash, message, author_name, author_email, commit_date)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            commit.commit_hash,
            commit.message,
            commit.author_name,
            commit.author_email,
            commit.commit_date
        ],
    )?;
    for (file_path, status) in files {
        conn.execute(
            "INSERT OR IGNORE INTO git_commit_files (commit_hash, file_path, status)
             VALUES (?1, ?2, ?3)",
            params![commit.commit_hash, file_path, status],
        )?;
    }
    Ok(inserted > 0)
}
