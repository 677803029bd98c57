// src/db/schema.rs
// Database schema and migrations

use anyhow::Result;
use rusqlite::Connection;

/// Base tables. Everything is IF NOT EXISTS so setup is idempotent.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS code_entities (
    id              TEXT PRIMARY KEY,
    file_path       TEXT NOT NULL,
    name            TEXT,
    entity_type     TEXT NOT NULL,
    language        TEXT,
    raw_content     TEXT,
    summary         TEXT,
    ai_status       TEXT NOT NULL DEFAULT 'pending',
    start_line      INTEGER,
    end_line        INTEGER,
    custom_metadata TEXT,
    created_at      TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_code_entities_file ON code_entities(file_path);
CREATE INDEX IF NOT EXISTS idx_code_entities_status ON code_entities(ai_status);

CREATE TABLE IF NOT EXISTS project_documents (
    id          TEXT PRIMARY KEY,
    file_path   TEXT NOT NULL,
    content     TEXT,
    summary     TEXT,
    ai_status   TEXT NOT NULL DEFAULT 'pending',
    purpose_tag TEXT,
    keywords    TEXT,
    created_at  TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_project_documents_file ON project_documents(file_path);

CREATE TABLE IF NOT EXISTS entity_keywords (
    entity_id TEXT NOT NULL,
    keyword   TEXT NOT NULL,
    weight    REAL NOT NULL DEFAULT 1.0,
    PRIMARY KEY (entity_id, keyword)
);
CREATE INDEX IF NOT EXISTS idx_entity_keywords_keyword ON entity_keywords(keyword);

CREATE TABLE IF NOT EXISTS code_relationships (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    source_entity_id  TEXT NOT NULL,
    target_entity_id  TEXT NOT NULL,
    relationship_type TEXT NOT NULL,
    custom_metadata   TEXT,
    UNIQUE (source_entity_id, target_entity_id, relationship_type)
);
CREATE INDEX IF NOT EXISTS idx_relationships_source ON code_relationships(source_entity_id);
CREATE INDEX IF NOT EXISTS idx_relationships_target ON code_relationships(target_entity_id);

CREATE TABLE IF NOT EXISTS conversation_messages (
    id              TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    role            TEXT NOT NULL,
    content         TEXT NOT NULL,
    timestamp       TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON conversation_messages(conversation_id, timestamp);

CREATE TABLE IF NOT EXISTS conversation_topics (
    id              TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    summary         TEXT NOT NULL,
    keywords        TEXT,
    created_at      TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_topics_conversation ON conversation_topics(conversation_id);

CREATE TABLE IF NOT EXISTS git_commits (
    commit_hash  TEXT PRIMARY KEY,
    message      TEXT,
    author_name  TEXT,
    author_email TEXT,
    commit_date  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_git_commits_date ON git_commits(commit_date);

CREATE TABLE IF NOT EXISTS git_commit_files (
    commit_hash TEXT NOT NULL,
    file_path   TEXT NOT NULL,
    status      TEXT NOT NULL,
    PRIMARY KEY (commit_hash, file_path)
);
CREATE INDEX IF NOT EXISTS idx_git_commit_files_path ON git_commit_files(file_path);

CREATE TABLE IF NOT EXISTS background_ai_jobs (
    job_id             TEXT PRIMARY KEY,
    target_entity_id   TEXT NOT NULL,
    target_entity_type TEXT NOT NULL,
    task_type          TEXT NOT NULL,
    status             TEXT NOT NULL DEFAULT 'pending',
    attempts           INTEGER NOT NULL DEFAULT 0,
    max_attempts       INTEGER NOT NULL DEFAULT 3,
    payload            TEXT,
    last_error         TEXT,
    created_at         TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at         TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON background_ai_jobs(status, task_type);

CREATE TABLE IF NOT EXISTS server_state (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

/// Run all schema setup and migrations.
///
/// Called during pool creation. Idempotent - checks for existing
/// tables before making changes.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    migrate_entity_fts(conn)?;
    migrate_document_fts(conn)?;
    Ok(())
}

/// Create the FTS5 index over code entities plus sync triggers.
///
/// External-content FTS keyed by the base table's rowid: ingestion
/// collaborators only write `code_entities`, the triggers keep the
/// index current.
fn migrate_entity_fts(conn: &Connection) -> Result<()> {
    if table_exists(conn, "code_entities_fts") {
        return Ok(());
    }
    tracing::info!("Creating FTS5 index for code entities");
    conn.execute_batch(
        "CREATE VIRTUAL TABLE code_entities_fts USING fts5(
            name,
            raw_content,
            summary,
            content='code_entities',
            content_rowid='rowid',
            tokenize='porter unicode61 remove_diacritics 1'
         );
         CREATE TRIGGER code_entities_ai AFTER INSERT ON code_entities BEGIN
            INSERT INTO code_entities_fts(rowid, name, raw_content, summary)
            VALUES (new.rowid, new.name, new.raw_content, new.summary);
         END;
         CREATE TRIGGER code_entities_ad AFTER DELETE ON code_entities BEGIN
            INSERT INTO code_entities_fts(code_entities_fts, rowid, name, raw_content, summary)
            VALUES ('delete', old.rowid, old.name, old.raw_content, old.summary);
         END;
         CREATE TRIGGER code_entities_au AFTER UPDATE ON code_entities BEGIN
            INSERT INTO code_entities_fts(code_entities_fts, rowid, name, raw_content, summary)
            VALUES ('delete', old.rowid, old.name, old.raw_content, old.summary);
            INSERT INTO code_entities_fts(rowid, name, raw_content, summary)
            VALUES (new.rowid, new.name, new.raw_content, new.summary);
         END;",
    )?;
    // Populate from any pre-existing rows
    conn.execute(
        "INSERT INTO code_entities_fts(rowid, name, raw_content, summary)
         SELECT rowid, name, raw_content, summary FROM code_entities",
        [],
    )?;
    Ok(())
}

/// Create the FTS5 index over project documents plus sync triggers.
fn migrate_document_fts(conn: &Connection) -> Result<()> {
    if table_exists(conn, "project_documents_fts") {
        return Ok(());
    }
    tracing::info!("Creating FTS5 index for project documents");
    conn.execute_batch(
        "CREATE VIRTUAL TABLE project_documents_fts USING fts5(
            file_path,
            content,
            summary,
            content='project_documents',
            content_rowid='rowid',
            tokenize='porter unicode61 remove_diacritics 1'
         );
         CREATE TRIGGER project_documents_ai AFTER INSERT ON project_documents BEGIN
            INSERT INTO project_documents_fts(rowid, file_path, content, summary)
            VALUES (new.rowid, new.file_path, new.content, new.summary);
         END;
         CREATE TRIGGER project_documents_ad AFTER DELETE ON project_documents BEGIN
            INSERT INTO project_documents_fts(project_documents_fts, rowid, file_path, content, summary)
            VALUES ('delete', old.rowid, old.file_path, old.content, old.summary);
         END;
         CREATE TRIGGER project_documents_au AFTER UPDATE ON project_documents BEGIN
            INSERT INTO project_documents_fts(project_documents_fts, rowid, file_path, content, summary)
            VALUES ('delete', old.rowid, old.file_path, old.content, old.summary);
            INSERT INTO project_documents_fts(rowid, file_path, content, summary)
            VALUES (new.rowid, new.file_path, new.content, new.summary);
         END;",
    )?;
    conn.execute(
        "INSERT INTO project_documents_fts(rowid, file_path, content, summary)
         SELECT rowid, file_path, content, summary FROM project_documents",
        [],
    )?;
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
        [name],
        |_| Ok(true),
    )
    .unwrap_or(false)
}
