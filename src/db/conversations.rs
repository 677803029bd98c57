// src/db/conversations.rs
// Database operations for conversation messages and topics

use rusqlite::{Connection, params};

/// A single conversation message.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub timestamp: String,
}

/// A topic summary produced by the generate_topics enrichment task.
#[derive(Debug, Clone)]
pub struct TopicRow {
    pub id: String,
    pub conversation_id: String,
    pub summary: String,
    /// JSON array of keyword strings
    pub keywords: Option<String>,
    pub created_at: String,
}

/// Append a message to a conversation.
pub fn insert_message_sync(
    conn: &Connection,
    conversation_id: &str,
    role: &str,
    content: &str,
) -> rusqlite::Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO conversation_messages (id, conversation_id, role, content)
         VALUES (?1, ?2, ?3, ?4)",
        params![id, conversation_id, role, content],
    )?;
    Ok(id)
}

/// Candidate messages for history search: everything recent from the
/// active conversation plus LIKE matches from any conversation. Scoring
/// happens in the retrieval layer; this just bounds the pool.
pub fn candidate_messages_sync(
    conn: &Connection,
    conversation_id: &str,
    patterns: &[String],
    pool_limit: usize,
) -> rusqlite::Result<Vec<MessageRow>> {
    let mut rows: Vec<MessageRow> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let mut stmt = conn.prepare_cached(
        "SELECT id, conversation_id, role, content, timestamp
         FROM conversation_messages
         WHERE conversation_id = ?1
         ORDER BY timestamp DESC
         LIMIT ?2",
    )?;
    for row in stmt
        .query_map(params![conversation_id, pool_limit as i64], message_from_row)?
        .filter_map(|r| r.ok())
    {
        seen.insert(row.id.clone());
        rows.push(row);
    }

    let mut stmt = conn.prepare_cached(
        "SELECT id, conversation_id, role, content, timestamp
         FROM conversation_messages
         WHERE LOWER(content) LIKE ?1
         ORDER BY timestamp DESC
         LIMIT ?2",
    )?;
    for pattern in patterns {
        for row in stmt
            .query_map(params![pattern, pool_limit as i64], message_from_row)?
            .filter_map(|r| r.ok())
        {
            if seen.insert(row.id.clone()) {
                rows.push(row);
            }
        }
        if rows.len() >= pool_limit * 2 {
            break;
        }
    }
    Ok(rows)
}

fn message_from_row(row: &rusqlite::Row) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

/// Message count for a conversation (topic-generation trigger).
pub fn count_messages_sync(conn: &Connection, conversation_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM conversation_messages WHERE conversation_id = ?1",
        params![conversation_id],
        |row| row.get(0),
    )
}

/// Most recent messages of a conversation, oldest first (for topic prompts).
pub fn recent_messages_sync(
    conn: &Connection,
    conversation_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, conversation_id, role, content, timestamp
         FROM (SELECT * FROM conversation_messages
               WHERE conversation_id = ?1
               ORDER BY timestamp DESC LIMIT ?2)
         ORDER BY timestamp ASC",
    )?;
    let rows = stmt
        .query_map(params![conversation_id, limit as i64], message_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Insert a generated topic.
pub fn insert_topic_sync(
    conn: &Connection,
    conversation_id: &str,
    summary: &str,
    keywords: &[String],
) -> rusqlite::Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    let keywords_json = serde_json::to_string(keywords).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "INSERT INTO conversation_topics (id, conversation_id, summary, keywords)
         VALUES (?1, ?2, ?3, ?4)",
        params![id, conversation_id, summary, keywords_json],
    )?;
    Ok(id)
}

/// Topics for a conversation, newest first.
pub fn topics_for_conversation_sync(
    conn: &Connection,
    conversation_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<TopicRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, conversation_id, summary, keywords, created_at
         FROM conversation_topics
         WHERE conversation_id = ?1
         ORDER BY created_at DESC
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![conversation_id, limit as i64], topic_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

fn topic_from_row(row: &rusqlite::Row) -> rusqlite::Result<TopicRow> {
    Ok(TopicRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        summary: row.get(2)?,
        keywords: row.get(3)?,
        created_at: row.get(4)?,
    })
}
