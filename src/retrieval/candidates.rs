// src/retrieval/candidates.rs
// Candidate generation: per-source searches, scoring, hydration

use crate::db::{
    self, CodeEntityRow, CommitRow, DatabasePool, DocumentRow, FileChangeRow, FtsHit, MessageRow,
    TopicRow,
};
use crate::retrieval::tokenize::{TokenizedQuery, path_like_terms};
use crate::retrieval::types::{AiStatus, CandidateSnippet, SourceType};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// Per-source result limits.
const CODE_FTS_LIMIT: usize = 20;
const DOCUMENT_FTS_LIMIT: usize = 20;
const KEYWORD_LIMIT: usize = 20;
const MESSAGE_LIMIT: usize = 10;
const TOPIC_LIMIT: usize = 5;
const COMMIT_LIMIT: usize = 10;
const FILE_CHANGE_LIMIT: usize = 15;

/// Pool of rows considered before per-source scoring trims to the limit.
const CANDIDATE_POOL: usize = 100;

const NO_CONTENT_PLACEHOLDER: &str = "No content available…";
const RAW_CONTENT_MAX_CHARS: usize = 300;

/// Run every source search, hydrate, and emit the uniform candidate
/// stream. A failing source is logged and contributes nothing; the call
/// itself never fails.
pub async fn generate_candidates(
    pool: &Arc<DatabasePool>,
    query: &TokenizedQuery,
    raw_query: &str,
    conversation_id: &str,
    now: DateTime<Utc>,
) -> Vec<CandidateSnippet> {
    // Empty input yields empty outputs from the tokenizer; treat the whole
    // generation stage as "no candidates" rather than surfacing
    // recency-only noise.
    if raw_query.trim().is_empty() {
        return Vec::new();
    }
    if query.is_empty() {
        tracing::debug!("query produced no usable search terms");
    }

    let (code_fts, doc_fts, keyword, messages, topics, commits, file_changes) = tokio::join!(
        search_code_fts(pool, query),
        search_document_fts(pool, query),
        search_keywords(pool, query),
        search_messages(pool, query, conversation_id, now),
        search_topics(pool, query, conversation_id),
        search_commits(pool, query, now),
        search_file_changes(pool, query, raw_query, now),
    );

    let mut candidates = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    // Iteration order implements the dedup preference: FTS-derived
    // snippets win over keyword-derived ones for the same record.
    for batch in [
        flatten_source("code_fts", code_fts),
        flatten_source("document_fts", doc_fts),
        flatten_source("keyword", keyword),
        flatten_source("conversation_messages", messages),
        flatten_source("conversation_topics", topics),
        flatten_source("git_commits", commits),
        flatten_source("git_file_changes", file_changes),
    ] {
        for snippet in batch {
            if seen.insert(record_key(&snippet)) {
                candidates.push(snippet);
            }
        }
    }

    candidates
}

/// Collapse a source failure into an empty batch, logging it.
fn flatten_source(
    source: &str,
    result: crate::Result<Vec<CandidateSnippet>>,
) -> Vec<CandidateSnippet> {
    match result {
        Ok(batch) => batch,
        Err(e) => {
            tracing::warn!("source {} failed, continuing without it: {}", source, e);
            Vec::new()
        }
    }
}

/// Dedup key for generation: code entities and documents collapse across
/// the FTS and keyword sources; everything else is already unique.
fn record_key(snippet: &CandidateSnippet) -> String {
    match snippet.source_type {
        SourceType::CodeEntityFts | SourceType::CodeEntityKeyword | SourceType::CodeEntityRelated => {
            format!("entity_{}", snippet.id)
        }
        SourceType::ProjectDocumentFts | SourceType::ProjectDocumentKeyword => {
            format!("document_{}", snippet.id)
        }
        other => format!("{}_{}", other, snippet.id),
    }
}

// ============================================================================
// Per-source searches
// ============================================================================

async fn search_code_fts(
    pool: &Arc<DatabasePool>,
    query: &TokenizedQuery,
) -> crate::Result<Vec<CandidateSnippet>> {
    if query.fts_expression.is_empty() {
        return Ok(Vec::new());
    }
    let expr = query.fts_expression.clone();
    let hits: Vec<FtsHit> = pool
        .run(move |conn| db::entity_fts_search_sync(conn, &expr, CODE_FTS_LIMIT))
        .await?;
    let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
    let rows = hydrate_entities(pool, ids).await?;

    let snippets = hits
        .iter()
        .enumerate()
        .filter_map(|(ordinal, hit)| {
            let row = match rows.get(&hit.id) {
                Some(row) => row,
                None => {
                    tracing::warn!("FTS hit {} has no backing entity record", hit.id);
                    return None;
                }
            };
            Some(entity_snippet(
                row,
                SourceType::CodeEntityFts,
                hit.highlight.clone(),
                fts_rank_score(ordinal),
            ))
        })
        .collect();
    Ok(snippets)
}

async fn search_document_fts(
    pool: &Arc<DatabasePool>,
    query: &TokenizedQuery,
) -> crate::Result<Vec<CandidateSnippet>> {
    if query.fts_expression.is_empty() {
        return Ok(Vec::new());
    }
    let expr = query.fts_expression.clone();
    let hits: Vec<FtsHit> = pool
        .run(move |conn| db::document_fts_search_sync(conn, &expr, DOCUMENT_FTS_LIMIT))
        .await?;
    let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
    let rows = hydrate_documents(pool, ids).await?;

    let snippets = hits
        .iter()
        .enumerate()
        .filter_map(|(ordinal, hit)| {
            let row = match rows.get(&hit.id) {
                Some(row) => row,
                None => {
                    tracing::warn!("FTS hit {} has no backing document record", hit.id);
                    return None;
                }
            };
            Some(document_snippet(
                row,
                SourceType::ProjectDocumentFts,
                hit.highlight.clone(),
                fts_rank_score(ordinal),
            ))
        })
        .collect();
    Ok(snippets)
}

/// Keyword-index ids can name either a code entity or a document; resolve
/// by trying the entity table first, then documents for the leftovers.
async fn search_keywords(
    pool: &Arc<DatabasePool>,
    query: &TokenizedQuery,
) -> crate::Result<Vec<CandidateSnippet>> {
    if query.search_terms.is_empty() {
        return Ok(Vec::new());
    }
    let terms = query.search_terms.clone();
    let hits = pool
        .run(move |conn| db::keyword_search_sync(conn, &terms, KEYWORD_LIMIT))
        .await?;
    if hits.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = hits.iter().map(|h| h.entity_id.clone()).collect();
    let entities = hydrate_entities(pool, ids.clone()).await?;
    let unresolved: Vec<String> = ids
        .iter()
        .filter(|id| !entities.contains_key(*id))
        .cloned()
        .collect();
    let documents = hydrate_documents(pool, unresolved).await?;

    let mut snippets = Vec::new();
    for hit in &hits {
        let score = keyword_score(hit.total_weight, hit.match_count);
        if let Some(row) = entities.get(&hit.entity_id) {
            let mut snippet = entity_snippet(row, SourceType::CodeEntityKeyword, None, score);
            snippet.set_metadata("totalWeight", json!(hit.total_weight));
            snippet.set_metadata("matchCount", json!(hit.match_count));
            snippets.push(snippet);
        } else if let Some(row) = documents.get(&hit.entity_id) {
            let mut snippet = document_snippet(row, SourceType::ProjectDocumentKeyword, None, score);
            snippet.set_metadata("totalWeight", json!(hit.total_weight));
            snippet.set_metadata("matchCount", json!(hit.match_count));
            snippets.push(snippet);
        } else {
            tracing::warn!("keyword hit {} resolves to no known record", hit.entity_id);
        }
    }
    Ok(snippets)
}

async fn search_messages(
    pool: &Arc<DatabasePool>,
    query: &TokenizedQuery,
    conversation_id: &str,
    now: DateTime<Utc>,
) -> crate::Result<Vec<CandidateSnippet>> {
    let patterns: Vec<String> = query
        .search_terms
        .iter()
        .map(|t| format!("%{t}%"))
        .collect();
    let conversation = conversation_id.to_string();
    let conversation_for_query = conversation.clone();
    let rows: Vec<MessageRow> = pool
        .run(move |conn| {
            db::candidate_messages_sync(conn, &conversation_for_query, &patterns, CANDIDATE_POOL / 2)
        })
        .await?;

    let mut scored: Vec<CandidateSnippet> = rows
        .iter()
        .map(|row| {
            let active = row.conversation_id == conversation;
            let days = days_ago(now, parse_timestamp(&row.timestamp));
            let ratio = term_match_ratio(&query.search_terms, &row.content);
            message_snippet(row, message_score(active, days, ratio))
        })
        .collect();
    sort_and_truncate(&mut scored, MESSAGE_LIMIT);
    Ok(scored)
}

async fn search_topics(
    pool: &Arc<DatabasePool>,
    query: &TokenizedQuery,
    conversation_id: &str,
) -> crate::Result<Vec<CandidateSnippet>> {
    let conversation = conversation_id.to_string();
    let rows: Vec<TopicRow> = pool
        .run(move |conn| db::topics_for_conversation_sync(conn, &conversation, CANDIDATE_POOL / 2))
        .await?;

    let mut scored: Vec<CandidateSnippet> = rows
        .iter()
        .map(|row| {
            let summary_ratio = term_match_ratio(&query.search_terms, &row.summary);
            let keywords = parse_keyword_list(row.keywords.as_deref());
            let keyword_ratio = keyword_match_ratio(&query.search_terms, &keywords);
            topic_snippet(row, &keywords, topic_score(summary_ratio, keyword_ratio))
        })
        .collect();
    sort_and_truncate(&mut scored, TOPIC_LIMIT);
    Ok(scored)
}

async fn search_commits(
    pool: &Arc<DatabasePool>,
    query: &TokenizedQuery,
    now: DateTime<Utc>,
) -> crate::Result<Vec<CandidateSnippet>> {
    let rows: Vec<CommitRow> = pool
        .run(move |conn| db::recent_commits_sync(conn, CANDIDATE_POOL))
        .await?;

    let mut scored: Vec<CandidateSnippet> = rows
        .iter()
        .map(|row| {
            let msg_ratio = term_match_ratio(
                &query.search_terms,
                row.message.as_deref().unwrap_or(""),
            );
            let author = format!(
                "{} {}",
                row.author_name.as_deref().unwrap_or(""),
                row.author_email.as_deref().unwrap_or("")
            );
            let author_match = query
                .search_terms
                .iter()
                .any(|t| author.to_lowercase().contains(t));
            let days = days_ago(now, parse_timestamp(&row.commit_date));
            commit_snippet(row, commit_score(msg_ratio, author_match, days))
        })
        .collect();
    sort_and_truncate(&mut scored, COMMIT_LIMIT);
    Ok(scored)
}

async fn search_file_changes(
    pool: &Arc<DatabasePool>,
    query: &TokenizedQuery,
    raw_query: &str,
    now: DateTime<Utc>,
) -> crate::Result<Vec<CandidateSnippet>> {
    // Prefer path-like terms when the query mentions any.
    let path_terms = path_like_terms(raw_query);
    let filter_terms: Vec<String> = if path_terms.is_empty() {
        query.search_terms.clone()
    } else {
        path_terms
    };
    let patterns: Vec<String> = filter_terms.iter().map(|t| format!("%{t}%")).collect();

    let rows: Vec<FileChangeRow> = pool
        .run(move |conn| db::candidate_file_changes_sync(conn, &patterns, CANDIDATE_POOL))
        .await?;

    let mut scored: Vec<CandidateSnippet> = rows
        .iter()
        .map(|row| {
            let path_ratio = term_match_ratio(&filter_terms, &row.file_path);
            let msg_ratio = term_match_ratio(
                &query.search_terms,
                row.message.as_deref().unwrap_or(""),
            );
            let days = days_ago(now, parse_timestamp(&row.commit_date));
            file_change_snippet(
                row,
                file_change_score(path_ratio, msg_ratio, &row.status, days),
            )
        })
        .collect();
    sort_and_truncate(&mut scored, FILE_CHANGE_LIMIT);
    Ok(scored)
}

fn sort_and_truncate(snippets: &mut Vec<CandidateSnippet>, limit: usize) {
    snippets.sort_by(|a, b| {
        b.initial_score
            .partial_cmp(&a.initial_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    snippets.truncate(limit);
}

// ============================================================================
// Hydration
// ============================================================================

async fn hydrate_entities(
    pool: &Arc<DatabasePool>,
    ids: Vec<String>,
) -> crate::Result<HashMap<String, CodeEntityRow>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = pool
        .run(move |conn| db::get_entities_by_ids_sync(conn, &ids))
        .await?;
    Ok(rows.into_iter().map(|r| (r.id.clone(), r)).collect())
}

async fn hydrate_documents(
    pool: &Arc<DatabasePool>,
    ids: Vec<String>,
) -> crate::Result<HashMap<String, DocumentRow>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = pool
        .run(move |conn| db::get_documents_by_ids_sync(conn, &ids))
        .await?;
    Ok(rows.into_iter().map(|r| (r.id.clone(), r)).collect())
}

// ============================================================================
// Snippet builders
// ============================================================================

pub(crate) fn entity_snippet(
    row: &CodeEntityRow,
    source_type: SourceType,
    highlight: Option<String>,
    score: f64,
) -> CandidateSnippet {
    let ai_status = row.ai_status.parse::<AiStatus>().ok();
    let content = select_content(
        ai_status,
        row.summary.as_deref(),
        highlight.as_deref(),
        row.raw_content.as_deref(),
    );

    let mut snippet = CandidateSnippet::new(&row.id, source_type, content, score);
    snippet.file_path = Some(row.file_path.clone());
    snippet.entity_name = row.name.clone();
    snippet.entity_type = Some(row.entity_type.clone());
    snippet.language = row.language.clone();
    snippet.ai_status = ai_status;
    snippet.timestamp = Some(row.updated_at.clone());
    if let (Some(start), Some(end)) = (row.start_line, row.end_line) {
        snippet.set_metadata("startLine", json!(start));
        snippet.set_metadata("endLine", json!(end));
    }
    snippet
}

fn document_snippet(
    row: &DocumentRow,
    source_type: SourceType,
    highlight: Option<String>,
    score: f64,
) -> CandidateSnippet {
    let ai_status = row.ai_status.parse::<AiStatus>().ok();
    let content = select_content(
        ai_status,
        row.summary.as_deref(),
        highlight.as_deref(),
        row.content.as_deref(),
    );

    let mut snippet = CandidateSnippet::new(&row.id, source_type, content, score);
    snippet.file_path = Some(row.file_path.clone());
    snippet.ai_status = ai_status;
    snippet.timestamp = Some(row.updated_at.clone());
    if let Some(tag) = &row.purpose_tag {
        snippet.set_metadata("purposeTag", json!(tag));
    }
    if let Some(keywords) = &row.keywords {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(keywords) {
            snippet.set_metadata("keywords", parsed);
        }
    }
    snippet
}

fn message_snippet(row: &MessageRow, score: f64) -> CandidateSnippet {
    let content = if row.content.trim().is_empty() {
        NO_CONTENT_PLACEHOLDER.to_string()
    } else {
        truncate_chars(&row.content, RAW_CONTENT_MAX_CHARS)
    };
    let mut snippet = CandidateSnippet::new(&row.id, SourceType::ConversationMessage, content, score);
    snippet.timestamp = Some(row.timestamp.clone());
    snippet.set_metadata("role", json!(row.role));
    snippet.set_metadata("conversationId", json!(row.conversation_id));
    snippet
}

fn topic_snippet(row: &TopicRow, keywords: &[String], score: f64) -> CandidateSnippet {
    let content = if row.summary.trim().is_empty() {
        NO_CONTENT_PLACEHOLDER.to_string()
    } else {
        row.summary.clone()
    };
    let mut snippet = CandidateSnippet::new(&row.id, SourceType::ConversationTopic, content, score);
    snippet.timestamp = Some(row.created_at.clone());
    snippet.set_metadata("conversationId", json!(row.conversation_id));
    if !keywords.is_empty() {
        snippet.set_metadata("keywords", json!(keywords));
    }
    snippet
}

fn commit_snippet(row: &CommitRow, score: f64) -> CandidateSnippet {
    let content = match row.message.as_deref().filter(|m| !m.trim().is_empty()) {
        Some(message) => truncate_chars(message, RAW_CONTENT_MAX_CHARS),
        None => NO_CONTENT_PLACEHOLDER.to_string(),
    };
    let mut snippet =
        CandidateSnippet::new(&row.commit_hash, SourceType::GitCommit, content, score);
    snippet.timestamp = Some(row.commit_date.clone());
    snippet.set_metadata("commitHash", json!(row.commit_hash));
    snippet.set_metadata("commitDate", json!(row.commit_date));
    if let Some(author) = &row.author_name {
        snippet.set_metadata("author", json!(author));
    }
    snippet
}

fn file_change_snippet(row: &FileChangeRow, score: f64) -> CandidateSnippet {
    let id = format!("{}:{}", row.commit_hash, row.file_path);
    let content = match row.message.as_deref().filter(|m| !m.trim().is_empty()) {
        Some(message) => format!(
            "{} ({}) — {}",
            row.file_path,
            row.status,
            truncate_chars(message, RAW_CONTENT_MAX_CHARS)
        ),
        None => format!("{} ({})", row.file_path, row.status),
    };
    let mut snippet = CandidateSnippet::new(id, SourceType::GitCommitFileChange, content, score);
    snippet.file_path = Some(row.file_path.clone());
    snippet.timestamp = Some(row.commit_date.clone());
    snippet.set_metadata("commitHash", json!(row.commit_hash));
    snippet.set_metadata("commitDate", json!(row.commit_date));
    snippet.set_metadata("status", json!(row.status));
    if let Some(message) = &row.message {
        snippet.set_metadata("message", json!(message));
    }
    snippet
}

/// Content selection priority: completed summary, FTS highlight, truncated
/// raw content, placeholder.
fn select_content(
    ai_status: Option<AiStatus>,
    summary: Option<&str>,
    highlight: Option<&str>,
    raw: Option<&str>,
) -> String {
    if ai_status == Some(AiStatus::Completed) {
        if let Some(s) = summary.filter(|s| !s.trim().is_empty()) {
            return s.to_string();
        }
    }
    if let Some(h) = highlight.filter(|h| !h.trim().is_empty()) {
        return h.to_string();
    }
    if let Some(r) = raw.filter(|r| !r.trim().is_empty()) {
        return truncate_chars(r, RAW_CONTENT_MAX_CHARS);
    }
    NO_CONTENT_PLACEHOLDER.to_string()
}

/// Char-boundary-safe truncation with an ellipsis marker.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}…")
}

fn parse_keyword_list(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|r| serde_json::from_str::<Vec<String>>(r).ok())
        .unwrap_or_default()
}

// ============================================================================
// Scoring (all normalized to [0, 1])
// ============================================================================

/// FTS rank score from the 0-based result ordinal (lower is better).
pub(crate) fn fts_rank_score(ordinal: usize) -> f64 {
    (1.0 - ((ordinal as f64 + 1.0).ln() / 10.0)).max(0.0)
}

/// Keyword score from aggregated weight and distinct match count.
fn keyword_score(total_weight: f64, match_count: i64) -> f64 {
    let weight_part = (total_weight / 10.0).min(1.0);
    let count_part = (match_count as f64 / 5.0).min(1.0);
    (weight_part + count_part) / 2.0
}

/// Conversation message: active-conversation base + recency decay (7-day
/// half-scale) + term-match ratio.
fn message_score(active: bool, days_ago: f64, match_ratio: f64) -> f64 {
    let base = if active { 0.5 } else { 0.0 };
    let recency = 0.3 * (-days_ago / 7.0).exp();
    let terms = match_ratio.min(1.0) * 0.2;
    (base + recency + terms).clamp(0.0, 1.0)
}

/// Conversation topic: summary matches dominate, keyword matches assist.
fn topic_score(summary_ratio: f64, keyword_ratio: f64) -> f64 {
    (summary_ratio.min(1.0) * 0.6 + keyword_ratio.min(1.0) * 0.4).clamp(0.0, 1.0)
}

/// Git commit: message match + author match + recency (30-day scale).
fn commit_score(message_ratio: f64, author_match: bool, days_ago: f64) -> f64 {
    let message = message_ratio.min(1.0) * 0.5;
    let author = if author_match { 0.2 } else { 0.0 };
    let recency = 0.3 * (-days_ago / 30.0).exp();
    (message + author + recency).clamp(0.0, 1.0)
}

/// Git file change: path match dominates, plus message match, a small
/// status bonus, and recency.
fn file_change_score(path_ratio: f64, message_ratio: f64, status: &str, days_ago: f64) -> f64 {
    let path = path_ratio.min(1.0) * 0.6;
    let message = message_ratio.min(1.0) * 0.3;
    let status_bonus = match status {
        "modified" | "added" => 0.05,
        "deleted" => 0.02,
        _ => 0.0,
    };
    let recency = 0.2 * (-days_ago / 30.0).exp();
    (path + message + status_bonus + recency).clamp(0.0, 1.0)
}

/// Fraction of query terms found in `text` (case-insensitive substring).
fn term_match_ratio(terms: &[String], text: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let lowered = text.to_lowercase();
    let matching = terms.iter().filter(|t| lowered.contains(t.as_str())).count();
    matching as f64 / terms.len() as f64
}

/// Fraction of query terms appearing in a keyword list.
fn keyword_match_ratio(terms: &[String], keywords: &[String]) -> f64 {
    if terms.is_empty() || keywords.is_empty() {
        return 0.0;
    }
    let lowered: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    let matching = terms
        .iter()
        .filter(|t| lowered.iter().any(|k| k.contains(t.as_str())))
        .count();
    matching as f64 / terms.len() as f64
}

// ============================================================================
// Timestamps
// ============================================================================

/// Parse RFC 3339 or SQLite's `datetime('now')` format, assuming UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Non-negative age in days relative to `now`; unparseable timestamps are
/// treated as very old.
fn days_ago(now: DateTime<Utc>, ts: Option<DateTime<Utc>>) -> f64 {
    match ts {
        Some(ts) => ((now - ts).num_seconds().max(0) as f64) / 86_400.0,
        None => f64::MAX / 2.0,
    }
}
