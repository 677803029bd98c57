// src/background/handlers.rs
// Enrichment job handlers keyed by (task type, target entity type)

use crate::db::{self, DatabasePool, JobRow};
use crate::llm::{EnrichmentProvider, LlmError};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// How many conversation messages feed a topic prompt by default.
const TOPIC_TRANSCRIPT_MESSAGES: usize = 50;

/// Job-handler failure dispositions. The manager maps each variant onto a
/// job status and, where applicable, the target entity.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("payload parse failed: {0}")]
    PayloadParse(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("job logic error: {0}")]
    JobLogic(String),
}

impl From<LlmError> for JobError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::RateLimited { retry_after_secs } => JobError::RateLimited { retry_after_secs },
            LlmError::Provider(msg) => JobError::Provider(msg),
        }
    }
}

/// Optional payload for enrichment jobs.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct EnrichPayload {
    /// Use this content instead of the stored record's.
    content_override: Option<String>,
}

/// Optional payload for topic-generation jobs.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TopicsPayload {
    max_messages: Option<usize>,
}

fn parse_payload<T: Default + for<'de> Deserialize<'de>>(
    payload: Option<&str>,
) -> Result<T, JobError> {
    match payload {
        None => Ok(T::default()),
        Some(raw) => serde_json::from_str(raw).map_err(|e| JobError::PayloadParse(e.to_string())),
    }
}

/// Dispatch a job to its handler. Unknown (task type, target type) pairs
/// are a job-logic failure.
pub async fn dispatch_job(
    pool: &Arc<DatabasePool>,
    provider: &Arc<dyn EnrichmentProvider>,
    job: &JobRow,
) -> Result<(), JobError> {
    match (job.task_type.as_str(), job.target_entity_type.as_str()) {
        ("enrich_entity_summary_keywords", "code_entity") => {
            enrich_code_entity(pool, provider, job).await
        }
        ("enrich_entity_summary_keywords", "project_document") => {
            enrich_project_document(pool, provider, job).await
        }
        ("generate_topics", "conversation") => generate_topics(pool, provider, job).await,
        (task, target) => Err(JobError::JobLogic(format!(
            "no handler for task {task} on target type {target}"
        ))),
    }
}

async fn enrich_code_entity(
    pool: &Arc<DatabasePool>,
    provider: &Arc<dyn EnrichmentProvider>,
    job: &JobRow,
) -> Result<(), JobError> {
    let payload: EnrichPayload = parse_payload(job.payload.as_deref())?;

    let entity_id = job.target_entity_id.clone();
    let lookup_id = entity_id.clone();
    let rows = pool
        .run(move |conn| db::get_entities_by_ids_sync(conn, &[lookup_id]))
        .await
        .map_err(|e| JobError::JobLogic(e.to_string()))?;
    let entity = rows
        .into_iter()
        .next()
        .ok_or_else(|| JobError::JobLogic(format!("code entity {entity_id} not found")))?;

    mirror_status(pool, job, "in_progress", None).await;

    let content = payload
        .content_override
        .or(entity.raw_content)
        .unwrap_or_default();
    let name = entity.name.unwrap_or_else(|| entity.file_path.clone());

    let enrichment = provider
        .enrich_summary_keywords(&name, &entity.file_path, &content)
        .await?;

    let keywords: Vec<(String, f64)> = enrichment
        .keywords
        .iter()
        .map(|k| (k.term.clone(), k.weight))
        .collect();
    let summary = enrichment.summary;
    let update_id = job.target_entity_id.clone();
    pool.run(move |conn| db::set_entity_enrichment_sync(conn, &update_id, &summary, &keywords))
        .await
        .map_err(|e| JobError::JobLogic(e.to_string()))?;
    Ok(())
}

async fn enrich_project_document(
    pool: &Arc<DatabasePool>,
    provider: &Arc<dyn EnrichmentProvider>,
    job: &JobRow,
) -> Result<(), JobError> {
    let payload: EnrichPayload = parse_payload(job.payload.as_deref())?;

    let document_id = job.target_entity_id.clone();
    let lookup_id = document_id.clone();
    let rows = pool
        .run(move |conn| db::get_documents_by_ids_sync(conn, &[lookup_id]))
        .await
        .map_err(|e| JobError::JobLogic(e.to_string()))?;
    let document = rows
        .into_iter()
        .next()
        .ok_or_else(|| JobError::JobLogic(format!("document {document_id} not found")))?;

    mirror_status(pool, job, "in_progress", None).await;

    let content = payload
        .content_override
        .or(document.content)
        .unwrap_or_default();

    let enrichment = provider
        .enrich_summary_keywords(&document.file_path, &document.file_path, &content)
        .await?;

    let keywords: Vec<String> = enrichment.keywords.iter().map(|k| k.term.clone()).collect();
    let summary = enrichment.summary;
    let update_id = job.target_entity_id.clone();
    pool.run(move |conn| db::set_document_enrichment_sync(conn, &update_id, &summary, &keywords))
        .await
        .map_err(|e| JobError::JobLogic(e.to_string()))?;
    Ok(())
}

async fn generate_topics(
    pool: &Arc<DatabasePool>,
    provider: &Arc<dyn EnrichmentProvider>,
    job: &JobRow,
) -> Result<(), JobError> {
    let payload: TopicsPayload = parse_payload(job.payload.as_deref())?;
    let max_messages = payload.max_messages.unwrap_or(TOPIC_TRANSCRIPT_MESSAGES);

    let conversation_id = job.target_entity_id.clone();
    let lookup_id = conversation_id.clone();
    let messages = pool
        .run(move |conn| db::recent_messages_sync(conn, &lookup_id, max_messages))
        .await
        .map_err(|e| JobError::JobLogic(e.to_string()))?;
    if messages.is_empty() {
        tracing::debug!("conversation {} has no messages, nothing to distill", conversation_id);
        return Ok(());
    }

    let transcript: String = messages
        .iter()
        .map(|m| format!("{}: {}\n", m.role, m.content))
        .collect();

    let topics = provider.generate_topics(&transcript).await?;

    let insert_id = conversation_id.clone();
    pool.run(move |conn| {
        for topic in &topics {
            db::insert_topic_sync(conn, &insert_id, &topic.summary, &topic.keywords)?;
        }
        Ok::<_, rusqlite::Error>(())
    })
    .await
    .map_err(|e| JobError::JobLogic(e.to_string()))?;
    Ok(())
}

/// Best-effort mirror of a job status onto the target record. Only code
/// entities and documents carry an ai_status.
pub async fn mirror_status(
    pool: &Arc<DatabasePool>,
    job: &JobRow,
    ai_status: &str,
    error: Option<&str>,
) {
    let target_id = job.target_entity_id.clone();
    let status = ai_status.to_string();
    let error = error.map(|e| e.to_string());
    match job.target_entity_type.as_str() {
        "code_entity" => {
            pool.try_interact("mirror entity status", move |conn| {
                db::set_entity_ai_status_sync(conn, &target_id, &status, error.as_deref())?;
                Ok(())
            })
            .await;
        }
        "project_document" => {
            pool.try_interact("mirror document status", move |conn| {
                db::set_document_ai_status_sync(conn, &target_id, &status)?;
                Ok(())
            })
            .await;
        }
        _ => {}
    }
}
