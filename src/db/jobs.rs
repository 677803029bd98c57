// src/db/jobs.rs
// Database operations for the background enrichment job queue

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use strum::{Display, EnumString};

/// Job statuses. Terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    FailedAi,
    FailedPayloadParsing,
    FailedJobLogic,
    RateLimited,
    RetryAi,
}

impl JobStatus {
    /// Whether a job in this status can never be picked up again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::FailedAi
                | JobStatus::FailedPayloadParsing
                | JobStatus::FailedJobLogic
        )
    }
}

/// Enrichment task categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TaskType {
    EnrichEntitySummaryKeywords,
    GenerateTopics,
}

/// What kind of record a job targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TargetEntityType {
    CodeEntity,
    ProjectDocument,
    Conversation,
}

/// A queued enrichment job.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub job_id: String,
    pub target_entity_id: String,
    pub target_entity_type: String,
    pub task_type: String,
    pub status: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub payload: Option<String>,
    pub last_error: Option<String>,
}

fn job_from_row(row: &rusqlite::Row) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        job_id: row.get(0)?,
        target_entity_id: row.get(1)?,
        target_entity_type: row.get(2)?,
        task_type: row.get(3)?,
        status: row.get(4)?,
        attempts: row.get(5)?,
        max_attempts: row.get(6)?,
        payload: row.get(7)?,
        last_error: row.get(8)?,
    })
}

const JOB_COLUMNS: &str = "job_id, target_entity_id, target_entity_type, task_type, status, \
     attempts, max_attempts, payload, last_error";

const TERMINAL_STATUSES: &str = "('completed', 'failed', 'failed_ai', \
     'failed_payload_parsing', 'failed_job_logic')";

/// Persist a new job. An identical (target, task_type) pair that is still
/// pending is deduped to the existing job id.
pub fn enqueue_job_sync(
    conn: &Connection,
    target_entity_id: &str,
    target_entity_type: TargetEntityType,
    task_type: TaskType,
    max_attempts: u32,
    payload: Option<&str>,
) -> rusqlite::Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT job_id FROM background_ai_jobs
             WHERE target_entity_id = ?1 AND task_type = ?2 AND status = 'pending'",
            params![target_entity_id, task_type.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(job_id) = existing {
        return Ok(job_id);
    }

    let job_id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO background_ai_jobs
            (job_id, target_entity_id, target_entity_type, task_type, status,
             attempts, max_attempts, payload)
         VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6)",
        params![
            job_id,
            target_entity_id,
            target_entity_type.to_string(),
            task_type.to_string(),
            max_attempts,
            payload
        ],
    )?;
    Ok(job_id)
}

/// Fetch up to `limit` runnable jobs (pending, retry_ai, or rate_limited),
/// skipping paused task types, oldest first.
pub fn fetch_runnable_jobs_sync(
    conn: &Connection,
    paused_task_types: &[String],
    limit: usize,
) -> rusqlite::Result<Vec<JobRow>> {
    let mut sql = format!(
        "SELECT {JOB_COLUMNS} FROM background_ai_jobs
         WHERE status IN ('pending', 'retry_ai', 'rate_limited')"
    );
    if !paused_task_types.is_empty() {
        let placeholders = vec!["?"; paused_task_types.len()].join(",");
        sql.push_str(&format!(" AND task_type NOT IN ({placeholders})"));
    }
    sql.push_str(&format!(" ORDER BY created_at ASC, rowid ASC LIMIT {limit}"));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(paused_task_types.iter()), job_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Move a job to processing, consuming an attempt. Returns the new attempt
/// count, or None when the job was already terminal or processing.
pub fn mark_job_processing_sync(conn: &Connection, job_id: &str) -> rusqlite::Result<Option<i64>> {
    let changed = conn.execute(
        &format!(
            "UPDATE background_ai_jobs
             SET status = 'processing', attempts = attempts + 1, updated_at = datetime('now')
             WHERE job_id = ?1 AND status NOT IN {TERMINAL_STATUSES} AND status != 'processing'"
        ),
        params![job_id],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    conn.query_row(
        "SELECT attempts FROM background_ai_jobs WHERE job_id = ?1",
        params![job_id],
        |row| row.get(0),
    )
    .optional()
}

/// Record a job outcome. Terminal states are sticky: updating a job that
/// already reached one is a no-op (returns false).
pub fn set_job_status_sync(
    conn: &Connection,
    job_id: &str,
    status: JobStatus,
    last_error: Option<&str>,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        &format!(
            "UPDATE background_ai_jobs
             SET status = ?2, last_error = COALESCE(?3, last_error), updated_at = datetime('now')
             WHERE job_id = ?1 AND status NOT IN {TERMINAL_STATUSES}"
        ),
        params![job_id, status.to_string(), last_error],
    )?;
    Ok(changed > 0)
}

/// Rate-limited outcome: restore the attempt consumed at dispatch so the
/// limit signal never counts against the job.
pub fn set_job_rate_limited_sync(
    conn: &Connection,
    job_id: &str,
    last_error: Option<&str>,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        &format!(
            "UPDATE background_ai_jobs
             SET status = 'rate_limited',
                 attempts = MAX(attempts - 1, 0),
                 last_error = COALESCE(?2, last_error),
                 updated_at = datetime('now')
             WHERE job_id = ?1 AND status NOT IN {TERMINAL_STATUSES}"
        ),
        params![job_id, last_error],
    )?;
    Ok(changed > 0)
}

/// Load a job by id.
pub fn get_job_sync(conn: &Connection, job_id: &str) -> rusqlite::Result<Option<JobRow>> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM background_ai_jobs WHERE job_id = ?1"),
        params![job_id],
        job_from_row,
    )
    .optional()
}

/// Whether any non-terminal job exists for (target, task_type). Used by the
/// topic-generation trigger to avoid duplicate enqueues.
pub fn has_open_job_for_target_sync(
    conn: &Connection,
    target_entity_id: &str,
    task_type: TaskType,
) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!(
                "SELECT 1 FROM background_ai_jobs
                 WHERE target_entity_id = ?1 AND task_type = ?2
                   AND status NOT IN {TERMINAL_STATUSES}
                 LIMIT 1"
            ),
            params![target_entity_id, task_type.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}
