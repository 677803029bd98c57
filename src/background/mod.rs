// src/background/mod.rs
// Job manager: polls the enrichment queue with bounded concurrency,
// per-task-type pauses, and bounded retries

pub mod git_monitor;
pub mod handlers;

use crate::config::JobConfig;
use crate::db::{self, DatabasePool, JobRow, JobStatus};
use crate::llm::EnrichmentProvider;
use handlers::JobError;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Fallback pause when a rate-limit signal carries no Retry-After.
const DEFAULT_PAUSE_SECS: u64 = 60;

/// Decrements the active-job counter when a dispatch finishes, no matter
/// how it exits.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Polled worker over `background_ai_jobs`.
pub struct JobManager {
    pool: Arc<DatabasePool>,
    provider: Arc<dyn EnrichmentProvider>,
    config: JobConfig,
    active: Arc<AtomicUsize>,
    in_cycle: AtomicBool,
    /// task type -> paused-until. Pruned each cycle, written on rate-limit
    /// outcomes.
    paused: std::sync::Mutex<HashMap<String, Instant>>,
}

impl JobManager {
    pub fn new(
        pool: Arc<DatabasePool>,
        provider: Arc<dyn EnrichmentProvider>,
        config: JobConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            provider,
            config,
            active: Arc::new(AtomicUsize::new(0)),
            in_cycle: AtomicBool::new(false),
            paused: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Poll until shutdown. In-flight handlers keep their active slots;
    /// the loop simply stops fetching new work.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            concurrency = self.config.concurrency,
            interval_ms = self.config.polling_interval_ms,
            "job manager started"
        );
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.polling_interval_ms.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll_cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("job manager shutting down");
    }

    /// One poll cycle: fetch runnable jobs up to the free capacity and
    /// dispatch them. Returns handles for the dispatched jobs so callers
    /// (and tests) can await completion; the run loop drops them.
    pub async fn poll_cycle(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        // Reentrancy guard: never overlap cycles.
        if self.in_cycle.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }
        let handles = self.poll_cycle_inner().await;
        self.in_cycle.store(false, Ordering::SeqCst);
        handles
    }

    async fn poll_cycle_inner(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let free = self
            .config
            .concurrency
            .saturating_sub(self.active.load(Ordering::SeqCst));
        if free == 0 {
            return Vec::new();
        }

        let paused = self.prune_and_list_paused();
        let jobs = match self
            .pool
            .run(move |conn| db::fetch_runnable_jobs_sync(conn, &paused, free))
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!("job fetch failed: {}", e);
                return Vec::new();
            }
        };

        let mut handles = Vec::new();
        for (i, job) in jobs.into_iter().enumerate() {
            if i > 0 && self.config.job_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.job_delay_ms)).await;
            }

            let job_id = job.job_id.clone();
            let attempts = match self
                .pool
                .run(move |conn| db::mark_job_processing_sync(conn, &job_id))
                .await
            {
                Ok(Some(attempts)) => attempts,
                Ok(None) => continue, // already terminal or picked up elsewhere
                Err(e) => {
                    tracing::warn!("failed to mark job {} processing: {}", job.job_id, e);
                    continue;
                }
            };

            self.active.fetch_add(1, Ordering::SeqCst);
            let manager = self.clone();
            handles.push(tokio::spawn(async move {
                let _guard = ActiveGuard(manager.active.clone());
                let result = handlers::dispatch_job(&manager.pool, &manager.provider, &job).await;
                manager.apply_outcome(&job, attempts, result).await;
            }));
        }
        handles
    }

    /// Map a handler outcome onto the job row, the pause map, and the
    /// target entity.
    async fn apply_outcome(&self, job: &JobRow, attempts: i64, result: Result<(), JobError>) {
        let job_id = job.job_id.clone();
        match result {
            Ok(()) => {
                let set = self
                    .pool
                    .run(move |conn| {
                        db::set_job_status_sync(conn, &job_id, JobStatus::Completed, None)
                    })
                    .await;
                if let Err(e) = set {
                    tracing::warn!("failed to complete job {}: {}", job.job_id, e);
                }
                tracing::debug!(job = %job.job_id, task = %job.task_type, "job completed");
            }
            Err(JobError::RateLimited { retry_after_secs }) => {
                let pause_secs = retry_after_secs.unwrap_or(DEFAULT_PAUSE_SECS);
                self.pause_task_type(&job.task_type, pause_secs);
                let set = self
                    .pool
                    .run(move |conn| {
                        db::set_job_rate_limited_sync(conn, &job_id, Some("rate limited"))
                    })
                    .await;
                if let Err(e) = set {
                    tracing::warn!("failed to mark job {} rate_limited: {}", job.job_id, e);
                }
                handlers::mirror_status(&self.pool, job, "rate_limited", None).await;
                tracing::info!(
                    task = %job.task_type,
                    pause_secs,
                    "task type paused after rate limit"
                );
            }
            Err(JobError::PayloadParse(msg)) => {
                let set = self
                    .pool
                    .run(move |conn| {
                        db::set_job_status_sync(
                            conn,
                            &job_id,
                            JobStatus::FailedPayloadParsing,
                            Some(&msg),
                        )
                    })
                    .await;
                if let Err(e) = set {
                    tracing::warn!("failed to mark job {} payload failure: {}", job.job_id, e);
                }
            }
            Err(JobError::Provider(msg)) => {
                if attempts < job.max_attempts {
                    tracing::info!(
                        job = %job.job_id,
                        attempts,
                        max = job.max_attempts,
                        "provider error, will retry: {}", msg
                    );
                    let set = self
                        .pool
                        .run(move |conn| {
                            db::set_job_status_sync(conn, &job_id, JobStatus::RetryAi, Some(&msg))
                        })
                        .await;
                    if let Err(e) = set {
                        tracing::warn!("failed to mark job {} retry_ai: {}", job.job_id, e);
                    }
                } else {
                    tracing::warn!(
                        job = %job.job_id,
                        attempts,
                        "provider error after max attempts: {}", msg
                    );
                    let error_for_job = msg.clone();
                    let set = self
                        .pool
                        .run(move |conn| {
                            db::set_job_status_sync(
                                conn,
                                &job_id,
                                JobStatus::FailedAi,
                                Some(&error_for_job),
                            )
                        })
                        .await;
                    if let Err(e) = set {
                        tracing::warn!("failed to mark job {} failed_ai: {}", job.job_id, e);
                    }
                    handlers::mirror_status(&self.pool, job, "failed_ai", Some(&msg)).await;
                }
            }
            Err(JobError::JobLogic(msg)) => {
                tracing::warn!(job = %job.job_id, "job logic failure: {}", msg);
                // Best-effort: the job may be gone or the DB unreachable.
                let _ = self
                    .pool
                    .run(move |conn| {
                        db::set_job_status_sync(
                            conn,
                            &job_id,
                            JobStatus::FailedJobLogic,
                            Some(&msg),
                        )
                    })
                    .await;
            }
        }
    }

    /// Pause a task type for the given duration.
    fn pause_task_type(&self, task_type: &str, secs: u64) {
        if let Ok(mut paused) = self.paused.lock() {
            paused.insert(
                task_type.to_string(),
                Instant::now() + Duration::from_secs(secs),
            );
        }
    }

    /// Drop expired pauses and return the still-paused task types.
    fn prune_and_list_paused(&self) -> Vec<String> {
        let now = Instant::now();
        match self.paused.lock() {
            Ok(mut paused) => {
                paused.retain(|task, until| {
                    let keep = *until > now;
                    if !keep {
                        tracing::info!(task = %task, "task type pause expired");
                    }
                    keep
                });
                paused.keys().cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// Whether a task type is currently paused (test visibility).
    pub fn is_task_type_paused(&self, task_type: &str) -> bool {
        self.paused
            .lock()
            .map(|paused| {
                paused
                    .get(task_type)
                    .map(|until| *until > Instant::now())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Currently in-flight dispatch count (test visibility).
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Spawn the job manager; dropping the returned sender (or sending true)
/// stops the loop.
pub fn spawn_job_manager(
    pool: Arc<DatabasePool>,
    provider: Arc<dyn EnrichmentProvider>,
    config: JobConfig,
) -> watch::Sender<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let manager = JobManager::new(pool, provider, config);
    tokio::spawn(async move {
        manager.run(shutdown_rx).await;
    });
    shutdown_tx
}
