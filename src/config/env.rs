// src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use crate::error::{DevctxError, Result};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Background job manager settings
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Max in-flight enrichment jobs (AI_JOB_CONCURRENCY)
    pub concurrency: usize,
    /// Delay between dispatches within a poll cycle (AI_JOB_DELAY_MS)
    pub job_delay_ms: u64,
    /// Attempts before a provider failure becomes terminal (MAX_AI_JOB_ATTEMPTS)
    pub max_attempts: u32,
    /// Queue poll interval (AI_JOB_POLLING_INTERVAL_MS)
    pub polling_interval_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            job_delay_ms: 500,
            max_attempts: 3,
            polling_interval_ms: 5000,
        }
    }
}

/// All recognized environment options.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Storage endpoint (TURSO_DATABASE_URL). A filesystem path or file: URI
    /// for the embedded engine.
    pub database_url: Option<String>,
    /// Storage credential (TURSO_AUTH_TOKEN). Ignored for local files.
    pub auth_token: Option<String>,
    /// Working tree root (PROJECT_PATH). Must be a git repository.
    pub project_path: PathBuf,
    /// Log level (LOG_LEVEL): debug, info, warn, error
    pub log_level: String,
    /// Max text file size in bytes (MAX_TEXT_FILE_SIZE_MB, default 5 MB)
    pub max_text_file_size_bytes: u64,
    /// Languages the indexing collaborator parses (TREE_SITTER_LANGUAGES)
    pub tree_sitter_languages: Vec<String>,
    /// Enrichment model (AI_MODEL_NAME)
    pub ai_model_name: Option<String>,
    /// Thinking budget forwarded to the provider (AI_THINKING_BUDGET)
    pub ai_thinking_budget: u32,
    /// Enrichment provider API key (DEEPSEEK_API_KEY)
    pub ai_api_key: Option<String>,
    /// Job manager settings
    pub jobs: JobConfig,
    /// Seeds for relationship expansion (MAX_SEED_ENTITIES_FOR_EXPANSION)
    pub max_seed_entities: usize,
    /// Git monitor poll interval (GIT_MONITOR_INTERVAL_MS)
    pub git_monitor_interval_ms: u64,
}

/// Default database location: <project>/.devctx/devctx.db
pub fn default_db_path(project_path: &std::path::Path) -> PathBuf {
    project_path.join(".devctx").join("devctx.db")
}

impl EnvConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Self {
        let project_path = std::env::var("PROJECT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let config = Self {
            database_url: read_var("TURSO_DATABASE_URL"),
            auth_token: read_var("TURSO_AUTH_TOKEN"),
            project_path,
            log_level: read_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            max_text_file_size_bytes: parse_var("MAX_TEXT_FILE_SIZE_MB")
                .unwrap_or(5u64)
                .saturating_mul(1024 * 1024),
            tree_sitter_languages: read_var("TREE_SITTER_LANGUAGES")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(|| {
                    vec![
                        "javascript".to_string(),
                        "python".to_string(),
                        "typescript".to_string(),
                    ]
                }),
            ai_model_name: read_var("AI_MODEL_NAME"),
            ai_thinking_budget: parse_var("AI_THINKING_BUDGET").unwrap_or(1000),
            ai_api_key: read_var("DEEPSEEK_API_KEY"),
            jobs: JobConfig {
                concurrency: parse_var("AI_JOB_CONCURRENCY").unwrap_or(2),
                job_delay_ms: parse_var("AI_JOB_DELAY_MS").unwrap_or(500),
                max_attempts: parse_var("MAX_AI_JOB_ATTEMPTS").unwrap_or(3),
                polling_interval_ms: parse_var("AI_JOB_POLLING_INTERVAL_MS").unwrap_or(5000),
            },
            max_seed_entities: parse_var("MAX_SEED_ENTITIES_FOR_EXPANSION").unwrap_or(3),
            git_monitor_interval_ms: parse_var("GIT_MONITOR_INTERVAL_MS").unwrap_or(30_000),
        };
        config.log_status();
        config
    }

    /// Validate startup-critical options. A failure here means exit code 1.
    pub fn validate(&self) -> Result<()> {
        if !self.project_path.exists() {
            return Err(DevctxError::Config(format!(
                "PROJECT_PATH does not exist: {}",
                self.project_path.display()
            )));
        }
        if git2::Repository::discover(&self.project_path).is_err() {
            return Err(DevctxError::Config(format!(
                "PROJECT_PATH is not a git repository: {}",
                self.project_path.display()
            )));
        }
        if let Some(url) = &self.database_url {
            if url.starts_with("libsql://") || url.starts_with("http://") || url.starts_with("https://") {
                return Err(DevctxError::Config(format!(
                    "remote storage endpoints are not supported by the embedded engine: {url}"
                )));
            }
        }
        Ok(())
    }

    /// Resolve the database path from TURSO_DATABASE_URL or the default.
    pub fn db_path(&self) -> PathBuf {
        match &self.database_url {
            Some(url) => {
                let stripped = url.strip_prefix("file:").unwrap_or(url);
                PathBuf::from(stripped)
            }
            None => default_db_path(&self.project_path),
        }
    }

    /// Whether enrichment jobs can run (provider key present).
    pub fn has_ai_provider(&self) -> bool {
        self.ai_api_key.is_some()
    }

    /// Log which optional capabilities are configured (without exposing values).
    fn log_status(&self) {
        if self.auth_token.is_some() && self.database_url.as_deref().is_none_or(is_local_url) {
            warn!("TURSO_AUTH_TOKEN is set but the storage endpoint is a local file; ignoring");
        }
        if self.ai_api_key.is_none() {
            warn!("No enrichment API key configured - AI jobs will stay pending");
        } else {
            debug!(model = ?self.ai_model_name, "Enrichment provider configured");
        }
    }
}

fn is_local_url(url: &str) -> bool {
    !(url.starts_with("libsql://") || url.starts_with("http://") || url.starts_with("https://"))
}

/// Read an env var, filtering empty values.
fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse an env var, discarding unparseable values.
fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    read_var(name).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_config_defaults() {
        let jobs = JobConfig::default();
        assert_eq!(jobs.concurrency, 2);
        assert_eq!(jobs.job_delay_ms, 500);
        assert_eq!(jobs.max_attempts, 3);
        assert_eq!(jobs.polling_interval_ms, 5000);
    }

    #[test]
    fn test_is_local_url() {
        assert!(is_local_url("/tmp/db.sqlite"));
        assert!(is_local_url("file:/tmp/db.sqlite"));
        assert!(!is_local_url("libsql://host.turso.io"));
        assert!(!is_local_url("https://host.turso.io"));
    }

    #[test]
    fn test_default_db_path() {
        let path = default_db_path(std::path::Path::new("/work/proj"));
        assert_eq!(path, PathBuf::from("/work/proj/.devctx/devctx.db"));
    }
}
