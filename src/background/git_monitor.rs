// src/background/git_monitor.rs
// Polled git monitor: records new commits and their file changes

use crate::db::{self, CommitRow, DatabasePool};
use crate::git;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Commits recorded per poll; a deep backlog drains over several cycles.
const COMMITS_PER_POLL: usize = 200;

/// Poll the repository, inserting commits newer than the stored cursor
/// and advancing it. Returns the number of commits recorded.
pub async fn poll_once(pool: &Arc<DatabasePool>, repo_path: &PathBuf) -> crate::Result<usize> {
    let cursor = pool
        .run(|conn| db::get_state_sync(conn, db::LAST_PROCESSED_COMMIT_OID))
        .await?;

    let repo_path = repo_path.clone();
    let commits = tokio::task::spawn_blocking(move || {
        git::collect_commits_since(&repo_path, cursor.as_deref(), COMMITS_PER_POLL)
    })
    .await??;

    if commits.is_empty() {
        return Ok(0);
    }

    let count = commits.len();
    let newest_oid = commits[commits.len() - 1].oid.clone();
    pool.run_with_retry(move |conn| {
        for commit in &commits {
            let row = CommitRow {
                commit_hash: commit.oid.clone(),
                message: commit.message.clone(),
                author_name: commit.author_name.clone(),
                author_email: commit.author_email.clone(),
                commit_date: commit.time.to_rfc3339(),
            };
            db::insert_commit_sync(conn, &row, &commit.files)?;
        }
        db::set_state_sync(conn, db::LAST_PROCESSED_COMMIT_OID, &newest_oid)?;
        Ok::<_, rusqlite::Error>(())
    })
    .await?;

    Ok(count)
}

/// Spawn the monitor loop. Independent of the job manager; stops when the
/// shutdown channel fires.
pub fn spawn(
    pool: Arc<DatabasePool>,
    repo_path: PathBuf,
    interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(path = %repo_path.display(), interval_ms, "git monitor started");
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match poll_once(&pool, &repo_path).await {
                        Ok(0) => {}
                        Ok(n) => tracing::info!("git monitor recorded {} new commits", n),
                        Err(e) => tracing::warn!("git monitor poll failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("git monitor shutting down");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn run_git(dir: &std::path::Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .status()
            .expect("run git");
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_poll_once_records_and_advances_cursor() {
        let dir = tempfile::tempdir().expect("tempdir");
        run_git(dir.path(), &["init", "-q"]);
        std::fs::write(dir.path().join("a.txt"), "one\n").expect("write");
        run_git(dir.path(), &["add", "."]);
        run_git(dir.path(), &["commit", "-q", "-m", "first"]);

        let pool = Arc::new(DatabasePool::open_in_memory().await.expect("pool"));
        let repo_path = dir.path().to_path_buf();

        let recorded = poll_once(&pool, &repo_path).await.expect("poll");
        assert_eq!(recorded, 1);

        // Second poll with no new commits records nothing.
        let recorded = poll_once(&pool, &repo_path).await.expect("poll");
        assert_eq!(recorded, 0);

        // A new commit is picked up incrementally.
        std::fs::write(dir.path().join("a.txt"), "two\n").expect("write");
        run_git(dir.path(), &["add", "."]);
        run_git(dir.path(), &["commit", "-q", "-m", "second"]);
        let recorded = poll_once(&pool, &repo_path).await.expect("poll");
        assert_eq!(recorded, 1);

        let commits = pool
            .run(|conn| db::recent_commits_sync(conn, 10))
            .await
            .expect("commits");
        assert_eq!(commits.len(), 2);
        let cursor = pool
            .run(|conn| db::get_state_sync(conn, db::LAST_PROCESSED_COMMIT_OID))
            .await
            .expect("cursor");
        assert!(cursor.is_some());
    }
}
