// src/git/mod.rs
// git2-based repository reads for the commit monitor

use crate::error::Result;
use chrono::{DateTime, Utc};
use git2::{Delta, DiffOptions, Repository, Sort};
use std::path::Path;

/// A commit plus the files it touched, ready for storage.
#[derive(Debug, Clone)]
pub struct CommitWithFiles {
    pub oid: String,
    pub message: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub time: DateTime<Utc>,
    /// (file_path, status) pairs; status is added/modified/deleted/renamed.
    pub files: Vec<(String, String)>,
}

/// Whether the path is inside a git repository.
pub fn is_git_repository(path: &Path) -> bool {
    Repository::discover(path).is_ok()
}

/// Collect commits reachable from HEAD but not from `since_oid`, oldest
/// first, capped at `limit`. A missing or unknown cursor yields the most
/// recent `limit` commits.
pub fn collect_commits_since(
    repo_path: &Path,
    since_oid: Option<&str>,
    limit: usize,
) -> Result<Vec<CommitWithFiles>> {
    let repo = Repository::discover(repo_path)?;

    let head = match repo.head() {
        Ok(head) => head,
        // Unborn branch (fresh repo): nothing to record yet.
        Err(_) => return Ok(Vec::new()),
    };
    let head_oid = match head.target() {
        Some(oid) => oid,
        None => return Ok(Vec::new()),
    };

    let mut revwalk = repo.revwalk()?;
    revwalk.push(head_oid)?;
    revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
    if let Some(cursor) = since_oid {
        if let Ok(oid) = git2::Oid::from_str(cursor) {
            // An unknown cursor (rewritten history) falls back to a full walk.
            if revwalk.hide(oid).is_err() {
                tracing::warn!("git cursor {} not found in repository, rescanning", cursor);
            }
        }
    }

    let mut commits = Vec::new();
    for oid in revwalk.take(limit) {
        let oid = oid?;
        let commit = repo.find_commit(oid)?;

        let time = DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0)
            .unwrap_or_else(Utc::now);
        let author = commit.author();

        let files = files_for_commit(&repo, &commit)?;
        commits.push(CommitWithFiles {
            oid: oid.to_string(),
            message: commit.message().map(|m| m.trim().to_string()),
            author_name: author.name().map(|n| n.to_string()),
            author_email: author.email().map(|e| e.to_string()),
            time,
            files,
        });
    }

    // revwalk yields newest first; storage wants oldest first so the
    // cursor always lands on the newest recorded commit.
    commits.reverse();
    Ok(commits)
}

/// Diff a commit against its first parent (or the empty tree for roots).
fn files_for_commit(repo: &Repository, commit: &git2::Commit) -> Result<Vec<(String, String)>> {
    let tree = commit.tree()?;
    let parent_tree = match commit.parent(0) {
        Ok(parent) => Some(parent.tree()?),
        Err(_) => None,
    };

    let mut opts = DiffOptions::new();
    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))?;

    let mut files = Vec::new();
    for delta in diff.deltas() {
        let path = delta
            .new_file()
            .path()
            .or_else(|| delta.old_file().path())
            .map(|p| p.to_string_lossy().to_string());
        if let Some(path) = path {
            files.push((path, delta_status(delta.status()).to_string()));
        }
    }
    Ok(files)
}

fn delta_status(status: Delta) -> &'static str {
    match status {
        Delta::Added => "added",
        Delta::Deleted => "deleted",
        Delta::Renamed => "renamed",
        _ => "modified",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn run_git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .status()
            .expect("run git");
        assert!(status.success(), "git {:?} failed", args);
    }

    fn fixture_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        run_git(dir.path(), &["init", "-q"]);
        std::fs::write(dir.path().join("a.txt"), "one\n").expect("write");
        run_git(dir.path(), &["add", "."]);
        run_git(dir.path(), &["commit", "-q", "-m", "add a"]);
        std::fs::write(dir.path().join("a.txt"), "two\n").expect("write");
        std::fs::write(dir.path().join("b.txt"), "new\n").expect("write");
        run_git(dir.path(), &["add", "."]);
        run_git(dir.path(), &["commit", "-q", "-m", "update a, add b"]);
        dir
    }

    #[test]
    fn test_is_git_repository() {
        let dir = fixture_repo();
        assert!(is_git_repository(dir.path()));
        let plain = tempfile::tempdir().expect("tempdir");
        assert!(!is_git_repository(plain.path()));
    }

    #[test]
    fn test_collect_commits_oldest_first_with_files() {
        let dir = fixture_repo();
        let commits = collect_commits_since(dir.path(), None, 50).expect("collect");
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].message.as_deref(), Some("add a"));
        assert_eq!(commits[0].files, vec![("a.txt".to_string(), "added".to_string())]);

        let second = &commits[1];
        assert_eq!(second.message.as_deref(), Some("update a, add b"));
        assert!(second.files.contains(&("a.txt".to_string(), "modified".to_string())));
        assert!(second.files.contains(&("b.txt".to_string(), "added".to_string())));
    }

    #[test]
    fn test_collect_commits_since_cursor() {
        let dir = fixture_repo();
        let all = collect_commits_since(dir.path(), None, 50).expect("collect");
        let first_oid = &all[0].oid;
        let newer = collect_commits_since(dir.path(), Some(first_oid), 50).expect("collect");
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].oid, all[1].oid);

        // Cursor at HEAD yields nothing new
        let none = collect_commits_since(dir.path(), Some(&all[1].oid), 50).expect("collect");
        assert!(none.is_empty());
    }
}
