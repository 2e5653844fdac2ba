//! Version-control seam used by the checkpoint subsystem.
//!
//! Read/probe operations never fail: they fall back to a safe default
//! (`false`, `None`, `"main"`). Mutating operations return `GitError`
//! and are never retried.

use std::path::Path;

use async_trait::async_trait;

use super::types::{CommitInfo, DiffTarget, FileChange, GitError, ResetMode};

pub const DEFAULT_BRANCH: &str = "main";

#[async_trait]
pub trait VcsAdapter: Send + Sync {
    /// Runs the VCS binary with an argument vector and returns trimmed stdout.
    async fn run(&self, args: &[&str], cwd: &Path) -> Result<String, GitError>;

    /// Returns true if `path` is (or could be made into) a repository root.
    async fn ensure_repo(&self, path: &Path) -> bool;

    /// `None` for a repository without commits.
    async fn current_commit(&self, path: &Path) -> Option<String>;

    async fn current_branch(&self, path: &Path) -> String;

    async fn is_clean(&self, path: &Path) -> bool;

    /// Stages everything and commits only when the tree differs from HEAD.
    async fn commit_all(&self, path: &Path, message: &str) -> Result<String, GitError>;

    /// File-level changes between `from` and `to`, without per-file diff text.
    async fn diff(
        &self,
        path: &Path,
        from: &str,
        to: &DiffTarget,
    ) -> Result<Vec<FileChange>, GitError>;

    /// Unified diff text for one file between `from` and `to`.
    async fn file_diff(
        &self,
        path: &Path,
        from: &str,
        to: &DiffTarget,
        file: &str,
    ) -> Result<String, GitError>;

    async fn reset(&self, path: &Path, commit: &str, mode: ResetMode) -> Result<(), GitError>;

    async fn reset_hard(&self, path: &Path, commit: &str) -> Result<(), GitError> {
        self.reset(path, commit, ResetMode::Hard).await
    }

    async fn reset_soft(&self, path: &Path, commit: &str) -> Result<(), GitError> {
        self.reset(path, commit, ResetMode::Soft).await
    }

    async fn reset_mixed(&self, path: &Path, commit: &str) -> Result<(), GitError> {
        self.reset(path, commit, ResetMode::Mixed).await
    }

    /// Restores only `files` from `commit`. No-op on an empty list.
    async fn checkout_paths(
        &self,
        path: &Path,
        commit: &str,
        files: &[String],
    ) -> Result<(), GitError>;

    /// Removes `files` from the index and the working tree. No-op on an empty list.
    async fn remove_paths(&self, path: &Path, files: &[String]) -> Result<(), GitError>;

    async fn commit_exists(&self, path: &Path, commit: &str) -> bool;

    /// True if `file` exists in the tree of `commit`.
    async fn path_exists_at(&self, path: &Path, commit: &str, file: &str) -> bool;

    async fn commit_message(&self, path: &Path, commit: &str) -> Option<String>;

    async fn commit_date(&self, path: &Path, commit: &str) -> Option<String>;

    async fn recent_commits(&self, path: &Path, limit: u32) -> Vec<CommitInfo>;

    /// Stashes pending changes; false when there was nothing to stash.
    async fn stash_push(&self, path: &Path, message: &str) -> Result<bool, GitError>;

    async fn stash_pop(&self, path: &Path) -> Result<(), GitError>;

    /// Keeps `pattern` out of snapshots via the repository-local exclude file.
    async fn exclude_path(&self, path: &Path, pattern: &str) -> Result<(), GitError>;
}
