//! In-memory `VcsAdapter` for tests: commits are tree snapshots, the
//! working tree is a path -> content map, and any operation can be made
//! to fail on demand.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use checkpoint_lib::git::{
    CommitInfo, DiffTarget, FileChange, FileChangeStatus, GitError, GitErrorCode, ResetMode,
    VcsAdapter,
};

type Tree = BTreeMap<String, String>;

#[derive(Debug, Clone)]
struct FakeCommit {
    tree: Tree,
    message: String,
    parent: Option<String>,
}

#[derive(Default)]
struct FakeRepo {
    worktree: Tree,
    commits: HashMap<String, FakeCommit>,
    head: Option<String>,
    next_id: u64,
    failing: HashSet<String>,
    calls: Vec<String>,
    stash: Vec<Tree>,
}

impl FakeRepo {
    fn head_tree(&self) -> Tree {
        self.head
            .as_ref()
            .and_then(|head| self.commits.get(head))
            .map(|commit| commit.tree.clone())
            .unwrap_or_default()
    }

    fn tree_at(&self, commit: &str, op: &str) -> Result<Tree, GitError> {
        self.commits
            .get(commit)
            .map(|commit| commit.tree.clone())
            .ok_or_else(|| failure(op, &format!("bad revision '{commit}'")))
    }
}

fn failure(op: &str, message: &str) -> GitError {
    GitError::new(GitErrorCode::CommandFailed, op, message)
}

fn line_stats(old: &str, new: &str) -> (u32, u32) {
    let patch = diffy::create_patch(old, new);
    let mut additions = 0;
    let mut deletions = 0;
    for hunk in patch.hunks() {
        for line in hunk.lines() {
            match line {
                diffy::Line::Insert(_) => additions += 1,
                diffy::Line::Delete(_) => deletions += 1,
                diffy::Line::Context(_) => {}
            }
        }
    }
    (additions, deletions)
}

#[derive(Default)]
pub struct FakeVcs {
    repo: Mutex<FakeRepo>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let fake = Self::new();
        for (path, content) in files {
            fake.write(path, content);
        }
        fake
    }

    pub fn write(&self, path: &str, content: &str) {
        self.repo
            .lock()
            .unwrap()
            .worktree
            .insert(path.to_string(), content.to_string());
    }

    pub fn remove(&self, path: &str) {
        self.repo.lock().unwrap().worktree.remove(path);
    }

    pub fn read(&self, path: &str) -> Option<String> {
        self.repo.lock().unwrap().worktree.get(path).cloned()
    }

    pub fn worktree(&self) -> BTreeMap<String, String> {
        self.repo.lock().unwrap().worktree.clone()
    }

    pub fn head(&self) -> Option<String> {
        self.repo.lock().unwrap().head.clone()
    }

    pub fn commit_count(&self) -> usize {
        self.repo.lock().unwrap().commits.len()
    }

    /// Simulates history rewritten behind our back.
    pub fn forget_commit(&self, hash: &str) {
        self.repo.lock().unwrap().commits.remove(hash);
    }

    /// Makes every later call of `op` fail.
    pub fn fail_on(&self, op: &str) {
        self.repo.lock().unwrap().failing.insert(op.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.repo.lock().unwrap().calls.clone()
    }

    pub fn position(&self, op: &str) -> Option<usize> {
        self.calls().iter().position(|call| call == op)
    }

    fn enter(&self, op: &str) -> Result<std::sync::MutexGuard<'_, FakeRepo>, GitError> {
        let mut repo = self.repo.lock().unwrap();
        repo.calls.push(op.to_string());
        if repo.failing.contains(op) {
            return Err(failure(op, "injected failure"));
        }
        Ok(repo)
    }
}

#[async_trait]
impl VcsAdapter for FakeVcs {
    async fn run(&self, args: &[&str], _cwd: &Path) -> Result<String, GitError> {
        Err(failure(&args.join(" "), "fake repository runs no commands"))
    }

    async fn ensure_repo(&self, _path: &Path) -> bool {
        self.enter("ensure_repo").is_ok()
    }

    async fn current_commit(&self, _path: &Path) -> Option<String> {
        self.head()
    }

    async fn current_branch(&self, _path: &Path) -> String {
        checkpoint_lib::git::DEFAULT_BRANCH.to_string()
    }

    async fn is_clean(&self, _path: &Path) -> bool {
        let repo = self.repo.lock().unwrap();
        repo.head_tree() == repo.worktree
    }

    async fn commit_all(&self, _path: &Path, message: &str) -> Result<String, GitError> {
        let mut repo = self.enter("commit_all")?;
        if let Some(head) = repo.head.clone() {
            if repo.head_tree() == repo.worktree {
                return Ok(head);
            }
        }

        repo.next_id += 1;
        let hash = format!("{:040x}", repo.next_id);
        let commit = FakeCommit {
            tree: repo.worktree.clone(),
            message: message.to_string(),
            parent: repo.head.clone(),
        };
        repo.commits.insert(hash.clone(), commit);
        repo.head = Some(hash.clone());
        Ok(hash)
    }

    async fn diff(
        &self,
        _path: &Path,
        from: &str,
        to: &DiffTarget,
    ) -> Result<Vec<FileChange>, GitError> {
        let repo = self.enter("diff")?;
        let old = repo.tree_at(from, "diff")?;
        let new = match to {
            DiffTarget::WorkingTree => repo.worktree.clone(),
            DiffTarget::Commit(commit) => repo.tree_at(commit, "diff")?,
        };

        let paths: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
        let mut changes = Vec::new();
        for path in paths {
            let change = match (old.get(path), new.get(path)) {
                (Some(before), Some(after)) if before != after => {
                    let mut change = FileChange::new(path.clone(), FileChangeStatus::Modified);
                    (change.additions, change.deletions) = line_stats(before, after);
                    change
                }
                (None, Some(after)) => {
                    let mut change = FileChange::new(path.clone(), FileChangeStatus::Added);
                    change.additions = after.lines().count() as u32;
                    change
                }
                (Some(before), None) => {
                    let mut change = FileChange::new(path.clone(), FileChangeStatus::Deleted);
                    change.deletions = before.lines().count() as u32;
                    change
                }
                _ => continue,
            };
            changes.push(change);
        }
        Ok(changes)
    }

    async fn file_diff(
        &self,
        _path: &Path,
        from: &str,
        to: &DiffTarget,
        file: &str,
    ) -> Result<String, GitError> {
        let repo = self.enter("file_diff")?;
        let old = repo.tree_at(from, "file_diff")?;
        let new = match to {
            DiffTarget::WorkingTree => repo.worktree.clone(),
            DiffTarget::Commit(commit) => repo.tree_at(commit, "file_diff")?,
        };
        let before = old.get(file).map(String::as_str).unwrap_or("");
        let after = new.get(file).map(String::as_str).unwrap_or("");
        Ok(diffy::create_patch(before, after).to_string())
    }

    async fn reset(&self, _path: &Path, commit: &str, mode: ResetMode) -> Result<(), GitError> {
        let mut repo = self.enter("reset")?;
        let target = repo.tree_at(commit, "reset")?;

        if mode == ResetMode::Hard {
            // untracked files survive a hard reset
            let tracked = repo.head_tree();
            let mut worktree = target.clone();
            for (path, content) in &repo.worktree {
                if !tracked.contains_key(path) && !target.contains_key(path) {
                    worktree.insert(path.clone(), content.clone());
                }
            }
            repo.worktree = worktree;
        }
        repo.head = Some(commit.to_string());
        Ok(())
    }

    async fn checkout_paths(
        &self,
        _path: &Path,
        commit: &str,
        files: &[String],
    ) -> Result<(), GitError> {
        if files.is_empty() {
            return Ok(());
        }
        let mut repo = self.enter("checkout_paths")?;
        let tree = repo.tree_at(commit, "checkout_paths")?;
        for file in files {
            let content = tree.get(file).cloned().ok_or_else(|| {
                failure(
                    "checkout_paths",
                    &format!("pathspec '{file}' did not match any file(s) known to git"),
                )
            })?;
            repo.worktree.insert(file.clone(), content);
        }
        Ok(())
    }

    async fn remove_paths(&self, _path: &Path, files: &[String]) -> Result<(), GitError> {
        if files.is_empty() {
            return Ok(());
        }
        let mut repo = self.enter("remove_paths")?;
        for file in files {
            repo.worktree.remove(file);
        }
        Ok(())
    }

    async fn commit_exists(&self, _path: &Path, commit: &str) -> bool {
        self.repo.lock().unwrap().commits.contains_key(commit)
    }

    async fn path_exists_at(&self, _path: &Path, commit: &str, file: &str) -> bool {
        self.repo
            .lock()
            .unwrap()
            .commits
            .get(commit)
            .is_some_and(|commit| commit.tree.contains_key(file))
    }

    async fn commit_message(&self, _path: &Path, commit: &str) -> Option<String> {
        self.repo
            .lock()
            .unwrap()
            .commits
            .get(commit)
            .map(|commit| commit.message.clone())
    }

    async fn commit_date(&self, _path: &Path, commit: &str) -> Option<String> {
        self.repo
            .lock()
            .unwrap()
            .commits
            .contains_key(commit)
            .then(|| "2024-01-01T00:00:00+00:00".to_string())
    }

    async fn recent_commits(&self, _path: &Path, limit: u32) -> Vec<CommitInfo> {
        let repo = self.repo.lock().unwrap();
        let mut commits = Vec::new();
        let mut cursor = repo.head.clone();
        while let Some(hash) = cursor {
            if commits.len() >= limit as usize {
                break;
            }
            let Some(commit) = repo.commits.get(&hash) else {
                break;
            };
            commits.push(CommitInfo {
                short_hash: hash[..7].to_string(),
                hash: hash.clone(),
                author_name: "fake".to_string(),
                author_email: "fake@example.com".to_string(),
                date: "2024-01-01T00:00:00+00:00".to_string(),
                message: commit.message.lines().next().unwrap_or("").to_string(),
                parents: commit.parent.iter().map(|p| p[..7].to_string()).collect(),
            });
            cursor = commit.parent.clone();
        }
        commits
    }

    async fn stash_push(&self, _path: &Path, _message: &str) -> Result<bool, GitError> {
        let mut repo = self.enter("stash_push")?;
        let head_tree = repo.head_tree();
        if head_tree == repo.worktree {
            return Ok(false);
        }
        let saved = std::mem::replace(&mut repo.worktree, head_tree);
        repo.stash.push(saved);
        Ok(true)
    }

    async fn stash_pop(&self, _path: &Path) -> Result<(), GitError> {
        let mut repo = self.enter("stash_pop")?;
        let saved = repo
            .stash
            .pop()
            .ok_or_else(|| failure("stash_pop", "No stash entries found."))?;
        repo.worktree = saved;
        Ok(())
    }

    async fn exclude_path(&self, _path: &Path, _pattern: &str) -> Result<(), GitError> {
        self.enter("exclude_path").map(|_| ())
    }
}
