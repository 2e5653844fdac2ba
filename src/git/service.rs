use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::fs;
use tokio::process::Command as AsyncCommand;

use crate::git::adapter::{VcsAdapter, DEFAULT_BRANCH};
use crate::git::classify::is_binary_path;
use crate::git::types::*;

const FALLBACK_USER_NAME: &str = "OrbitX Checkpoint";
const FALLBACK_USER_EMAIL: &str = "checkpoint@orbitx.local";

static RENAME_BRACES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*)\{(.*) => (.*)\}(.*)$").expect("static regex"));

/// `git` backed implementation of [`VcsAdapter`].
#[derive(Debug, Clone)]
pub struct GitService {
    program: String,
}

impl GitService {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn execute(&self, args: &[&str], cwd: &Path) -> Result<Vec<u8>, GitError> {
        self.execute_with_env(args, cwd, &[]).await
    }

    async fn execute_with_env(
        &self,
        args: &[&str],
        cwd: &Path,
        envs: &[(&str, &Path)],
    ) -> Result<Vec<u8>, GitError> {
        let command = args.join(" ");
        let mut cmd = AsyncCommand::new(&self.program);
        cmd.args(args)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in envs {
            cmd.env(key, value);
        }
        if !cwd.as_os_str().is_empty() {
            cmd.current_dir(cwd);
        }

        tracing::debug!("git {} (cwd={})", command, cwd.display());

        let output = cmd.output().await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                GitError::new(GitErrorCode::GitNotInstalled, &command, "git executable not found")
            }
            _ => GitError::new(GitErrorCode::IoError, &command, e.to_string()),
        })?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = if Self::is_not_a_repository(&stderr) {
                GitErrorCode::NotARepository
            } else {
                GitErrorCode::CommandFailed
            };
            Err(GitError::new(
                code,
                command,
                if stderr.is_empty() {
                    format!("exited with {}", output.status)
                } else {
                    stderr
                },
            ))
        }
    }

    async fn execute_text(&self, args: &[&str], cwd: &Path) -> Result<String, GitError> {
        let bytes = self.execute(args, cwd).await?;
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }

    fn is_not_a_repository(stderr_or_message: &str) -> bool {
        let msg = stderr_or_message.to_lowercase();
        msg.contains("not a git repository")
            || msg.contains("fatal: not a repository")
            || (msg.contains("fatal:") && msg.contains("repository") && msg.contains("not"))
    }

    /// Revisions must never be parsed as options.
    fn validate_rev(rev: &str) -> Result<(), GitError> {
        if rev.is_empty() || rev.starts_with('-') || rev.contains(char::is_whitespace) {
            return Err(GitError::new(
                GitErrorCode::ParseError,
                "rev-parse",
                format!("invalid revision: {rev:?}"),
            ));
        }
        Ok(())
    }

    /// Paths must stay inside the working tree.
    fn validate_relative(file: &str) -> Result<(), GitError> {
        let path = Path::new(file);
        let escapes = file.is_empty()
            || path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if escapes {
            return Err(GitError::new(
                GitErrorCode::ParseError,
                "pathspec",
                format!("path escapes the working tree: {file:?}"),
            ));
        }
        Ok(())
    }

    async fn identity_args(&self, root: &Path) -> Vec<String> {
        match self.execute_text(&["config", "user.email"], root).await {
            Ok(email) if !email.trim().is_empty() => Vec::new(),
            _ => vec![
                "-c".to_string(),
                format!("user.name={FALLBACK_USER_NAME}"),
                "-c".to_string(),
                format!("user.email={FALLBACK_USER_EMAIL}"),
            ],
        }
    }

    async fn git_path(&self, root: &Path, name: &str) -> Result<PathBuf, GitError> {
        let text = self.execute_text(&["rev-parse", "--git-path", name], root).await?;
        let path = PathBuf::from(text.trim());
        if path.is_absolute() {
            return Ok(path);
        }
        // relative to the repository, and the caller's cwd may differ
        let root = fs::canonicalize(root)
            .await
            .unwrap_or_else(|_| root.to_path_buf());
        Ok(root.join(path))
    }

    /// Writes the current working tree (tracked + untracked, minus ignored)
    /// as a tree object through a throwaway index. The real index is untouched.
    async fn working_tree_id(&self, root: &Path) -> Result<String, GitError> {
        let real_index = self.git_path(root, "index").await?;
        let temp_index = TempIndex(
            real_index.with_file_name(format!("orbitx-checkpoint-index-{}", uuid::Uuid::new_v4())),
        );

        if fs::metadata(&real_index).await.is_ok() {
            fs::copy(&real_index, &temp_index.0).await.map_err(|e| {
                GitError::new(GitErrorCode::IoError, "copy index", e.to_string())
            })?;
        }

        let envs = [("GIT_INDEX_FILE", temp_index.0.as_path())];
        self.execute_with_env(&["add", "-A"], root, &envs).await?;
        let tree = self.execute_with_env(&["write-tree"], root, &envs).await?;
        Ok(String::from_utf8_lossy(&tree).trim().to_string())
    }

    async fn resolve_target(&self, root: &Path, to: &DiffTarget) -> Result<String, GitError> {
        match to {
            DiffTarget::Commit(commit) => {
                Self::validate_rev(commit)?;
                Ok(commit.clone())
            }
            DiffTarget::WorkingTree => self.working_tree_id(root).await,
        }
    }

    pub(crate) fn parse_name_status(output: &str) -> Vec<FileChange> {
        let mut files = Vec::new();
        for line in output.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            let parts: Vec<&str> = line.split('\t').collect();
            let Some(status_char) = parts[0].chars().next() else {
                continue;
            };
            let Some(status) = FileChangeStatus::from_status_char(status_char) else {
                continue;
            };

            let change = match (status_char, parts.get(1), parts.get(2)) {
                ('R', Some(old), Some(new)) => {
                    let mut change = FileChange::new(*new, status);
                    change.old_path = Some(old.to_string());
                    change
                }
                // copies keep only the destination
                ('C', Some(_), Some(new)) => FileChange::new(*new, status),
                (_, Some(path), _) => FileChange::new(*path, status),
                _ => continue,
            };
            files.push(change);
        }
        files
    }

    /// Parses `--numstat` into `path -> (additions, deletions, binary)`.
    pub(crate) fn parse_numstat(output: &str) -> HashMap<String, (u32, u32, bool)> {
        let mut stats = HashMap::new();
        for line in output.lines() {
            let parts: Vec<&str> = line.splitn(3, '\t').collect();
            if parts.len() < 3 {
                continue;
            }

            let binary = parts[0] == "-" && parts[1] == "-";
            let additions: u32 = parts[0].parse().unwrap_or(0);
            let deletions: u32 = parts[1].parse().unwrap_or(0);
            stats.insert(
                Self::rename_destination(parts[2]),
                (additions, deletions, binary),
            );
        }
        stats
    }

    /// `src/{a => b}/x.rs` → `src/b/x.rs`, `old => new` → `new`.
    pub(crate) fn rename_destination(raw: &str) -> String {
        if let Some(caps) = RENAME_BRACES.captures(raw) {
            let joined = format!("{}{}{}", &caps[1], &caps[3], &caps[4]);
            return joined.replace("//", "/");
        }
        match raw.split_once(" => ") {
            Some((_, new)) => new.to_string(),
            None => raw.to_string(),
        }
    }

    fn parse_commits(output: &[u8]) -> Vec<CommitInfo> {
        let mut commits = Vec::new();
        for record in output.split(|b| *b == 0) {
            if record.is_empty() {
                continue;
            }

            let fields: Vec<&[u8]> = record.split(|b| *b == 0x1f).collect();
            if fields.len() < 7 {
                continue;
            }

            let parents = String::from_utf8_lossy(fields[5])
                .split_whitespace()
                .map(|s| s[..7.min(s.len())].to_string())
                .collect();

            commits.push(CommitInfo {
                hash: String::from_utf8_lossy(fields[0]).trim().to_string(),
                short_hash: String::from_utf8_lossy(fields[1]).to_string(),
                author_name: String::from_utf8_lossy(fields[2]).to_string(),
                author_email: String::from_utf8_lossy(fields[3]).to_string(),
                date: String::from_utf8_lossy(fields[4]).to_string(),
                message: String::from_utf8_lossy(fields[6]).to_string(),
                parents,
            });
        }
        commits
    }
}

impl Default for GitService {
    fn default() -> Self {
        Self::new()
    }
}

struct TempIndex(PathBuf);

impl Drop for TempIndex {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[async_trait]
impl VcsAdapter for GitService {
    async fn run(&self, args: &[&str], cwd: &Path) -> Result<String, GitError> {
        Ok(self.execute_text(args, cwd).await?.trim().to_string())
    }

    async fn ensure_repo(&self, path: &Path) -> bool {
        if fs::metadata(path.join(".git")).await.is_ok() {
            return true;
        }

        if let Err(e) = self.execute(&["init", "--quiet"], path).await {
            tracing::warn!("git init failed in {}: {}", path.display(), e);
            return false;
        }
        let _ = self
            .execute(&["symbolic-ref", "HEAD", "refs/heads/main"], path)
            .await;

        fs::metadata(path.join(".git")).await.is_ok()
    }

    async fn current_commit(&self, path: &Path) -> Option<String> {
        self.run(&["rev-parse", "--verify", "--quiet", "HEAD^{commit}"], path)
            .await
            .ok()
            .filter(|hash| !hash.is_empty())
    }

    async fn current_branch(&self, path: &Path) -> String {
        self.run(&["symbolic-ref", "--short", "-q", "HEAD"], path)
            .await
            .ok()
            .filter(|branch| !branch.is_empty())
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string())
    }

    async fn is_clean(&self, path: &Path) -> bool {
        match self
            .execute(&["status", "--porcelain=v1", "--untracked-files=all"], path)
            .await
        {
            Ok(output) => output.iter().all(|b| b.is_ascii_whitespace()),
            Err(_) => false,
        }
    }

    async fn commit_all(&self, path: &Path, message: &str) -> Result<String, GitError> {
        self.execute(&["add", "-A"], path).await?;

        let head = self.current_commit(path).await;
        if let Some(head) = &head {
            let staged = self
                .execute_text(&["diff", "--cached", "--name-only", "HEAD"], path)
                .await?;
            if staged.trim().is_empty() {
                tracing::debug!("Working tree unchanged, reusing HEAD {}", head);
                return Ok(head.clone());
            }
        }

        let identity = self.identity_args(path).await;
        let mut args: Vec<&str> = identity.iter().map(String::as_str).collect();
        args.extend(["-c", "commit.gpgsign=false", "commit", "--no-verify", "--quiet"]);
        if head.is_none() {
            // first snapshot of an empty repository
            args.push("--allow-empty");
        }
        args.extend(["-m", message]);
        self.execute(&args, path).await?;

        self.current_commit(path).await.ok_or_else(|| {
            GitError::new(
                GitErrorCode::CommandFailed,
                "rev-parse HEAD",
                "commit succeeded but HEAD does not resolve",
            )
        })
    }

    async fn diff(
        &self,
        path: &Path,
        from: &str,
        to: &DiffTarget,
    ) -> Result<Vec<FileChange>, GitError> {
        Self::validate_rev(from)?;
        let to_rev = self.resolve_target(path, to).await?;

        let name_status = self
            .execute_text(
                &["-c", "core.quotepath=false", "diff", "--no-color", "--name-status", "-M", from, &to_rev],
                path,
            )
            .await?;

        let numstat = match self
            .execute_text(
                &["-c", "core.quotepath=false", "diff", "--no-color", "--numstat", "-M", from, &to_rev],
                path,
            )
            .await
        {
            Ok(text) => Self::parse_numstat(&text),
            Err(e) => {
                tracing::warn!("numstat unavailable, reporting zero line counts: {}", e);
                HashMap::new()
            }
        };

        let mut files = Self::parse_name_status(&name_status);
        for file in &mut files {
            let (additions, deletions, binary) =
                numstat.get(&file.path).copied().unwrap_or((0, 0, false));
            file.additions = additions;
            file.deletions = deletions;
            file.is_binary = binary || is_binary_path(&file.path);
        }
        Ok(files)
    }

    async fn file_diff(
        &self,
        path: &Path,
        from: &str,
        to: &DiffTarget,
        file: &str,
    ) -> Result<String, GitError> {
        Self::validate_rev(from)?;
        Self::validate_relative(file)?;
        let to_rev = self.resolve_target(path, to).await?;
        let bytes = self
            .execute(
                &["diff", "--no-color", "--unified=3", from, &to_rev, "--", file],
                path,
            )
            .await?;
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }

    async fn reset(&self, path: &Path, commit: &str, mode: ResetMode) -> Result<(), GitError> {
        Self::validate_rev(commit)?;
        self.execute(&["reset", mode.as_flag(), "--quiet", commit], path)
            .await?;
        tracing::info!("git reset {} {}", mode.as_flag(), commit);
        Ok(())
    }

    async fn checkout_paths(
        &self,
        path: &Path,
        commit: &str,
        files: &[String],
    ) -> Result<(), GitError> {
        if files.is_empty() {
            return Ok(());
        }
        Self::validate_rev(commit)?;
        for file in files {
            Self::validate_relative(file)?;
        }

        let mut args = vec!["checkout", commit, "--"];
        args.extend(files.iter().map(String::as_str));
        self.execute(&args, path).await?;
        Ok(())
    }

    async fn remove_paths(&self, path: &Path, files: &[String]) -> Result<(), GitError> {
        if files.is_empty() {
            return Ok(());
        }
        for file in files {
            Self::validate_relative(file)?;
        }

        let mut args = vec!["rm", "-q", "-f", "--cached", "--ignore-unmatch", "--"];
        args.extend(files.iter().map(String::as_str));
        self.execute(&args, path).await?;

        for file in files {
            match fs::remove_file(path.join(file)).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(GitError::new(
                        GitErrorCode::IoError,
                        format!("remove {file}"),
                        e.to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    async fn commit_exists(&self, path: &Path, commit: &str) -> bool {
        if Self::validate_rev(commit).is_err() {
            return false;
        }
        let object = format!("{commit}^{{commit}}");
        self.execute(&["cat-file", "-e", &object], path).await.is_ok()
    }

    async fn path_exists_at(&self, path: &Path, commit: &str, file: &str) -> bool {
        if Self::validate_rev(commit).is_err() || Self::validate_relative(file).is_err() {
            return false;
        }
        let object = format!("{commit}:{file}");
        self.execute(&["cat-file", "-e", &object], path).await.is_ok()
    }

    async fn commit_message(&self, path: &Path, commit: &str) -> Option<String> {
        Self::validate_rev(commit).ok()?;
        self.run(&["log", "-1", "--format=%B", commit], path).await.ok()
    }

    async fn commit_date(&self, path: &Path, commit: &str) -> Option<String> {
        Self::validate_rev(commit).ok()?;
        self.run(&["log", "-1", "--format=%cI", commit], path)
            .await
            .ok()
            .filter(|date| !date.is_empty())
    }

    async fn recent_commits(&self, path: &Path, limit: u32) -> Vec<CommitInfo> {
        let limit = limit.clamp(1, 200);
        let n_arg = format!("-n{limit}");
        let pretty_arg = "--pretty=format:%H%x1f%h%x1f%an%x1f%ae%x1f%aI%x1f%P%x1f%s";
        match self
            .execute(&["log", "-z", n_arg.as_str(), pretty_arg], path)
            .await
        {
            Ok(output) => Self::parse_commits(&output),
            // repositories without commits have no log
            Err(_) => Vec::new(),
        }
    }

    async fn stash_push(&self, path: &Path, message: &str) -> Result<bool, GitError> {
        if self.is_clean(path).await {
            return Ok(false);
        }
        let identity = self.identity_args(path).await;
        let mut args: Vec<&str> = identity.iter().map(String::as_str).collect();
        args.extend(["stash", "push", "--include-untracked", "--quiet", "-m", message]);
        self.execute(&args, path).await?;
        Ok(true)
    }

    async fn stash_pop(&self, path: &Path) -> Result<(), GitError> {
        self.execute(&["stash", "pop", "--quiet"], path).await?;
        Ok(())
    }

    async fn exclude_path(&self, path: &Path, pattern: &str) -> Result<(), GitError> {
        let exclude_file = self.git_path(path, "info/exclude").await?;
        let io_error =
            |e: io::Error| GitError::new(GitErrorCode::IoError, "info/exclude", e.to_string());

        let existing = match fs::read_to_string(&exclude_file).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(io_error(e)),
        };
        if existing.lines().any(|line| line.trim() == pattern) {
            return Ok(());
        }

        if let Some(parent) = exclude_file.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let mut content = existing;
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(pattern);
        content.push('\n');
        fs::write(&exclude_file, content).await.map_err(io_error)
    }
}
