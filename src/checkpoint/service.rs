//! CheckpointService: orchestrates snapshots, lifecycle and rollback

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::config::CheckpointConfig;
use super::events::{CheckpointEvent, CheckpointEventSender};
use super::models::{
    expiry_after, Checkpoint, CheckpointDiff, CheckpointError, CheckpointPage, CheckpointQuery,
    CheckpointResult, CheckpointStats, CheckpointStatus, CheckpointTrigger,
    CreateCheckpointOptions, DiffStats, RollbackOptions, RollbackResult, RollbackScope,
};
use super::storage::CheckpointStorage;
use crate::git::{
    is_binary_path, CommitInfo, DiffTarget, FileChange, FileChangeStatus, ResetMode,
    TierClassifier, VcsAdapter,
};

const PROMPT_TRAILER_LIMIT: usize = 100;

/// Commit message and date of a checkpoint's snapshot
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointCommitInfo {
    pub commit_hash: String,
    pub message: Option<String>,
    pub date: Option<String>,
}

pub struct CheckpointService {
    project_path: PathBuf,
    project_id: String,
    config: CheckpointConfig,
    vcs: Arc<dyn VcsAdapter>,
    storage: Arc<CheckpointStorage>,
    classifier: TierClassifier,
    events: CheckpointEventSender,
}

impl CheckpointService {
    /// Opens (or initialises) the repository at `config.project_path`.
    pub async fn new(
        mut config: CheckpointConfig,
        vcs: Arc<dyn VcsAdapter>,
    ) -> CheckpointResult<Self> {
        config.validate()?;

        let project_path = tokio::fs::canonicalize(&config.project_path)
            .await
            .map_err(|_| CheckpointError::RepositoryUnavailable(config.project_path.clone()))?;
        if !vcs.ensure_repo(&project_path).await {
            return Err(CheckpointError::RepositoryUnavailable(project_path));
        }
        config.project_path = project_path.clone();

        let pattern = format!("/{}/", config.store_dir_name);
        if let Err(e) = vcs.exclude_path(&project_path, &pattern).await {
            warn!("Failed to exclude {} from snapshots: {}", pattern, e);
        }

        let project_id = resolve_project_id(&config).await;
        let events = CheckpointEventSender::new();
        let storage = Arc::new(CheckpointStorage::new(&config, events.clone()));

        info!(
            "Checkpoint service ready for {} (project {})",
            project_path.display(),
            project_id
        );

        Ok(Self {
            project_path,
            project_id,
            classifier: TierClassifier::new(config.tiers.clone()),
            config,
            vcs,
            storage,
            events,
        })
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CheckpointEvent> {
        self.events.subscribe()
    }

    pub async fn create_checkpoint(
        &self,
        options: CreateCheckpointOptions,
    ) -> CheckpointResult<Checkpoint> {
        let id = generate_checkpoint_id();
        let now = Utc::now();
        let label = options.label.clone().unwrap_or_else(|| {
            format!(
                "{} {}",
                default_label(options.trigger, options.tier.as_deref()),
                now.format("%Y-%m-%d %H:%M:%S")
            )
        });

        let message = compose_commit_message(&id, &label, &options);
        let commit_hash = self.vcs.commit_all(&self.project_path, &message).await?;
        let branch = self.vcs.current_branch(&self.project_path).await;
        let ttl = options.ttl.unwrap_or_else(|| self.config.default_ttl());

        let checkpoint = Checkpoint {
            id,
            project_id: self.project_id.clone(),
            commit_hash,
            branch,
            execution_id: options.execution_id,
            tier: options.tier,
            status: CheckpointStatus::Created,
            trigger: options.trigger,
            label,
            description: options.description,
            prompt: options.prompt,
            created_at: now,
            updated_at: now,
            expires_at: Some(expiry_after(now, ttl)),
            metadata: options.metadata,
        };

        let saved = self.storage.save(checkpoint).await;
        info!(
            "Created checkpoint {} at {} ({})",
            saved.id,
            short_hash(&saved.commit_hash),
            saved.trigger.as_str()
        );
        Ok(saved)
    }

    pub async fn create_execution_checkpoint(
        &self,
        execution_id: &str,
        prompt: &str,
        tier: Option<&str>,
    ) -> CheckpointResult<Checkpoint> {
        let mut options = CreateCheckpointOptions::new(CheckpointTrigger::ExecutionStart)
            .execution(execution_id)
            .prompt(prompt)
            .label(match tier {
                Some(tier) => format!("Before {tier} execution {execution_id}"),
                None => format!("Before execution {execution_id}"),
            });
        options.tier = tier.map(str::to_string);
        self.create_checkpoint(options).await
    }

    pub async fn activate_checkpoint(&self, id: &str) -> bool {
        match self.transition(id, CheckpointStatus::Active).await {
            Some(checkpoint) => {
                self.events
                    .send(CheckpointEvent::CheckpointActivated { checkpoint });
                true
            }
            None => false,
        }
    }

    pub async fn complete_checkpoint(&self, id: &str) -> bool {
        match self.transition(id, CheckpointStatus::Completed).await {
            Some(checkpoint) => {
                self.events
                    .send(CheckpointEvent::CheckpointCompleted { checkpoint });
                true
            }
            None => false,
        }
    }

    pub async fn fail_checkpoint(&self, id: &str, error: &str) -> bool {
        match self.transition(id, CheckpointStatus::Failed).await {
            Some(checkpoint) => {
                self.events.send(CheckpointEvent::CheckpointFailed {
                    checkpoint,
                    error: error.to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// Acknowledges the changes since `id`; the working tree is left alone.
    pub async fn keep_changes(&self, id: &str) -> bool {
        self.transition(id, CheckpointStatus::Kept).await.is_some()
    }

    pub async fn get_diff(&self, id: &str) -> CheckpointResult<CheckpointDiff> {
        let checkpoint = self.resolve(id).await?;
        self.diff_for(&checkpoint).await
    }

    /// Single-file diff with unified text unless the file is binary.
    pub async fn get_file_diff(
        &self,
        id: &str,
        path: &str,
    ) -> CheckpointResult<Option<FileChange>> {
        let checkpoint = self.resolve(id).await?;
        let diff = self.diff_for(&checkpoint).await?;

        let Some(mut change) = diff.files.into_iter().find(|change| change.touches(path)) else {
            return Ok(None);
        };
        if !change.is_binary {
            let text = self
                .vcs
                .file_diff(
                    &self.project_path,
                    &checkpoint.commit_hash,
                    &DiffTarget::WorkingTree,
                    &change.path,
                )
                .await?;
            change.diff = Some(text);
        }
        Ok(Some(change))
    }

    /// Never returns an error; failures are described by the result.
    pub async fn rollback(&self, options: RollbackOptions) -> RollbackResult {
        let Some(checkpoint) = self.storage.get(&options.checkpoint_id).await else {
            let err = CheckpointError::NotFound(options.checkpoint_id.clone());
            warn!("Rollback rejected: {}", err);
            return RollbackResult::failure(&options, None, None, &err);
        };
        if !self
            .vcs
            .commit_exists(&self.project_path, &checkpoint.commit_hash)
            .await
        {
            let err = CheckpointError::StaleReference {
                id: checkpoint.id.clone(),
                commit: checkpoint.commit_hash.clone(),
            };
            warn!("Rollback rejected: {}", err);
            return RollbackResult::failure(&options, Some(checkpoint), None, &err);
        }
        if checkpoint.status.is_terminal() {
            let err = CheckpointError::InvalidState {
                id: checkpoint.id.clone(),
                status: checkpoint.status,
            };
            warn!("Rollback rejected: {}", err);
            return RollbackResult::failure(&options, Some(checkpoint), None, &err);
        }

        info!(
            "Rolling back to checkpoint {} (scope {:?}, mode {:?}, dry run {})",
            checkpoint.id, options.scope, options.mode, options.dry_run
        );
        self.events.send(CheckpointEvent::RollbackStarted {
            checkpoint: checkpoint.clone(),
        });

        let mut backup_checkpoint_id = None;
        match self
            .execute_rollback(&checkpoint, &options, &mut backup_checkpoint_id)
            .await
        {
            Ok(result) => {
                self.events.send(CheckpointEvent::RollbackCompleted {
                    checkpoint: result
                        .checkpoint
                        .clone()
                        .unwrap_or_else(|| checkpoint.clone()),
                    result: result.clone(),
                });
                result
            }
            Err(e) => {
                error!("Rollback to checkpoint {} failed: {}", checkpoint.id, e);
                self.events.send(CheckpointEvent::RollbackFailed {
                    checkpoint: checkpoint.clone(),
                    error: e.to_string(),
                });
                RollbackResult::failure(&options, Some(checkpoint), backup_checkpoint_id, &e)
            }
        }
    }

    async fn execute_rollback(
        &self,
        checkpoint: &Checkpoint,
        options: &RollbackOptions,
        backup_checkpoint_id: &mut Option<String>,
    ) -> CheckpointResult<RollbackResult> {
        if options.create_backup && !options.dry_run {
            let mut backup = CreateCheckpointOptions::new(CheckpointTrigger::Manual)
                .label(format!("Backup before rollback to {}", checkpoint.label));
            backup.metadata.insert(
                "rollbackTarget".to_string(),
                serde_json::Value::String(checkpoint.id.clone()),
            );
            let backup = self.create_checkpoint(backup).await?;
            *backup_checkpoint_id = Some(backup.id);
        }

        // must be captured before anything moves HEAD
        let diff = self.diff_for(checkpoint).await?;

        let plan = match &options.scope {
            RollbackScope::Project => None,
            RollbackScope::Tier { tier } => {
                let paths: Vec<String> = diff
                    .files
                    .iter()
                    .filter(|f| f.tier.as_deref() == Some(tier.as_str()))
                    .map(|f| f.path.clone())
                    .collect();
                Some(self.plan_restore(checkpoint, &diff.files, &paths).await)
            }
            RollbackScope::Files { files } => {
                Some(self.plan_restore(checkpoint, &diff.files, &dedup(files)).await)
            }
        };
        let restored_files: Vec<String> = match &plan {
            Some(plan) => plan.paths(),
            None => {
                let paths: BTreeSet<String> = diff
                    .files
                    .iter()
                    .flat_map(|f| std::iter::once(&f.path).chain(f.old_path.as_ref()))
                    .cloned()
                    .collect();
                paths.into_iter().collect()
            }
        };

        if options.dry_run {
            debug!(
                "Dry run for checkpoint {}: {} files would be restored",
                checkpoint.id,
                restored_files.len()
            );
            return Ok(RollbackResult {
                success: true,
                checkpoint_id: checkpoint.id.clone(),
                checkpoint: Some(checkpoint.clone()),
                backup_checkpoint_id: backup_checkpoint_id.clone(),
                restored_files,
                dry_run: true,
                scope: options.scope.clone(),
                mode: options.mode,
                diff: Some(diff),
                error: None,
                error_code: None,
            });
        }

        match plan {
            None => {
                self.vcs
                    .reset(&self.project_path, &checkpoint.commit_hash, options.mode)
                    .await?;
                if options.mode == ResetMode::Hard {
                    // reset leaves untracked additions behind
                    let added: Vec<String> = diff
                        .files
                        .iter()
                        .filter(|f| {
                            matches!(f.status, FileChangeStatus::Added | FileChangeStatus::Renamed)
                        })
                        .map(|f| f.path.clone())
                        .collect();
                    self.vcs.remove_paths(&self.project_path, &added).await?;
                }
            }
            Some(plan) => {
                debug!(
                    "Selective restore from {}: {} checked out, {} removed",
                    short_hash(&checkpoint.commit_hash),
                    plan.checkout.len(),
                    plan.remove.len()
                );
                self.vcs
                    .checkout_paths(&self.project_path, &checkpoint.commit_hash, &plan.checkout)
                    .await?;
                self.vcs.remove_paths(&self.project_path, &plan.remove).await?;
            }
        }

        let updated = self
            .transition(&checkpoint.id, CheckpointStatus::RolledBack)
            .await
            .unwrap_or_else(|| checkpoint.clone());

        info!(
            "Rolled back {} files to checkpoint {}",
            restored_files.len(),
            checkpoint.id
        );

        Ok(RollbackResult {
            success: true,
            checkpoint_id: checkpoint.id.clone(),
            checkpoint: Some(updated),
            backup_checkpoint_id: backup_checkpoint_id.clone(),
            restored_files,
            dry_run: false,
            scope: options.scope.clone(),
            mode: options.mode,
            diff: Some(diff),
            error: None,
            error_code: None,
        })
    }

    /// Splits `paths` into checkouts and removals against the checkpoint.
    /// Renames pull in both sides. A path absent at the checkpoint is only
    /// removed when the diff reports it as added since; anything else the
    /// checkpoint never tracked (ignored files, the store dir) is left alone.
    async fn plan_restore(
        &self,
        checkpoint: &Checkpoint,
        changes: &[FileChange],
        paths: &[String],
    ) -> RestorePlan {
        let mut targets = BTreeSet::new();
        for path in paths {
            targets.insert(path.clone());
            for change in changes.iter().filter(|change| change.touches(path)) {
                targets.insert(change.path.clone());
                if let Some(old_path) = &change.old_path {
                    targets.insert(old_path.clone());
                }
            }
        }

        let mut plan = RestorePlan::default();
        for target in targets {
            if self
                .vcs
                .path_exists_at(&self.project_path, &checkpoint.commit_hash, &target)
                .await
            {
                plan.checkout.push(target);
            } else if changes.iter().any(|change| {
                change.path == target
                    && matches!(
                        change.status,
                        FileChangeStatus::Added | FileChangeStatus::Renamed
                    )
            }) {
                plan.remove.push(target);
            } else {
                debug!(
                    "Skipping {}: not tracked at {}",
                    target,
                    short_hash(&checkpoint.commit_hash)
                );
            }
        }
        plan
    }

    pub async fn list_checkpoints(&self, query: &CheckpointQuery) -> CheckpointPage {
        self.storage.query(query).await
    }

    pub async fn get_checkpoint(&self, id: &str) -> Option<Checkpoint> {
        self.storage.get(id).await
    }

    pub async fn get_execution_checkpoint(&self, execution_id: &str) -> Option<Checkpoint> {
        self.storage.get_by_execution_id(execution_id).await
    }

    /// Applies `status` if the lifecycle allows it.
    pub async fn update_status(&self, id: &str, status: CheckpointStatus) -> bool {
        self.transition(id, status).await.is_some()
    }

    pub async fn delete_checkpoint(&self, id: &str) -> bool {
        self.storage.delete(id).await
    }

    pub async fn cleanup_old_checkpoints(&self) -> usize {
        self.storage.cleanup_expired().await
    }

    pub async fn get_stats(&self) -> CheckpointStats {
        self.storage.stats().await
    }

    pub async fn recent_commits(&self, limit: u32) -> Vec<CommitInfo> {
        self.vcs.recent_commits(&self.project_path, limit).await
    }

    pub async fn commit_info(&self, id: &str) -> CheckpointResult<CheckpointCommitInfo> {
        let checkpoint = self.resolve(id).await?;
        let message = self
            .vcs
            .commit_message(&self.project_path, &checkpoint.commit_hash)
            .await;
        let date = self
            .vcs
            .commit_date(&self.project_path, &checkpoint.commit_hash)
            .await;
        Ok(CheckpointCommitInfo {
            commit_hash: checkpoint.commit_hash,
            message,
            date,
        })
    }

    async fn resolve(&self, id: &str) -> CheckpointResult<Checkpoint> {
        let checkpoint = self
            .storage
            .get(id)
            .await
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))?;
        if !self
            .vcs
            .commit_exists(&self.project_path, &checkpoint.commit_hash)
            .await
        {
            return Err(CheckpointError::StaleReference {
                id: checkpoint.id,
                commit: checkpoint.commit_hash,
            });
        }
        Ok(checkpoint)
    }

    async fn diff_for(&self, checkpoint: &Checkpoint) -> CheckpointResult<CheckpointDiff> {
        let mut files = self
            .vcs
            .diff(
                &self.project_path,
                &checkpoint.commit_hash,
                &DiffTarget::WorkingTree,
            )
            .await?;
        for file in &mut files {
            file.tier = self.classifier.classify(&file.path);
            file.is_binary = file.is_binary || is_binary_path(&file.path);
        }

        let to_commit = self.vcs.current_commit(&self.project_path).await;
        let stats = DiffStats::from_files(&files);
        Ok(CheckpointDiff {
            checkpoint_id: checkpoint.id.clone(),
            from_commit: checkpoint.commit_hash.clone(),
            to_commit,
            files,
            stats,
        })
    }

    async fn transition(&self, id: &str, next: CheckpointStatus) -> Option<Checkpoint> {
        let current = self.storage.get(id).await?;
        if !current.status.can_transition_to(next) {
            warn!(
                "Ignoring invalid transition {} -> {} for checkpoint {}",
                current.status.as_str(),
                next.as_str(),
                id
            );
            return None;
        }
        if !self.storage.update_status(id, next).await {
            return None;
        }
        self.storage.peek(id).await
    }
}

#[derive(Debug, Default)]
struct RestorePlan {
    checkout: Vec<String>,
    remove: Vec<String>,
}

impl RestorePlan {
    fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.checkout.iter().chain(&self.remove).cloned().collect();
        paths.sort();
        paths
    }
}

async fn resolve_project_id(config: &CheckpointConfig) -> String {
    if let Some(id) = config.project_id.as_ref().filter(|id| !id.trim().is_empty()) {
        return id.clone();
    }

    let file = config.project_id_file();
    if let Ok(content) = tokio::fs::read_to_string(&file).await {
        let id = content.trim();
        if !id.is_empty() {
            return id.to_string();
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    if config.persist {
        if let Err(e) = write_project_id(&file, &id).await {
            warn!("Failed to persist project id to {}: {}", file.display(), e);
        }
    }
    id
}

async fn write_project_id(file: &Path, id: &str) -> std::io::Result<()> {
    if let Some(parent) = file.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(file, id).await
}

/// `cp_<millis as 12 hex digits>_<8 random chars>`, sorts by creation time.
pub(crate) fn generate_checkpoint_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0);
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("cp_{millis:012x}_{suffix}")
}

fn default_label(trigger: CheckpointTrigger, tier: Option<&str>) -> String {
    match tier {
        Some(tier) => format!("{} [{}]", trigger.display_name(), tier),
        None => trigger.display_name().to_string(),
    }
}

pub(crate) fn truncate_prompt(prompt: &str) -> String {
    let flat = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PROMPT_TRAILER_LIMIT {
        return flat;
    }
    let head: String = flat.chars().take(PROMPT_TRAILER_LIMIT - 3).collect();
    format!("{head}...")
}

pub(crate) fn compose_commit_message(
    id: &str,
    label: &str,
    options: &CreateCheckpointOptions,
) -> String {
    let mut message = format!("checkpoint: {label}\n\nCheckpoint-Id: {id}");
    if let Some(execution_id) = &options.execution_id {
        message.push_str(&format!("\nExecution-Id: {execution_id}"));
    }
    if let Some(tier) = &options.tier {
        message.push_str(&format!("\nTier: {tier}"));
    }
    if let Some(prompt) = options.prompt.as_deref().filter(|p| !p.trim().is_empty()) {
        message.push_str(&format!("\nPrompt: {}", truncate_prompt(prompt)));
    }
    message
}

fn dedup(files: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    files
        .iter()
        .map(|f| f.trim_start_matches("./").to_string())
        .filter(|f| !f.is_empty() && seen.insert(f.clone()))
        .collect()
}

fn short_hash(hash: &str) -> &str {
    hash.get(..7).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_ids_sort_by_time() {
        let first = generate_checkpoint_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = generate_checkpoint_id();

        assert!(first.starts_with("cp_"));
        assert_eq!(first.len(), "cp_".len() + 12 + 1 + 8);
        assert!(first < second);
        assert_ne!(first, second);
    }

    #[test]
    fn long_prompts_are_truncated() {
        let prompt = "x".repeat(250);
        let truncated = truncate_prompt(&prompt);
        assert_eq!(truncated.chars().count(), 100);
        assert!(truncated.ends_with("..."));

        assert_eq!(truncate_prompt("fix the\nlogin  form"), "fix the login form");
    }

    #[test]
    fn commit_message_carries_trailers() {
        let options = CreateCheckpointOptions::new(CheckpointTrigger::ExecutionStart)
            .execution("ex1")
            .tier("web")
            .prompt("rewrite the header");
        let message = compose_commit_message("cp_1", "Before execution", &options);

        assert!(message.starts_with("checkpoint: Before execution\n\n"));
        assert!(message.contains("Checkpoint-Id: cp_1"));
        assert!(message.contains("Execution-Id: ex1"));
        assert!(message.contains("Tier: web"));
        assert!(message.contains("Prompt: rewrite the header"));

        let bare = compose_commit_message("cp_2", "Manual", &CreateCheckpointOptions::default());
        assert!(!bare.contains("Execution-Id"));
        assert!(!bare.contains("Prompt"));
    }

    #[test]
    fn file_lists_are_deduplicated() {
        let files = vec![
            "web/app.ts".to_string(),
            "./web/app.ts".to_string(),
            String::new(),
            "api/new.ts".to_string(),
        ];
        assert_eq!(dedup(&files), vec!["web/app.ts", "api/new.ts"]);
    }
}
