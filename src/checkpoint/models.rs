//! Checkpoint data model

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::git::{FileChange, GitError, ResetMode};

/// Checkpoint errors
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    #[error("Checkpoint {id} references commit {commit} which no longer exists")]
    StaleReference { id: String, commit: String },

    #[error(transparent)]
    Vcs(#[from] GitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not a usable repository: {0}")]
    RepositoryUnavailable(PathBuf),

    #[error("Invalid checkpoint config: {0}")]
    InvalidConfig(String),

    #[error("Checkpoint {id} is {} and cannot be rolled back", .status.as_str())]
    InvalidState { id: String, status: CheckpointStatus },
}

impl CheckpointError {
    pub fn code(&self) -> CheckpointErrorCode {
        match self {
            Self::NotFound(_) => CheckpointErrorCode::NotFound,
            Self::StaleReference { .. } => CheckpointErrorCode::StaleReference,
            Self::Vcs(_) => CheckpointErrorCode::VcsCommandFailed,
            Self::Io(_) | Self::Serialization(_) => CheckpointErrorCode::StoreIo,
            Self::RepositoryUnavailable(_) => CheckpointErrorCode::RepositoryUnavailable,
            Self::InvalidConfig(_) => CheckpointErrorCode::InvalidConfig,
            Self::InvalidState { .. } => CheckpointErrorCode::InvalidState,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointErrorCode {
    NotFound,
    StaleReference,
    VcsCommandFailed,
    StoreIo,
    RepositoryUnavailable,
    InvalidConfig,
    InvalidState,
}

pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Upper bound on any checkpoint lifetime.
const MAX_TTL_DAYS: i64 = 36_500;

/// `start + ttl`, with the TTL clamped to `0..=MAX_TTL_DAYS` days.
pub(crate) fn expiry_after(start: DateTime<Utc>, ttl: chrono::Duration) -> DateTime<Utc> {
    let ttl = ttl.clamp(chrono::Duration::zero(), chrono::Duration::days(MAX_TTL_DAYS));
    start
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Created,
    Active,
    Completed,
    Failed,
    RolledBack,
    Kept,
    Expired,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
            Self::Kept => "kept",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RolledBack | Self::Kept | Self::Expired)
    }

    /// Lifecycle rules. Re-applying the current status is allowed and is a no-op.
    pub fn can_transition_to(&self, next: CheckpointStatus) -> bool {
        use CheckpointStatus::*;

        if *self == next {
            return true;
        }
        match (self, next) {
            (Created, Active) => true,
            (Active, Completed | Failed) => true,
            (Created | Active | Completed | Failed, RolledBack | Kept | Expired) => true,
            _ => false,
        }
    }
}

impl FromStr for CheckpointStatus {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "rolled_back" => Ok(Self::RolledBack),
            "kept" => Ok(Self::Kept),
            "expired" => Ok(Self::Expired),
            other => Err(CheckpointError::InvalidConfig(format!(
                "Unknown checkpoint status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTrigger {
    ExecutionStart,
    TierStart,
    Milestone,
    Manual,
    AutoSave,
}

impl CheckpointTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecutionStart => "execution_start",
            Self::TierStart => "tier_start",
            Self::Milestone => "milestone",
            Self::Manual => "manual",
            Self::AutoSave => "auto_save",
        }
    }

    /// Human prefix used for generated labels
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ExecutionStart => "Before execution",
            Self::TierStart => "Tier start",
            Self::Milestone => "Milestone",
            Self::Manual => "Manual checkpoint",
            Self::AutoSave => "Auto-save",
        }
    }
}

impl Default for CheckpointTrigger {
    fn default() -> Self {
        Self::Manual
    }
}

/// Point-in-time reference to a VCS snapshot of the project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: String,
    pub project_id: String,
    pub commit_hash: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    pub status: CheckpointStatus,
    pub trigger: CheckpointTrigger,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Filled in by the store when absent
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Checkpoint {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires < now)
    }
}

/// Input for [`CheckpointService::create_checkpoint`](super::CheckpointService::create_checkpoint)
#[derive(Debug, Clone, Default)]
pub struct CreateCheckpointOptions {
    pub trigger: CheckpointTrigger,
    pub execution_id: Option<String>,
    pub tier: Option<String>,
    /// Used verbatim when set, otherwise derived from trigger, tier and time
    pub label: Option<String>,
    pub description: Option<String>,
    pub prompt: Option<String>,
    /// Overrides the configured default TTL
    pub ttl: Option<chrono::Duration>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CreateCheckpointOptions {
    pub fn new(trigger: CheckpointTrigger) -> Self {
        Self {
            trigger,
            ..Default::default()
        }
    }

    pub fn execution(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Store query filters. Empty status/trigger sets match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CheckpointQuery {
    pub execution_id: Option<String>,
    pub tier: Option<String>,
    pub statuses: Vec<CheckpointStatus>,
    pub triggers: Vec<CheckpointTrigger>,
    pub include_expired: bool,
    pub order: SortOrder,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl CheckpointQuery {
    pub fn status(mut self, status: CheckpointStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn trigger(mut self, trigger: CheckpointTrigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn matches(&self, checkpoint: &Checkpoint, now: DateTime<Utc>) -> bool {
        if !self.include_expired && checkpoint.is_expired_at(now) {
            return false;
        }
        if let Some(execution_id) = &self.execution_id {
            if checkpoint.execution_id.as_ref() != Some(execution_id) {
                return false;
            }
        }
        if let Some(tier) = &self.tier {
            if checkpoint.tier.as_ref() != Some(tier) {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&checkpoint.status) {
            return false;
        }
        if !self.triggers.is_empty() && !self.triggers.contains(&checkpoint.trigger) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointPage {
    pub checkpoints: Vec<Checkpoint>,
    /// Filtered count before pagination
    pub total: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_tier: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiffStats {
    pub files_changed: usize,
    pub additions: u32,
    pub deletions: u32,
    /// Files changed per tier; unclassified files are not counted here
    pub by_tier: BTreeMap<String, usize>,
}

impl DiffStats {
    pub fn from_files(files: &[FileChange]) -> Self {
        let mut stats = Self {
            files_changed: files.len(),
            ..Default::default()
        };
        for file in files {
            stats.additions += file.additions;
            stats.deletions += file.deletions;
            if let Some(tier) = &file.tier {
                *stats.by_tier.entry(tier.clone()).or_insert(0) += 1;
            }
        }
        stats
    }
}

/// Changes between a checkpoint and the current project state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointDiff {
    pub checkpoint_id: String,
    pub from_commit: String,
    /// Current HEAD; `None` when the repository has no commits
    pub to_commit: Option<String>,
    pub files: Vec<FileChange>,
    pub stats: DiffStats,
}

/// How much of the project a rollback restores
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RollbackScope {
    #[default]
    Project,
    Tier {
        tier: String,
    },
    Files {
        #[serde(default)]
        files: Vec<String>,
    },
}

pub type RollbackMode = ResetMode;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOptions {
    pub checkpoint_id: String,
    #[serde(default)]
    pub scope: RollbackScope,
    #[serde(default)]
    pub mode: RollbackMode,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub create_backup: bool,
}

impl RollbackOptions {
    pub fn new(checkpoint_id: impl Into<String>) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
            scope: RollbackScope::Project,
            mode: RollbackMode::Hard,
            dry_run: false,
            create_backup: false,
        }
    }

    pub fn scope(mut self, scope: RollbackScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn mode(mut self, mode: RollbackMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_backup(mut self) -> Self {
        self.create_backup = true;
        self
    }
}

/// Outcome of a rollback. Failures are reported here, never raised.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    pub success: bool,
    pub checkpoint_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_checkpoint_id: Option<String>,
    pub restored_files: Vec<String>,
    pub dry_run: bool,
    pub scope: RollbackScope,
    pub mode: RollbackMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<CheckpointDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<CheckpointErrorCode>,
}

impl RollbackResult {
    pub(crate) fn failure(
        options: &RollbackOptions,
        checkpoint: Option<Checkpoint>,
        backup_checkpoint_id: Option<String>,
        error: &CheckpointError,
    ) -> Self {
        Self {
            success: false,
            checkpoint_id: options.checkpoint_id.clone(),
            checkpoint,
            backup_checkpoint_id,
            restored_files: Vec::new(),
            dry_run: options.dry_run,
            scope: options.scope.clone(),
            mode: options.mode,
            diff: None,
            error: Some(error.to_string()),
            error_code: Some(error.code()),
        }
    }

    pub fn files_restored(&self) -> usize {
        self.restored_files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_never_precedes_start_or_overflows() {
        let start = Utc::now();

        assert_eq!(expiry_after(start, chrono::Duration::hours(-1)), start);
        assert_eq!(
            expiry_after(start, chrono::Duration::days(7)),
            start + chrono::Duration::days(7)
        );

        let huge = chrono::Duration::milliseconds(9_007_199_254_740_991);
        let capped = expiry_after(start, huge);
        assert_eq!(capped, start + chrono::Duration::days(MAX_TTL_DAYS));
        let json = serde_json::to_string(&capped).unwrap();
        assert_eq!(serde_json::from_str::<DateTime<Utc>>(&json).unwrap(), capped);

        assert_eq!(
            expiry_after(DateTime::<Utc>::MAX_UTC, chrono::Duration::days(1)),
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[test]
    fn lifecycle_transitions() {
        use CheckpointStatus::*;

        assert!(Created.can_transition_to(Active));
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Failed));
        assert!(Failed.can_transition_to(RolledBack));
        assert!(Completed.can_transition_to(Kept));
        assert!(Active.can_transition_to(Active));

        assert!(!Created.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Active));
        assert!(!RolledBack.can_transition_to(Active));
        assert!(!Kept.can_transition_to(RolledBack));
        assert!(!Expired.can_transition_to(Created));
    }

    #[test]
    fn status_wire_names() {
        for status in [
            CheckpointStatus::Created,
            CheckpointStatus::RolledBack,
            CheckpointStatus::Kept,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(CheckpointStatus::from_str(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn rollback_options_from_json() {
        let options: RollbackOptions = serde_json::from_str(
            r#"{"checkpointId":"cp_1","scope":{"type":"tier","tier":"web"},"mode":"mixed"}"#,
        )
        .unwrap();
        assert_eq!(
            options.scope,
            RollbackScope::Tier {
                tier: "web".to_string()
            }
        );
        assert_eq!(options.mode, RollbackMode::Mixed);
        assert!(!options.dry_run);

        let defaults: RollbackOptions = serde_json::from_str(r#"{"checkpointId":"cp_2"}"#).unwrap();
        assert_eq!(defaults.scope, RollbackScope::Project);
        assert_eq!(defaults.mode, RollbackMode::Hard);
    }

    #[test]
    fn diff_stats_aggregate_by_tier() {
        let mut web = FileChange::new("web/app.ts", crate::git::FileChangeStatus::Modified);
        web.additions = 5;
        web.deletions = 2;
        web.tier = Some("web".to_string());
        let mut api = FileChange::new("api/new.ts", crate::git::FileChangeStatus::Added);
        api.additions = 3;
        api.tier = Some("api".to_string());
        let readme = FileChange::new("README.md", crate::git::FileChangeStatus::Modified);

        let stats = DiffStats::from_files(&[web, api, readme]);
        assert_eq!(stats.files_changed, 3);
        assert_eq!(stats.additions, 8);
        assert_eq!(stats.deletions, 2);
        assert_eq!(stats.by_tier.get("web"), Some(&1));
        assert_eq!(stats.by_tier.get("api"), Some(&1));
        assert_eq!(stats.by_tier.len(), 2);
    }
}
