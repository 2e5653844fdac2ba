//! Checkpoint configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::models::{CheckpointError, CheckpointResult};
use crate::git::TierRule;

pub const DEFAULT_STORE_DIR: &str = ".checkpoints";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const STORE_FILE_NAME: &str = "checkpoints.jsonl";
pub const PROJECT_ID_FILE_NAME: &str = "project_id";

/// Seven days
pub const DEFAULT_TTL_MS: u64 = 7 * 24 * 60 * 60 * 1000;
pub const DEFAULT_MAX_CHECKPOINTS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CheckpointConfig {
    pub project_path: PathBuf,

    /// Read from `<store>/project_id` or generated when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Keep the checkpoint index on disk
    pub persist: bool,

    /// Oldest checkpoints are evicted beyond this count
    pub max_checkpoints: usize,

    pub default_ttl_ms: u64,

    /// Snapshot automatically when an execution starts
    pub auto_checkpoint: bool,

    /// Directory under the project root, excluded from snapshots
    pub store_dir_name: String,

    pub tiers: Vec<TierRule>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            project_path: PathBuf::from("."),
            project_id: None,
            persist: true,
            max_checkpoints: DEFAULT_MAX_CHECKPOINTS,
            default_ttl_ms: DEFAULT_TTL_MS,
            auto_checkpoint: true,
            store_dir_name: DEFAULT_STORE_DIR.to_string(),
            tiers: TierRule::default_rules(),
        }
    }
}

impl CheckpointConfig {
    pub fn for_project(project_path: impl Into<PathBuf>) -> Self {
        Self {
            project_path: project_path.into(),
            ..Default::default()
        }
    }

    /// Loads `<project>/.checkpoints/config.json`, falling back to defaults when absent.
    pub async fn load(project_path: impl AsRef<Path>) -> CheckpointResult<Self> {
        let project_path = project_path.as_ref();
        let file = project_path.join(DEFAULT_STORE_DIR).join(CONFIG_FILE_NAME);

        let content = match tokio::fs::read_to_string(&file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No checkpoint config at {}, using defaults", file.display());
                return Ok(Self::for_project(project_path));
            }
            Err(e) => return Err(e.into()),
        };

        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| CheckpointError::InvalidConfig(format!("{}: {e}", file.display())))?;
        config.project_path = project_path.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CheckpointResult<()> {
        if self.store_dir_name.trim().is_empty()
            || self.store_dir_name.contains('/')
            || self.store_dir_name.contains('\\')
            || self.store_dir_name == ".."
        {
            return Err(CheckpointError::InvalidConfig(format!(
                "storeDirName must be a single directory name, got {:?}",
                self.store_dir_name
            )));
        }
        if let Some(rule) = self.tiers.iter().find(|rule| rule.prefix.is_empty()) {
            return Err(CheckpointError::InvalidConfig(format!(
                "tier {:?} has an empty prefix",
                rule.tier
            )));
        }
        Ok(())
    }

    /// At least one checkpoint is always retained.
    pub fn effective_max_checkpoints(&self) -> usize {
        self.max_checkpoints.max(1)
    }

    pub fn default_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.default_ttl_ms).unwrap_or(i64::MAX))
    }

    pub fn store_dir(&self) -> PathBuf {
        self.project_path.join(&self.store_dir_name)
    }

    pub fn store_file(&self) -> PathBuf {
        self.store_dir().join(STORE_FILE_NAME)
    }

    pub fn project_id_file(&self) -> PathBuf {
        self.store_dir().join(PROJECT_ID_FILE_NAME)
    }
}
