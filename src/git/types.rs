use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum FileChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl FileChangeStatus {
    /// Maps a `--name-status` letter. Copies are reported as additions of the new path.
    pub fn from_status_char(ch: char) -> Option<Self> {
        match ch {
            'A' | 'C' => Some(Self::Added),
            'M' | 'T' => Some(Self::Modified),
            'D' => Some(Self::Deleted),
            'R' => Some(Self::Renamed),
            _ => None,
        }
    }
}

/// A single file difference between two snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub status: FileChangeStatus,
    pub additions: u32,
    pub deletions: u32,
    /// Unified diff text, only fetched on request and never for binary files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    pub is_binary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

impl FileChange {
    pub fn new(path: impl Into<String>, status: FileChangeStatus) -> Self {
        Self {
            path: path.into(),
            old_path: None,
            status,
            additions: 0,
            deletions: 0,
            diff: None,
            is_binary: false,
            tier: None,
        }
    }

    /// True if `path` names either side of this change.
    pub fn touches(&self, path: &str) -> bool {
        self.path == path || self.old_path.as_deref() == Some(path)
    }
}

/// What the "to" side of a diff is compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffTarget {
    Commit(String),
    /// HEAD plus every pending tracked and untracked change
    WorkingTree,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ResetMode {
    Hard,
    Soft,
    Mixed,
}

impl ResetMode {
    pub fn as_flag(&self) -> &'static str {
        match self {
            Self::Hard => "--hard",
            Self::Soft => "--soft",
            Self::Mixed => "--mixed",
        }
    }
}

impl Default for ResetMode {
    fn default() -> Self {
        Self::Hard
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub author_name: String,
    pub author_email: String,
    pub date: String,
    pub message: String,
    #[serde(default)]
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("git {command} failed ({code:?}): {message}")]
pub struct GitError {
    pub code: GitErrorCode,
    /// Joined argument vector of the failing invocation
    pub command: String,
    pub message: String,
}

impl GitError {
    pub fn new(code: GitErrorCode, command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            command: command.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum GitErrorCode {
    NotARepository,
    GitNotInstalled,
    CommandFailed,
    ParseError,
    IoError,
}
