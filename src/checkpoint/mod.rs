//! Checkpoint & rollback
//!
//! Snapshots a project's working tree as git commits before risky
//! operations, tracks their lifecycle, and restores the whole project,
//! one tier, or an explicit file list on request.

pub mod commands;
mod config;
mod events;
mod models;
mod service;
mod storage;

pub use commands::{CheckpointState, CreateCheckpointRequest};
pub use config::{
    CheckpointConfig, CONFIG_FILE_NAME, DEFAULT_MAX_CHECKPOINTS, DEFAULT_STORE_DIR,
    DEFAULT_TTL_MS, PROJECT_ID_FILE_NAME, STORE_FILE_NAME,
};
pub use events::{CheckpointEvent, CheckpointEventSender, CleanupReason};
pub use models::{
    Checkpoint, CheckpointDiff, CheckpointError, CheckpointErrorCode, CheckpointPage,
    CheckpointQuery, CheckpointResult, CheckpointStats, CheckpointStatus, CheckpointTrigger,
    CreateCheckpointOptions, DiffStats, RollbackMode, RollbackOptions, RollbackResult,
    RollbackScope, SortOrder,
};
pub use service::{CheckpointCommitInfo, CheckpointService};
pub use storage::CheckpointStorage;
