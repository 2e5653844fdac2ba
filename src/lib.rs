//! Checkpoint & rollback backend
//!
//! Takes git-backed snapshots of a project before risky operations and
//! restores them later, for the whole project, one tier, or a file list.
//!
//! - `git`: the version-control seam and its `git` CLI implementation
//! - `checkpoint`: record store, lifecycle, diff and rollback
//! - `utils`: logging bootstrap and response envelopes

pub mod checkpoint;
pub mod git;
pub mod utils;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointError, CheckpointEvent, CheckpointResult,
    CheckpointService, CheckpointState, CheckpointStatus, CheckpointTrigger,
    CreateCheckpointOptions, RollbackOptions, RollbackResult, RollbackScope,
};
pub use git::{GitError, GitService, VcsAdapter};
