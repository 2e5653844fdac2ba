//! Checkpoint lifecycle events

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::models::{Checkpoint, CheckpointStatus, RollbackResult};

const EVENT_CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CleanupReason {
    Expired,
    MaxLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckpointEvent {
    CheckpointCreated {
        checkpoint: Checkpoint,
    },
    #[serde(rename_all = "camelCase")]
    CheckpointUpdated {
        checkpoint: Checkpoint,
        previous_status: CheckpointStatus,
    },
    #[serde(rename_all = "camelCase")]
    CheckpointDeleted {
        checkpoint_id: String,
    },
    CheckpointsCleaned {
        count: usize,
        reason: CleanupReason,
    },
    CheckpointActivated {
        checkpoint: Checkpoint,
    },
    CheckpointCompleted {
        checkpoint: Checkpoint,
    },
    CheckpointFailed {
        checkpoint: Checkpoint,
        error: String,
    },
    RollbackStarted {
        checkpoint: Checkpoint,
    },
    RollbackCompleted {
        checkpoint: Checkpoint,
        result: RollbackResult,
    },
    RollbackFailed {
        checkpoint: Checkpoint,
        error: String,
    },
}

impl CheckpointEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CheckpointCreated { .. } => "checkpoint_created",
            Self::CheckpointUpdated { .. } => "checkpoint_updated",
            Self::CheckpointDeleted { .. } => "checkpoint_deleted",
            Self::CheckpointsCleaned { .. } => "checkpoints_cleaned",
            Self::CheckpointActivated { .. } => "checkpoint_activated",
            Self::CheckpointCompleted { .. } => "checkpoint_completed",
            Self::CheckpointFailed { .. } => "checkpoint_failed",
            Self::RollbackStarted { .. } => "rollback_started",
            Self::RollbackCompleted { .. } => "rollback_completed",
            Self::RollbackFailed { .. } => "rollback_failed",
        }
    }
}

/// Fan-out for checkpoint events. Sending never fails; events without
/// subscribers are dropped.
#[derive(Debug, Clone)]
pub struct CheckpointEventSender {
    sender: broadcast::Sender<CheckpointEvent>,
}

impl CheckpointEventSender {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn send(&self, event: CheckpointEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CheckpointEvent> {
        self.sender.subscribe()
    }
}

impl Default for CheckpointEventSender {
    fn default() -> Self {
        Self::new()
    }
}
