//! Caller-facing checkpoint commands
//!
//! Each command wraps one service call in an [`ApiResponse`] envelope:
//! 200 on success, 404 for unknown checkpoints, 409 for stale references
//! and rejected transitions, 500 for everything else.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::git::{FileChange, GitService};
use crate::utils::{ApiResponse, ApiResult, EmptyData, CODE_CONFLICT, CODE_INTERNAL, CODE_NOT_FOUND};
use crate::{api_error, api_success};

use super::config::CheckpointConfig;
use super::models::{
    Checkpoint, CheckpointDiff, CheckpointError, CheckpointErrorCode, CheckpointPage,
    CheckpointQuery, CheckpointResult, CheckpointStats, CheckpointTrigger,
    CreateCheckpointOptions, RollbackOptions, RollbackResult,
};
use super::service::CheckpointService;

pub struct CheckpointState {
    pub service: Arc<CheckpointService>,
}

impl CheckpointState {
    pub fn new(service: Arc<CheckpointService>) -> Self {
        Self { service }
    }

    /// Loads the project config and opens a git-backed service.
    pub async fn open(project_path: impl AsRef<Path>) -> CheckpointResult<Self> {
        let config = CheckpointConfig::load(project_path).await?;
        let service = CheckpointService::new(config, Arc::new(GitService::new())).await?;
        Ok(Self::new(Arc::new(service)))
    }
}

/// Serializable form of [`CreateCheckpointOptions`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateCheckpointRequest {
    pub trigger: CheckpointTrigger,
    pub execution_id: Option<String>,
    pub tier: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub prompt: Option<String>,
    pub ttl_ms: Option<u64>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl From<CreateCheckpointRequest> for CreateCheckpointOptions {
    fn from(request: CreateCheckpointRequest) -> Self {
        Self {
            trigger: request.trigger,
            execution_id: request.execution_id,
            tier: request.tier,
            label: request.label,
            description: request.description,
            prompt: request.prompt,
            ttl: request
                .ttl_ms
                .map(|ms| chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))),
            metadata: request.metadata,
        }
    }
}

fn error_status(code: CheckpointErrorCode) -> u16 {
    match code {
        CheckpointErrorCode::NotFound => CODE_NOT_FOUND,
        CheckpointErrorCode::StaleReference | CheckpointErrorCode::InvalidState => CODE_CONFLICT,
        _ => CODE_INTERNAL,
    }
}

fn error_response<T>(context: &str, err: &CheckpointError) -> ApiResponse<T> {
    tracing::error!("{}: {}", context, err);
    api_error!(error_status(err.code()), err.to_string())
}

pub async fn checkpoint_create(
    state: &CheckpointState,
    request: CreateCheckpointRequest,
) -> ApiResult<Checkpoint> {
    match state.service.create_checkpoint(request.into()).await {
        Ok(checkpoint) => Ok(api_success!(checkpoint)),
        Err(e) => Ok(error_response("Failed to create checkpoint", &e)),
    }
}

pub async fn checkpoint_get(state: &CheckpointState, id: String) -> ApiResult<Checkpoint> {
    match state.service.get_checkpoint(&id).await {
        Some(checkpoint) => Ok(api_success!(checkpoint)),
        None => Ok(api_error!(CODE_NOT_FOUND, format!("Checkpoint not found: {id}"))),
    }
}

pub async fn checkpoint_list(
    state: &CheckpointState,
    query: Option<CheckpointQuery>,
) -> ApiResult<CheckpointPage> {
    let page = state
        .service
        .list_checkpoints(&query.unwrap_or_default())
        .await;
    Ok(api_success!(page))
}

pub async fn checkpoint_diff(state: &CheckpointState, id: String) -> ApiResult<CheckpointDiff> {
    match state.service.get_diff(&id).await {
        Ok(diff) => Ok(api_success!(diff)),
        Err(e) => Ok(error_response("Failed to compute checkpoint diff", &e)),
    }
}

pub async fn checkpoint_file_diff(
    state: &CheckpointState,
    id: String,
    path: String,
) -> ApiResult<Option<FileChange>> {
    match state.service.get_file_diff(&id, &path).await {
        Ok(change) => Ok(api_success!(change)),
        Err(e) => Ok(error_response("Failed to compute file diff", &e)),
    }
}

/// A failed rollback still carries its report in `data`.
pub async fn checkpoint_rollback(
    state: &CheckpointState,
    options: RollbackOptions,
) -> ApiResult<RollbackResult> {
    let result = state.service.rollback(options).await;
    if result.success {
        return Ok(api_success!(result));
    }

    let code = result.error_code.map(error_status).unwrap_or(CODE_INTERNAL);
    let message = result
        .error
        .clone()
        .unwrap_or_else(|| "Rollback failed".to_string());
    Ok(ApiResponse::error_with_data(code, message, result))
}

pub async fn checkpoint_keep(state: &CheckpointState, id: String) -> ApiResult<EmptyData> {
    let Some(checkpoint) = state.service.get_checkpoint(&id).await else {
        return Ok(api_error!(CODE_NOT_FOUND, format!("Checkpoint not found: {id}")));
    };
    if state.service.keep_changes(&id).await {
        Ok(api_success!())
    } else {
        Ok(api_error!(
            CODE_CONFLICT,
            format!(
                "Checkpoint {id} cannot be kept from status {}",
                checkpoint.status.as_str()
            )
        ))
    }
}

pub async fn checkpoint_delete(state: &CheckpointState, id: String) -> ApiResult<EmptyData> {
    if state.service.delete_checkpoint(&id).await {
        Ok(api_success!())
    } else {
        Ok(api_error!(CODE_NOT_FOUND, format!("Checkpoint not found: {id}")))
    }
}

pub async fn checkpoint_for_execution(
    state: &CheckpointState,
    execution_id: String,
) -> ApiResult<Option<Checkpoint>> {
    Ok(api_success!(
        state.service.get_execution_checkpoint(&execution_id).await
    ))
}

pub async fn checkpoint_stats(state: &CheckpointState) -> ApiResult<CheckpointStats> {
    Ok(api_success!(state.service.get_stats().await))
}

pub async fn checkpoint_cleanup(state: &CheckpointState) -> ApiResult<usize> {
    Ok(api_success!(state.service.cleanup_old_checkpoints().await))
}
