//! Inference instance handlers.

use crate::error::{ApiError, ApiResult};
use crate::lifecycle::{CreateInference, InferenceView};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use ember_core::{Account, CommitHash, InstanceDetail, InstanceId, ProjectId};
use serde::{Deserialize, Serialize};

/// Header carrying the requesting account, set by the fronting gateway.
pub const USER_HEADER: &str = "x-ember-user";

/// Account used when no user header is present.
pub const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Deserialize)]
pub struct CreateInferenceRequest {
    pub owner: String,
    pub project_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct GetInferenceQuery {
    /// Long-poll until the instance is reachable or failed.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
pub struct LastCommitResponse {
    pub last_commit: CommitHash,
}

fn requester(headers: &HeaderMap) -> ApiResult<Account> {
    let value = match headers.get(USER_HEADER) {
        Some(value) => value
            .to_str()
            .map_err(|_| ApiError::BadRequest(format!("{USER_HEADER} is not valid UTF-8")))?,
        None => ANONYMOUS,
    };
    Ok(Account::parse(value)?)
}

fn project(owner: String, project_id: String) -> ApiResult<(Account, ProjectId)> {
    Ok((Account::parse(owner)?, ProjectId::parse(project_id)?))
}

/// POST /v1/inference/project - Create or reuse an inference instance.
pub async fn create_inference(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateInferenceRequest>,
) -> ApiResult<(StatusCode, Json<InferenceView>)> {
    let requester = requester(&headers)?;
    let (owner, project_id) = project(req.owner, req.project_id)?;

    let view = state
        .coordinator
        .create(&CreateInference {
            requester,
            owner,
            project_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /v1/inference/project/{owner}/{project_id}/{instance_id}
pub async fn get_inference(
    State(state): State<AppState>,
    Path((owner, project_id, instance_id)): Path<(String, String, String)>,
    Query(query): Query<GetInferenceQuery>,
) -> ApiResult<Json<InferenceView>> {
    let (owner, project_id) = project(owner, project_id)?;
    let id = InstanceId::parse(&instance_id)?;

    let view = if query.wait {
        let lifecycle = &state.config.lifecycle;
        state
            .coordinator
            .wait_for_outcome(
                &owner,
                &project_id,
                id,
                lifecycle.poll_timeout(),
                lifecycle.poll_interval(),
            )
            .await?
    } else {
        state
            .coordinator
            .get_for_project(&owner, &project_id, id)
            .await?
    };

    Ok(Json(view))
}

/// GET /v1/inference/project/{owner}/{project_id}/last-commit
pub async fn get_last_commit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, project_id)): Path<(String, String)>,
) -> ApiResult<Json<LastCommitResponse>> {
    let requester = requester(&headers)?;
    let (owner, project_id) = project(owner, project_id)?;

    let last_commit = state
        .coordinator
        .last_commit(&requester, &owner, &project_id)
        .await?;

    Ok(Json(LastCommitResponse { last_commit }))
}

/// PUT /v1/internal/inference/{instance_id} - Backend status report.
pub async fn update_inference_detail(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Json(detail): Json<InstanceDetail>,
) -> ApiResult<StatusCode> {
    let id = InstanceId::parse(&instance_id)?;
    state.coordinator.update_detail(id, &detail).await?;
    Ok(StatusCode::NO_CONTENT)
}
