//! Batch API handlers.
//!
//! Read access to batches and their requests, plus cancel and retry. Upload
//! creation only happens over the WebSocket protocol.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use curator_core::{
    Batch, BatchFilter, BatchStats, BatchSummary, CancelOutcome, Identity, ManagerError,
    RetryOutcome, UploadRequest,
};

use crate::state::AppState;

/// Maximum allowed limit for batch queries
const MAX_LIMIT: i64 = 100;

/// Default limit for batch queries
const DEFAULT_LIMIT: i64 = 50;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing batches
#[derive(Debug, Deserialize)]
pub struct ListBatchesParams {
    /// Owner to list, admins only. Defaults to the caller.
    pub user_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListBatchesResponse {
    pub batches: Vec<BatchSummary>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    #[serde(flatten)]
    pub batch: Batch,
    pub stats: BatchStats,
}

/// Request body for retrying selected uploads
#[derive(Debug, Deserialize)]
pub struct RetryUploadsBody {
    pub upload_ids: Vec<i64>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ApiErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ApiErrorResponse {
            error: message.into(),
        }),
    )
}

fn internal_error(e: impl std::fmt::Display) -> ApiError {
    error!(error = %e, "Request failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn manager_error(e: ManagerError) -> ApiError {
    match e {
        ManagerError::NotFound(id) => {
            api_error(StatusCode::NOT_FOUND, format!("Batch not found: {}", id))
        }
        ManagerError::PermissionDenied(_) => {
            api_error(StatusCode::FORBIDDEN, "Permission denied")
        }
        e => internal_error(e),
    }
}

/// Load a batch the caller may see.
fn visible_batch(state: &AppState, identity: &Identity, id: i64) -> Result<Batch, ApiError> {
    let batch = state
        .store()
        .get_batch(id)
        .map_err(internal_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Batch not found: {}", id)))?;

    if !identity.can_access(&batch.user_id) {
        warn!(batch_id = id, user = %identity.user_id, "Batch access denied");
        return Err(api_error(StatusCode::FORBIDDEN, "Permission denied"));
    }
    Ok(batch)
}

// ============================================================================
// Handlers
// ============================================================================

/// List batches of the caller (or, for admins, of any user)
pub async fn list_batches(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(params): Query<ListBatchesParams>,
) -> Result<Json<ListBatchesResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let user_id = match params.user_id {
        Some(user_id) if user_id != identity.user_id && !identity.is_admin => {
            return Err(api_error(StatusCode::FORBIDDEN, "Permission denied"));
        }
        Some(user_id) => user_id,
        None => identity.user_id.clone(),
    };

    let filter = BatchFilter::new()
        .with_user_id(user_id)
        .with_limit(limit)
        .with_offset(offset);

    let batches = state.store().list_batches(&filter).map_err(internal_error)?;
    let total = state.store().count_batches(&filter).map_err(internal_error)?;

    Ok(Json(ListBatchesResponse {
        batches,
        total,
        limit,
        offset,
    }))
}

/// Get a batch with its derived stats
pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<Json<BatchResponse>, ApiError> {
    let batch = visible_batch(&state, &identity, id)?;
    let stats = state.store().batch_stats(id).map_err(internal_error)?;
    Ok(Json(BatchResponse { batch, stats }))
}

/// List the upload requests of a batch
pub async fn list_uploads(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<UploadRequest>>, ApiError> {
    visible_batch(&state, &identity, id)?;
    let uploads = state.store().list_requests(id).map_err(internal_error)?;
    Ok(Json(uploads))
}

/// Cancel the queued requests of a batch
pub async fn cancel_batch(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<Json<CancelOutcome>, ApiError> {
    let outcome = state
        .manager()
        .cancel_batch(id, &identity)
        .await
        .map_err(manager_error)?;
    Ok(Json(outcome))
}

/// Retry the failed requests of a batch into a new batch
pub async fn retry_batch(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<Json<RetryOutcome>, ApiError> {
    let outcome = state
        .manager()
        .retry_failed(id, &identity)
        .await
        .map_err(manager_error)?;
    Ok(Json(outcome))
}

/// Retry arbitrary failed requests across users (admin only)
pub async fn admin_retry(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<RetryUploadsBody>,
) -> Result<Json<RetryOutcome>, ApiError> {
    if !identity.is_admin {
        warn!(user = %identity.user_id, "Admin retry denied");
        return Err(api_error(StatusCode::FORBIDDEN, "Admin rights required"));
    }

    let outcome = state
        .manager()
        .retry_selected(&body.upload_ids, &identity)
        .await
        .map_err(manager_error)?;
    Ok(Json(outcome))
}
