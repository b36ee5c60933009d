//! Campaign API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use labelhub_core::{
    AssignedBatch, AssignmentError, CampaignError, CampaignKind, CampaignMeta, CampaignStats,
    CampaignSummary, CreateCampaignRequest, NewWorkItem, Overview, RunError, ServiceIdentity,
    SubmitReceipt,
};

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a campaign
#[derive(Debug, Deserialize)]
pub struct CreateCampaignBody {
    /// Slug-like campaign identifier
    pub id: String,
    pub kind: CampaignKind,
    /// Opaque configuration passed through to workers
    #[serde(default)]
    pub config: Option<Value>,
    pub items: Vec<NewWorkItem>,
}

/// Request body for requesting a batch
#[derive(Debug, Deserialize)]
pub struct AssignBody {
    pub annotator_id: String,
    #[serde(default)]
    pub annotator_group: Option<u32>,
}

/// Response for a batch request; `batch` is null when the pool is
/// exhausted and the caller should render a closed state.
#[derive(Debug, Serialize)]
pub struct AssignResponse {
    pub batch: Option<AssignedBatch>,
}

/// Request body for submitting a finished batch
#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub batch_idx: u32,
    pub annotator_id: String,
    pub rows: Vec<Value>,
}

/// Request body for starting an automated run
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub started: bool,
    pub run_id: Option<String>,
}

/// Response for pausing a run
#[derive(Debug, Serialize)]
pub struct PauseResponse {
    /// Whether a live run was signalled (vs only normalizing state)
    pub live: bool,
}

/// Request body for clearing one unit of work
#[derive(Debug, Deserialize)]
pub struct ClearBody {
    /// Batch index for human campaigns, example index otherwise
    pub idx: usize,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub released: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn campaign_error(e: CampaignError) -> ApiError {
    let status = match &e {
        CampaignError::NotFound(_) => StatusCode::NOT_FOUND,
        CampaignError::AlreadyExists(_) => StatusCode::CONFLICT,
        CampaignError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        CampaignError::CorruptStore(_) | CampaignError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse { error: e.to_string() }))
}

fn assignment_error(e: AssignmentError) -> ApiError {
    match e {
        AssignmentError::Campaign(inner) => campaign_error(inner),
        AssignmentError::Mismatch { .. } => (
            StatusCode::CONFLICT,
            Json(ErrorResponse { error: e.to_string() }),
        ),
        AssignmentError::NotHuman(_) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: e.to_string() }),
        ),
    }
}

fn run_error(e: RunError) -> ApiError {
    match e {
        RunError::Campaign(inner) => campaign_error(inner),
        RunError::NotAutomated(_) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: e.to_string() }),
        ),
        RunError::Worker { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse { error: e.to_string() }),
        ),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a new campaign with all items free
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCampaignBody>,
) -> Result<(StatusCode, Json<CampaignMeta>), ApiError> {
    let request = CreateCampaignRequest {
        id: body.id,
        kind: body.kind,
        config: body.config.unwrap_or_else(|| Value::Object(Default::default())),
        items: body.items,
    };

    let meta = state
        .engine()
        .create(request)
        .await
        .map_err(campaign_error)?;
    Ok((StatusCode::CREATED, Json(meta)))
}

/// List all campaigns, newest first
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CampaignSummary>>, ApiError> {
    let summaries = state.engine().list().await.map_err(campaign_error)?;
    Ok(Json(summaries))
}

/// Get one campaign's metadata and stats
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CampaignSummary>, ApiError> {
    let meta = state.engine().meta(&id).await.map_err(campaign_error)?;
    let stats = state.engine().stats(&id).await.map_err(campaign_error)?;
    Ok(Json(CampaignSummary { meta, stats }))
}

/// Replace a campaign's opaque configuration
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(config): Json<Value>,
) -> Result<Json<CampaignMeta>, ApiError> {
    let meta = state
        .engine()
        .update_config(&id, config)
        .await
        .map_err(campaign_error)?;
    Ok(Json(meta))
}

/// Delete a campaign wholesale
pub async fn delete_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine().delete(&id).await.map_err(campaign_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Progress overview: batch rows for human campaigns, item rows with
/// joined outputs otherwise
pub async fn get_overview(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Overview>, ApiError> {
    let overview = state.engine().overview(&id).await.map_err(campaign_error)?;
    Ok(Json(overview))
}

/// Progress counts
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CampaignStats>, ApiError> {
    let stats = state.engine().stats(&id).await.map_err(campaign_error)?;
    Ok(Json(stats))
}

/// Request the next free batch for an annotator session
pub async fn request_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AssignBody>,
) -> Result<Json<AssignResponse>, ApiError> {
    let identity = ServiceIdentity {
        annotator_id: body.annotator_id,
        annotator_group: body.annotator_group,
    };
    let batch = state
        .engine()
        .request_batch(&id, &identity)
        .await
        .map_err(assignment_error)?;
    Ok(Json(AssignResponse { batch }))
}

/// Submit a finished batch
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SubmitBody>,
) -> Result<Json<SubmitReceipt>, ApiError> {
    let receipt = state
        .engine()
        .submit(&id, body.batch_idx, &body.annotator_id, body.rows)
        .await
        .map_err(assignment_error)?;
    Ok(Json(receipt))
}

/// Start (or resume) an automated run
pub async fn start_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RunResponse>, ApiError> {
    let meta = state.engine().meta(&id).await.map_err(campaign_error)?;
    let worker = state.build_worker(&meta.config).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: e.to_string() }),
        )
    })?;

    let handle = state
        .engine()
        .start(&id, worker)
        .await
        .map_err(run_error)?;
    Ok(Json(RunResponse {
        started: handle.is_some(),
        run_id: handle.map(|h| h.run_id().to_string()),
    }))
}

/// Pause a live run at its next item boundary
pub async fn pause_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PauseResponse>, ApiError> {
    let live = state.engine().pause(&id).await.map_err(run_error)?;
    Ok(Json(PauseResponse { live }))
}

/// Reset one batch (human) or one example (automated) to free
pub async fn clear_output(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ClearBody>,
) -> Result<Json<ClearResponse>, ApiError> {
    let released = state
        .engine()
        .clear(&id, body.idx)
        .await
        .map_err(campaign_error)?;
    Ok(Json(ClearResponse { released }))
}

/// Reset every item and delete all outputs
pub async fn clear_all(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine().clear_all(&id).await.map_err(campaign_error)?;
    Ok(StatusCode::NO_CONTENT)
}
