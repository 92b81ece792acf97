use crate::config::Config;
use crate::crypto::PiiCipher;
use crate::errors::{AppError, ResultExt};
use crate::fill::FillOrchestrator;
use crate::matching_client::MatchingClient;
use crate::models::{
    BatchDetailResponse, FillExecuteRequest, FillExecuteResponse, FillPreviewResponse,
    SubmitBatchRequest, SubmitBatchResponse,
};
use crate::programs::FillProgramRegistry;
use crate::store::{BatchStore, LeadStore, Stores};
use crate::submission::SubmissionOrchestrator;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Repository bundle (Postgres in production, in-memory in tests).
    pub stores: Stores,
    /// Client for the bureau matching vendor.
    pub matching_client: MatchingClient,
    /// Lazy registry of single-bureau fill programs.
    pub fill_registry: Arc<FillProgramRegistry>,
    /// Cipher for SSN/DOB at rest.
    pub cipher: Arc<dyn PiiCipher>,
    /// Application configuration.
    pub config: Config,
}

/// Health check endpoint.
///
/// Returns the service status and version.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "prescreen-api",
            "version": "0.1.0"
        })),
    )
}

/// POST /api/v1/prescreen/batches
///
/// Submits a batch of identity records against a program: validation, dedup,
/// vendor submission, scoring, and persistence in one synchronous call.
pub async fn submit_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SubmitBatchRequest>,
) -> Result<(StatusCode, Json<SubmitBatchResponse>), AppError> {
    require_session(&state, &headers)?;
    tracing::info!(
        "POST /prescreen/batches - program {} with {} record(s)",
        request.program_id,
        request.records.len()
    );

    let orchestrator = SubmissionOrchestrator::new(
        state.stores.clone(),
        state.matching_client.clone(),
        state.cipher.clone(),
        state.config.tier_cutpoints,
    );
    let response = orchestrator
        .submit_batch(
            request.program_id,
            request.records,
            request.batch_name,
            request.submitted_by.unwrap_or_else(|| "api".to_string()),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/v1/bureau-fill/preview
///
/// Read-only scan of matched leads with missing bureau results.
pub async fn fill_preview(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<FillPreviewResponse>, AppError> {
    require_session(&state, &headers)?;
    tracing::info!("GET /bureau-fill/preview");

    let orchestrator = fill_orchestrator(&state);
    let response = orchestrator.scan().await?;

    tracing::info!(
        "Fill preview: {} lead(s) with missing bureaus",
        response.summary.total_leads_with_missing
    );
    Ok(Json(response))
}

/// POST /api/v1/bureau-fill/execute
///
/// Runs the bureau fill. Admin only; each fill pass spends real bureau
/// queries.
pub async fn fill_execute(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<FillExecuteRequest>,
) -> Result<Json<FillExecuteResponse>, AppError> {
    require_admin(&state, &headers)?;
    tracing::info!("POST /bureau-fill/execute");

    let orchestrator = fill_orchestrator(&state);
    let response = orchestrator.execute(request).await?;

    tracing::info!("Fill execution updated {} lead(s)", response.total_updated);
    Ok(Json(response))
}

/// GET /api/v1/batches/:id
pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchDetailResponse>, AppError> {
    require_session(&state, &headers)?;
    tracing::info!("GET /batches/{}", id);

    let batch = state
        .stores
        .batches
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Batch {} not found", id)))?;
    let lead_count = state
        .stores
        .leads
        .count_for_batch(id)
        .await
        .context("Failed to count leads for batch")?;

    Ok(Json(BatchDetailResponse { batch, lead_count }))
}

fn fill_orchestrator(state: &AppState) -> FillOrchestrator {
    FillOrchestrator::new(
        state.stores.clone(),
        state.matching_client.clone(),
        state.cipher.clone(),
        state.fill_registry.clone(),
        state.config.tier_cutpoints,
    )
}

/// Validates the bearer token on regular API endpoints. The admin token is
/// also accepted.
fn require_session(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let token = bearer_token(headers)?;
    if constant_time_compare(token, &state.config.api_token)
        || constant_time_compare(token, &state.config.admin_token)
    {
        Ok(())
    } else {
        tracing::warn!("Rejected request with invalid API token");
        Err(AppError::Unauthorized("Invalid API token".to_string()))
    }
}

/// Validates the admin bearer token. The regular API token is not enough.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let token = bearer_token(headers)?;
    if !constant_time_compare(token, &state.config.admin_token) {
        if constant_time_compare(token, &state.config.api_token) {
            tracing::warn!("Rejected non-admin token on admin endpoint");
            return Err(AppError::Forbidden(
                "Admin token required for this endpoint".to_string(),
            ));
        }
        tracing::warn!("Rejected request with invalid API token");
        return Err(AppError::Unauthorized("Invalid API token".to_string()));
    }
    Ok(())
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))
}

/// Constant-time string comparison (basic implementation)
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
