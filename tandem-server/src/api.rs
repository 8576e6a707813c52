//! JSON endpoints over [`SyncService`].
//!
//! Every user-scoped route reads the caller from the `x-user-id` header,
//! which the upstream identity proxy sets after authenticating the request.

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tandem_providers::{ServiceHealth, ServiceInfo};
use tandem_sync::{
    ConnectionInfo, JobDetail, ManualSyncAccepted, ScheduleAccepted, ScheduleSummary,
    ScheduleUpdate, SyncService, SyncStatusReport,
};
use tandem_types::{JobId, ServicePair, SyncOptions, SyncSchedule, UserId};

use crate::error::ApiError;

/// Header carrying the authenticated user id.
pub const USER_HEADER: &str = "x-user-id";

type ApiResult<T> = Result<T, ApiError>;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    service: Arc<SyncService>,
}

impl AppState {
    pub fn new(service: Arc<SyncService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<SyncService> {
        &self.service
    }
}

/// The caller, as named by the identity proxy.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserId);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::MissingUser)?;
        Ok(Self(UserId::new(user)))
    }
}

// ── Bodies ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualSyncBody {
    pub service_pairs: Vec<ServicePair>,
    pub sync_type: String,
    #[serde(default)]
    pub sync_options: SyncOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleBody {
    pub service_pairs: Vec<ServicePair>,
    pub sync_type: String,
    #[serde(default)]
    pub sync_options: SyncOptions,
    pub schedule: SyncSchedule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectBody {
    pub code: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeQuery {
    pub state: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionsResponse {
    pub services: Vec<String>,
}

// ── Router ──────────────────────────────────────────────────────

/// Builds the `/api/v1` router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/services", get(list_services))
        .route("/api/v1/services/pairs", get(supported_pairs))
        .route("/api/v1/services/health", get(services_health))
        .route("/api/v1/connections", get(connections))
        .route(
            "/api/v1/connections/{service}",
            post(complete_connection).delete(disconnect),
        )
        .route("/api/v1/connections/{service}/authorize", get(authorize))
        .route("/api/v1/sync/manual", post(manual_sync))
        .route("/api/v1/sync/schedules", post(schedule_sync))
        .route(
            "/api/v1/sync/schedules/{sync_type}",
            axum::routing::patch(update_schedule).delete(delete_schedule),
        )
        .route("/api/v1/sync/status", get(status))
        .route("/api/v1/sync/jobs/{job_id}", get(job))
        .route("/api/v1/sync/jobs/{job_id}/cancel", post(cancel_job))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_services(State(state): State<AppState>) -> Json<Vec<ServiceInfo>> {
    Json(state.service.list_services())
}

async fn supported_pairs(State(state): State<AppState>) -> Json<Vec<ServicePair>> {
    Json(state.service.get_supported_pairs())
}

async fn services_health(State(state): State<AppState>) -> Json<Vec<ServiceHealth>> {
    Json(state.service.health_report().await)
}

// ── Connections ─────────────────────────────────────────────────

async fn connections(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<ConnectionsResponse>> {
    let services = state.service.connected_services(&user).await?;
    Ok(Json(ConnectionsResponse { services }))
}

async fn authorize(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(service): Path<String>,
    Query(query): Query<AuthorizeQuery>,
) -> ApiResult<Json<AuthorizeResponse>> {
    let url = state
        .service
        .connect_url(&service, &query.state, &query.redirect_uri)?;
    Ok(Json(AuthorizeResponse { url }))
}

async fn complete_connection(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(service): Path<String>,
    Json(body): Json<ConnectBody>,
) -> ApiResult<Json<ConnectionInfo>> {
    let info = state
        .service
        .complete_connection(&user, &service, &body.code, &body.redirect_uri)
        .await?;
    Ok(Json(info))
}

async fn disconnect(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(service): Path<String>,
) -> ApiResult<StatusCode> {
    if state.service.disconnect_service(&user, &service).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("{service} is not connected")))
    }
}

// ── Sync ────────────────────────────────────────────────────────

async fn manual_sync(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<ManualSyncBody>,
) -> ApiResult<(StatusCode, Json<ManualSyncAccepted>)> {
    let accepted = state
        .service
        .initiate_manual_sync(user, body.service_pairs, body.sync_type, body.sync_options)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn schedule_sync(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<ScheduleBody>,
) -> ApiResult<(StatusCode, Json<ScheduleAccepted>)> {
    let accepted = state
        .service
        .schedule_auto_sync(
            user,
            body.service_pairs,
            body.sync_type,
            body.sync_options,
            body.schedule,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(accepted)))
}

async fn update_schedule(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(sync_type): Path<String>,
    Json(update): Json<ScheduleUpdate>,
) -> ApiResult<Json<ScheduleSummary>> {
    let summary = state
        .service
        .update_schedule(&user, &sync_type, update)
        .await?;
    Ok(Json(summary))
}

async fn delete_schedule(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(sync_type): Path<String>,
) -> ApiResult<StatusCode> {
    state.service.delete_schedule(&user, &sync_type).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<SyncStatusReport>> {
    Ok(Json(state.service.get_sync_status(&user).await?))
}

async fn job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobDetail>> {
    let job_id = parse_job_id(&job_id)?;
    Ok(Json(state.service.get_job(&user, job_id).await?))
}

async fn cancel_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job_id = parse_job_id(&job_id)?;
    state.service.cancel_job(&user, job_id).await?;
    Ok(StatusCode::ACCEPTED)
}

fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    JobId::parse(raw).map_err(|_| ApiError::BadRequest(format!("invalid job id: {raw}")))
}
