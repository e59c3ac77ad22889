// HTTP request handlers

use crate::api::responses::{ApiError, HealthResponse};
use crate::api::AppState;
use crate::auth::middleware::{extract_ip_address, extract_user_agent};
use crate::auth::service::{AuthResponse, LoginRequest, RegisterRequest};
use crate::core::models::{AuthUser, ConfigEntryView, UserView};
use crate::remote_config::service::{ConfigHistoryView, CreateConfigRequest, UpdateConfigRequest};
use crate::tasks::service::{ListTasksQuery, SubmitTaskRequest};
use crate::tasks::types::{QueueStats, Task};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Bound on each dependency ping in the health check
const HEALTH_PING_TIMEOUT: Duration = Duration::from_millis(500);

// ---- Auth ----

/// POST /v1/auth/register
pub async fn register_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let ip = extract_ip_address(&headers);
    let user_agent = extract_user_agent(&headers);

    let response = state
        .auth_service
        .register(request, ip.as_deref(), user_agent.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /v1/auth/login
pub async fn login_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let ip = extract_ip_address(&headers);
    let user_agent = extract_user_agent(&headers);

    let response = state
        .auth_service
        .login(request, ip.as_deref(), user_agent.as_deref())
        .await?;

    Ok(Json(response))
}

/// GET /v1/auth/me
pub async fn me_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<UserView>, ApiError> {
    let view = state.auth_service.me(auth_user.id).await?;
    Ok(Json(view))
}

// ---- Tasks ----

/// POST /v1/tasks
pub async fn submit_task_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(request): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let task = state.task_service.submit(request, auth_user.id).await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// GET /v1/tasks/:id
pub async fn get_task_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    let task = state.task_service.get(id, auth_user.id).await?;
    Ok(Json(task))
}

/// GET /v1/tasks
pub async fn list_tasks_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = state.task_service.list(auth_user.id, query).await?;
    Ok(Json(tasks))
}

/// GET /v1/tasks/stats
pub async fn task_stats_handler(
    State(state): State<AppState>,
) -> Result<Json<QueueStats>, ApiError> {
    let stats = state.task_service.stats().await?;
    Ok(Json(stats))
}

// ---- Remote configuration ----

#[derive(Debug, Deserialize)]
pub struct RevealQuery {
    #[serde(default)]
    pub reveal: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// POST /v1/configs
pub async fn create_config_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(request): Json<CreateConfigRequest>,
) -> Result<(StatusCode, Json<ConfigEntryView>), ApiError> {
    let view = state.config_service.create(request, auth_user.id).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /v1/configs
pub async fn list_configs_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConfigEntryView>>, ApiError> {
    let views = state.config_service.list().await?;
    Ok(Json(views))
}

/// GET /v1/configs/:key
pub async fn get_config_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<RevealQuery>,
) -> Result<Json<ConfigEntryView>, ApiError> {
    let view = state.config_service.get(&key, query.reveal).await?;
    Ok(Json(view))
}

/// PUT /v1/configs/:key
pub async fn update_config_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(key): Path<String>,
    Json(request): Json<UpdateConfigRequest>,
) -> Result<Json<ConfigEntryView>, ApiError> {
    let view = state
        .config_service
        .update(&key, request, auth_user.id)
        .await?;
    Ok(Json(view))
}

/// DELETE /v1/configs/:key
pub async fn delete_config_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.config_service.delete(&key, auth_user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/configs/:key/history
pub async fn config_history_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ConfigHistoryView>>, ApiError> {
    let history = state.config_service.history(&key, query.limit).await?;
    Ok(Json(history))
}

// ---- Operational ----

/// GET /health
///
/// Each dependency ping is bounded so a slow backend can't stall the probe;
/// a timed-out ping reports as degraded rather than hanging.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let redis_status =
        match tokio::time::timeout(HEALTH_PING_TIMEOUT, state.redis_store.ping()).await {
            Ok(Ok(())) => "connected",
            Ok(Err(_)) => "disconnected",
            Err(_) => {
                debug!("Redis ping timed out in health check");
                "slow"
            }
        };

    let database_status = match tokio::time::timeout(
        HEALTH_PING_TIMEOUT,
        sqlx::query("SELECT 1").execute(state.db_pool.as_ref()),
    )
    .await
    {
        Ok(Ok(_)) => "connected",
        Ok(Err(_)) => "disconnected",
        Err(_) => {
            debug!("Database ping timed out in health check");
            "slow"
        }
    };

    let healthy = redis_status == "connected" && database_status == "connected";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            redis: redis_status.to_string(),
            database: database_status.to_string(),
        }),
    )
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, ApiError> {
    Ok(state.metrics.render()?)
}
