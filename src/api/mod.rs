// Axum web server layer

use axum::{
    error_handling::HandleErrorLayer,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    routing::{get, post},
    BoxError, Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub mod handlers;
pub mod responses;

use crate::auth::middleware::AuthState;
use crate::auth::service::AuthService;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::remote_config::service::ConfigService;
use crate::state::RedisStore;
use crate::tasks::service::TaskService;

/// Application state containing all shared dependencies
///
/// All components are wrapped in Arc for shared ownership across async tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth_service: Arc<AuthService>,
    pub task_service: Arc<TaskService>,
    pub config_service: Arc<ConfigService>,
    pub redis_store: RedisStore,
    pub db_pool: Arc<PgPool>,
    pub metrics: Arc<Metrics>,
}

/// Routes that never require authentication
fn is_public_path(path: &str) -> bool {
    matches!(
        path,
        "/health" | "/metrics" | "/v1/auth/register" | "/v1/auth/login"
    )
}

/// CORS policy for browser clients
///
/// Auth is bearer-token based (no cookies), so any origin is safe to allow.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Create the Axum router with all routes and middleware
///
/// Middleware stack (outermost to innermost):
/// - Request timeout (tower::timeout) with error handling
/// - Body size limit (tower-http::limit)
/// - CORS (tower-http::cors) - permissive, bearer auth carries no cookies
/// - Tracing (tower-http::trace) - structured request logging
/// - Metrics recording - request counters and latency histograms
/// - Auth middleware (route_layer) - bearer token validation on protected routes
///
/// `/health`, `/metrics` and the register/login endpoints bypass auth.
pub fn create_router(app_state: AppState, auth_state: Arc<AuthState>) -> Router {
    let router = Router::new()
        .route("/v1/auth/register", post(handlers::register_handler))
        .route("/v1/auth/login", post(handlers::login_handler))
        .route("/v1/auth/me", get(handlers::me_handler))
        .route(
            "/v1/tasks",
            post(handlers::submit_task_handler).get(handlers::list_tasks_handler),
        )
        .route("/v1/tasks/stats", get(handlers::task_stats_handler))
        .route("/v1/tasks/:id", get(handlers::get_task_handler))
        .route(
            "/v1/configs",
            post(handlers::create_config_handler).get(handlers::list_configs_handler),
        )
        .route(
            "/v1/configs/:key",
            get(handlers::get_config_handler)
                .put(handlers::update_config_handler)
                .delete(handlers::delete_config_handler),
        )
        .route("/v1/configs/:key/history", get(handlers::config_history_handler))
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler));

    // Auth applies per-route so public paths can opt out
    let router = router.route_layer(axum::middleware::from_fn_with_state(
        auth_state,
        |state: State<Arc<AuthState>>, request: Request, next: Next| async move {
            if is_public_path(request.uri().path()) {
                return Ok(next.run(request).await);
            }

            crate::auth::middleware::auth_middleware(state, request, next).await
        },
    ));

    let router = router
        .layer(axum::middleware::from_fn_with_state(
            app_state.metrics.clone(),
            crate::metrics::track_metrics,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .layer(RequestBodyLimitLayer::new(
            app_state.config.body_size_limit_bytes,
        ));

    // HandleErrorLayer must come before timeout to catch the timeout error
    let timeout_secs = app_state.config.request_timeout_secs;
    let middleware_stack = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(|e: BoxError| async move {
            let status = if e.is::<tower::timeout::error::Elapsed>() {
                StatusCode::REQUEST_TIMEOUT
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, e.to_string())
        }))
        .timeout(Duration::from_secs(timeout_secs))
        .into_inner();

    router.layer(middleware_stack).with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_paths() {
        assert!(is_public_path("/health"));
        assert!(is_public_path("/metrics"));
        assert!(is_public_path("/v1/auth/register"));
        assert!(is_public_path("/v1/auth/login"));

        assert!(!is_public_path("/v1/auth/me"));
        assert!(!is_public_path("/v1/tasks"));
        assert!(!is_public_path("/v1/configs"));
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_browser_clients() {
        use axum::body::Body;
        use axum::http::{header, Method};
        use tower::ServiceExt;

        let app = Router::new()
            .route("/v1/auth/login", post(|| async { StatusCode::OK }))
            .layer(cors_layer());

        let preflight = axum::http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/v1/auth/login")
            .header(header::ORIGIN, "http://localhost:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(preflight).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
    }
}
