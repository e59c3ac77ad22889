// Axum authentication middleware

use crate::auth::token::TokenService;
use crate::auth::user_store::UserStore;
use crate::core::models::AuthUser;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{Json, Response},
};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::api::responses::ErrorResponse;

/// Authentication state containing the dependencies the middleware needs
#[derive(Clone)]
pub struct AuthState {
    pub token_service: Arc<TokenService>,
    pub user_store: Arc<dyn UserStore>,
}

/// Authentication middleware function
///
/// Extracts the Bearer token from the `Authorization` header, validates the
/// signature and expiry, loads the user, and injects `AuthUser` into request
/// extensions for handlers to use.
pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    // 1. Extract bearer token from header
    let token = extract_bearer_token(request.headers()).ok_or_else(|| {
        unauthorized("Missing bearer token")
    })?;

    // 2. Validate token
    let claims = auth_state
        .token_service
        .validate(&token)
        .map_err(|_| unauthorized("Invalid or expired token"))?;

    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| unauthorized("Invalid token subject"))?;

    // 3. Load user (token may outlive a deleted account)
    let user = match auth_state.user_store.find_by_id(user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(unauthorized("Unknown user")),
        Err(e) => {
            error!(error = %e, "User lookup failed during authentication");
            let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return Err((
                status,
                Json(ErrorResponse {
                    error: e.user_message(),
                    request_id: None,
                }),
            ));
        }
    };

    // 4. Set extension for handler
    request.extensions_mut().insert(AuthUser {
        id: user.id,
        email: user.email,
    });

    // 5. Continue to next middleware/handler
    Ok(next.run(request).await)
}

fn unauthorized(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: message.to_string(),
            request_id: None,
        }),
    )
}

/// Extract a bearer token from request headers
fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Extract IP address from request headers
///
/// Checks `X-Forwarded-For` first (for proxied requests), then `X-Real-IP`.
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-Forwarded-For")
        .or_else(|| headers.get("X-Real-IP"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("User-Agent")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
