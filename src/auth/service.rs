// Registration and login service

use crate::auth::audit_logger::{AuditEvent, AuditLogger};
use crate::auth::password;
use crate::auth::token::TokenService;
use crate::auth::user_store::UserStore;
use crate::core::errors::AppError;
use crate::core::models::{User, UserView};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Registration request payload
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

/// Login request payload
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Response for successful register/login
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserView,
}

/// Service layer for registration, login and session lookup
pub struct AuthService {
    user_store: Arc<dyn UserStore>,
    token_service: Arc<TokenService>,
    audit_logger: Arc<AuditLogger>,
}

impl AuthService {
    /// Create a new auth service
    pub fn new(
        user_store: Arc<dyn UserStore>,
        token_service: Arc<TokenService>,
        audit_logger: Arc<AuditLogger>,
    ) -> Self {
        Self {
            user_store,
            token_service,
            audit_logger,
        }
    }

    /// Register a new account and issue a session token
    pub async fn register(
        &self,
        request: RegisterRequest,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<AuthResponse, AppError> {
        validate_register(&request)?;

        let password_hash = password::hash_password(&request.password)?;
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: request.email.trim().to_lowercase(),
            password_hash,
            display_name: request.display_name.trim().to_string(),
            created_at: now,
            updated_at: now,
        };

        self.user_store.create_user(&user).await?;

        let token = self.token_service.issue(user.id, &user.email)?;

        self.audit_logger
            .log(AuditEvent::RegisterSuccess { user_id: user.id }, ip, user_agent);
        info!(user_id = %user.id, "User registered");

        Ok(AuthResponse {
            token,
            user: user.view(),
        })
    }

    /// Verify credentials and issue a session token
    ///
    /// Unknown email and wrong password surface as the same error so the
    /// client cannot distinguish them.
    pub async fn login(
        &self,
        request: LoginRequest,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<AuthResponse, AppError> {
        let user = match self.user_store.find_by_email(request.email.trim()).await? {
            Some(user) => user,
            None => {
                self.audit_logger.log(
                    AuditEvent::LoginFailure { reason: "unknown email".to_string() },
                    ip,
                    user_agent,
                );
                return Err(AppError::AuthenticationError("unknown email".to_string()));
            }
        };

        if !password::verify_password(&request.password, &user.password_hash)? {
            self.audit_logger.log(
                AuditEvent::LoginFailure { reason: "password mismatch".to_string() },
                ip,
                user_agent,
            );
            return Err(AppError::AuthenticationError("password mismatch".to_string()));
        }

        let token = self.token_service.issue(user.id, &user.email)?;

        self.audit_logger
            .log(AuditEvent::LoginSuccess { user_id: user.id }, ip, user_agent);
        info!(user_id = %user.id, "User logged in");

        Ok(AuthResponse {
            token,
            user: user.view(),
        })
    }

    /// Load the current user's public profile
    pub async fn me(&self, user_id: Uuid) -> Result<UserView, AppError> {
        let user = self
            .user_store
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user".to_string()))?;

        Ok(user.view())
    }

    /// Repository handle, used by the auth middleware
    pub fn user_store(&self) -> Arc<dyn UserStore> {
        self.user_store.clone()
    }
}

/// Validate a registration payload
fn validate_register(request: &RegisterRequest) -> Result<(), AppError> {
    let email = request.email.trim();
    if email.is_empty() || !is_plausible_email(email) {
        return Err(AppError::ValidationError("invalid email address".to_string()));
    }

    if request.password.len() < 8 {
        return Err(AppError::ValidationError(
            "password must be at least 8 characters".to_string(),
        ));
    }

    let display_name = request.display_name.trim();
    if display_name.is_empty() {
        return Err(AppError::ValidationError("display_name must not be empty".to_string()));
    }
    if display_name.len() > 64 {
        return Err(AppError::ValidationError(
            "display_name must be at most 64 characters".to_string(),
        ));
    }

    Ok(())
}

/// Minimal email shape check: one '@' with non-empty local part and a dot in the domain
fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}
