// Domain error types - Secure error handling with no information disclosure

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    /// Request payload failed validation (HTTP 400)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Missing or invalid credentials (HTTP 401)
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// Authenticated but not allowed (HTTP 403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource does not exist (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Cryptographic error (HTTP 500)
    #[error("Cryptographic error: {0}")]
    CryptoError(#[from] CryptoError),

    /// Database error (HTTP 500)
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Queue/cache store error (HTTP 500)
    #[error("State error: {0}")]
    StateError(String),

    /// Configuration error (HTTP 500)
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// Cryptographic operation errors
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Failed to hash or verify a password
    #[error("Password hashing failed: {0}")]
    PasswordHashError(String),

    /// Failed to sign or validate a token
    #[error("Token error: {0}")]
    TokenError(String),

    /// Failed to encrypt a value
    #[error("Encryption failed: {0}")]
    EncryptionError(String),

    /// Failed to decrypt a value
    #[error("Decryption failed: {0}")]
    DecryptionError(String),

    /// Ciphertext is malformed
    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(String),
}

impl AppError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::ValidationError(_) => 400,
            AppError::AuthenticationError(_) => 401,
            AppError::Forbidden(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::Conflict(_) => 409,
            AppError::CryptoError(_) => 500,
            AppError::DatabaseError(_) => 500,
            AppError::StateError(_) => 500,
            AppError::ConfigurationError(_) => 500,
        }
    }

    /// Get user-friendly error message (no sensitive information)
    pub fn user_message(&self) -> String {
        match self {
            AppError::ValidationError(reason) => format!("Validation error: {}", reason),
            AppError::AuthenticationError(_) => "Invalid credentials".to_string(),
            AppError::Forbidden(reason) => format!("Forbidden: {}", reason),
            AppError::NotFound(resource) => format!("Not found: {}", resource),
            AppError::Conflict(reason) => format!("Conflict: {}", reason),
            AppError::CryptoError(_) => "Internal error".to_string(),
            AppError::DatabaseError(_) => "Internal error".to_string(),
            AppError::StateError(_) => "Internal error".to_string(),
            AppError::ConfigurationError(_) => "Internal error".to_string(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("resource".to_string()),
            other => AppError::DatabaseError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let crypto_err = CryptoError::DecryptionError("bad tag".to_string());
        let app_err: AppError = crypto_err.into();

        match app_err {
            AppError::CryptoError(CryptoError::DecryptionError(_)) => (),
            _ => panic!("Expected CryptoError::DecryptionError"),
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::ValidationError("bad".to_string()).status_code(), 400);
        assert_eq!(AppError::AuthenticationError("bad".to_string()).status_code(), 401);
        assert_eq!(AppError::NotFound("user".to_string()).status_code(), 404);
        assert_eq!(AppError::Conflict("email taken".to_string()).status_code(), 409);
        assert_eq!(AppError::DatabaseError("down".to_string()).status_code(), 500);
    }

    #[test]
    fn test_user_messages_no_sensitive_data() {
        // Database errors may contain connection strings - must not leak
        let err = AppError::DatabaseError("postgresql://user:password@db/prod failed".to_string());
        let user_msg = err.user_message();

        assert!(!user_msg.contains("password"));
        assert_eq!(user_msg, "Internal error");
    }

    #[test]
    fn test_auth_error_does_not_disclose_reason() {
        // Unknown email and bad password must render identically to the client
        let unknown = AppError::AuthenticationError("no such email".to_string());
        let bad_pw = AppError::AuthenticationError("password mismatch".to_string());

        assert_eq!(unknown.user_message(), bad_pw.user_message());
        assert_eq!(unknown.user_message(), "Invalid credentials");
    }

    #[test]
    fn test_validation_message_preserved() {
        let err = AppError::ValidationError("password must be at least 8 characters".to_string());
        let user_msg = err.user_message();

        assert!(user_msg.contains("8 characters"));
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_404() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.status_code(), 404);
    }
}
