// JWT issuance and validation

use crate::core::errors::CryptoError;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims for an authenticated session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// User email
    pub email: String,
    /// Issued-at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
}

/// Signs and validates session tokens (HS256, shared secret from config)
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_secs: u64,
}

impl TokenService {
    /// Create a token service from the configured shared secret
    pub fn new(secret: &str, expiry_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_secs,
        }
    }

    /// Issue a token for the given user
    pub fn issue(&self, user_id: Uuid, email: &str) -> Result<String, CryptoError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: now,
            exp: now + self.expiry_secs as i64,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| CryptoError::TokenError(format!("Failed to sign token: {}", e)))
    }

    /// Validate a token's signature and expiry, returning its claims
    pub fn validate(&self, token: &str) -> Result<Claims, CryptoError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| CryptoError::TokenError(format!("Invalid token: {}", e)))?;

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new("test_secret_test_secret_test_secret_!!", 3600)
    }

    #[test]
    fn test_issue_and_validate() {
        let svc = service();
        let user_id = Uuid::new_v4();

        let token = svc.issue(user_id, "a@example.com").unwrap();
        let claims = svc.validate(&token).unwrap();

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email, "a@example.com");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let svc = service();
        let other = TokenService::new("another_secret_another_secret_another!", 3600);

        let token = svc.issue(Uuid::new_v4(), "a@example.com").unwrap();
        assert!(other.validate(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        // Issue a token that expired an hour ago by backdating the claims
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            email: "a@example.com".to_string(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let secret = "test_secret_test_secret_test_secret_!!";
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();

        assert!(service().validate(&token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(service().validate("not.a.jwt").is_err());
    }
}
