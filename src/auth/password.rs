// Password hashing with Argon2id

use crate::core::errors::CryptoError;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

/// Hash a password with Argon2id (PHC string format)
///
/// A fresh random salt is generated for every call, so the same password
/// produces a different hash each time.
pub fn hash_password(password: &str) -> Result<String, CryptoError> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CryptoError::PasswordHashError(e.to_string()))?;

    Ok(hash.to_string())
}

/// Verify a password against a stored PHC hash string
///
/// Returns `Ok(false)` for a mismatch; `Err` only for a malformed hash.
/// Argon2 verification is constant-time with respect to the password.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, CryptoError> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| CryptoError::PasswordHashError(format!("Malformed stored hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_round_trip() {
        let hash = hash_password("correct horse battery staple").unwrap();

        assert!(verify_password("correct horse battery staple", &hash).unwrap());
        assert!(!verify_password("wrong password", &hash).unwrap());
    }

    #[test]
    fn test_hash_is_salted() {
        let hash1 = hash_password("same password").unwrap();
        let hash2 = hash_password("same password").unwrap();

        assert_ne!(hash1, hash2, "Fresh salt should make hashes differ");
    }

    #[test]
    fn test_hash_is_phc_format() {
        let hash = hash_password("pw").unwrap();
        assert!(hash.starts_with("$argon2id$"));
    }

    #[test]
    fn test_malformed_stored_hash_is_error() {
        let result = verify_password("pw", "not-a-phc-string");
        assert!(result.is_err());
    }
}
