// Encryption at rest and masking for secret configuration values

use crate::core::errors::CryptoError;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Prefix carried by every ciphertext; the version segment allows future key
/// or format rotation without guessing at stored data.
const CIPHERTEXT_PREFIX: &str = "gw:v1:";

/// AES-GCM nonce length in bytes
const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher for configuration values
///
/// Ciphertexts are self-describing strings of the form
/// `gw:v1:<base64(nonce || ciphertext)>` with the nonce prepended to the
/// authenticated ciphertext.
pub struct ConfigCipher {
    cipher: Aes256Gcm,
}

impl ConfigCipher {
    /// Create a cipher from a 64-character hex key (32 bytes)
    pub fn from_hex_key(hex_key: &str) -> Result<Self, CryptoError> {
        let key_bytes = hex::decode(hex_key).map_err(|e| {
            CryptoError::EncryptionError(format!("Encryption key is not valid hex: {}", e))
        })?;

        if key_bytes.len() != 32 {
            return Err(CryptoError::EncryptionError(format!(
                "Encryption key must be 32 bytes, got {}",
                key_bytes.len()
            )));
        }

        Ok(Self {
            cipher: Aes256Gcm::new(GenericArray::from_slice(&key_bytes)),
        })
    }

    /// Encrypt a plaintext value into the versioned ciphertext format
    pub fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionError(format!("AES-256-GCM encryption failed: {}", e)))?;

        // Prepend nonce to ciphertext
        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", CIPHERTEXT_PREFIX, BASE64.encode(sealed)))
    }

    /// Decrypt a versioned ciphertext back to the plaintext value
    pub fn open(&self, sealed: &str) -> Result<String, CryptoError> {
        let encoded = sealed.strip_prefix(CIPHERTEXT_PREFIX).ok_or_else(|| {
            CryptoError::InvalidCiphertext("missing gw:v1: prefix".to_string())
        })?;

        let data = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidCiphertext(format!("bad base64: {}", e)))?;

        if data.len() < NONCE_LEN {
            return Err(CryptoError::InvalidCiphertext(
                "data too short for AES-256-GCM".to_string(),
            ));
        }

        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|e| CryptoError::DecryptionError(format!("AES-256-GCM decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::DecryptionError(format!("plaintext was not UTF-8: {}", e)))
    }

    /// Whether a stored value is in the sealed format
    pub fn is_sealed(value: &str) -> bool {
        value.starts_with(CIPHERTEXT_PREFIX)
    }
}

/// Mask a secret value for display
///
/// Keeps the first two characters when the value is long enough to survive
/// that without leaking much; short values mask entirely.
pub fn mask(plaintext: &str) -> String {
    let mut chars = plaintext.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(a), Some(b), Some(_)) => format!("{}{}***", a, b),
        _ => "***".to_string(),
    }
}
