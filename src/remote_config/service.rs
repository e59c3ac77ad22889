// Remote configuration service - validation, encryption and history

use crate::auth::audit_logger::{AuditEvent, AuditLogger};
use crate::core::errors::AppError;
use crate::core::models::{ConfigAction, ConfigEntry, ConfigEntryView, ConfigValueType};
use crate::remote_config::crypto::{mask, ConfigCipher};
use crate::remote_config::store::ConfigStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Ceiling on configuration key length
const MAX_KEY_LENGTH: usize = 128;

/// Ceiling on configuration value length
const MAX_VALUE_LENGTH: usize = 16 * 1024;

/// Default page size for history listings
const DEFAULT_HISTORY_LIMIT: i64 = 20;

/// Create payload for a configuration entry
#[derive(Debug, Deserialize)]
pub struct CreateConfigRequest {
    pub key: String,
    pub value: String,
    pub value_type: ConfigValueType,
    #[serde(default)]
    pub secret: bool,
    pub description: Option<String>,
}

/// Update payload for a configuration entry
#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    pub value: String,
    pub value_type: Option<ConfigValueType>,
    pub secret: Option<bool>,
    pub description: Option<String>,
}

/// One history row as returned to clients, with secret values masked
#[derive(Debug, Serialize)]
pub struct ConfigHistoryView {
    pub version: i64,
    pub value: String,
    pub secret: bool,
    pub action: ConfigAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Service layer for remote configuration
///
/// Secret values are encrypted before they reach the repository and masked on
/// every read unless the caller explicitly asks for the plaintext.
pub struct ConfigService {
    store: Arc<dyn ConfigStore>,
    cipher: Arc<ConfigCipher>,
    audit_logger: Arc<AuditLogger>,
}

impl ConfigService {
    /// Create a new configuration service
    pub fn new(
        store: Arc<dyn ConfigStore>,
        cipher: Arc<ConfigCipher>,
        audit_logger: Arc<AuditLogger>,
    ) -> Self {
        Self {
            store,
            cipher,
            audit_logger,
        }
    }

    /// Create a new configuration entry
    pub async fn create(
        &self,
        request: CreateConfigRequest,
        changed_by: Uuid,
    ) -> Result<ConfigEntryView, AppError> {
        let key = request.key.trim().to_string();
        validate_key(&key)?;
        validate_value(&request.value, request.value_type)?;

        let stored_value = if request.secret {
            self.cipher.seal(&request.value)?
        } else {
            request.value.clone()
        };

        let now = Utc::now();
        let entry = ConfigEntry {
            id: Uuid::new_v4(),
            key: key.clone(),
            value: stored_value,
            value_type: request.value_type,
            secret: request.secret,
            description: request.description,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        self.store.create_entry(&entry, changed_by).await?;
        self.audit_logger.log(
            AuditEvent::ConfigChanged {
                key: key.clone(),
                action: ConfigAction::Created.as_str().to_string(),
                user_id: changed_by,
            },
            None,
            None,
        );
        info!(key = %key, secret = entry.secret, "Configuration entry created");

        self.view(entry, false)
    }

    /// Fetch one entry, masked unless `reveal` is set
    pub async fn get(&self, key: &str, reveal: bool) -> Result<ConfigEntryView, AppError> {
        let entry = self
            .store
            .find_by_key(key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("configuration key '{}'", key)))?;

        self.view(entry, reveal)
    }

    /// List all entries with secrets masked
    pub async fn list(&self) -> Result<Vec<ConfigEntryView>, AppError> {
        let entries = self.store.list_entries().await?;
        entries.into_iter().map(|e| self.view(e, false)).collect()
    }

    /// Update an entry, bumping its version
    pub async fn update(
        &self,
        key: &str,
        request: UpdateConfigRequest,
        changed_by: Uuid,
    ) -> Result<ConfigEntryView, AppError> {
        let existing = self
            .store
            .find_by_key(key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("configuration key '{}'", key)))?;

        let value_type = request.value_type.unwrap_or(existing.value_type);
        let secret = request.secret.unwrap_or(existing.secret);
        validate_value(&request.value, value_type)?;

        let stored_value = if secret {
            self.cipher.seal(&request.value)?
        } else {
            request.value.clone()
        };

        let entry = ConfigEntry {
            id: existing.id,
            key: existing.key.clone(),
            value: stored_value,
            value_type,
            secret,
            description: request.description.or(existing.description),
            version: existing.version + 1,
            created_at: existing.created_at,
            updated_at: Utc::now(),
        };

        self.store
            .update_entry(&entry, existing.version, changed_by)
            .await?;
        self.audit_logger.log(
            AuditEvent::ConfigChanged {
                key: key.to_string(),
                action: ConfigAction::Updated.as_str().to_string(),
                user_id: changed_by,
            },
            None,
            None,
        );
        info!(key = %key, version = entry.version, "Configuration entry updated");

        self.view(entry, false)
    }

    /// Delete an entry; its history is retained
    pub async fn delete(&self, key: &str, changed_by: Uuid) -> Result<(), AppError> {
        self.store.delete_entry(key, changed_by).await?;
        self.audit_logger.log(
            AuditEvent::ConfigChanged {
                key: key.to_string(),
                action: ConfigAction::Deleted.as_str().to_string(),
                user_id: changed_by,
            },
            None,
            None,
        );
        info!(key = %key, "Configuration entry deleted");
        Ok(())
    }

    /// Version history for a key, newest first, secrets masked
    pub async fn history(
        &self,
        key: &str,
        limit: Option<i64>,
    ) -> Result<Vec<ConfigHistoryView>, AppError> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if !(1..=100).contains(&limit) {
            return Err(AppError::ValidationError(
                "limit must be between 1 and 100".to_string(),
            ));
        }

        let rows = self.store.history(key, limit).await?;
        if rows.is_empty() {
            // Distinguish "no such key" from "key with empty history"
            if self.store.find_by_key(key).await?.is_none() {
                return Err(AppError::NotFound(format!("configuration key '{}'", key)));
            }
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let value = if row.secret {
                    self.masked_plaintext(&row.value)
                } else {
                    row.value
                };
                ConfigHistoryView {
                    version: row.version,
                    value,
                    secret: row.secret,
                    action: row.action,
                    changed_by: row.changed_by,
                    created_at: row.created_at,
                }
            })
            .collect())
    }

    /// Project a stored entry to its client view
    fn view(&self, entry: ConfigEntry, reveal: bool) -> Result<ConfigEntryView, AppError> {
        let value = if entry.secret {
            if reveal {
                self.cipher.open(&entry.value)?
            } else {
                self.masked_plaintext(&entry.value)
            }
        } else {
            entry.value
        };

        Ok(ConfigEntryView {
            key: entry.key,
            value,
            value_type: entry.value_type,
            secret: entry.secret,
            description: entry.description,
            version: entry.version,
            updated_at: entry.updated_at,
        })
    }

    /// Mask a sealed value; undecryptable ciphertext masks fully
    fn masked_plaintext(&self, sealed: &str) -> String {
        match self.cipher.open(sealed) {
            Ok(plaintext) => mask(&plaintext),
            Err(_) => "***".to_string(),
        }
    }
}

/// Validate a configuration key
///
/// Keys are dot-separated lowercase segments, e.g. `payments.api_key`.
fn validate_key(key: &str) -> Result<(), AppError> {
    if key.is_empty() {
        return Err(AppError::ValidationError("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(AppError::ValidationError(format!(
            "key must be at most {} characters",
            MAX_KEY_LENGTH
        )));
    }
    let valid = key
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
        && !key.starts_with('.')
        && !key.ends_with('.');
    if !valid {
        return Err(AppError::ValidationError(
            "key may contain lowercase letters, digits, '.', '_' and '-'".to_string(),
        ));
    }
    Ok(())
}

/// Validate a value against its declared type
fn validate_value(value: &str, value_type: ConfigValueType) -> Result<(), AppError> {
    if value.len() > MAX_VALUE_LENGTH {
        return Err(AppError::ValidationError(format!(
            "value must be at most {} bytes",
            MAX_VALUE_LENGTH
        )));
    }

    match value_type {
        ConfigValueType::String => Ok(()),
        ConfigValueType::Number => value
            .parse::<f64>()
            .map(|_| ())
            .map_err(|_| AppError::ValidationError("value is not a number".to_string())),
        ConfigValueType::Boolean => match value {
            "true" | "false" => Ok(()),
            _ => Err(AppError::ValidationError(
                "value must be 'true' or 'false'".to_string(),
            )),
        },
        ConfigValueType::Json => serde_json::from_str::<serde_json::Value>(value)
            .map(|_| ())
            .map_err(|_| AppError::ValidationError("value is not valid JSON".to_string())),
    }
}
