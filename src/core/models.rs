// Shared domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered user account
///
/// The password hash is stored in PHC string format (Argon2id) and must never
/// leave the repository/service layer. Handlers return `UserView` instead.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Public projection of the user, safe to serialize in responses
    pub fn view(&self) -> UserView {
        UserView {
            id: self.id,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            created_at: self.created_at,
        }
    }
}

/// Public projection of a user (no credential material)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// Authenticated caller, injected into request extensions by the auth middleware
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

/// Type of a configuration value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigValueType {
    String,
    Number,
    Boolean,
    Json,
}

impl ConfigValueType {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Json => "json",
        }
    }

    /// Parse the database representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// A remote-configuration entry as stored
///
/// For secret entries, `value` holds the ciphertext (`gw:v1:...`); for
/// non-secret entries it holds the plaintext. Handlers return
/// `ConfigEntryView` with secrets masked or revealed explicitly.
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub id: Uuid,
    pub key: String,
    pub value: String,
    pub value_type: ConfigValueType,
    pub secret: bool,
    pub description: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public projection of a configuration entry
#[derive(Debug, Clone, Serialize)]
pub struct ConfigEntryView {
    pub key: String,
    pub value: String,
    pub value_type: ConfigValueType,
    pub secret: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// Action recorded in the configuration history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigAction {
    Created,
    Updated,
    Deleted,
}

impl ConfigAction {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }

    /// Parse the database representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// One version in a configuration entry's history
///
/// `value` is stored exactly as the entry stored it at that version, so
/// secret history rows hold ciphertext and are masked on the way out.
#[derive(Debug, Clone)]
pub struct ConfigHistoryEntry {
    pub id: Uuid,
    pub entry_key: String,
    pub version: i64,
    pub value: String,
    pub secret: bool,
    pub action: ConfigAction,
    pub changed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
