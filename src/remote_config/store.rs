// Configuration repository - entry and history writes share a transaction

use crate::core::errors::AppError;
use crate::core::models::{ConfigAction, ConfigEntry, ConfigHistoryEntry, ConfigValueType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Repository for configuration entries and their version history
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Insert a new entry and its `created` history row
    async fn create_entry(&self, entry: &ConfigEntry, changed_by: Uuid) -> Result<(), AppError>;

    /// Look up an entry by key
    async fn find_by_key(&self, key: &str) -> Result<Option<ConfigEntry>, AppError>;

    /// List all entries, ordered by key
    async fn list_entries(&self) -> Result<Vec<ConfigEntry>, AppError>;

    /// Overwrite an entry and append its `updated` history row
    ///
    /// The write only lands if the stored version still equals
    /// `expected_version`; a concurrent writer surfaces as `Conflict`.
    async fn update_entry(
        &self,
        entry: &ConfigEntry,
        expected_version: i64,
        changed_by: Uuid,
    ) -> Result<(), AppError>;

    /// Delete an entry and append its `deleted` history row
    async fn delete_entry(&self, key: &str, changed_by: Uuid) -> Result<(), AppError>;

    /// Version history for a key, newest first
    ///
    /// History survives entry deletion.
    async fn history(&self, key: &str, limit: i64) -> Result<Vec<ConfigHistoryEntry>, AppError>;
}

#[derive(Debug, sqlx::FromRow)]
struct ConfigRow {
    id: Uuid,
    key: String,
    value: String,
    value_type: String,
    secret: bool,
    description: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConfigRow {
    fn into_entry(self) -> Result<ConfigEntry, AppError> {
        let value_type = ConfigValueType::parse(&self.value_type).ok_or_else(|| {
            AppError::DatabaseError(format!("Unknown config value type '{}'", self.value_type))
        })?;

        Ok(ConfigEntry {
            id: self.id,
            key: self.key,
            value: self.value,
            value_type,
            secret: self.secret,
            description: self.description,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ConfigHistoryRow {
    id: Uuid,
    entry_key: String,
    version: i64,
    value: String,
    secret: bool,
    action: String,
    changed_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl ConfigHistoryRow {
    fn into_history(self) -> Result<ConfigHistoryEntry, AppError> {
        let action = ConfigAction::parse(&self.action).ok_or_else(|| {
            AppError::DatabaseError(format!("Unknown config action '{}'", self.action))
        })?;

        Ok(ConfigHistoryEntry {
            id: self.id,
            entry_key: self.entry_key,
            version: self.version,
            value: self.value,
            secret: self.secret,
            action,
            changed_by: self.changed_by,
            created_at: self.created_at,
        })
    }
}

/// PostgreSQL configuration repository
pub struct PgConfigStore {
    db_pool: Arc<PgPool>,
}

impl PgConfigStore {
    /// Create a new Postgres-backed config store
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }

    async fn append_history(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        entry: &ConfigEntry,
        action: ConfigAction,
        changed_by: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO config_history (id, entry_key, version, value, secret, action, changed_by, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())",
        )
        .bind(Uuid::new_v4())
        .bind(&entry.key)
        .bind(entry.version)
        .bind(&entry.value)
        .bind(entry.secret)
        .bind(action.as_str())
        .bind(changed_by)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ConfigStore for PgConfigStore {
    async fn create_entry(&self, entry: &ConfigEntry, changed_by: Uuid) -> Result<(), AppError> {
        let mut tx = self.db_pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO config_entries (id, key, value, value_type, secret, description, version,
                                         created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (key) DO NOTHING",
        )
        .bind(entry.id)
        .bind(&entry.key)
        .bind(&entry.value)
        .bind(entry.value_type.as_str())
        .bind(entry.secret)
        .bind(&entry.description)
        .bind(entry.version)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "configuration key '{}' already exists",
                entry.key
            )));
        }

        Self::append_history(&mut tx, entry, ConfigAction::Created, changed_by).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<ConfigEntry>, AppError> {
        let row = sqlx::query_as::<_, ConfigRow>(
            "SELECT id, key, value, value_type, secret, description, version, created_at, updated_at
             FROM config_entries WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(self.db_pool.as_ref())
        .await?;

        row.map(ConfigRow::into_entry).transpose()
    }

    async fn list_entries(&self) -> Result<Vec<ConfigEntry>, AppError> {
        let rows = sqlx::query_as::<_, ConfigRow>(
            "SELECT id, key, value, value_type, secret, description, version, created_at, updated_at
             FROM config_entries ORDER BY key",
        )
        .fetch_all(self.db_pool.as_ref())
        .await?;

        rows.into_iter().map(ConfigRow::into_entry).collect()
    }

    async fn update_entry(
        &self,
        entry: &ConfigEntry,
        expected_version: i64,
        changed_by: Uuid,
    ) -> Result<(), AppError> {
        let mut tx = self.db_pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE config_entries
             SET value = $2, value_type = $3, secret = $4, description = $5, version = $6,
                 updated_at = NOW()
             WHERE key = $1 AND version = $7",
        )
        .bind(&entry.key)
        .bind(&entry.value)
        .bind(entry.value_type.as_str())
        .bind(entry.secret)
        .bind(&entry.description)
        .bind(entry.version)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Zero rows means either the key vanished or another writer
            // bumped the version first
            return match self.find_by_key(&entry.key).await? {
                None => Err(AppError::NotFound(format!(
                    "configuration key '{}'",
                    entry.key
                ))),
                Some(current) => Err(AppError::Conflict(format!(
                    "configuration key '{}' was changed concurrently (expected version {}, found {})",
                    entry.key, expected_version, current.version
                ))),
            };
        }

        Self::append_history(&mut tx, entry, ConfigAction::Updated, changed_by).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_entry(&self, key: &str, changed_by: Uuid) -> Result<(), AppError> {
        let mut tx = self.db_pool.begin().await?;

        let deleted = sqlx::query_as::<_, ConfigRow>(
            "DELETE FROM config_entries WHERE key = $1
             RETURNING id, key, value, value_type, secret, description, version, created_at, updated_at",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = deleted else {
            return Err(AppError::NotFound(format!("configuration key '{}'", key)));
        };

        let mut entry = row.into_entry()?;
        entry.version += 1;
        Self::append_history(&mut tx, &entry, ConfigAction::Deleted, changed_by).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn history(&self, key: &str, limit: i64) -> Result<Vec<ConfigHistoryEntry>, AppError> {
        let rows = sqlx::query_as::<_, ConfigHistoryRow>(
            "SELECT id, entry_key, version, value, secret, action, changed_by, created_at
             FROM config_history WHERE entry_key = $1
             ORDER BY version DESC, created_at DESC
             LIMIT $2",
        )
        .bind(key)
        .bind(limit.max(1))
        .fetch_all(self.db_pool.as_ref())
        .await?;

        rows.into_iter().map(ConfigHistoryRow::into_history).collect()
    }
}

/// In-memory configuration store for tests
pub struct InMemoryConfigStore {
    inner: RwLock<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    entries: HashMap<String, ConfigEntry>,
    history: Vec<ConfigHistoryEntry>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(InMemoryState::default()),
        }
    }

    fn history_row(entry: &ConfigEntry, action: ConfigAction, changed_by: Uuid) -> ConfigHistoryEntry {
        ConfigHistoryEntry {
            id: Uuid::new_v4(),
            entry_key: entry.key.clone(),
            version: entry.version,
            value: entry.value.clone(),
            secret: entry.secret,
            action,
            changed_by: Some(changed_by),
            created_at: Utc::now(),
        }
    }
}

impl Default for InMemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn create_entry(&self, entry: &ConfigEntry, changed_by: Uuid) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if inner.entries.contains_key(&entry.key) {
            return Err(AppError::Conflict(format!(
                "configuration key '{}' already exists",
                entry.key
            )));
        }

        inner.entries.insert(entry.key.clone(), entry.clone());
        inner
            .history
            .push(Self::history_row(entry, ConfigAction::Created, changed_by));
        Ok(())
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<ConfigEntry>, AppError> {
        Ok(self.inner.read().await.entries.get(key).cloned())
    }

    async fn list_entries(&self) -> Result<Vec<ConfigEntry>, AppError> {
        let inner = self.inner.read().await;
        let mut entries: Vec<ConfigEntry> = inner.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn update_entry(
        &self,
        entry: &ConfigEntry,
        expected_version: i64,
        changed_by: Uuid,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let Some(current) = inner.entries.get(&entry.key) else {
            return Err(AppError::NotFound(format!(
                "configuration key '{}'",
                entry.key
            )));
        };
        if current.version != expected_version {
            return Err(AppError::Conflict(format!(
                "configuration key '{}' was changed concurrently (expected version {}, found {})",
                entry.key, expected_version, current.version
            )));
        }

        let mut stored = entry.clone();
        stored.updated_at = Utc::now();
        inner.entries.insert(entry.key.clone(), stored);
        inner
            .history
            .push(Self::history_row(entry, ConfigAction::Updated, changed_by));
        Ok(())
    }

    async fn delete_entry(&self, key: &str, changed_by: Uuid) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let Some(mut entry) = inner.entries.remove(key) else {
            return Err(AppError::NotFound(format!("configuration key '{}'", key)));
        };

        entry.version += 1;
        inner
            .history
            .push(Self::history_row(&entry, ConfigAction::Deleted, changed_by));
        Ok(())
    }

    async fn history(&self, key: &str, limit: i64) -> Result<Vec<ConfigHistoryEntry>, AppError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<ConfigHistoryEntry> = inner
            .history
            .iter()
            .filter(|h| h.entry_key == key)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.version.cmp(&a.version).then(b.created_at.cmp(&a.created_at)));
        rows.truncate(limit.max(1) as usize);
        Ok(rows)
    }
}
