// Database-backed user storage

use crate::core::errors::AppError;
use crate::core::models::User;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Repository for user accounts
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user. Fails with `Conflict` if the email is taken.
    async fn create_user(&self, user: &User) -> Result<(), AppError>;

    /// Lookup a user by email (case-insensitive).
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    /// Lookup a user by id.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;
}

/// Database row structure for user lookup
#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    display_name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        User {
            id: r.id,
            email: r.email,
            password_hash: r.password_hash,
            display_name: r.display_name,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Postgres-backed user store with in-memory caching of id lookups
///
/// Id lookups sit on the hot path (every authenticated request goes through
/// the middleware), so they are cached with a short TTL. Email lookups go to
/// the database every time - they only happen on login.
pub struct PgUserStore {
    db_pool: PgPool,
    by_id_cache: Cache<Uuid, Arc<User>>,
}

impl PgUserStore {
    /// Create a new database-backed user store
    pub fn new(db_pool: PgPool) -> Self {
        let by_id_cache = Cache::builder()
            .time_to_live(std::time::Duration::from_secs(60))
            .max_capacity(10_000)
            .build();

        Self { db_pool, by_id_cache }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create_user(&self, user: &User) -> Result<(), AppError> {
        let result = sqlx::query(
            "INSERT INTO users (id, email, password_hash, display_name, created_at, updated_at)
             VALUES ($1, lower($2), $3, $4, $5, $6)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.db_pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(AppError::Conflict("Email already registered".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, password_hash, display_name, created_at, updated_at
             FROM users
             WHERE email = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        // Check cache first
        if let Some(cached) = self.by_id_cache.get(&id).await {
            return Ok(Some((*cached).clone()));
        }

        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, password_hash, display_name, created_at, updated_at
             FROM users
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await?;

        let user = row.map(User::from);

        if let Some(ref u) = user {
            self.by_id_cache.insert(id, Arc::new(u.clone())).await;
        }

        Ok(user)
    }
}

/// In-memory user store for tests
#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create_user(&self, user: &User) -> Result<(), AppError> {
        let mut users = self.users.write().await;
        let email = user.email.to_lowercase();

        if users.values().any(|u| u.email == email) {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }

        let mut stored = user.clone();
        stored.email = email;
        users.insert(stored.id, stored);
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let users = self.users.read().await;
        let email = email.to_lowercase();
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let users = self.users.read().await;
        Ok(users.get(&id).cloned())
    }
}
