// Task repository - Postgres persistence with an in-memory twin for tests

use crate::core::errors::AppError;
use crate::tasks::types::{Priority, Task, TaskKind, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Filter for task listings
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Only tasks submitted by this user.
    pub submitted_by: Option<Uuid>,
    /// Only tasks in this status.
    pub status: Option<TaskStatus>,
    /// Maximum number of tasks to return (newest first).
    pub limit: i64,
}

/// Repository for task records
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task
    async fn create_task(&self, task: &Task) -> Result<(), AppError>;

    /// Look up a task by id
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, AppError>;

    /// List tasks, newest first
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, AppError>;

    /// Mark a task as running and bump the attempt counter
    async fn mark_running(&self, id: Uuid) -> Result<(), AppError>;

    /// Mark a task as succeeded with its result
    async fn mark_succeeded(&self, id: Uuid, result: serde_json::Value) -> Result<(), AppError>;

    /// Mark a task as failed with the error from its last attempt
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), AppError>;

    /// Re-queue a failed task for another attempt
    async fn mark_requeued(&self, id: Uuid) -> Result<(), AppError>;

    /// Mark a task as dead (retries exhausted)
    async fn mark_dead(&self, id: Uuid) -> Result<(), AppError>;

    /// Number of tasks currently running
    async fn count_running(&self) -> Result<u64, AppError>;
}

/// Database row for a task
#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    kind: String,
    payload: serde_json::Value,
    priority: String,
    status: String,
    attempts: i32,
    max_attempts: i32,
    submitted_by: Uuid,
    result: Option<serde_json::Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task, AppError> {
        let kind = TaskKind::parse(&self.kind)
            .ok_or_else(|| AppError::DatabaseError(format!("Unknown task kind '{}'", self.kind)))?;
        let status = TaskStatus::parse(&self.status).ok_or_else(|| {
            AppError::DatabaseError(format!("Unknown task status '{}'", self.status))
        })?;
        let priority = match self.priority.as_str() {
            "low" => Priority::Low,
            "normal" => Priority::Normal,
            "high" => Priority::High,
            other => {
                return Err(AppError::DatabaseError(format!(
                    "Unknown task priority '{}'",
                    other
                )))
            }
        };

        Ok(Task {
            id: self.id,
            kind,
            payload: self.payload,
            priority,
            status,
            attempts: self.attempts as u32,
            max_attempts: self.max_attempts as u32,
            submitted_by: self.submitted_by,
            result: self.result,
            error: self.error,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

/// Translate a zero-row status update into a state error
fn transition_guard(rows_affected: u64, id: Uuid, next: TaskStatus) -> Result<(), AppError> {
    if rows_affected == 0 {
        return Err(AppError::StateError(format!(
            "task {} is not in a state that allows moving to {}",
            id,
            next.as_str()
        )));
    }
    Ok(())
}

/// PostgreSQL task repository
pub struct PgTaskStore {
    db_pool: Arc<PgPool>,
}

impl PgTaskStore {
    /// Create a new Postgres-backed task store
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create_task(&self, task: &Task) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO tasks (id, kind, payload, priority, status, attempts, max_attempts,
                                submitted_by, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(task.id)
        .bind(task.kind.as_str())
        .bind(&task.payload)
        .bind(task.priority.queue_name())
        .bind(task.status.as_str())
        .bind(task.attempts as i32)
        .bind(task.max_attempts as i32)
        .bind(task.submitted_by)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(self.db_pool.as_ref())
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, AppError> {
        let row = sqlx::query_as::<_, TaskRow>(
            "SELECT id, kind, payload, priority, status, attempts, max_attempts, submitted_by,
                    result, error, created_at, updated_at, started_at, finished_at
             FROM tasks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.db_pool.as_ref())
        .await?;

        row.map(TaskRow::into_task).transpose()
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, AppError> {
        // Optional filters collapse to always-true predicates when unset
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT id, kind, payload, priority, status, attempts, max_attempts, submitted_by,
                    result, error, created_at, updated_at, started_at, finished_at
             FROM tasks
             WHERE ($1::uuid IS NULL OR submitted_by = $1)
               AND ($2::text IS NULL OR status = $2)
             ORDER BY created_at DESC
             LIMIT $3",
        )
        .bind(filter.submitted_by)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit.max(1))
        .fetch_all(self.db_pool.as_ref())
        .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    // Status updates guard on the current status in the WHERE clause, so a
    // stale or duplicate update matches zero rows instead of clobbering a
    // later transition.

    async fn mark_running(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE tasks
             SET status = 'running', attempts = attempts + 1, started_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND status = 'queued'",
        )
        .bind(id)
        .execute(self.db_pool.as_ref())
        .await?;
        transition_guard(result.rows_affected(), id, TaskStatus::Running)
    }

    async fn mark_succeeded(&self, id: Uuid, result: serde_json::Value) -> Result<(), AppError> {
        let outcome = sqlx::query(
            "UPDATE tasks
             SET status = 'succeeded', result = $2, error = NULL, finished_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .bind(result)
        .execute(self.db_pool.as_ref())
        .await?;
        transition_guard(outcome.rows_affected(), id, TaskStatus::Succeeded)
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'failed', error = $2, updated_at = NOW()
             WHERE id = $1 AND status IN ('running', 'queued')",
        )
        .bind(id)
        .bind(error)
        .execute(self.db_pool.as_ref())
        .await?;
        transition_guard(result.rows_affected(), id, TaskStatus::Failed)
    }

    async fn mark_requeued(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'queued', updated_at = NOW()
             WHERE id = $1 AND status = 'failed'",
        )
        .bind(id)
        .execute(self.db_pool.as_ref())
        .await?;
        transition_guard(result.rows_affected(), id, TaskStatus::Queued)
    }

    async fn mark_dead(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'dead', finished_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND status = 'failed'",
        )
        .bind(id)
        .execute(self.db_pool.as_ref())
        .await?;
        transition_guard(result.rows_affected(), id, TaskStatus::Dead)
    }

    async fn count_running(&self) -> Result<u64, AppError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = 'running'")
                .fetch_one(self.db_pool.as_ref())
                .await?;
        Ok(count as u64)
    }
}

/// In-memory task store for tests
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    async fn transition<F>(&self, id: Uuid, next: TaskStatus, apply: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("task".to_string()))?;
        if !task.status.can_transition_to(next) {
            return Err(AppError::StateError(format!(
                "task {} cannot move from {} to {}",
                id,
                task.status.as_str(),
                next.as_str()
            )));
        }
        task.status = next;
        apply(task);
        task.updated_at = Utc::now();
        Ok(())
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: &Task) -> Result<(), AppError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(AppError::Conflict("task id already exists".to_string()));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, AppError> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, AppError> {
        let tasks = self.tasks.read().await;
        let mut matching: Vec<Task> = tasks
            .values()
            .filter(|t| filter.submitted_by.map_or(true, |u| t.submitted_by == u))
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(filter.limit.max(1) as usize);
        Ok(matching)
    }

    async fn mark_running(&self, id: Uuid) -> Result<(), AppError> {
        self.transition(id, TaskStatus::Running, |t| {
            t.attempts += 1;
            t.started_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_succeeded(&self, id: Uuid, result: serde_json::Value) -> Result<(), AppError> {
        self.transition(id, TaskStatus::Succeeded, |t| {
            t.result = Some(result);
            t.error = None;
            t.finished_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        let error = error.to_string();
        self.transition(id, TaskStatus::Failed, move |t| {
            t.error = Some(error);
        })
        .await
    }

    async fn mark_requeued(&self, id: Uuid) -> Result<(), AppError> {
        self.transition(id, TaskStatus::Queued, |_| {}).await
    }

    async fn mark_dead(&self, id: Uuid) -> Result<(), AppError> {
        self.transition(id, TaskStatus::Dead, |t| {
            t.finished_at = Some(Utc::now());
        })
        .await
    }

    async fn count_running(&self) -> Result<u64, AppError> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(submitted_by: Uuid) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            kind: TaskKind::Echo,
            payload: serde_json::json!({"message": "hello"}),
            priority: Priority::Normal,
            status: TaskStatus::Queued,
            attempts: 0,
            max_attempts: 3,
            submitted_by,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = InMemoryTaskStore::new();
        let task = sample_task(Uuid::new_v4());

        store.create_task(&task).await.unwrap();

        let found = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(found.id, task.id);
        assert_eq!(found.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let store = InMemoryTaskStore::new();
        let task = sample_task(Uuid::new_v4());
        store.create_task(&task).await.unwrap();

        store.mark_running(task.id).await.unwrap();
        let running = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(running.status, TaskStatus::Running);
        assert_eq!(running.attempts, 1);
        assert!(running.started_at.is_some());

        store
            .mark_succeeded(task.id, serde_json::json!({"echo": "hello"}))
            .await
            .unwrap();
        let done = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Succeeded);
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_then_requeued_then_dead() {
        let store = InMemoryTaskStore::new();
        let task = sample_task(Uuid::new_v4());
        store.create_task(&task).await.unwrap();

        store.mark_running(task.id).await.unwrap();
        store.mark_failed(task.id, "boom").await.unwrap();
        let failed = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));

        store.mark_requeued(task.id).await.unwrap();
        let requeued = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, TaskStatus::Queued);

        store.mark_running(task.id).await.unwrap();
        store.mark_failed(task.id, "boom again").await.unwrap();
        store.mark_dead(task.id).await.unwrap();
        let dead = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(dead.status, TaskStatus::Dead);
        assert_eq!(dead.attempts, 2);
    }

    #[tokio::test]
    async fn test_illegal_transitions_rejected() {
        let store = InMemoryTaskStore::new();
        let task = sample_task(Uuid::new_v4());
        store.create_task(&task).await.unwrap();

        // Queued tasks can't finish without running first
        assert!(matches!(
            store.mark_succeeded(task.id, serde_json::json!({})).await,
            Err(AppError::StateError(_))
        ));
        assert!(matches!(
            store.mark_dead(task.id).await,
            Err(AppError::StateError(_))
        ));

        store.mark_running(task.id).await.unwrap();
        store
            .mark_succeeded(task.id, serde_json::json!({}))
            .await
            .unwrap();

        // Terminal states stay terminal
        assert!(matches!(
            store.mark_running(task.id).await,
            Err(AppError::StateError(_))
        ));
        assert!(matches!(
            store.mark_failed(task.id, "late").await,
            Err(AppError::StateError(_))
        ));
    }

    #[tokio::test]
    async fn test_queued_task_can_fail_without_running() {
        let store = InMemoryTaskStore::new();
        let task = sample_task(Uuid::new_v4());
        store.create_task(&task).await.unwrap();

        store.mark_failed(task.id, "no handler").await.unwrap();
        store.mark_dead(task.id).await.unwrap();

        let dead = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(dead.status, TaskStatus::Dead);
        assert_eq!(dead.attempts, 0);
    }

    #[tokio::test]
    async fn test_list_filters_by_user_and_status() {
        let store = InMemoryTaskStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        for user in [alice, alice, bob] {
            store.create_task(&sample_task(user)).await.unwrap();
        }

        let filter = TaskFilter {
            submitted_by: Some(alice),
            status: None,
            limit: 50,
        };
        assert_eq!(store.list_tasks(&filter).await.unwrap().len(), 2);

        let filter = TaskFilter {
            submitted_by: Some(bob),
            status: Some(TaskStatus::Succeeded),
            limit: 50,
        };
        assert!(store.list_tasks(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_count_running() {
        let store = InMemoryTaskStore::new();
        let task = sample_task(Uuid::new_v4());
        store.create_task(&task).await.unwrap();
        assert_eq!(store.count_running().await.unwrap(), 0);

        store.mark_running(task.id).await.unwrap();
        assert_eq!(store.count_running().await.unwrap(), 1);
    }
}
