// Task submission and query service

use crate::core::errors::AppError;
use crate::tasks::queue::TaskQueue;
use crate::tasks::task_store::{TaskFilter, TaskStore};
use crate::tasks::types::{Priority, QueueStats, Task, TaskKind, TaskStatus};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Hard ceiling on the delay task's sleep, in seconds
const MAX_DELAY_SECONDS: u64 = 300;

/// Ceiling on the echo message length
const MAX_MESSAGE_LENGTH: usize = 4096;

/// Ceiling on per-task attempt budgets
const MAX_ATTEMPT_BUDGET: u32 = 10;

/// Default page size for task listings
const DEFAULT_LIST_LIMIT: i64 = 50;

/// Task submission payload
#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Priority,
    /// Attempt budget including the first run; defaults to the standard
    /// retry policy's budget.
    pub max_attempts: Option<u32>,
}

/// Query parameters for task listings
#[derive(Debug, Deserialize, Default)]
pub struct ListTasksQuery {
    pub status: Option<TaskStatus>,
    pub limit: Option<i64>,
}

/// Service layer for submitting and inspecting tasks
pub struct TaskService {
    task_store: Arc<dyn TaskStore>,
    queue: Arc<dyn TaskQueue>,
    default_max_attempts: u32,
}

impl TaskService {
    /// Create a new task service
    ///
    /// `default_max_attempts` applies to submissions that don't pick their
    /// own attempt budget.
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        queue: Arc<dyn TaskQueue>,
        default_max_attempts: u32,
    ) -> Self {
        Self {
            task_store,
            queue,
            default_max_attempts: default_max_attempts.clamp(1, MAX_ATTEMPT_BUDGET),
        }
    }

    /// Validate, persist and enqueue a new task
    pub async fn submit(
        &self,
        request: SubmitTaskRequest,
        submitted_by: Uuid,
    ) -> Result<Task, AppError> {
        validate_payload(request.kind, &request.payload)?;

        let max_attempts = match request.max_attempts {
            Some(0) => {
                return Err(AppError::ValidationError(
                    "max_attempts must be at least 1".to_string(),
                ))
            }
            Some(n) if n > MAX_ATTEMPT_BUDGET => {
                return Err(AppError::ValidationError(format!(
                    "max_attempts must be at most {}",
                    MAX_ATTEMPT_BUDGET
                )))
            }
            Some(n) => n,
            None => self.default_max_attempts,
        };

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            kind: request.kind,
            payload: request.payload,
            priority: request.priority,
            status: TaskStatus::Queued,
            attempts: 0,
            max_attempts,
            submitted_by,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        };

        // Persist before enqueueing so workers never pop an unknown id
        self.task_store.create_task(&task).await?;

        // A row that never reached the queue would sit Queued forever, so a
        // failed enqueue dead-letters it before surfacing the error
        if let Err(push_err) = self.queue.push(task.id, task.priority).await {
            warn!(task_id = %task.id, error = %push_err, "Enqueue failed, dead-lettering task");
            if let Err(e) = self.task_store.mark_failed(task.id, "enqueue failed").await {
                warn!(task_id = %task.id, error = %e, "Failed to mark unenqueued task failed");
            } else if let Err(e) = self.task_store.mark_dead(task.id).await {
                warn!(task_id = %task.id, error = %e, "Failed to mark unenqueued task dead");
            }
            return Err(push_err);
        }

        info!(
            task_id = %task.id,
            kind = task.kind.as_str(),
            priority = task.priority.queue_name(),
            "Task submitted"
        );

        Ok(task)
    }

    /// Look up one of the caller's tasks
    ///
    /// Other users' tasks surface as not-found so ids can't be enumerated.
    pub async fn get(&self, id: Uuid, caller: Uuid) -> Result<Task, AppError> {
        let task = self
            .task_store
            .find_by_id(id)
            .await?
            .filter(|t| t.submitted_by == caller)
            .ok_or_else(|| AppError::NotFound("task".to_string()))?;

        Ok(task)
    }

    /// List the caller's tasks, newest first
    pub async fn list(&self, caller: Uuid, query: ListTasksQuery) -> Result<Vec<Task>, AppError> {
        let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        if !(1..=200).contains(&limit) {
            return Err(AppError::ValidationError(
                "limit must be between 1 and 200".to_string(),
            ));
        }

        let filter = TaskFilter {
            submitted_by: Some(caller),
            status: query.status,
            limit,
        };
        self.task_store.list_tasks(&filter).await
    }

    /// Queue and worker statistics snapshot
    pub async fn stats(&self) -> Result<QueueStats, AppError> {
        Ok(QueueStats {
            queued: self.queue.queue_depths().await?,
            processing: self.task_store.count_running().await?,
            dead: self.queue.dead_letter_depth().await?,
        })
    }
}

/// Validate a task payload against its kind
fn validate_payload(kind: TaskKind, payload: &serde_json::Value) -> Result<(), AppError> {
    match kind {
        TaskKind::Echo => {
            let message = payload
                .get("message")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    AppError::ValidationError(
                        "echo payload requires a string field 'message'".to_string(),
                    )
                })?;
            if message.is_empty() {
                return Err(AppError::ValidationError(
                    "echo message must not be empty".to_string(),
                ));
            }
            if message.len() > MAX_MESSAGE_LENGTH {
                return Err(AppError::ValidationError(format!(
                    "echo message must be at most {} bytes",
                    MAX_MESSAGE_LENGTH
                )));
            }
        }
        TaskKind::Delay => {
            let seconds = payload
                .get("seconds")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| {
                    AppError::ValidationError(
                        "delay payload requires an integer field 'seconds'".to_string(),
                    )
                })?;
            if seconds > MAX_DELAY_SECONDS {
                return Err(AppError::ValidationError(format!(
                    "delay must be at most {} seconds",
                    MAX_DELAY_SECONDS
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_echo_payload() {
        assert!(validate_payload(TaskKind::Echo, &serde_json::json!({"message": "hi"})).is_ok());

        assert!(matches!(
            validate_payload(TaskKind::Echo, &serde_json::json!({})),
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            validate_payload(TaskKind::Echo, &serde_json::json!({"message": ""})),
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            validate_payload(TaskKind::Echo, &serde_json::json!({"message": 42})),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_echo_message_length_cap() {
        let long = "x".repeat(MAX_MESSAGE_LENGTH + 1);
        assert!(matches!(
            validate_payload(TaskKind::Echo, &serde_json::json!({"message": long})),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_delay_payload() {
        assert!(validate_payload(TaskKind::Delay, &serde_json::json!({"seconds": 5})).is_ok());
        assert!(
            validate_payload(TaskKind::Delay, &serde_json::json!({"seconds": MAX_DELAY_SECONDS}))
                .is_ok()
        );

        assert!(matches!(
            validate_payload(
                TaskKind::Delay,
                &serde_json::json!({"seconds": MAX_DELAY_SECONDS + 1})
            ),
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            validate_payload(TaskKind::Delay, &serde_json::json!({"seconds": -1})),
            Err(AppError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_and_query() {
        use crate::tasks::queue::InMemoryTaskQueue;
        use crate::tasks::task_store::InMemoryTaskStore;

        let queue = Arc::new(InMemoryTaskQueue::new());
        let service = TaskService::new(Arc::new(InMemoryTaskStore::new()), queue.clone(), 3);

        let caller = Uuid::new_v4();
        let task = service
            .submit(
                SubmitTaskRequest {
                    kind: TaskKind::Echo,
                    payload: serde_json::json!({"message": "hi"}),
                    priority: Priority::High,
                    max_attempts: None,
                },
                caller,
            )
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.max_attempts, 3);
        assert_eq!(queue.pop(0.0).await.unwrap().unwrap().0, task.id);

        let fetched = service.get(task.id, caller).await.unwrap();
        assert_eq!(fetched.id, task.id);

        // Another caller cannot see it
        let other = Uuid::new_v4();
        assert!(matches!(
            service.get(task.id, other).await,
            Err(AppError::NotFound(_))
        ));

        let listed = service.list(caller, ListTasksQuery::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_enqueue_does_not_leave_phantom_queued_task() {
        use crate::tasks::task_store::{InMemoryTaskStore, TaskFilter};
        use async_trait::async_trait;
        use std::collections::HashMap;

        /// Queue whose push always fails
        struct BrokenQueue;

        #[async_trait]
        impl TaskQueue for BrokenQueue {
            async fn push(&self, _task_id: Uuid, _priority: Priority) -> Result<(), AppError> {
                Err(AppError::StateError("connection refused".to_string()))
            }

            async fn pop(
                &self,
                _timeout_secs: f64,
            ) -> Result<Option<(Uuid, Priority)>, AppError> {
                Ok(None)
            }

            async fn push_dead(&self, _task_id: Uuid) -> Result<(), AppError> {
                Ok(())
            }

            async fn queue_depths(&self) -> Result<HashMap<String, u64>, AppError> {
                Ok(HashMap::new())
            }

            async fn dead_letter_depth(&self) -> Result<u64, AppError> {
                Ok(0)
            }
        }

        let store = Arc::new(InMemoryTaskStore::new());
        let service = TaskService::new(store.clone(), Arc::new(BrokenQueue), 3);

        let caller = Uuid::new_v4();
        let result = service
            .submit(
                SubmitTaskRequest {
                    kind: TaskKind::Echo,
                    payload: serde_json::json!({"message": "hi"}),
                    priority: Priority::Normal,
                    max_attempts: None,
                },
                caller,
            )
            .await;
        assert!(matches!(result, Err(AppError::StateError(_))));

        // The row must not linger as Queued - nothing will ever pop it
        let queued = store
            .list_tasks(&TaskFilter {
                submitted_by: Some(caller),
                status: Some(TaskStatus::Queued),
                limit: 10,
            })
            .await
            .unwrap();
        assert!(queued.is_empty());

        let dead = store
            .list_tasks(&TaskFilter {
                submitted_by: Some(caller),
                status: Some(TaskStatus::Dead),
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].error.as_deref(), Some("enqueue failed"));
    }
}
