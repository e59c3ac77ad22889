// Task handlers and the worker pool that drives them

use crate::metrics::Metrics;
use crate::tasks::queue::TaskQueue;
use crate::tasks::task_store::TaskStore;
use crate::tasks::types::{RetryPolicy, Task, TaskKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Executable behavior for one task kind
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The kind this handler executes
    fn kind(&self) -> TaskKind;

    /// Run one attempt
    ///
    /// `Err` marks the attempt as failed; the worker decides whether to retry
    /// based on the task's attempt budget.
    async fn execute(&self, payload: &serde_json::Value) -> Result<serde_json::Value, String>;
}

/// Echoes the payload message back as the result
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Echo
    }

    async fn execute(&self, payload: &serde_json::Value) -> Result<serde_json::Value, String> {
        let message = payload
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "payload missing string field 'message'".to_string())?;

        Ok(serde_json::json!({ "echo": message }))
    }
}

/// Sleeps for the requested number of seconds
pub struct DelayHandler;

#[async_trait]
impl TaskHandler for DelayHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Delay
    }

    async fn execute(&self, payload: &serde_json::Value) -> Result<serde_json::Value, String> {
        let seconds = payload
            .get("seconds")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| "payload missing integer field 'seconds'".to_string())?;

        tokio::time::sleep(Duration::from_secs(seconds)).await;

        Ok(serde_json::json!({ "slept_seconds": seconds }))
    }
}

/// How long a pop blocks before a worker re-checks the shutdown signal
const POLL_TIMEOUT_SECS: f64 = 1.0;

/// Interval for refreshing the queue depth gauges
const GAUGE_REFRESH: Duration = Duration::from_secs(5);

/// Pool of workers that drain the priority queues
///
/// Workers finish their in-flight task on shutdown; they just stop picking up
/// new work once the signal flips.
pub struct WorkerPool {
    queue: Arc<dyn TaskQueue>,
    task_store: Arc<dyn TaskStore>,
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
    metrics: Arc<Metrics>,
    retry_policy: RetryPolicy,
    worker_count: usize,
}

impl WorkerPool {
    /// Create a pool with the built-in handlers registered
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        task_store: Arc<dyn TaskStore>,
        metrics: Arc<Metrics>,
        worker_count: usize,
    ) -> Self {
        let mut handlers: HashMap<TaskKind, Arc<dyn TaskHandler>> = HashMap::new();
        for handler in [
            Arc::new(EchoHandler) as Arc<dyn TaskHandler>,
            Arc::new(DelayHandler),
        ] {
            handlers.insert(handler.kind(), handler);
        }

        Self {
            queue,
            task_store,
            handlers,
            metrics,
            retry_policy: RetryPolicy::default(),
            worker_count,
        }
    }

    /// Register or replace a handler
    pub fn with_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    /// Override the backoff schedule between retries
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Spawn the workers and the queue depth gauge refresher
    ///
    /// Returns the join handles so the caller can await a clean drain after
    /// flipping the shutdown signal.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.worker_count + 1);

        for worker_id in 0..self.worker_count {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                pool.worker_loop(worker_id, shutdown).await;
            }));
        }

        let pool = self.clone();
        handles.push(tokio::spawn(async move {
            pool.gauge_loop(shutdown).await;
        }));

        info!(workers = self.worker_count, "Worker pool started");
        handles
    }

    async fn worker_loop(&self, worker_id: usize, shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                info!(worker_id, "Worker draining, no new tasks");
                return;
            }

            match self.queue.pop(POLL_TIMEOUT_SECS).await {
                Ok(Some((task_id, _priority))) => {
                    if let Err(e) = self.process(task_id).await {
                        error!(worker_id, task_id = %task_id, error = %e, "Task processing failed");
                    }
                }
                Ok(None) => {} // Timed out; loop back to re-check shutdown
                Err(e) => {
                    error!(worker_id, error = %e, "Queue pop failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn gauge_loop(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            match self.queue.queue_depths().await {
                Ok(depths) => {
                    for (queue, depth) in depths {
                        self.metrics.set_queue_depth(&queue, depth);
                    }
                }
                Err(e) => warn!(error = %e, "Failed to refresh queue depth gauges"),
            }

            tokio::select! {
                _ = tokio::time::sleep(GAUGE_REFRESH) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Run one attempt of a queued task
    async fn process(&self, task_id: Uuid) -> Result<(), crate::core::errors::AppError> {
        let Some(task) = self.task_store.find_by_id(task_id).await? else {
            warn!(task_id = %task_id, "Queued task id has no database record, dropping");
            return Ok(());
        };

        let Some(handler) = self.handlers.get(&task.kind) else {
            self.task_store
                .mark_failed(task.id, "no handler registered for kind")
                .await?;
            self.task_store.mark_dead(task.id).await?;
            self.queue.push_dead(task.id).await?;
            self.metrics.record_task(task.kind.as_str(), "dead");
            return Ok(());
        };

        self.task_store.mark_running(task.id).await?;
        let attempt = task.attempts + 1;

        match handler.execute(&task.payload).await {
            Ok(result) => {
                self.task_store.mark_succeeded(task.id, result).await?;
                self.metrics.record_task(task.kind.as_str(), "succeeded");
                info!(task_id = %task.id, kind = task.kind.as_str(), attempt, "Task succeeded");
            }
            Err(reason) => {
                self.task_store.mark_failed(task.id, &reason).await?;

                if attempt < task.max_attempts {
                    self.retry(&task, attempt, &reason).await?;
                } else {
                    self.task_store.mark_dead(task.id).await?;
                    self.queue.push_dead(task.id).await?;
                    self.metrics.record_task(task.kind.as_str(), "dead");
                    warn!(
                        task_id = %task.id,
                        kind = task.kind.as_str(),
                        attempts = attempt,
                        error = %reason,
                        "Task dead-lettered, retries exhausted"
                    );
                }
            }
        }

        Ok(())
    }

    /// Requeue a failed task for another attempt
    ///
    /// The backoff wait is scheduled off the worker loop so a failing task
    /// never occupies a worker while it waits, and drain doesn't block on it.
    async fn retry(
        &self,
        task: &Task,
        failed_attempt: u32,
        reason: &str,
    ) -> Result<(), crate::core::errors::AppError> {
        self.task_store.mark_requeued(task.id).await?;
        self.metrics.record_task(task.kind.as_str(), "failed");
        warn!(
            task_id = %task.id,
            kind = task.kind.as_str(),
            attempt = failed_attempt,
            error = %reason,
            "Task failed, requeued for retry"
        );

        // Backoff schedule is the pool's policy; the task's own budget caps attempts
        match self.retry_policy.delay_for_attempt(failed_attempt + 1) {
            Some(delay) => {
                let queue = self.queue.clone();
                let task_id = task.id;
                let priority = task.priority;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = queue.push(task_id, priority).await {
                        error!(task_id = %task_id, error = %e, "Delayed requeue failed");
                    }
                });
            }
            None => self.queue.push(task.id, task.priority).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::queue::InMemoryTaskQueue;
    use crate::tasks::task_store::InMemoryTaskStore;
    use crate::tasks::types::{Priority, TaskStatus};
    use chrono::Utc;

    /// Handler that fails every attempt
    struct AlwaysFailsHandler;

    #[async_trait]
    impl TaskHandler for AlwaysFailsHandler {
        fn kind(&self) -> TaskKind {
            TaskKind::Echo
        }

        async fn execute(&self, _payload: &serde_json::Value) -> Result<serde_json::Value, String> {
            Err("simulated failure".to_string())
        }
    }

    fn sample_task(max_attempts: u32) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            kind: TaskKind::Echo,
            payload: serde_json::json!({"message": "hello"}),
            priority: Priority::Normal,
            status: TaskStatus::Queued,
            attempts: 0,
            max_attempts,
            submitted_by: Uuid::new_v4(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    fn pool_with(
        queue: Arc<InMemoryTaskQueue>,
        store: Arc<InMemoryTaskStore>,
        handler: Arc<dyn TaskHandler>,
    ) -> WorkerPool {
        WorkerPool::new(queue, store, Metrics::new().unwrap(), 1)
            .with_handler(handler)
            .with_retry_policy(RetryPolicy::none())
    }

    #[tokio::test]
    async fn test_echo_handler_echoes_message() {
        let handler = EchoHandler;
        let result = handler
            .execute(&serde_json::json!({"message": "hello"}))
            .await
            .unwrap();

        assert_eq!(result, serde_json::json!({"echo": "hello"}));
    }

    #[tokio::test]
    async fn test_echo_handler_rejects_missing_message() {
        let handler = EchoHandler;
        let result = handler.execute(&serde_json::json!({})).await;

        assert!(result.unwrap_err().contains("message"));
    }

    #[tokio::test]
    async fn test_delay_handler_sleeps_and_reports() {
        let handler = DelayHandler;
        let result = handler
            .execute(&serde_json::json!({"seconds": 0}))
            .await
            .unwrap();

        assert_eq!(result, serde_json::json!({"slept_seconds": 0}));
    }

    #[tokio::test]
    async fn test_delay_handler_rejects_non_integer_seconds() {
        let handler = DelayHandler;
        let result = handler
            .execute(&serde_json::json!({"seconds": "five"}))
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_process_successful_task() {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let store = Arc::new(InMemoryTaskStore::new());
        let pool = pool_with(queue.clone(), store.clone(), Arc::new(EchoHandler));

        let task = sample_task(3);
        store.create_task(&task).await.unwrap();
        queue.push(task.id, task.priority).await.unwrap();
        let (popped, _) = queue.pop(0.0).await.unwrap().unwrap();

        pool.process(popped).await.unwrap();

        let done = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Succeeded);
        assert_eq!(done.attempts, 1);
        assert_eq!(done.result, Some(serde_json::json!({"echo": "hello"})));
    }

    #[tokio::test]
    async fn test_failed_task_is_requeued_with_budget_left() {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let store = Arc::new(InMemoryTaskStore::new());
        let pool = pool_with(queue.clone(), store.clone(), Arc::new(AlwaysFailsHandler));

        let task = sample_task(2);
        store.create_task(&task).await.unwrap();
        queue.push(task.id, task.priority).await.unwrap();
        let (popped, _) = queue.pop(0.0).await.unwrap().unwrap();

        pool.process(popped).await.unwrap();

        // Attempt 1 of 2 failed: back on the queue, exactly one attempt recorded
        let requeued = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, TaskStatus::Queued);
        assert_eq!(requeued.attempts, 1);
        assert_eq!(requeued.error.as_deref(), Some("simulated failure"));

        let (again, _) = queue.pop(0.0).await.unwrap().unwrap();
        assert_eq!(again, task.id);
        assert!(queue.dead_letter_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_task_is_dead_lettered() {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let store = Arc::new(InMemoryTaskStore::new());
        let pool = pool_with(queue.clone(), store.clone(), Arc::new(AlwaysFailsHandler));

        let task = sample_task(2);
        store.create_task(&task).await.unwrap();
        queue.push(task.id, task.priority).await.unwrap();

        // Drive both attempts through the worker path
        for _ in 0..2 {
            let (popped, _) = queue.pop(0.0).await.unwrap().unwrap();
            pool.process(popped).await.unwrap();
        }

        let dead = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(dead.status, TaskStatus::Dead);
        assert_eq!(dead.attempts, 2);
        assert!(dead.finished_at.is_some());

        assert!(queue.pop(0.0).await.unwrap().is_none());
        assert_eq!(queue.dead_letter_ids().await, vec![task.id]);
    }

    #[tokio::test]
    async fn test_retry_backoff_does_not_hold_the_worker() {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let store = Arc::new(InMemoryTaskStore::new());
        let pool = WorkerPool::new(
            queue.clone(),
            store.clone(),
            Metrics::new().unwrap(),
            1,
        )
        .with_handler(Arc::new(AlwaysFailsHandler) as Arc<dyn TaskHandler>)
        .with_retry_policy(RetryPolicy::fixed(3, Duration::from_secs(60)));

        let task = sample_task(3);
        store.create_task(&task).await.unwrap();
        queue.push(task.id, task.priority).await.unwrap();
        let (popped, _) = queue.pop(0.0).await.unwrap().unwrap();

        // With a 60s backoff, process must still return promptly
        let started = std::time::Instant::now();
        pool.process(popped).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        // The requeue is pending on the backoff timer, not on the queue yet
        let requeued = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, TaskStatus::Queued);
        assert!(queue.pop(0.0).await.unwrap().is_none());
    }
}
