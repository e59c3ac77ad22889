// Priority task queue - Redis-backed with an in-memory twin for tests

use crate::core::errors::AppError;
use crate::state::RedisStore;
use crate::tasks::types::Priority;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Key prefix for all queue structures
const KEY_PREFIX: &str = "gw:tasks";

/// Queue of task ids, one list per priority, plus a dead-letter list
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task id on its priority queue
    async fn push(&self, task_id: Uuid, priority: Priority) -> Result<(), AppError>;

    /// Wait for a task id on any queue, highest priority first
    ///
    /// Returns `None` when the timeout elapses with nothing to do.
    async fn pop(&self, timeout_secs: f64) -> Result<Option<(Uuid, Priority)>, AppError>;

    /// Move a task id to the dead-letter list
    async fn push_dead(&self, task_id: Uuid) -> Result<(), AppError>;

    /// Depth of each priority queue, by queue name
    async fn queue_depths(&self) -> Result<HashMap<String, u64>, AppError>;

    /// Number of dead-lettered task ids
    async fn dead_letter_depth(&self) -> Result<u64, AppError>;
}

/// Priority queue over Redis lists
///
/// Each priority level maps to a list; producers LPUSH task ids and workers
/// BRPOP across all lists at once, with the key order giving the priority
/// order. Tasks that exhaust their retries land on the dead-letter list.
#[derive(Clone)]
pub struct RedisTaskQueue {
    store: RedisStore,
}

impl RedisTaskQueue {
    /// Create a queue over the shared Redis store
    pub fn new(store: RedisStore) -> Self {
        Self { store }
    }

    fn queue_key(priority: Priority) -> String {
        format!("{}:queue:{}", KEY_PREFIX, priority.queue_name())
    }

    fn dead_letter_key() -> String {
        format!("{}:dead", KEY_PREFIX)
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn push(&self, task_id: Uuid, priority: Priority) -> Result<(), AppError> {
        let mut conn = self.store.connection();
        let _: () = conn
            .lpush(Self::queue_key(priority), task_id.to_string())
            .await
            .map_err(|e| AppError::StateError(format!("Failed to enqueue task: {}", e)))?;
        Ok(())
    }

    /// BRPOP checks keys in argument order, so high-priority work is always
    /// drained before normal, and normal before low.
    async fn pop(&self, timeout_secs: f64) -> Result<Option<(Uuid, Priority)>, AppError> {
        let keys: Vec<String> = Priority::all_ordered()
            .iter()
            .map(|p| Self::queue_key(*p))
            .collect();

        let mut conn = self.store.connection();
        let popped: Option<(String, String)> = conn
            .brpop(keys, timeout_secs)
            .await
            .map_err(|e| AppError::StateError(format!("Failed to pop from queue: {}", e)))?;

        match popped {
            Some((key, raw_id)) => {
                let task_id = Uuid::parse_str(&raw_id).map_err(|e| {
                    AppError::StateError(format!("Malformed task id '{}' on queue: {}", raw_id, e))
                })?;
                let priority = Priority::all_ordered()
                    .into_iter()
                    .find(|p| Self::queue_key(*p) == key)
                    .unwrap_or_default();
                Ok(Some((task_id, priority)))
            }
            None => Ok(None),
        }
    }

    async fn push_dead(&self, task_id: Uuid) -> Result<(), AppError> {
        let mut conn = self.store.connection();
        let _: () = conn
            .lpush(Self::dead_letter_key(), task_id.to_string())
            .await
            .map_err(|e| AppError::StateError(format!("Failed to dead-letter task: {}", e)))?;
        Ok(())
    }

    async fn queue_depths(&self) -> Result<HashMap<String, u64>, AppError> {
        let mut conn = self.store.connection();
        let mut depths = HashMap::new();

        for priority in Priority::all_ordered() {
            let depth: u64 = conn
                .llen(Self::queue_key(priority))
                .await
                .map_err(|e| AppError::StateError(format!("Failed to read queue depth: {}", e)))?;
            depths.insert(priority.queue_name().to_string(), depth);
        }

        Ok(depths)
    }

    async fn dead_letter_depth(&self) -> Result<u64, AppError> {
        let mut conn = self.store.connection();
        conn.llen(Self::dead_letter_key())
            .await
            .map_err(|e| AppError::StateError(format!("Failed to read dead-letter depth: {}", e)))
    }
}

/// In-memory task queue for tests
///
/// Same priority semantics as the Redis queue; `pop` returns immediately
/// instead of blocking.
#[derive(Default)]
pub struct InMemoryTaskQueue {
    inner: Mutex<InMemoryQueues>,
}

#[derive(Default)]
struct InMemoryQueues {
    queues: HashMap<Priority, VecDeque<Uuid>>,
    dead: Vec<Uuid>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dead-lettered ids, for assertions
    pub async fn dead_letter_ids(&self) -> Vec<Uuid> {
        self.inner.lock().await.dead.clone()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn push(&self, task_id: Uuid, priority: Priority) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        inner.queues.entry(priority).or_default().push_front(task_id);
        Ok(())
    }

    async fn pop(&self, _timeout_secs: f64) -> Result<Option<(Uuid, Priority)>, AppError> {
        let mut inner = self.inner.lock().await;
        for priority in Priority::all_ordered() {
            if let Some(id) = inner.queues.entry(priority).or_default().pop_back() {
                return Ok(Some((id, priority)));
            }
        }
        Ok(None)
    }

    async fn push_dead(&self, task_id: Uuid) -> Result<(), AppError> {
        self.inner.lock().await.dead.push(task_id);
        Ok(())
    }

    async fn queue_depths(&self) -> Result<HashMap<String, u64>, AppError> {
        let inner = self.inner.lock().await;
        Ok(Priority::all_ordered()
            .into_iter()
            .map(|p| {
                let depth = inner.queues.get(&p).map_or(0, |q| q.len() as u64);
                (p.queue_name().to_string(), depth)
            })
            .collect())
    }

    async fn dead_letter_depth(&self) -> Result<u64, AppError> {
        Ok(self.inner.lock().await.dead.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_keys_are_distinct_per_priority() {
        let keys: Vec<String> = Priority::all_ordered()
            .iter()
            .map(|p| RedisTaskQueue::queue_key(*p))
            .collect();

        assert_eq!(keys[0], "gw:tasks:queue:high");
        assert_eq!(keys[1], "gw:tasks:queue:normal");
        assert_eq!(keys[2], "gw:tasks:queue:low");
        assert!(!keys.contains(&RedisTaskQueue::dead_letter_key()));
    }

    #[tokio::test]
    async fn test_inmemory_priority_ordering() {
        let queue = InMemoryTaskQueue::new();

        let low = Uuid::new_v4();
        let high = Uuid::new_v4();
        queue.push(low, Priority::Low).await.unwrap();
        queue.push(high, Priority::High).await.unwrap();

        // High priority drains first even though it was pushed second
        let (first, priority) = queue.pop(0.0).await.unwrap().unwrap();
        assert_eq!(first, high);
        assert_eq!(priority, Priority::High);

        let (second, _) = queue.pop(0.0).await.unwrap().unwrap();
        assert_eq!(second, low);

        assert!(queue.pop(0.0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inmemory_fifo_within_priority() {
        let queue = InMemoryTaskQueue::new();

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        queue.push(first, Priority::Normal).await.unwrap();
        queue.push(second, Priority::Normal).await.unwrap();

        assert_eq!(queue.pop(0.0).await.unwrap().unwrap().0, first);
        assert_eq!(queue.pop(0.0).await.unwrap().unwrap().0, second);
    }

    #[tokio::test]
    async fn test_push_pop_against_local_redis() {
        // Requires Redis to be running; skip if unavailable
        let Ok(store) = RedisStore::new("redis://localhost:6379").await else {
            return;
        };
        let queue = RedisTaskQueue::new(store);

        let low = Uuid::new_v4();
        let high = Uuid::new_v4();
        queue.push(low, Priority::Low).await.unwrap();
        queue.push(high, Priority::High).await.unwrap();

        let (first, priority) = queue.pop(1.0).await.unwrap().unwrap();
        assert_eq!(first, high);
        assert_eq!(priority, Priority::High);

        let (second, _) = queue.pop(1.0).await.unwrap().unwrap();
        assert_eq!(second, low);
    }
}
