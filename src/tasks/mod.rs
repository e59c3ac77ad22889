// Background task submission and processing

pub mod handler;
pub mod queue;
pub mod service;
pub mod task_store;
pub mod types;

pub use handler::{DelayHandler, EchoHandler, TaskHandler, WorkerPool};
pub use queue::{InMemoryTaskQueue, RedisTaskQueue, TaskQueue};
pub use service::{ListTasksQuery, SubmitTaskRequest, TaskService};
pub use task_store::{InMemoryTaskStore, PgTaskStore, TaskFilter, TaskStore};
pub use types::{Priority, QueueStats, RetryPolicy, Task, TaskKind, TaskStatus};
