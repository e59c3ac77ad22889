// Supporting types for the task system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Kind of background task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Echo the payload message back as the result.
    Echo,
    /// Sleep for the requested number of seconds.
    Delay,
}

impl TaskKind {
    /// Database/queue representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Echo => "echo",
            Self::Delay => "delay",
        }
    }

    /// Parse the database representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "echo" => Some(Self::Echo),
            "delay" => Some(Self::Delay),
            _ => None,
        }
    }
}

/// Priority level for task execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Lowest priority.
    Low,
    /// Normal priority (default).
    #[default]
    Normal,
    /// High priority.
    High,
}

impl Priority {
    /// Get the queue name for this priority level
    pub fn queue_name(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }

    /// All priority levels in order from highest to lowest
    pub fn all_ordered() -> [Self; 3] {
        [Self::High, Self::Normal, Self::Low]
    }
}

/// Retry policy for failed tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// No retries.
    None,
    /// Fixed delay between retries.
    Fixed {
        /// Maximum number of attempts (including the first).
        max_attempts: u32,
        /// Delay between retries.
        delay: Duration,
    },
    /// Exponential backoff.
    Exponential {
        /// Maximum number of attempts (including the first).
        max_attempts: u32,
        /// Initial delay.
        initial_delay: Duration,
        /// Multiplier for each retry (e.g., 2.0 for doubling).
        multiplier: f64,
        /// Maximum delay between retries.
        max_delay: Duration,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3)
    }
}

impl RetryPolicy {
    /// Create a no-retry policy
    pub fn none() -> Self {
        Self::None
    }

    /// Create a fixed retry policy
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed { max_attempts, delay }
    }

    /// Create an exponential backoff policy with defaults
    pub fn exponential(max_attempts: u32) -> Self {
        Self::Exponential {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
        }
    }

    /// Maximum number of attempts for this policy
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
            Self::Exponential { max_attempts, .. } => *max_attempts,
        }
    }

    /// Delay to wait before the given retry attempt
    ///
    /// `attempt` is the attempt number about to run (2 for the first retry).
    /// Returns `None` when the policy is exhausted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_attempts() || attempt < 2 {
            return None;
        }

        match self {
            Self::None => None,
            Self::Fixed { delay, .. } => Some(*delay),
            Self::Exponential {
                initial_delay,
                multiplier,
                max_delay,
                ..
            } => {
                let exponent = (attempt - 2) as i32;
                let delay_ms = initial_delay.as_millis() as f64 * multiplier.powi(exponent);
                let delay_ms = (delay_ms as u64).min(max_delay.as_millis() as u64);
                Some(Duration::from_millis(delay_ms))
            }
        }
    }
}

/// Execution status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting on a queue.
    Queued,
    /// Claimed by a worker and executing.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Last attempt failed; may still be retried.
    Failed,
    /// Retries exhausted; moved to the dead-letter list.
    Dead,
}

impl TaskStatus {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }

    /// Parse the database representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }

    /// Whether a transition from `self` to `next` is legal
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                // Tasks that never reach a worker (no handler, enqueue failed)
                // fail straight out of the queue
                | (Self::Queued, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
                | (Self::Failed, Self::Queued)
                | (Self::Failed, Self::Dead)
        )
    }
}

/// A background task record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub submitted_by: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Queue statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    /// Tasks waiting, by priority queue.
    pub queued: HashMap<String, u64>,
    /// Tasks currently executing.
    pub processing: u64,
    /// Tasks on the dead-letter list.
    pub dead: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_queue_names() {
        assert_eq!(Priority::High.queue_name(), "high");
        assert_eq!(Priority::Normal.queue_name(), "normal");
        assert_eq!(Priority::Low.queue_name(), "low");
    }

    #[test]
    fn test_priority_ordering() {
        let [first, second, third] = Priority::all_ordered();
        assert_eq!(first, Priority::High);
        assert_eq!(second, Priority::Normal);
        assert_eq!(third, Priority::Low);
    }

    #[test]
    fn test_retry_policy_max_attempts() {
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
        assert_eq!(RetryPolicy::fixed(5, Duration::from_secs(1)).max_attempts(), 5);
        assert_eq!(RetryPolicy::exponential(3).max_attempts(), 3);
    }

    #[test]
    fn test_exponential_delays_double() {
        let policy = RetryPolicy::exponential(4);

        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_for_attempt(4), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_for_attempt(5), None);
    }

    #[test]
    fn test_exponential_delay_capped() {
        let policy = RetryPolicy::Exponential {
            max_attempts: 20,
            initial_delay: Duration::from_secs(60),
            multiplier: 10.0,
            max_delay: Duration::from_secs(300),
        };

        assert_eq!(policy.delay_for_attempt(4), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_no_retry_policy_has_no_delays() {
        assert_eq!(RetryPolicy::none().delay_for_attempt(2), None);
    }

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Succeeded));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Queued));
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Dead));

        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Succeeded));
        assert!(!TaskStatus::Succeeded.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Dead.can_transition_to(TaskStatus::Queued));
    }

    #[test]
    fn test_task_kind_round_trip() {
        for kind in [TaskKind::Echo, TaskKind::Delay] {
            assert_eq!(TaskKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TaskKind::parse("unknown"), None);
    }
}
