// Redis connection management

use crate::core::errors::AppError;
use redis::aio::ConnectionManager;
use redis::Client;
use tokio::time::Duration;

/// Shared Redis connection for queue and cache operations
///
/// Wraps a `ConnectionManager`, which multiplexes one connection across
/// tasks and reconnects in the background. Cloning is cheap.
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: ConnectionManager,
}

impl RedisStore {
    /// Create a new RedisStore with connection manager
    ///
    /// Connection strategy:
    /// 1. Create the client (validates URL format)
    /// 2. Create the ConnectionManager with a bounded timeout
    /// 3. Retry with linear backoff (3 attempts)
    /// 4. Verify the connection with PING after creation
    pub async fn new(redis_url: &str) -> Result<Self, AppError> {
        use tokio::time::sleep;

        const MAX_RETRIES: u32 = 3;
        const INITIAL_DELAY_MS: u64 = 1000;

        let mut connection_errors = Vec::new();

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay_ms = INITIAL_DELAY_MS * attempt as u64; // Linear backoff: 1s, 2s
                sleep(Duration::from_millis(delay_ms)).await;
            }

            match Self::try_create_connection(redis_url).await {
                Ok(store) => {
                    // Verify connection works by pinging
                    match store.ping().await {
                        Ok(_) => {
                            if attempt > 0 {
                                tracing::info!("Redis connection succeeded on attempt {}", attempt + 1);
                            }
                            return Ok(store);
                        }
                        Err(e) => {
                            connection_errors.push(format!("Connection created but ping failed: {}", e));
                            continue;
                        }
                    }
                }
                Err(e) => {
                    connection_errors.push(format!("Attempt {} failed: {}", attempt + 1, e));

                    if attempt < MAX_RETRIES - 1 {
                        tracing::warn!(
                            attempt = attempt + 1,
                            max_attempts = MAX_RETRIES,
                            error = %e,
                            "Redis connection attempt failed, retrying..."
                        );
                    }
                    continue;
                }
            }
        }

        Err(AppError::StateError(format!(
            "Failed to create Redis connection after {} attempts. Errors: {}. Check Redis URL: {}",
            MAX_RETRIES,
            connection_errors.join("; "),
            redis_url
        )))
    }

    /// Try to create a Redis connection (internal helper)
    async fn try_create_connection(redis_url: &str) -> Result<Self, AppError> {
        let client = Client::open(redis_url).map_err(|e| {
            AppError::StateError(format!("Invalid Redis URL format '{}': {}", redis_url, e))
        })?;

        // ConnectionManager spawns a background task that handles connection
        // establishment and reconnection.
        let connection_manager = tokio::time::timeout(
            Duration::from_secs(10),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| {
            AppError::StateError("Redis ConnectionManager creation timed out after 10 seconds".to_string())
        })?
        .map_err(|e| AppError::StateError(format!("Failed to create Redis ConnectionManager: {}", e)))?;

        Ok(Self { connection_manager })
    }

    /// Get a clonable handle to the underlying connection
    pub fn connection(&self) -> ConnectionManager {
        self.connection_manager.clone()
    }

    /// Ping Redis to check connectivity
    ///
    /// Uses the actual Redis PING command for reliable health checks.
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.connection_manager.clone();
        let result: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::StateError(format!("Redis ping failed: {}", e)))?;

        if result == "PONG" {
            Ok(())
        } else {
            Err(AppError::StateError(format!(
                "Redis ping returned unexpected response: {}",
                result
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ping_against_local_redis() {
        // This test requires Redis to be running; skip if unavailable
        let redis_url = "redis://localhost:6379";

        if let Ok(store) = RedisStore::new(redis_url).await {
            store.ping().await.unwrap();
        }
    }
}
