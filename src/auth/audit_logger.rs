// Security event logging

use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Auditable event
#[derive(Debug, Clone)]
pub enum AuditEvent {
    RegisterSuccess { user_id: Uuid },
    LoginSuccess { user_id: Uuid },
    LoginFailure { reason: String },
    ConfigChanged { key: String, action: String, user_id: Uuid },
}

impl AuditEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::RegisterSuccess { .. } => "REGISTER_SUCCESS",
            AuditEvent::LoginSuccess { .. } => "LOGIN_SUCCESS",
            AuditEvent::LoginFailure { .. } => "LOGIN_FAILURE",
            AuditEvent::ConfigChanged { .. } => "CONFIG_CHANGED",
        }
    }

    fn user_id(&self) -> Option<Uuid> {
        match self {
            AuditEvent::RegisterSuccess { user_id }
            | AuditEvent::LoginSuccess { user_id }
            | AuditEvent::ConfigChanged { user_id, .. } => Some(*user_id),
            AuditEvent::LoginFailure { .. } => None,
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            AuditEvent::LoginFailure { reason } => Some(reason.clone()),
            AuditEvent::ConfigChanged { key, action, .. } => {
                Some(format!("{} {}", action, key))
            }
            _ => None,
        }
    }
}

/// Audit logger for security-relevant events
pub struct AuditLogger {
    db_pool: Option<Arc<PgPool>>,
}

impl AuditLogger {
    /// Create a new audit logger
    ///
    /// If `db_pool` is `None`, only structured logging is used (no database
    /// persistence). Useful for tests.
    pub fn new(db_pool: Option<Arc<PgPool>>) -> Self {
        Self { db_pool }
    }

    /// Log an audit event
    ///
    /// This is fire-and-forget: it spawns an async task and doesn't block the
    /// request. Errors are logged but don't affect the request flow.
    pub fn log(&self, event: AuditEvent, ip_address: Option<&str>, user_agent: Option<&str>) {
        let db_pool = self.db_pool.clone();
        let ip = ip_address.map(|s| s.to_string());
        let ua = user_agent.map(|s| s.to_string());

        tokio::spawn(async move {
            // Structured logging
            match &event {
                AuditEvent::LoginFailure { reason } => {
                    warn!(
                        ip_address = ?ip,
                        user_agent = ?ua,
                        reason = %reason,
                        "Login failed"
                    );
                }
                other => {
                    info!(
                        event = other.event_type(),
                        user_id = ?other.user_id(),
                        ip_address = ?ip,
                        "Audit event"
                    );
                }
            }

            // Database logging (if pool available)
            if let Some(pool) = db_pool {
                let ip_opt: Option<&str> = ip.as_deref();

                if let Err(e) = sqlx::query(
                    "INSERT INTO audit_log (id, event_type, user_id, detail, ip_address, user_agent, created_at)
                     VALUES ($1, $2, $3, $4, $5::inet, $6, NOW())",
                )
                .bind(Uuid::new_v4())
                .bind(event.event_type())
                .bind(event.user_id())
                .bind(event.detail())
                .bind(ip_opt)
                .bind(&ua)
                .execute(pool.as_ref())
                .await
                {
                    // Log database error but don't fail the request
                    warn!(error = %e, "Failed to write audit log to database");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_audit_logger_without_database() {
        let logger = AuditLogger::new(None);

        // Should not panic
        logger.log(
            AuditEvent::LoginFailure { reason: "bad password".to_string() },
            Some("127.0.0.1"),
            Some("test-agent"),
        );

        // Give async task a moment to complete
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    }

    #[test]
    fn test_event_types() {
        let uid = Uuid::new_v4();
        assert_eq!(AuditEvent::RegisterSuccess { user_id: uid }.event_type(), "REGISTER_SUCCESS");
        assert_eq!(
            AuditEvent::LoginFailure { reason: "x".to_string() }.event_type(),
            "LOGIN_FAILURE"
        );
        assert_eq!(
            AuditEvent::ConfigChanged {
                key: "k".to_string(),
                action: "updated".to_string(),
                user_id: uid
            }
            .detail(),
            Some("updated k".to_string())
        );
    }
}
