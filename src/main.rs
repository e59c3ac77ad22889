// Main entry point for Groundwork

use groundwork::api::{create_router, AppState};
use groundwork::auth::audit_logger::AuditLogger;
use groundwork::auth::middleware::AuthState;
use groundwork::auth::service::AuthService;
use groundwork::auth::token::TokenService;
use groundwork::auth::user_store::{PgUserStore, UserStore};
use groundwork::config::Config;
use groundwork::metrics::Metrics;
use groundwork::remote_config::crypto::ConfigCipher;
use groundwork::remote_config::service::ConfigService;
use groundwork::remote_config::store::PgConfigStore;
use groundwork::state::RedisStore;
use groundwork::tasks::handler::WorkerPool;
use groundwork::tasks::queue::{RedisTaskQueue, TaskQueue};
use groundwork::tasks::service::TaskService;
use groundwork::tasks::task_store::{PgTaskStore, TaskStore};

use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load and validate configuration first (before any logging)
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // 2. Initialize tracing subscriber with config values
    // Must be done only once - tracing panics if init() is called multiple times
    init_tracing(&config)?;

    info!("Starting Groundwork");
    info!(
        bind_address = %config.bind_address,
        port = config.port,
        workers = config.worker_count,
        "Configuration loaded"
    );

    // 3. Initialize Redis store
    let redis_store = RedisStore::new(&config.redis_url).await.map_err(|e| {
        error!(error = %e, "Failed to initialize Redis store");
        e
    })?;

    info!("Redis store initialized");

    // 4. Initialize database pool and run migrations
    let db_pool = Arc::new(sqlx::PgPool::connect(&config.database_url).await.map_err(
        |e| {
            error!(error = %e, "Failed to connect to database");
            e
        },
    )?);

    sqlx::migrate!("./migrations")
        .run(db_pool.as_ref())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to run database migrations");
            e
        })?;

    info!("Database pool initialized, migrations applied");

    // 5. Initialize metrics registry
    let metrics = Metrics::new()?;

    // 6. Initialize repositories
    let user_store: Arc<dyn UserStore> = Arc::new(PgUserStore::new((*db_pool).clone()));
    let task_store: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(db_pool.clone()));
    let config_store = Arc::new(PgConfigStore::new(db_pool.clone()));

    // 7. Initialize crypto components
    let token_service = Arc::new(TokenService::new(&config.jwt_secret, config.jwt_expiry_secs));
    let cipher = Arc::new(ConfigCipher::from_hex_key(&config.config_encryption_key)?);

    // 8. Initialize audit logger
    let audit_logger = Arc::new(AuditLogger::new(Some(db_pool.clone())));

    info!("Audit logger initialized");

    // 9. Initialize services
    let auth_service = Arc::new(AuthService::new(
        user_store.clone(),
        token_service.clone(),
        audit_logger.clone(),
    ));

    let task_queue: Arc<dyn TaskQueue> = Arc::new(RedisTaskQueue::new(redis_store.clone()));
    let task_service = Arc::new(TaskService::new(
        task_store.clone(),
        task_queue.clone(),
        config.task_max_attempts,
    ));

    let config_service = Arc::new(ConfigService::new(
        config_store,
        cipher,
        audit_logger.clone(),
    ));

    info!("Services initialized");

    // 10. Start the worker pool
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_pool = Arc::new(WorkerPool::new(
        task_queue,
        task_store,
        metrics.clone(),
        config.worker_count as usize,
    ));
    let worker_handles = worker_pool.spawn(shutdown_rx);

    // 11. Create AuthState and AppState
    let auth_state = Arc::new(AuthState {
        token_service,
        user_store,
    });

    let app_state = AppState {
        config: Arc::new(config.clone()),
        auth_service,
        task_service,
        config_service,
        redis_store,
        db_pool,
        metrics,
    };

    // 12. Create router
    let router = create_router(app_state, auth_state);

    info!("Router created");

    // 13. Start HTTP server
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind to address");
        e
    })?;

    info!(addr = %addr, "Server listening on {}", addr);

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!(error = %e, "Server error");
            e
        })?;

    // 14. Drain workers: stop picking up new tasks, wait for in-flight work
    info!("Server stopped, draining workers");
    shutdown_tx.send(true).ok();
    for handle in worker_handles {
        handle.await.ok();
    }

    info!("Shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber based on configuration
fn init_tracing(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let level = parse_log_level(&config.log_level)?;

    // RUST_LOG wins over the configured level when set
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(filter);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> Result<tracing::Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(tracing::Level::TRACE),
        "debug" => Ok(tracing::Level::DEBUG),
        "info" => Ok(tracing::Level::INFO),
        "warn" => Ok(tracing::Level::WARN),
        "error" => Ok(tracing::Level::ERROR),
        _ => Err(format!("Invalid log level: {}", level)),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            info!("SIGTERM received, starting graceful shutdown");
        },
    }
}
