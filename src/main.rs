use hr_talent_api::{
    audit::AuditLogger,
    config::Config,
    db::Database,
    db_storage::PgStorage,
    handlers::AppState,
    routes,
    skill_cache::MokaSkillCache,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::timeout::TimeoutLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// Initializes logging, configuration, the database pool, the skill cache and
/// the audit pool, then serves HTTP until Ctrl-C or SIGTERM. Queued audit
/// entries are flushed before exit.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hr_talent_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database connection pool established");

    if config.run_migrations {
        db.migrate().await?;
    }

    let storage = Arc::new(PgStorage::new(db.pool.clone()));

    // Skill cache: candidate id -> skill names, per-entry TTL
    let skill_cache = Arc::new(MokaSkillCache::new(config.skills_cache_max_entries));
    tracing::info!(
        "Skill cache initialized ({}s TTL, {} capacity)",
        config.skills_cache_ttl_secs,
        config.skills_cache_max_entries
    );

    let audit = AuditLogger::spawn(
        storage.clone(),
        config.audit_queue_capacity,
        config.audit_workers,
    );

    let port = config.port;
    let http_timeout = config.request_timeout() + Duration::from_secs(1);

    // Build application state
    let app_state = Arc::new(AppState::new(
        config,
        storage.clone(),
        storage.clone(),
        storage,
        skill_cache,
        audit.clone(),
    ));

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );

    let app = routes::router(app_state).layer(
        ServiceBuilder::new()
            // Backstop for requests whose handler ignores its deadline
            .layer(TimeoutLayer::new(http_timeout))
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    audit.shutdown().await;
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
