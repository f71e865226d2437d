use auth_service::{
    build_router, build_state,
    config::AuthConfig,
    services::{
        AuthStore, Database, EmailService, HttpGeoProvider, MemoryCounter, MockSmsService,
        RedisCounter, StaticGeoProvider, WebhookSmsService,
    },
};
use service_core::observability::logging::init_tracing;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

/// How often the expiry sweep runs. The sweep is idempotent and safe to
/// skip, so the interval is not load-bearing.
const SWEEP_INTERVAL_SECS: u64 = 600;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting authentication service"
    );

    // Postgres store
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    let database = Database::new(pool);
    database.initialize_schema().await?;
    let store: Arc<dyn AuthStore> = Arc::new(database);
    tracing::info!("Database initialized");

    // Attempt counters: Redis when configured, in-process otherwise
    let counter: Arc<dyn auth_service::services::AttemptCounter> =
        match RedisCounter::new(&config.redis.url).await {
            Ok(counter) => Arc::new(counter),
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, falling back to in-memory counters");
                Arc::new(MemoryCounter::new())
            }
        };

    // Outbound providers
    let email = Arc::new(EmailService::new(&config.smtp)?);
    let sms: Arc<dyn auth_service::services::SmsProvider> = match &config.sms_webhook_url {
        Some(url) => Arc::new(WebhookSmsService::new(url.clone())),
        None => {
            tracing::warn!("SMS_WEBHOOK_URL not set, SMS delivery disabled");
            Arc::new(MockSmsService::new())
        }
    };
    let geo: Arc<dyn auth_service::services::GeoIpProvider> = match &config.geo_provider_url {
        Some(url) => Arc::new(HttpGeoProvider::new(url.clone())),
        None => {
            tracing::warn!("GEO_PROVIDER_URL not set, risk scoring runs without geo signals");
            Arc::new(StaticGeoProvider::new())
        }
    };

    let state = build_state(config.clone(), store.clone(), counter, email, sms, geo)?;

    // Periodic sweep of expired OTP rows
    let sweep_store = store.clone();
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(tokio::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            match sweep_store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged = purged, "Expired rows purged"),
                Err(e) => tracing::warn!(error = %e, "Expiry sweep failed"),
            }
        }
    });

    let app = build_router(state).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
