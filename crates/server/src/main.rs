// Courier notification server
// Decision: HTTP API and worker pool run in one process and share the queue stores
// Decision: Without DATABASE_URL the queues live in memory and are lost on restart

use std::sync::Arc;

use anyhow::{Context, Result};
use courier_queue::handlers::register_notification_handlers;
use courier_queue::metrics::TracingMetrics;
use courier_queue::persistence::run_migrations;
use courier_queue::transport::{
    ConsoleTransport, EmailTransport, HttpRelayTransport, SmsTransport,
};
use courier_queue::worker::PollerConfig;
use courier_queue::{
    DeadLetterManager, HandlerRegistry, InMemoryQueueStore, PostgresQueueStore, Processor,
    QueueStore, WorkerPool, WorkerPoolConfig,
};
use courier_server::telemetry::{init_telemetry, TelemetryConfig};
use courier_server::{build_app, AppState, RouterOptions, ServerConfig, TransportKind};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - RUST_LOG / LOG_LEVEL: Log filter (default: "courier_server=info,courier_queue=info,tower_http=info")
    // - LOG_FORMAT=json: Structured output
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.service_name == "courier" {
        telemetry_config.service_name = "courier-server".to_string();
    }
    telemetry_config.service_version = Some(env!("CARGO_PKG_VERSION").to_string());
    init_telemetry(&telemetry_config).context("Failed to initialize logging")?;

    let config = ServerConfig::from_env().context("Invalid configuration")?;

    let (queue, dlq) = build_stores(&config).await?;
    let metrics = Arc::new(TracingMetrics);

    let dead_letters = Arc::new(
        DeadLetterManager::new(queue.clone(), dlq).with_metrics(metrics.clone()),
    );

    let mut handlers = HandlerRegistry::new();
    register_notification_handlers(
        &mut handlers,
        build_email_transport(&config)?,
        build_sms_transport(&config)?,
    );
    tracing::info!(kinds = ?handlers.kinds(), "Handlers registered");

    let processor = Arc::new(
        Processor::new(queue.clone(), dead_letters.clone(), handlers).with_metrics(metrics),
    );

    let mut pool_config = WorkerPoolConfig::new()
        .with_max_concurrency(config.worker_concurrency)
        .with_poller(PollerConfig::new().with_min_interval(config.poll_interval));
    if let Some(timeout) = config.lease_timeout {
        pool_config = pool_config.with_lease_timeout(timeout);
    }
    let pool = WorkerPool::new(queue.clone(), processor, pool_config);
    pool.start().await.context("Failed to start worker pool")?;

    if config.internal_api_key.is_some() {
        tracing::info!("Internal API key required for API routes");
    }
    if !config.api_prefix.is_empty() {
        tracing::info!(prefix = %config.api_prefix, "API prefix configured");
    }
    if config.cors_allowed_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
    } else {
        tracing::info!(origins = ?config.cors_allowed_origins, "CORS origins configured");
    }

    let app = build_app(
        AppState {
            queue,
            dead_letters,
        },
        &RouterOptions {
            api_prefix: config.api_prefix.clone(),
            internal_api_key: config.internal_api_key.clone(),
            cors_allowed_origins: config.cors_allowed_origins.clone(),
        },
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("HTTP server stopped, draining workers");
    pool.shutdown()
        .await
        .context("Worker pool did not shut down cleanly")?;

    Ok(())
}

/// Primary and dead-letter stores; both share one connection pool when
/// PostgreSQL is configured
async fn build_stores(
    config: &ServerConfig,
) -> Result<(Arc<dyn QueueStore>, Arc<dyn QueueStore>)> {
    let Some(database_url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set, using in-memory queues");
        let queue: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new(&config.queue_name));
        let dlq: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new(&config.dlq_name));
        return Ok((queue, dlq));
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!(
        queue = %config.queue_name,
        dlq = %config.dlq_name,
        "Connected to database"
    );

    let queue: Arc<dyn QueueStore> =
        Arc::new(PostgresQueueStore::new(pool.clone(), &config.queue_name));
    let dlq: Arc<dyn QueueStore> = Arc::new(PostgresQueueStore::new(pool, &config.dlq_name));
    Ok((queue, dlq))
}

fn build_email_transport(config: &ServerConfig) -> Result<Arc<dyn EmailTransport>> {
    match (config.email_transport, &config.email_relay_url) {
        (TransportKind::Http, Some(url)) => {
            let mut transport =
                HttpRelayTransport::new(url).context("Failed to create email relay client")?;
            if let Some(from) = &config.email_from {
                transport = transport.with_from(from);
            }
            tracing::info!(url = %url, "Email delivered through HTTP relay");
            Ok(Arc::new(transport))
        }
        _ => {
            tracing::info!("Email delivered to console");
            Ok(Arc::new(ConsoleTransport))
        }
    }
}

fn build_sms_transport(config: &ServerConfig) -> Result<Arc<dyn SmsTransport>> {
    match (config.sms_transport, &config.sms_relay_url) {
        (TransportKind::Http, Some(url)) => {
            let transport =
                HttpRelayTransport::new(url).context("Failed to create SMS relay client")?;
            tracing::info!(url = %url, "SMS delivered through HTTP relay");
            Ok(Arc::new(transport))
        }
        _ => {
            tracing::info!("SMS delivered to console");
            Ok(Arc::new(ConsoleTransport))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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
    tracing::info!("Shutdown signal received");
}
