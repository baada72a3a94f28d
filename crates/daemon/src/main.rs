use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use pushgate_common::config::AppConfig;
use pushgate_common::db;
use pushgate_delivery::{
    Feeder, NotificationQueue, PgNotificationStore, RetryPolicy, WorkerPool, WorkerSettings,
};
use pushgate_gateway::{Certificate, GatewayConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pushgate=info,pushgate_common=info,pushgate_delivery=info,pushgate_gateway=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Pushgate starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Default certificate must be usable before any worker starts
    let pem = std::fs::read_to_string(&config.certificate_path).map_err(|e| {
        anyhow::anyhow!(
            "cannot read certificate {}: {}",
            config.certificate_path.display(),
            e
        )
    })?;
    let default_certificate = Certificate::new(pem);
    default_certificate.credentials()?;

    let mut connector = GatewayConnector::new(config.gateway_host.clone(), config.gateway_port);
    if let Some(ca_path) = &config.gateway_ca_path {
        connector = connector.with_extra_roots(ca_path)?;
    }

    // Connect to database
    let pool = db::connect(&config.database_url, config.db_max_connections).await?;

    // Run migrations
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    let store = Arc::new(PgNotificationStore::new(
        pool,
        config.database_url.clone(),
        config.db_max_connections,
    ));
    let queue = Arc::new(NotificationQueue::new());

    let settings = WorkerSettings {
        poll_timeout: Duration::from_millis(config.poll_timeout_ms),
        retry_policy: RetryPolicy {
            max_attempts: config.store_retry_attempts,
            delay: Duration::from_millis(config.store_retry_delay_ms),
        },
    };

    tracing::info!(
        host = %config.gateway_host,
        port = config.gateway_port,
        environment = ?config.push_environment,
        workers = config.delivery_workers,
        "Starting delivery workers"
    );

    let mut workers = WorkerPool::new(
        config.delivery_workers,
        queue.clone(),
        Arc::new(connector),
        default_certificate,
        store.clone(),
        settings,
    );
    workers.start();

    let feeder = Feeder::new(
        store,
        queue,
        config.feeder_batch_size,
        Duration::from_millis(config.feeder_poll_interval_ms),
    );
    let feeder_token = CancellationToken::new();

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        _ = feeder.run(feeder_token.clone()) => {
            tracing::warn!("Feeder exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
            feeder_token.cancel();
        }
    }

    if let Err(e) = workers
        .shutdown_graceful(Duration::from_secs(config.shutdown_timeout_secs))
        .await
    {
        tracing::error!(error = %e, "Delivery workers did not shut down cleanly");
    }

    tracing::info!("Pushgate stopped.");
    Ok(())
}
