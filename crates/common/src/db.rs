use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// How long to wait for a free connection before reporting the store as unreachable.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a PostgreSQL connection pool.
///
/// Used both at start-up and whenever the notification store reconnects
/// after losing its connection.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}
