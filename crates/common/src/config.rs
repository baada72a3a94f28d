use std::path::PathBuf;

use serde::Deserialize;

/// Which Apple push environment the daemon talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushEnvironment {
    Production,
    Sandbox,
}

impl PushEnvironment {
    /// Gateway host used when `GATEWAY_HOST` is not set.
    pub fn default_host(self) -> &'static str {
        match self {
            PushEnvironment::Production => "gateway.push.apple.com",
            PushEnvironment::Sandbox => "gateway.sandbox.push.apple.com",
        }
    }
}

impl std::str::FromStr for PushEnvironment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(PushEnvironment::Production),
            "sandbox" | "development" => Ok(PushEnvironment::Sandbox),
            other => Err(anyhow::anyhow!(
                "PUSH_ENVIRONMENT must be 'production' or 'sandbox', got '{}'",
                other
            )),
        }
    }
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 10)
    pub db_max_connections: u32,

    /// Push environment, selects the default gateway host
    pub push_environment: PushEnvironment,

    /// Gateway host
    pub gateway_host: String,

    /// Gateway port (default: 2195)
    pub gateway_port: u16,

    /// PEM file holding the default client certificate chain and private key
    pub certificate_path: PathBuf,

    /// Optional PEM bundle of additional trust anchors for the gateway
    pub gateway_ca_path: Option<PathBuf>,

    /// Number of delivery workers (default: 3)
    pub delivery_workers: usize,

    /// How long a worker waits for an error tuple after each send (default: 500)
    pub poll_timeout_ms: u64,

    /// Attempts for an outcome write, including the first (default: 5)
    pub store_retry_attempts: u32,

    /// Pause between outcome write attempts (default: 2000)
    pub store_retry_delay_ms: u64,

    /// Sleep between feeder batches (default: 2000)
    pub feeder_poll_interval_ms: u64,

    /// Notifications loaded per feeder batch (default: 100)
    pub feeder_batch_size: i64,

    /// Deadline for draining workers on shutdown (default: 30)
    pub shutdown_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let push_environment: PushEnvironment = std::env::var("PUSH_ENVIRONMENT")
            .unwrap_or_else(|_| "production".to_string())
            .parse()?;

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", "10", "u32")?,
            push_environment,
            gateway_host: std::env::var("GATEWAY_HOST")
                .unwrap_or_else(|_| push_environment.default_host().to_string()),
            gateway_port: parse_var("GATEWAY_PORT", "2195", "u16")?,
            certificate_path: std::env::var("CERTIFICATE_PATH")
                .map(PathBuf::from)
                .map_err(|_| anyhow::anyhow!("CERTIFICATE_PATH environment variable is required"))?,
            gateway_ca_path: std::env::var("GATEWAY_CA_PATH").ok().map(PathBuf::from),
            delivery_workers: parse_var("DELIVERY_WORKERS", "3", "usize")?,
            poll_timeout_ms: parse_var("POLL_TIMEOUT_MS", "500", "u64")?,
            store_retry_attempts: parse_var("STORE_RETRY_ATTEMPTS", "5", "u32")?,
            store_retry_delay_ms: parse_var("STORE_RETRY_DELAY_MS", "2000", "u64")?,
            feeder_poll_interval_ms: parse_var("FEEDER_POLL_INTERVAL_MS", "2000", "u64")?,
            feeder_batch_size: parse_var("FEEDER_BATCH_SIZE", "100", "i64")?,
            shutdown_timeout_secs: parse_var("SHUTDOWN_TIMEOUT_SECS", "30", "u64")?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str, kind: &str) -> anyhow::Result<T> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| anyhow::anyhow!("{} must be a valid {}", name, kind))
}
