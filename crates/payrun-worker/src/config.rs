//! Configuration management

use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// Worker Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/payrun";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default idle delay between empty poll iterations, in milliseconds.
pub const DEFAULT_POLL_DELAY_MS: u64 = 500;

/// Default cool-down after an unexpected poll-loop error, in milliseconds.
pub const DEFAULT_ERROR_COOLDOWN_MS: u64 = 1000;

/// Default number of rows per validation chunk.
pub const DEFAULT_CHUNK_SIZE_ROWS: i32 = 1000;

/// Default age after which a running lease is considered stale, in seconds.
pub const DEFAULT_STALE_LOCK_SECS: i64 = 60;

/// Default maximum attempts before a job or chunk fails permanently.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Default exponential backoff base, in seconds (delay = base * 2^attempt).
pub const DEFAULT_RETRY_BASE_SECS: f64 = 2.0;

/// Default number of parsed rows inserted per batch.
pub const DEFAULT_INSERT_BATCH_ROWS: usize = 500;

/// Default number of validated rows per progress commit (also refreshes the
/// chunk heartbeat).
pub const DEFAULT_PROGRESS_COMMIT_ROWS: usize = 200;

/// Default number of validated rows between row-progress notifications.
pub const DEFAULT_PROGRESS_NOTIFY_ROWS: usize = 100;

/// Default base URL of the intake API's notification endpoints.
pub const DEFAULT_NOTIFIER_BASE_URL: &str = "http://localhost:8080";

/// Default notification request timeout in seconds.
pub const DEFAULT_NOTIFIER_TIMEOUT_SECS: u64 = 5;

/// Worker configuration
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub notifier: NotifierConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Worker tuning knobs
#[derive(Debug, Clone, Serialize)]
pub struct WorkerConfig {
    /// Lock-owner label, `hostname:uuid`, built once at startup.
    pub worker_id: String,
    pub poll_delay_ms: u64,
    pub error_cooldown_ms: u64,
    pub chunk_size_rows: i32,
    pub stale_lock_secs: i64,
    pub max_attempts: i32,
    pub retry_base_secs: f64,
    pub insert_batch_rows: usize,
    pub progress_commit_rows: usize,
    pub progress_notify_rows: usize,
}

/// Notification delivery configuration
#[derive(Debug, Clone, Serialize)]
pub struct NotifierConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parsed("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_parsed("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or(DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_parsed("DATABASE_CONNECT_TIMEOUT")
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
            },
            worker: WorkerConfig {
                worker_id: build_worker_id(),
                poll_delay_ms: env_parsed("WORKER_POLL_DELAY_MS").unwrap_or(DEFAULT_POLL_DELAY_MS),
                error_cooldown_ms: env_parsed("WORKER_ERROR_COOLDOWN_MS")
                    .unwrap_or(DEFAULT_ERROR_COOLDOWN_MS),
                chunk_size_rows: env_parsed("WORKER_CHUNK_SIZE_ROWS")
                    .unwrap_or(DEFAULT_CHUNK_SIZE_ROWS),
                stale_lock_secs: env_parsed("WORKER_STALE_LOCK_SECS")
                    .unwrap_or(DEFAULT_STALE_LOCK_SECS),
                max_attempts: env_parsed("WORKER_MAX_ATTEMPTS").unwrap_or(DEFAULT_MAX_ATTEMPTS),
                retry_base_secs: env_parsed("WORKER_RETRY_BASE_SECS")
                    .unwrap_or(DEFAULT_RETRY_BASE_SECS),
                insert_batch_rows: env_parsed("WORKER_INSERT_BATCH_ROWS")
                    .unwrap_or(DEFAULT_INSERT_BATCH_ROWS),
                progress_commit_rows: env_parsed("WORKER_PROGRESS_COMMIT_ROWS")
                    .unwrap_or(DEFAULT_PROGRESS_COMMIT_ROWS),
                progress_notify_rows: env_parsed("WORKER_PROGRESS_NOTIFY_ROWS")
                    .unwrap_or(DEFAULT_PROGRESS_NOTIFY_ROWS),
            },
            notifier: NotifierConfig {
                base_url: std::env::var("NOTIFIER_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_NOTIFIER_BASE_URL.to_string()),
                timeout_secs: env_parsed("NOTIFIER_TIMEOUT_SECS")
                    .unwrap_or(DEFAULT_NOTIFIER_TIMEOUT_SECS),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.worker.chunk_size_rows < 1 {
            anyhow::bail!("Chunk size must be at least 1 row");
        }

        if self.worker.max_attempts < 1 {
            anyhow::bail!("Max attempts must be at least 1");
        }

        // Progress commits carry the lease heartbeat; a stale threshold this
        // low would let other workers reclaim chunks that are still alive.
        if self.worker.stale_lock_secs < 5 {
            anyhow::bail!("Stale lock threshold must be at least 5 seconds");
        }

        if self.worker.retry_base_secs <= 0.0 {
            anyhow::bail!("Retry backoff base must be positive");
        }

        if self.worker.insert_batch_rows == 0
            || self.worker.progress_commit_rows == 0
            || self.worker.progress_notify_rows == 0
        {
            anyhow::bail!("Batch sizes must be at least 1 row");
        }

        if self.notifier.base_url.is_empty() {
            anyhow::bail!("Notifier base URL cannot be empty");
        }

        Ok(())
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Lock-owner label for this process: `hostname:uuid`.
///
/// Only used for observability; uniqueness comes from the uuid.
fn build_worker_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}:{}", host, Uuid::new_v4().simple())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            worker: WorkerConfig {
                worker_id: build_worker_id(),
                poll_delay_ms: DEFAULT_POLL_DELAY_MS,
                error_cooldown_ms: DEFAULT_ERROR_COOLDOWN_MS,
                chunk_size_rows: DEFAULT_CHUNK_SIZE_ROWS,
                stale_lock_secs: DEFAULT_STALE_LOCK_SECS,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                retry_base_secs: DEFAULT_RETRY_BASE_SECS,
                insert_batch_rows: DEFAULT_INSERT_BATCH_ROWS,
                progress_commit_rows: DEFAULT_PROGRESS_COMMIT_ROWS,
                progress_notify_rows: DEFAULT_PROGRESS_NOTIFY_ROWS,
            },
            notifier: NotifierConfig {
                base_url: DEFAULT_NOTIFIER_BASE_URL.to_string(),
                timeout_secs: DEFAULT_NOTIFIER_TIMEOUT_SECS,
            },
        }
    }
}
