//! Store handle and connection setup.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::StoreResult;
use crate::retry::DbRetryConfig;

/// The sole custodian of persisted orchestration state.
///
/// All invariants of the task state machine (status allowlist, monotone
/// progress, terminal stickiness) are enforced here, never by callers.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: SqlitePool,
    pub(crate) retry: DbRetryConfig,
}

impl Store {
    /// Open (and create if missing) the database at `url`, running
    /// pending migrations.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Store ready at {}", url);

        Ok(Self {
            pool,
            retry: DbRetryConfig::default(),
        })
    }

    /// Create from the `DATABASE_URL` environment variable.
    pub async fn from_env() -> StoreResult<Self> {
        let url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://tloom.sqlite".to_string());
        Self::connect(&url).await
    }

    /// In-memory store for tests. A single pooled connection pinned for
    /// the pool's lifetime keeps the private database alive, and every
    /// call gets a database of its own.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            pool,
            retry: DbRetryConfig::default(),
        })
    }

    /// Override the transient-error retry policy.
    pub fn with_retry_config(mut self, retry: DbRetryConfig) -> Self {
        self.retry = retry;
        self
    }
}
