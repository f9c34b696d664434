//! # Store Database
//!
//! One SQLite file per store holds orders, refund orders, counters and the
//! catalog. [`Database`] owns the pool and hands out repositories.
//!
//! ## Writers and Readers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Store Database (WAL)                             │
//! │                                                                         │
//! │  OrderService ──┐                                                      │
//! │  Settlement  ───┤     ┌─────────────┐     ┌──────────────────────────┐ │
//! │  Refunds     ───┼───► │ SqlitePool  │ ──► │ orders / order_payments  │ │
//! │  Coordinator ───┤     │ max_conns   │     │ refund_orders            │ │
//! │  Worker sweep ──┘     └─────────────┘     │ sequences / catalog      │ │
//! │                                           └──────────────────────────┘ │
//! │                                                                         │
//! │  Readers never wait on writers. A writer waits up to busy_timeout      │
//! │  for the write lock; lost races on an order show up as StaleVersion,   │
//! │  never as a lock error.                                                │
//! │                                                                         │
//! │  :memory: is private to one connection, so the in-memory config pins   │
//! │  the pool to a single connection.                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::catalog::CatalogRepository;
use crate::repository::order::OrderRepository;
use crate::repository::refund::RefundRepository;
use crate::repository::sequence::SequenceRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Where the store database lives and how hard it may be hit.
///
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/bistro/store.db").max_connections(8);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_path: PathBuf,
    /// Default: 5
    pub max_connections: u32,
    /// How long a request waits for a free connection. Default: 30 seconds
    pub acquire_timeout: Duration,
    /// How long a writer waits for SQLite's write lock. Default: 5 seconds
    pub busy_timeout: Duration,
}

impl DbConfig {
    /// File-backed store database; the file is created on first open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Throwaway database for tests and offline demos.
    ///
    /// Runs on one connection: never hold a transaction open while
    /// acquiring a second connection.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to the store database. Clones share one pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool (WAL, NORMAL sync, foreign keys on) and applies any
    /// pending migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        let url = format!("sqlite://{}?mode=rwc", config.database_path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
        migrations::run_migrations(&pool).await?;

        info!(
            path = %config.database_path.display(),
            max_connections = config.max_connections,
            "Store database open"
        );
        Ok(Database { pool })
    }

    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self.pool.clone())
    }

    pub fn refunds(&self) -> RefundRepository {
        RefundRepository::new(self.pool.clone())
    }

    pub fn sequences(&self) -> SequenceRepository {
        SequenceRepository::new(self.pool.clone())
    }

    pub fn catalog(&self) -> CatalogRepository {
        CatalogRepository::new(self.pool.clone())
    }

    /// Waits for checked-out connections, then closes the pool. Later calls
    /// through any clone fail with a connection error.
    pub async fn close(&self) {
        info!("Closing store database");
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_is_migrated() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let (total, applied) = migrations::migration_status(&db.pool).await.unwrap();
        assert!(total > 0);
        assert_eq!(total, applied);
    }

    #[tokio::test]
    async fn test_closed_database_rejects_queries() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let other = db.clone();
        db.close().await;

        let err = other.orders().get_by_no("S00120240315000001").await.unwrap_err();
        assert!(matches!(err, DbError::ConnectionFailed(_)));
        assert_eq!(err.kind(), bistro_core::ErrorKind::Unavailable);
    }

    #[test]
    fn test_config_builder() {
        let config = DbConfig::new("/tmp/store.db")
            .max_connections(10)
            .busy_timeout(Duration::from_secs(1));

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.busy_timeout, Duration::from_secs(1));
        assert_eq!(DbConfig::in_memory().max_connections, 1);
    }
}
