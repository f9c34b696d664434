//! # Sequence Repository
//!
//! Per-scope counters backing order, payment and refund numbers.
//!
//! One statement does the whole allocation, so two callers in the same scope
//! can never observe the same value:
//!
//! ```sql
//! INSERT INTO sequences (scope, value, updated_at) VALUES (?1, 1, ?2)
//! ON CONFLICT(scope) DO UPDATE SET value = value + 1, updated_at = excluded.updated_at
//! RETURNING value
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

/// Repository for sequence counters.
#[derive(Debug, Clone)]
pub struct SequenceRepository {
    pool: SqlitePool,
}

impl SequenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SequenceRepository { pool }
    }

    /// Returns the next value for `scope`, starting at 1.
    pub async fn next(&self, scope: &str) -> DbResult<i64> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sequences (scope, value, updated_at) VALUES (?1, 1, ?2)
            ON CONFLICT(scope) DO UPDATE
                SET value = value + 1, updated_at = excluded.updated_at
            RETURNING value
            "#,
        )
        .bind(scope)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        debug!(scope = %scope, value, "Sequence allocated");
        Ok(value)
    }

    /// Current value without allocating; `None` if the scope was never used.
    pub async fn current(&self, scope: &str) -> DbResult<Option<i64>> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM sequences WHERE scope = ?1")
            .bind(scope)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_next_is_monotonic_per_scope() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let seq = db.sequences();

        assert_eq!(seq.current("OD:store1:20240315").await.unwrap(), None);
        assert_eq!(seq.next("OD:store1:20240315").await.unwrap(), 1);
        assert_eq!(seq.next("OD:store1:20240315").await.unwrap(), 2);
        // A new date is a new scope
        assert_eq!(seq.next("OD:store1:20240316").await.unwrap(), 1);
        assert_eq!(seq.current("OD:store1:20240315").await.unwrap(), Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_next_yields_distinct_values() {
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig::new(dir.path().join("seq.db")).max_connections(8);
        let db = Database::new(config).await.unwrap();

        let n = 40;
        let mut handles = Vec::new();
        for _ in 0..n {
            let seq = db.sequences();
            handles.push(tokio::spawn(async move { seq.next("RF:store1").await.unwrap() }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()));
        }
        assert_eq!(seen.len(), n);
        assert_eq!(seen.iter().max().copied(), Some(n as i64));
        db.close().await;
    }
}
