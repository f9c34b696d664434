//! Document-number allocation.

use async_trait::async_trait;
use bistro_db::SequenceRepository;

use crate::error::SettleResult;

/// Hands out per-scope counters. Concurrent callers in one scope never see
/// the same value.
#[async_trait]
pub trait SequenceGenerator: Send + Sync {
    async fn next(&self, scope: &str) -> SettleResult<i64>;
}

#[async_trait]
impl SequenceGenerator for SequenceRepository {
    async fn next(&self, scope: &str) -> SettleResult<i64> {
        Ok(SequenceRepository::next(self, scope).await?)
    }
}
