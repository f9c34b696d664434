//! # Catalog Lookups
//!
//! Order creation resolves stores, tables and products through [`Catalog`].
//! The SQLite repository is the production implementation; tests can plug
//! in anything that answers the three lookups.

use async_trait::async_trait;
use bistro_core::{DiningTable, Product, Store};
use bistro_db::CatalogRepository;

use crate::error::{SettleError, SettleResult};

/// Reference data the order services depend on.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// `NotFound` if the store is unknown.
    async fn store(&self, id: &str) -> SettleResult<Store>;

    /// `NotFound` if the table is unknown.
    async fn table(&self, id: &str) -> SettleResult<DiningTable>;

    /// `NotFound` if the product is unknown.
    async fn product(&self, id: &str) -> SettleResult<Product>;
}

#[async_trait]
impl Catalog for CatalogRepository {
    async fn store(&self, id: &str) -> SettleResult<Store> {
        CatalogRepository::store(self, id)
            .await?
            .ok_or_else(|| SettleError::not_found("Store", id))
    }

    async fn table(&self, id: &str) -> SettleResult<DiningTable> {
        CatalogRepository::table(self, id)
            .await?
            .ok_or_else(|| SettleError::not_found("Table", id))
    }

    async fn product(&self, id: &str) -> SettleResult<Product> {
        CatalogRepository::product(self, id)
            .await?
            .ok_or_else(|| SettleError::not_found("Product", id))
    }
}
