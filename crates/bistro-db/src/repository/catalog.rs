//! # Catalog Repository
//!
//! Stores, dining tables and products: the reference data order creation
//! resolves against. Browsing the menu is not this crate's job; lookups by
//! id and seeding are.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use bistro_core::{DiningTable, Product, Store};

/// Repository for catalog reference data.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    pub async fn store(&self, id: &str) -> DbResult<Option<Store>> {
        let row = sqlx::query("SELECT id, merchant_id, code, name FROM stores WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| map_store(&r)).transpose()
    }

    pub async fn table(&self, id: &str) -> DbResult<Option<DiningTable>> {
        let row = sqlx::query("SELECT id, store_id, name, seats FROM dining_tables WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| map_table(&r)).transpose()
    }

    pub async fn product(&self, id: &str) -> DbResult<Option<Product>> {
        let row = sqlx::query(
            r#"
            SELECT id, store_id, name, price_cents, tax_rate_bps, is_active
            FROM products
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| map_product(&r)).transpose()
    }

    // -------------------------------------------------------------------------
    // Inserts (seeding, tests)
    // -------------------------------------------------------------------------

    pub async fn insert_store(&self, store: &Store) -> DbResult<()> {
        debug!(id = %store.id, code = %store.code, "Inserting store");

        sqlx::query("INSERT INTO stores (id, merchant_id, code, name) VALUES (?1, ?2, ?3, ?4)")
            .bind(&store.id)
            .bind(&store.merchant_id)
            .bind(&store.code)
            .bind(&store.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_table(&self, table: &DiningTable) -> DbResult<()> {
        debug!(id = %table.id, store_id = %table.store_id, "Inserting dining table");

        sqlx::query("INSERT INTO dining_tables (id, store_id, name, seats) VALUES (?1, ?2, ?3, ?4)")
            .bind(&table.id)
            .bind(&table.store_id)
            .bind(&table.name)
            .bind(table.seats)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_product(&self, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, name = %product.name, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (id, store_id, name, price_cents, tax_rate_bps, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&product.id)
        .bind(&product.store_id)
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(i64::from(product.tax_rate_bps))
        .bind(product.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

fn map_store(row: &SqliteRow) -> DbResult<Store> {
    Ok(Store {
        id: row.try_get("id")?,
        merchant_id: row.try_get("merchant_id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
    })
}

fn map_table(row: &SqliteRow) -> DbResult<DiningTable> {
    Ok(DiningTable {
        id: row.try_get("id")?,
        store_id: row.try_get("store_id")?,
        name: row.try_get("name")?,
        seats: row.try_get("seats")?,
    })
}

fn map_product(row: &SqliteRow) -> DbResult<Product> {
    let bps: i64 = row.try_get("tax_rate_bps")?;
    Ok(Product {
        id: row.try_get("id")?,
        store_id: row.try_get("store_id")?,
        name: row.try_get("name")?,
        price_cents: row.try_get("price_cents")?,
        // CHECK constraint keeps this in 0..=10000
        tax_rate_bps: bps.clamp(0, i64::from(u32::MAX)) as u32,
        is_active: row.try_get("is_active")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig, DbError};

    fn store() -> Store {
        Store {
            id: "store1".to_string(),
            merchant_id: "m-1".to_string(),
            code: "S001".to_string(),
            name: "Harbour Noodle Bar".to_string(),
        }
    }

    #[tokio::test]
    async fn test_catalog_roundtrip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = db.catalog();

        catalog.insert_store(&store()).await.unwrap();
        catalog
            .insert_table(&DiningTable {
                id: "T1".to_string(),
                store_id: "store1".to_string(),
                name: "Window 1".to_string(),
                seats: 4,
            })
            .await
            .unwrap();
        catalog
            .insert_product(&Product {
                id: "p-noodles".to_string(),
                store_id: "store1".to_string(),
                name: "Beef Noodles".to_string(),
                price_cents: 2450,
                tax_rate_bps: 825,
                is_active: true,
            })
            .await
            .unwrap();

        assert_eq!(catalog.store("store1").await.unwrap(), Some(store()));
        assert_eq!(catalog.table("T1").await.unwrap().unwrap().seats, 4);
        let product = catalog.product("p-noodles").await.unwrap().unwrap();
        assert_eq!(product.price().cents(), 2450);
        assert_eq!(product.tax_rate_bps, 825);

        assert!(catalog.store("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_table_requires_store() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let err = db
            .catalog()
            .insert_table(&DiningTable {
                id: "T1".to_string(),
                store_id: "ghost".to_string(),
                name: "Window 1".to_string(),
                seats: 4,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
    }
}
