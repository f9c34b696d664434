//! Shared fixtures for unit tests: one store with two tables and a short
//! menu, plus a second store to test cross-store lookups.

use std::sync::Arc;

use bistro_core::{DiningTable, OperatorContext, Product, Store};
use bistro_db::{Database, DbConfig};

use crate::config::{GatewayMode, SettleConfig};
use crate::gateway::{GatewayRouter, MemoryGateway};

pub const NOODLES: &str = "p-noodles";
pub const TEA: &str = "p-tea";
pub const FOREIGN_PRODUCT: &str = "p-elsewhere";

pub fn cashier() -> OperatorContext {
    OperatorContext {
        operator_id: "cashier-1".into(),
        operator_name: "Mei".into(),
        merchant_id: "m-1".into(),
        store_id: "store1".into(),
        terminal_id: "t-1".into(),
    }
}

pub fn offline_config() -> Arc<SettleConfig> {
    let mut config = SettleConfig::default();
    config.gateway.mode = GatewayMode::Offline;
    Arc::new(config)
}

/// Router with a fresh memory gateway per kind. The gateways are returned
/// so tests can script them.
pub fn memory_router() -> (GatewayRouter, Arc<MemoryGateway>, Arc<MemoryGateway>) {
    let generic = Arc::new(MemoryGateway::new(bistro_core::GatewayKind::Generic));
    let points = Arc::new(MemoryGateway::new(bistro_core::GatewayKind::LoyaltyPoints));
    let router = GatewayRouter::new()
        .with(generic.clone())
        .with(points.clone());
    (router, generic, points)
}

pub async fn seeded_db() -> Database {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let catalog = db.catalog();

    for (id, code) in [("store1", "S001"), ("store2", "S002")] {
        catalog
            .insert_store(&Store {
                id: id.into(),
                merchant_id: "m-1".into(),
                code: code.into(),
                name: format!("Bistro {}", code),
            })
            .await
            .unwrap();
    }
    for (id, store_id) in [("T1", "store1"), ("T2", "store1"), ("X1", "store2")] {
        catalog
            .insert_table(&DiningTable {
                id: id.into(),
                store_id: store_id.into(),
                name: id.into(),
                seats: 4,
            })
            .await
            .unwrap();
    }
    for (id, store_id, name, cents) in [
        (NOODLES, "store1", "Beef Noodles", 2450),
        (TEA, "store1", "Jasmine Tea", 400),
        (FOREIGN_PRODUCT, "store2", "Congee", 900),
    ] {
        catalog
            .insert_product(&Product {
                id: id.into(),
                store_id: store_id.into(),
                name: name.into(),
                price_cents: cents,
                tax_rate_bps: 0,
                is_active: true,
            })
            .await
            .unwrap();
    }
    db
}
