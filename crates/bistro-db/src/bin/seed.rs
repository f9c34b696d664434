//! # Seed Data Generator
//!
//! Populates a development database with one store, its tables and a menu.
//!
//! ## Usage
//! ```bash
//! # Seed ./bistro_dev.db with store "store1" (code S001)
//! cargo run -p bistro-db --bin seed
//!
//! # Custom database path, store id and code
//! cargo run -p bistro-db --bin seed -- --db ./data/bistro.db --store store2 --code S002
//! ```

use std::env;

use bistro_core::{DiningTable, Product, Store};
use bistro_db::{Database, DbConfig};
use uuid::Uuid;

/// (name, price cents, tax bps)
const MENU: &[(&str, i64, u32)] = &[
    ("Beef Noodles", 2450, 0),
    ("Dan Dan Noodles", 1980, 0),
    ("Wonton Soup", 1600, 0),
    ("Pork Dumplings (8)", 1450, 0),
    ("Scallion Pancake", 900, 0),
    ("Mapo Tofu", 2200, 0),
    ("Kung Pao Chicken", 2600, 0),
    ("Steamed Rice", 300, 0),
    ("Jasmine Tea", 400, 500),
    ("Plum Juice", 650, 500),
    ("Tsingtao", 800, 1000),
];

const TABLES: usize = 12;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./bistro_dev.db");
    let mut store_id = String::from("store1");
    let mut store_code = String::from("S001");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" if i + 1 < args.len() => {
                db_path = args[i + 1].clone();
                i += 1;
            }
            "--store" | "-s" if i + 1 < args.len() => {
                store_id = args[i + 1].clone();
                i += 1;
            }
            "--code" if i + 1 < args.len() => {
                store_code = args[i + 1].clone();
                i += 1;
            }
            "--help" | "-h" => {
                println!("Usage: seed [--db PATH] [--store ID] [--code CODE]");
                return Ok(());
            }
            other => {
                eprintln!("Ignoring unknown argument: {}", other);
            }
        }
        i += 1;
    }

    println!("🌱 Seeding {} with store {} ({})", db_path, store_id, store_code);

    let db = Database::new(DbConfig::new(&db_path)).await?;
    let catalog = db.catalog();

    if catalog.store(&store_id).await?.is_some() {
        println!("Store {} already exists, nothing to do", store_id);
        return Ok(());
    }

    catalog
        .insert_store(&Store {
            id: store_id.clone(),
            merchant_id: "merchant-dev".to_string(),
            code: store_code.clone(),
            name: format!("Bistro {}", store_code),
        })
        .await?;

    for n in 1..=TABLES {
        catalog
            .insert_table(&DiningTable {
                id: format!("{}-T{}", store_id, n),
                store_id: store_id.clone(),
                name: format!("Table {}", n),
                seats: if n % 3 == 0 { 6 } else { 4 },
            })
            .await?;
    }

    for (name, price_cents, tax_rate_bps) in MENU {
        catalog
            .insert_product(&Product {
                id: Uuid::new_v4().to_string(),
                store_id: store_id.clone(),
                name: name.to_string(),
                price_cents: *price_cents,
                tax_rate_bps: *tax_rate_bps,
                is_active: true,
            })
            .await?;
    }

    println!("✅ {} tables, {} products", TABLES, MENU.len());
    db.close().await;
    Ok(())
}
