//! # Repository Module
//!
//! Database repository implementations for Bistro POS.
//!
//! ## Versioned Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Optimistic Concurrency on Aggregates                    │
//! │                                                                         │
//! │  service                         storage                               │
//! │  ───────                         ───────                               │
//! │  order = orders().get_by_no()    SELECT body, version   (version = 7)  │
//! │  order.settle_cash(...)          (pure, in memory)                     │
//! │  orders().update(&mut order)     UPDATE ... SET version = 8            │
//! │                                   WHERE id = ? AND version = 7         │
//! │                                                                         │
//! │  0 rows updated  → DbError::StaleVersion (someone else wrote first)    │
//! │  1 row updated   → order.version = 8                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`order::OrderRepository`] - Orders and their payment projection
//! - [`refund::RefundRepository`] - Refund orders, listing, refunded quantities
//! - [`sequence::SequenceRepository`] - Atomic per-scope counters
//! - [`catalog::CatalogRepository`] - Stores, dining tables, products

pub mod catalog;
pub mod order;
pub mod refund;
pub mod sequence;
