//! # bistro-settle: Order, Payment and Refund Services for Bistro POS
//!
//! Async services over the `bistro-core` aggregates and the `bistro-db`
//! repositories: order mutation, cash and scan settlement, outcome
//! reconciliation, refund orders and the background callback worker.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Settlement Architecture                         │
//! │                                                                         │
//! │  ┌────────────────┐  ┌───────────────────┐  ┌────────────────────────┐  │
//! │  │ OrderService   │  │ SettlementService │  │ RefundService          │  │
//! │  │                │  │                   │  │                        │  │
//! │  │ create, items, │  │ cash, scan,       │  │ create, update,        │  │
//! │  │ discount, turn │  │ polling           │  │ cancel, get, list      │  │
//! │  │ table, cancel  │  │                   │  │                        │  │
//! │  └───────┬────────┘  └─────────┬─────────┘  └───────────┬────────────┘  │
//! │          │                     │                        │ completion    │
//! │          │                     ▼                        ▼               │
//! │          │           ┌──────────────────────────────────────────┐      │
//! │          │           │        ReconcileCoordinator              │      │
//! │          │           │  outcomes from dispatch, polling,        │      │
//! │          │           │  callback, sweep; refund settlements     │      │
//! │          │           └──────┬──────────────────────┬────────────┘      │
//! │          │                  │                      │                    │
//! │          ▼                  ▼                      ▼                    │
//! │  ┌─────────────────────────────────────┐  ┌──────────────────────┐     │
//! │  │  bistro-db (versioned order writes) │  │  GatewayRouter       │     │
//! │  └─────────────────────────────────────┘  │  Http / Memory       │     │
//! │                                           └──────────────────────┘     │
//! │                                                                         │
//! │  CallbackWorker: webhook queue + pending sweep ──► Coordinator         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`engine`] - Wires every service to one database and router
//! - [`orders`] - Order mutation service
//! - [`settlement`] - Cash and scan payment settlement
//! - [`reconcile`] - Single entry point for payment outcomes
//! - [`refunds`] - Refund order service
//! - [`worker`] - Webhook queue and stale-attempt sweep
//! - [`gateway`] - Upstream payment gateways
//! - [`catalog`] / [`sequence`] - Lookup and numbering seams
//! - [`config`] - TOML configuration with env overrides
//! - [`telemetry`] - Tracing setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bistro_settle::{Engine, SettleConfig};
//!
//! let engine = Engine::open(SettleConfig::load(None)?).await?;
//! let (worker, handle) = engine.callback_worker();
//! tokio::spawn(worker.run());
//!
//! let order = engine.orders.create_order(request, &operator).await?;
//! engine.settlement.cash_paid(&order.order_no, tendered, &operator).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod orders;
pub mod reconcile;
pub mod refunds;
pub mod sequence;
pub mod settlement;
pub mod telemetry;
pub mod worker;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use catalog::Catalog;
pub use config::{GatewayMode, SettleConfig};
pub use engine::Engine;
pub use error::{SettleError, SettleResult};
pub use gateway::{
    GatewayError, GatewayRouter, HttpGateway, MemoryGateway, PaymentGateway, StatusBody,
};
pub use orders::{CreateOrderRequest, LineRequest, OrderService};
pub use reconcile::ReconcileCoordinator;
pub use refunds::{CreateRefundRequest, RefundService};
pub use sequence::SequenceGenerator;
pub use settlement::{ScanPayRequest, SettlementService};
pub use worker::{CallbackWorker, CallbackWorkerHandle, PaymentCallback};
