//! # bistro-core: Pure Business Logic for Bistro POS
//!
//! Everything that decides *what* an order or a refund looks like lives in
//! this crate. Storage, gateways and background work are layered on top.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Bistro POS Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                bistro-settle (services, worker)                 │   │
//! │  │   OrderService ─ SettlementService ─ Coordinator ─ Refunds      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ bistro-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   order   │  │   money   │  │  refund   │  │ auth_code │  │   │
//! │  │   │  Order    │  │   Money   │  │RefundOrder│  │ classify  │  │   │
//! │  │   │ amounts   │  │  TaxRate  │  │  states   │  │ gateways  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    bistro-db (Database Layer)                   │   │
//! │  │        SQLite, versioned order writes, sequences, catalog       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (items, payments, statuses, catalog rows)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`order`] - The Order aggregate and every transition it allows
//! - [`refund`] - Refund orders and their state machine
//! - [`auth_code`] - Scan auth-code classification
//! - [`numbering`] - Business date and document number formatting
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation rules
//!
//! ## Example Usage
//!
//! ```rust
//! use bistro_core::money::Money;
//! use bistro_core::types::TaxRate;
//!
//! let price = Money::from_cents(2450); // 24.50
//! let line = price.multiply_quantity(2);
//! assert_eq!(line.cents(), 4900);
//!
//! let tax = line.calculate_tax(TaxRate::from_bps(825));
//! assert_eq!(tax.cents(), 404);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth_code;
pub mod error;
pub mod money;
pub mod numbering;
pub mod order;
pub mod refund;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorKind, ValidationError};
pub use money::Money;
pub use order::{NewOrder, OutcomeApplied, Order};
pub use refund::{RefundDraft, RefundOrder, RefundPatch};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum quantity of a single order line.
///
/// Guards against typing 1000 instead of 10 at the register.
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Maximum unit price, fixed fee or fixed discount, in cents (1,000,000.00).
///
/// With [`MAX_ITEM_QUANTITY`] and [`MAX_ORDER_LINES`] this keeps every
/// order amount far inside `i64`.
pub const MAX_PRICE_CENTS: i64 = 100_000_000;

/// Maximum distinct lines on one order.
pub const MAX_ORDER_LINES: usize = 200;

/// Maximum length of an item remark, in characters.
pub const MAX_REMARK_CHARS: usize = 200;

/// Maximum number of guests recorded on one order.
pub const MAX_PEOPLE: i64 = 999;

/// Basis points in 100%.
pub const FULL_BPS: u32 = 10_000;
