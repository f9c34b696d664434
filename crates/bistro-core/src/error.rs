//! # Error Types
//!
//! Domain-specific error types for bistro-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  bistro-core errors (this file)                                        │
//! │  ├── CoreError        - Order / payment / refund rule violations       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  bistro-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  bistro-settle errors                                                  │
//! │  └── SettleError      - What callers see                               │
//! │                                                                         │
//! │  Every layer answers kind() with one ErrorKind:                        │
//! │  InvalidInput • NotFound • Conflict • InvalidState • Unavailable       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Error Kind
// =============================================================================

/// The caller-facing classification shared by every error in the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request itself is wrong; retrying unchanged will fail again.
    InvalidInput,
    /// A referenced order, item, payment, refund, store or table is absent.
    NotFound,
    /// Another writer got there first, or a uniqueness rule was hit.
    Conflict,
    /// The entity exists but its current state forbids the operation.
    InvalidState,
    /// A dependency (gateway, database) could not be reached.
    Unavailable,
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These represent rule violations inside the order and refund aggregates.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Order line not present on the order.
    #[error("Item {item_id} not found on order {order_no}")]
    ItemNotFound { order_no: String, item_id: String },

    /// No payment attempt with this sequence number on the order.
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    /// The order's status forbids the requested operation.
    ///
    /// ## When This Occurs
    /// - Appending items to a COMPLETED order
    /// - Cancelling an already CANCELLED order
    #[error("Order {order_no} is {status}, cannot {action}")]
    InvalidOrderStatus {
        order_no: String,
        status: String,
        action: String,
    },

    /// A scan payment is in flight; the amount being collected must not move.
    #[error("Order {order_no} has scan payment {seq_no} in progress")]
    PaymentInProgress { order_no: String, seq_no: String },

    /// Another payment attempt is already open on the order.
    #[error("Order {order_no} already has open payment attempt {seq_no}")]
    ConcurrentPayment { order_no: String, seq_no: String },

    /// Cancelling an order that still holds settled money.
    #[error("Order {order_no} has settled payments; refund them before cancelling")]
    SettledPaymentsExist { order_no: String },

    /// Paying an order that is already fully paid.
    #[error("Order {0} is already paid")]
    AlreadyPaid(String),

    /// Cash tendered does not cover the amount due.
    #[error("Insufficient payment: due {due}, received {received}")]
    InsufficientPayment { due: Money, received: Money },

    /// Scan amount must be positive and no larger than the amount due.
    #[error("Invalid payment amount {amount}: must be between 0.01 and {due}")]
    InvalidPaymentAmount { amount: Money, due: Money },

    /// A payment attempt already reached the opposite terminal state.
    #[error("Payment {seq_no} is already {current}, cannot apply {requested}")]
    PaymentOutcomeConflict {
        seq_no: String,
        current: String,
        requested: String,
    },

    /// Gateway reported a different amount than the attempt was opened for.
    #[error("Payment {seq_no} amount mismatch: expected {expected}, reported {reported}")]
    AmountMismatch {
        seq_no: String,
        expected: Money,
        reported: Money,
    },

    /// Discount exceeds what the order can absorb.
    #[error("Discount would make the order total negative ({total})")]
    DiscountTooLarge { total: Money },

    /// Mutation would leave less to collect than has already been collected.
    #[error("Order total {total} would fall below the amount already paid {paid}")]
    TotalBelowPaid { total: Money, paid: Money },

    /// Removing more units than the line holds.
    #[error("Cannot remove {requested} of item {item_id}: only {present} present")]
    RemoveExceedsQuantity {
        item_id: String,
        requested: i64,
        present: i64,
    },

    /// Refund recording would exceed the amount actually paid.
    #[error("Refund {refund_no} of {amount} exceeds refundable {refundable}")]
    RefundExceedsPaid {
        refund_no: String,
        amount: Money,
        refundable: Money,
    },

    /// Refund order state machine rejected the move.
    #[error("Refund order {refund_no} cannot move from {from} to {to}")]
    IllegalRefundTransition {
        refund_no: String,
        from: String,
        to: String,
    },

    /// Refund order is in a state that forbids the operation.
    #[error("Refund order {refund_no} is {status}, cannot {action}")]
    InvalidRefundStatus {
        refund_no: String,
        status: String,
        action: String,
    },

    /// The origin order holds no settled money that is still refundable.
    #[error("Order {order_no} is {status}, nothing to refund")]
    NothingToRefund { order_no: String, status: String },

    /// A refund product line failed its bounds check.
    #[error("Refund line {line}: {reason}")]
    InvalidRefundLine { line: usize, reason: String },

    /// Completing a refund without enough recorded refund payments.
    #[error("Refund {refund_no} payments {recorded} do not cover refund total {total}")]
    RefundUnderpaid {
        refund_no: String,
        recorded: Money,
        total: Money,
    },

    /// Auth-code belongs to a channel this system does not settle.
    #[error("Unsupported auth code: {0}")]
    UnsupportedAuthCode(String),

    /// Auth-code classification disagrees with the expected channel.
    #[error("Auth code is for {actual}, expected {expected}")]
    AuthCodeChannelMismatch { expected: String, actual: String },

    /// Order has exceeded maximum allowed lines.
    #[error("Order cannot have more than {max} lines")]
    TooManyLines { max: usize },

    /// Item quantity exceeds maximum allowed.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Maps the error onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::ItemNotFound { .. } | CoreError::PaymentNotFound(_) => ErrorKind::NotFound,
            CoreError::InvalidOrderStatus { .. }
            | CoreError::PaymentInProgress { .. }
            | CoreError::SettledPaymentsExist { .. }
            | CoreError::InvalidRefundStatus { .. }
            | CoreError::NothingToRefund { .. } => ErrorKind::InvalidState,
            CoreError::PaymentOutcomeConflict { .. }
            | CoreError::ConcurrentPayment { .. }
            | CoreError::IllegalRefundTransition { .. } => ErrorKind::Conflict,
            CoreError::AlreadyPaid(_)
            | CoreError::InsufficientPayment { .. }
            | CoreError::InvalidPaymentAmount { .. }
            | CoreError::AmountMismatch { .. }
            | CoreError::DiscountTooLarge { .. }
            | CoreError::TotalBelowPaid { .. }
            | CoreError::RemoveExceedsQuantity { .. }
            | CoreError::RefundExceedsPaid { .. }
            | CoreError::InvalidRefundLine { .. }
            | CoreError::RefundUnderpaid { .. }
            | CoreError::UnsupportedAuthCode(_)
            | CoreError::AuthCodeChannelMismatch { .. }
            | CoreError::TooManyLines { .. }
            | CoreError::QuantityTooLarge { .. }
            | CoreError::Validation(_) => ErrorKind::InvalidInput,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, invalid URL).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
