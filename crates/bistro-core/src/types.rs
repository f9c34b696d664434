//! # Domain Types
//!
//! Value types shared by the order aggregate, the refund aggregate and the
//! service layer.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   OrderItem     │   │  OrderPayment   │   │  OrderAmount    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  seq_no         │   │  subtotal       │       │
//! │  │  product_id     │   │  channel        │   │  discount/tax   │       │
//! │  │  unit_price     │   │  state          │   │  fee/total      │       │
//! │  │  selections     │   │  amount         │   │  paid/due       │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  OrderStatus    │   │ PaymentStatus   │   │    PayState     │       │
//! │  │  Placed         │   │ Unpaid  Paying  │   │  Pending        │       │
//! │  │  Completed      │   │ Paid  Refunded  │   │  Success        │       │
//! │  │  Cancelled      │   │                 │   │  Failed         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Orders and refunds carry a UUID `id` for relations and a human-readable
//! business number (`order_no`, `refund_no`) printed on receipts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// 1 basis point = 0.01%, so 825 bps = 8.25%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    /// Checks if tax rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// Lifecycle of an order. Only ever moves forward out of `Placed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Open on the floor: items may change, payments may be taken.
    Placed,
    /// Fully paid and closed.
    Completed,
    /// Voided before settlement (or after a full refund).
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Placed => "placed",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment Status
// =============================================================================

/// Money-side view of the order, always derived from payments and refunds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paying,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paying => "paying",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment Channel / Gateway Kind / Pay State
// =============================================================================

/// How the money was collected.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PayChannel {
    /// Cash at the register, settled synchronously.
    Cash,
    /// Customer-presented scan code, settled through a gateway.
    Scan,
}

/// Which upstream gateway settles a scan payment.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    /// Ordinary third-party wallet / card scan code.
    Generic,
    /// Membership loyalty-points code.
    LoyaltyPoints,
}

impl GatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Generic => "generic",
            GatewayKind::LoyaltyPoints => "loyalty_points",
        }
    }
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one payment attempt.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PayState {
    Pending,
    Success,
    Failed,
}

impl PayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayState::Pending => "pending",
            PayState::Success => "success",
            PayState::Failed => "failed",
        }
    }
}

impl fmt::Display for PayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A definitive result reported for a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PayOutcome {
    Success,
    Failed,
}

impl PayOutcome {
    pub fn as_state(&self) -> PayState {
        match self {
            PayOutcome::Success => PayState::Success,
            PayOutcome::Failed => PayState::Failed,
        }
    }
}

/// Where an outcome came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSource {
    /// Client polling queried the gateway.
    Polling,
    /// Gateway webhook.
    Callback,
    /// The gateway answered the dispatch request itself.
    Dispatch,
    /// Background sweep of stale pending attempts.
    Sweep,
}

impl fmt::Display for OutcomeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeSource::Polling => "polling",
            OutcomeSource::Callback => "callback",
            OutcomeSource::Dispatch => "dispatch",
            OutcomeSource::Sweep => "sweep",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Order Items
// =============================================================================

/// Kind of modifier chosen on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    /// e.g. "spicy", "no ice"
    Attribute,
    /// e.g. "large"
    Spec,
    /// e.g. "extra egg"
    Recipe,
}

/// A modifier on an order line, with its price delta.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ItemSelection {
    pub kind: SelectionKind,
    pub id: String,
    pub name: String,
    pub price_delta: Money,
}

/// A line on an order.
/// Uses snapshot pattern to freeze product data at time of ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderItem {
    pub id: String,
    pub product_id: String,
    /// Product name at time of ordering (frozen).
    pub name: String,
    pub quantity: i64,
    /// Unit price before selection deltas.
    pub unit_price: Money,
    /// Catalog price, kept once the unit price has been overridden.
    pub original_price: Option<Money>,
    /// Line-level discount.
    pub discount: Money,
    pub tax_rate: TaxRate,
    pub remark: Option<String>,
    pub selections: Vec<ItemSelection>,
}

impl OrderItem {
    /// Unit price including selection deltas.
    pub fn unit_total(&self) -> Money {
        self.unit_price + self.selections.iter().map(|s| s.price_delta).sum::<Money>()
    }

    /// (unit price + Σ selection deltas) × quantity.
    pub fn line_subtotal(&self) -> Money {
        self.unit_total().multiply_quantity(self.quantity)
    }

    /// Line subtotal after the line discount.
    pub fn net(&self) -> Money {
        self.line_subtotal() - self.discount
    }

    /// Tax on the discounted line.
    pub fn tax(&self) -> Money {
        self.net().calculate_tax(self.tax_rate)
    }

    /// Whether `draft` should be folded into this line instead of appended.
    pub fn same_line(&self, draft: &ItemDraft) -> bool {
        self.product_id == draft.product_id
            && self.unit_price == draft.unit_price
            && self.original_price.is_none()
            && self.discount.is_zero()
            && draft.discount.is_zero()
            && self.tax_rate == draft.tax_rate
            && self.remark == draft.remark
            && self.selections == draft.selections
    }
}

/// An item ready to go onto an order, with catalog data resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ItemDraft {
    pub product_id: String,
    pub name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub tax_rate: TaxRate,
    #[serde(default)]
    pub discount: Money,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub selections: Vec<ItemSelection>,
}

impl ItemDraft {
    /// Materializes the draft as a new line with a fresh id.
    pub fn into_item(self) -> OrderItem {
        OrderItem {
            id: uuid::Uuid::new_v4().to_string(),
            product_id: self.product_id,
            name: self.name,
            quantity: self.quantity,
            unit_price: self.unit_price,
            original_price: None,
            discount: self.discount,
            tax_rate: self.tax_rate,
            remark: self.remark,
            selections: self.selections,
        }
    }
}

// =============================================================================
// Taxes, Fees, Discounts
// =============================================================================

/// An order-level tax applied to (subtotal − discount).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderTaxRate {
    pub name: String,
    pub rate: TaxRate,
    /// Computed on every recompute.
    #[serde(default)]
    pub amount: Money,
}

/// How an order fee is charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FeeKind {
    /// A flat charge.
    Fixed(Money),
    /// Basis points of the subtotal (service charge).
    Percentage(u32),
}

/// An order-level fee (service charge, packaging, delivery).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderFee {
    pub name: String,
    pub kind: FeeKind,
    /// Computed on every recompute.
    #[serde(default)]
    pub amount: Money,
}

/// Requested order-level discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DiscountSpec {
    /// Basis points of (subtotal − item discounts), at most 10000.
    Percentage(u32),
    /// A fixed amount off.
    Amount(Money),
}

/// The order-level discount currently applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderDiscount {
    pub spec: DiscountSpec,
    /// Computed on every recompute.
    pub amount: Money,
}

/// Amount summary, recomputed from items, taxes, fees, discount, payments
/// and refunds. Never patched incrementally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderAmount {
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub fee: Money,
    pub total: Money,
    pub paid: Money,
    pub due: Money,
    pub refunded: Money,
}

// =============================================================================
// Payments
// =============================================================================

/// One payment attempt against an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderPayment {
    /// Externally issued sequence number, unique across orders.
    pub seq_no: String,
    pub channel: PayChannel,
    /// Set for scan payments.
    pub gateway: Option<GatewayKind>,
    /// Gateway transaction id once known.
    pub external_ref: Option<String>,
    pub amount: Money,
    /// Cash handed over by the customer.
    pub tendered: Option<Money>,
    /// Cash returned to the customer.
    pub change: Option<Money>,
    pub state: PayState,
    pub failure_reason: Option<String>,
    /// Raw gateway payload of the outcome, kept for audit.
    pub raw_payload: Option<String>,
    pub operator_id: String,
    pub client_ip: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub settled_at: Option<DateTime<Utc>>,
}

impl OrderPayment {
    /// (order no, channel, external reference), present once the gateway
    /// has named the transaction.
    pub fn idempotency_key(&self, order_no: &str) -> Option<(String, PayChannel, String)> {
        self.external_ref
            .as_ref()
            .map(|r| (order_no.to_string(), self.channel, r.clone()))
    }

    pub fn is_pending_scan(&self) -> bool {
        self.channel == PayChannel::Scan && self.state == PayState::Pending
    }
}

/// A completed refund recorded against the order it reverses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RefundSettlement {
    pub refund_no: String,
    pub amount: Money,
    #[ts(as = "String")]
    pub recorded_at: DateTime<Utc>,
}

/// Read model returned to clients polling a scan payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PollResult {
    pub seq_no: String,
    pub order_no: String,
    pub state: PayState,
    pub amount: Money,
    pub failure_reason: Option<String>,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
}

// =============================================================================
// Operation Log
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Created,
    ItemsAppended,
    PriceModified,
    ItemsRemoved,
    TableTurned,
    Discounted,
    Cancelled,
    CashPaid,
    ScanOpened,
    ScanDiscarded,
    PaymentSucceeded,
    PaymentFailed,
    Completed,
    RefundRecorded,
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OperationLog {
    pub seq: u32,
    pub kind: OperationKind,
    pub operator_id: String,
    pub operator_name: String,
    pub detail: String,
    #[ts(as = "String")]
    pub at: DateTime<Utc>,
}

// =============================================================================
// Operator Context
// =============================================================================

/// Who is acting, and for which merchant/store. Supplied by the trusted
/// authentication layer in front of the services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OperatorContext {
    pub operator_id: String,
    pub operator_name: String,
    pub merchant_id: String,
    pub store_id: String,
    pub terminal_id: String,
}

impl OperatorContext {
    /// Identity used by background work (sweeps, webhooks).
    pub fn system(merchant_id: &str, store_id: &str) -> Self {
        OperatorContext {
            operator_id: "system".to_string(),
            operator_name: "system".to_string(),
            merchant_id: merchant_id.to_string(),
            store_id: store_id.to_string(),
            terminal_id: "system".to_string(),
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// A store (restaurant) belonging to a merchant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Store {
    pub id: String,
    pub merchant_id: String,
    /// Short code prefixed onto order, payment and refund numbers.
    pub code: String,
    pub name: String,
}

/// A table on the floor of a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DiningTable {
    pub id: String,
    pub store_id: String,
    pub name: String,
    pub seats: i64,
}

/// A sellable menu product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    pub id: String,
    pub store_id: String,
    pub name: String,
    pub price_cents: i64,
    pub tax_rate_bps: u32,
    pub is_active: bool,
}

impl Product {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    #[inline]
    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.tax_rate_bps)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> ItemDraft {
        ItemDraft {
            product_id: "p-noodles".to_string(),
            name: "Beef Noodles".to_string(),
            quantity: 2,
            unit_price: Money::from_cents(2450),
            tax_rate: TaxRate::from_bps(1000),
            discount: Money::zero(),
            remark: None,
            selections: vec![ItemSelection {
                kind: SelectionKind::Spec,
                id: "large".to_string(),
                name: "Large".to_string(),
                price_delta: Money::from_cents(300),
            }],
        }
    }

    #[test]
    fn test_tax_rate_from_bps() {
        let rate = TaxRate::from_bps(825);
        assert_eq!(rate.bps(), 825);
        assert!((rate.percentage() - 8.25).abs() < 0.001);
    }

    #[test]
    fn test_line_math_includes_selections() {
        let item = draft().into_item();
        assert_eq!(item.unit_total().cents(), 2750);
        assert_eq!(item.line_subtotal().cents(), 5500);
        assert_eq!(item.tax().cents(), 550);
    }

    #[test]
    fn test_same_line() {
        let item = draft().into_item();
        assert!(item.same_line(&draft()));

        let mut other = draft();
        other.remark = Some("no onion".to_string());
        assert!(!item.same_line(&other));

        let mut other = draft();
        other.selections.clear();
        assert!(!item.same_line(&other));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&PaymentStatus::Refunded).unwrap();
        assert_eq!(json, "\"refunded\"");
        let kind: GatewayKind = serde_json::from_str("\"loyalty_points\"").unwrap();
        assert_eq!(kind, GatewayKind::LoyaltyPoints);
    }
}
