//! # Order Aggregate
//!
//! The single owner of an order's items, taxes, fees, discount, payments and
//! amounts. Every transition an order can make is a method here; services
//! load an `Order`, call one method, and persist it with a version check.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   open() ──► PLACED ──── paid ≥ total ────► COMPLETED                   │
//! │               │  ▲                                                      │
//! │               │  └── append / reprice / remove / turn table / discount  │
//! │               │                                                         │
//! │               └──── cancel() ─────────────► CANCELLED                   │
//! │                                                                         │
//! │   PaymentStatus is derived, never set:                                  │
//! │     REFUNDED  paid > 0 and refunded ≥ paid                              │
//! │     PAID      a SUCCESS payment exists and paid ≥ total                 │
//! │     PAYING    a PENDING attempt exists or paid > 0                      │
//! │     UNPAID    otherwise                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules every mutation obeys
//! - Only PLACED orders change items, discount or table.
//! - Nothing that moves the total happens while a scan attempt is PENDING.
//! - `total` never drops below `paid`, and never below zero.
//! - Amounts are recomputed from scratch after every change.
//! - A failed mutation leaves the order exactly as it was.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{
    DiscountSpec, FeeKind, GatewayKind, ItemDraft, OperationKind, OperationLog, OperatorContext,
    OrderAmount, OrderDiscount, OrderFee, OrderItem, OrderPayment, OrderStatus, OrderTaxRate,
    OutcomeSource, PayChannel, PayOutcome, PayState, PaymentStatus, PollResult, RefundSettlement,
};
use crate::validation::{
    validate_amount_cents, validate_bps, validate_item_draft, validate_people, validate_price_cents,
    validate_required,
};
use crate::{MAX_ITEM_QUANTITY, MAX_ORDER_LINES, MAX_REMARK_CHARS};

// =============================================================================
// Inputs and Results
// =============================================================================

/// Everything needed to open an order, with catalog data already resolved.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_no: String,
    pub merchant_id: String,
    pub store_id: String,
    pub business_date: NaiveDate,
    pub shift_id: Option<String>,
    pub table_id: Option<String>,
    pub people: i64,
    pub items: Vec<ItemDraft>,
    pub tax_rates: Vec<OrderTaxRate>,
    pub fees: Vec<OrderFee>,
}

/// A scan payment attempt about to be sent to a gateway.
#[derive(Debug, Clone)]
pub struct ScanAttempt {
    pub seq_no: String,
    pub gateway: GatewayKind,
    pub amount: Money,
    pub client_ip: Option<String>,
}

/// A definitive gateway result for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub seq_no: String,
    pub outcome: PayOutcome,
    pub amount: Money,
    pub external_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub raw_payload: Option<String>,
    pub source: OutcomeSource,
}

/// What applying an outcome did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeApplied {
    /// Attempt moved to SUCCESS; `completed` if that paid the order off.
    Settled { completed: bool },
    /// Attempt moved to FAILED.
    Failed,
    /// The attempt already carried this outcome; nothing changed.
    Duplicate,
}

// =============================================================================
// Order
// =============================================================================

/// A restaurant order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    pub id: String,
    pub order_no: String,
    pub merchant_id: String,
    pub store_id: String,
    #[ts(as = "String")]
    pub business_date: NaiveDate,
    pub shift_id: Option<String>,
    pub table_id: Option<String>,
    pub creator_id: String,
    pub terminal_id: String,
    pub people: i64,
    pub items: Vec<OrderItem>,
    pub tax_rates: Vec<OrderTaxRate>,
    pub fees: Vec<OrderFee>,
    pub discount: Option<OrderDiscount>,
    pub payments: Vec<OrderPayment>,
    pub refunds: Vec<RefundSettlement>,
    pub amount: OrderAmount,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub logs: Vec<OperationLog>,
    pub cancel_reason: Option<String>,
    /// Optimistic concurrency stamp; bumped by every persisted write.
    pub version: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    // -------------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------------

    /// Opens a new PLACED, UNPAID order.
    ///
    /// ## Errors
    /// `Validation` if there are no items, a draft is invalid, `people < 1`,
    /// or a tax/fee is out of range.
    pub fn open(new: NewOrder, op: &OperatorContext) -> CoreResult<Order> {
        validate_required("order_no", &new.order_no)?;
        if new.items.is_empty() {
            return Err(ValidationError::Required {
                field: "items".to_string(),
            }
            .into());
        }
        validate_people(new.people)?;
        for draft in &new.items {
            validate_item_draft(draft)?;
        }
        for rate in &new.tax_rates {
            validate_bps("order tax rate", rate.rate.bps())?;
        }
        for fee in &new.fees {
            match fee.kind {
                FeeKind::Fixed(amount) => validate_amount_cents("fee", amount.cents())?,
                FeeKind::Percentage(bps) => validate_bps("fee", bps)?,
            }
        }

        let now = Utc::now();
        let mut order = Order {
            id: uuid::Uuid::new_v4().to_string(),
            order_no: new.order_no,
            merchant_id: new.merchant_id,
            store_id: new.store_id,
            business_date: new.business_date,
            shift_id: new.shift_id,
            table_id: new.table_id,
            creator_id: op.operator_id.clone(),
            terminal_id: op.terminal_id.clone(),
            people: new.people,
            items: Vec::new(),
            tax_rates: new.tax_rates,
            fees: new.fees,
            discount: None,
            payments: Vec::new(),
            refunds: Vec::new(),
            amount: OrderAmount::default(),
            status: OrderStatus::Placed,
            payment_status: PaymentStatus::Unpaid,
            logs: Vec::new(),
            cancel_reason: None,
            version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
        };

        order.merge_drafts(new.items)?;
        order.recompute();
        order.check_amounts()?;
        let detail = format!("{} lines, total {}", order.items.len(), order.amount.total);
        order.log(op, OperationKind::Created, detail);
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn item(&self, item_id: &str) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn payment(&self, seq_no: &str) -> Option<&OrderPayment> {
        self.payments.iter().find(|p| p.seq_no == seq_no)
    }

    /// The open scan attempt, if any. There is never more than one.
    pub fn pending_scan(&self) -> Option<&OrderPayment> {
        self.payments.iter().find(|p| p.is_pending_scan())
    }

    pub fn has_success_payment(&self) -> bool {
        self.payments.iter().any(|p| p.state == PayState::Success)
    }

    /// Whether this order holds `table_id` on the floor.
    pub fn occupies_table(&self) -> bool {
        self.status == OrderStatus::Placed && self.table_id.is_some()
    }

    /// Client-facing view of one attempt.
    pub fn poll_result(&self, seq_no: &str) -> Option<PollResult> {
        self.payment(seq_no).map(|p| PollResult {
            seq_no: p.seq_no.clone(),
            order_no: self.order_no.clone(),
            state: p.state,
            amount: p.amount,
            failure_reason: p.failure_reason.clone(),
            order_status: self.status,
            payment_status: self.payment_status,
        })
    }

    // -------------------------------------------------------------------------
    // Item Mutations
    // -------------------------------------------------------------------------

    /// Adds items, folding identical lines into existing ones.
    pub fn append_items(&mut self, drafts: Vec<ItemDraft>, op: &OperatorContext) -> CoreResult<()> {
        if drafts.is_empty() {
            return Err(ValidationError::Required {
                field: "items".to_string(),
            }
            .into());
        }
        for draft in &drafts {
            validate_item_draft(draft)?;
        }

        self.mutate("append items", |order| {
            let added: i64 = drafts.iter().map(|d| d.quantity).sum();
            order.merge_drafts(drafts)?;
            order.log(op, OperationKind::ItemsAppended, format!("{} units", added));
            Ok(())
        })
    }

    /// Overrides a line's unit price, remembering the catalog price.
    pub fn modify_item_price(
        &mut self,
        item_id: &str,
        new_price: Money,
        op: &OperatorContext,
    ) -> CoreResult<()> {
        validate_price_cents(new_price.cents())?;

        self.mutate("modify item price", |order| {
            let order_no = order.order_no.clone();
            let item = order
                .items
                .iter_mut()
                .find(|i| i.id == item_id)
                .ok_or_else(|| CoreError::ItemNotFound {
                    order_no,
                    item_id: item_id.to_string(),
                })?;

            let old = item.unit_price;
            if item.original_price.is_none() {
                item.original_price = Some(old);
            }
            item.unit_price = new_price;
            validate_amount_cents("unit price", item.unit_total().cents())?;
            if item.discount > item.line_subtotal() {
                return Err(CoreError::DiscountTooLarge { total: item.net() });
            }

            let detail = format!("{}: {} -> {}", item.name, old, new_price);
            order.log(op, OperationKind::PriceModified, detail);
            Ok(())
        })
    }

    /// Takes `quantity` units off a line, dropping the line when it empties.
    pub fn remove_items(
        &mut self,
        item_id: &str,
        quantity: i64,
        op: &OperatorContext,
    ) -> CoreResult<()> {
        if quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            }
            .into());
        }

        self.mutate("remove items", |order| {
            let idx = order
                .items
                .iter()
                .position(|i| i.id == item_id)
                .ok_or_else(|| CoreError::ItemNotFound {
                    order_no: order.order_no.clone(),
                    item_id: item_id.to_string(),
                })?;

            let present = order.items[idx].quantity;
            if quantity > present {
                return Err(CoreError::RemoveExceedsQuantity {
                    item_id: item_id.to_string(),
                    requested: quantity,
                    present,
                });
            }

            let name = order.items[idx].name.clone();
            if quantity == present {
                order.items.remove(idx);
            } else {
                let item = &mut order.items[idx];
                let left = present - quantity;
                item.discount = item.discount.prorate(left, present);
                item.quantity = left;
            }

            order.log(op, OperationKind::ItemsRemoved, format!("{} x{}", name, quantity));
            Ok(())
        })
    }

    // -------------------------------------------------------------------------
    // Order-Level Mutations
    // -------------------------------------------------------------------------

    /// Moves the order to another table. Occupancy is the caller's
    /// (storage's) concern.
    pub fn turn_table(&mut self, table_id: &str, op: &OperatorContext) -> CoreResult<()> {
        validate_required("table_id", table_id)?;
        if self.table_id.as_deref() == Some(table_id) {
            return Ok(());
        }

        self.mutate("turn table", |order| {
            let from = order.table_id.clone().unwrap_or_else(|| "-".to_string());
            order.table_id = Some(table_id.to_string());
            order.log(op, OperationKind::TableTurned, format!("{} -> {}", from, table_id));
            Ok(())
        })
    }

    /// Sets (or clears, with a zero spec) the order-level discount.
    pub fn apply_discount(&mut self, spec: DiscountSpec, op: &OperatorContext) -> CoreResult<()> {
        let clears = match spec {
            DiscountSpec::Percentage(bps) => {
                validate_bps("discount", bps)?;
                bps == 0
            }
            DiscountSpec::Amount(amount) => {
                validate_amount_cents("discount", amount.cents())?;
                amount.is_zero()
            }
        };

        self.mutate("discount order", |order| {
            order.discount = if clears {
                None
            } else {
                Some(OrderDiscount {
                    spec,
                    amount: Money::zero(),
                })
            };
            order.log(op, OperationKind::Discounted, format!("{:?}", spec));
            Ok(())
        })
    }

    /// Voids the order and releases its table.
    ///
    /// ## Errors
    /// - `InvalidOrderStatus` unless PLACED
    /// - `PaymentInProgress` while a scan attempt is open
    /// - `SettledPaymentsExist` if money was taken and not fully refunded
    pub fn cancel(&mut self, reason: Option<String>, op: &OperatorContext) -> CoreResult<()> {
        if let Some(reason) = reason.as_deref() {
            if reason.chars().count() > MAX_REMARK_CHARS {
                return Err(ValidationError::TooLong {
                    field: "reason".to_string(),
                    max: MAX_REMARK_CHARS,
                }
                .into());
            }
        }
        self.ensure_placed("cancel")?;
        self.ensure_no_pending_scan()?;
        if self.has_success_payment() && self.payment_status != PaymentStatus::Refunded {
            return Err(CoreError::SettledPaymentsExist {
                order_no: self.order_no.clone(),
            });
        }

        let now = Utc::now();
        self.status = OrderStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.updated_at = now;
        let detail = reason.clone().unwrap_or_default();
        self.cancel_reason = reason;
        self.log(op, OperationKind::Cancelled, detail);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    /// Settles the amount due in cash. Records the due amount as paid and
    /// the difference as change.
    pub fn settle_cash(
        &mut self,
        seq_no: &str,
        tendered: Money,
        op: &OperatorContext,
    ) -> CoreResult<()> {
        validate_required("seq_no", seq_no)?;
        if self.payment_status == PaymentStatus::Paid {
            return Err(CoreError::AlreadyPaid(self.order_no.clone()));
        }
        self.ensure_placed("take cash payment")?;
        if let Some(pending) = self.pending_scan() {
            return Err(CoreError::ConcurrentPayment {
                order_no: self.order_no.clone(),
                seq_no: pending.seq_no.clone(),
            });
        }

        let due = self.amount.due;
        if tendered.is_negative() || tendered < due {
            return Err(CoreError::InsufficientPayment {
                due,
                received: tendered,
            });
        }

        let now = Utc::now();
        self.payments.push(OrderPayment {
            seq_no: seq_no.to_string(),
            channel: PayChannel::Cash,
            gateway: None,
            external_ref: None,
            amount: due,
            tendered: Some(tendered),
            change: Some(tendered - due),
            state: PayState::Success,
            failure_reason: None,
            raw_payload: None,
            operator_id: op.operator_id.clone(),
            client_ip: None,
            created_at: now,
            updated_at: now,
            settled_at: Some(now),
        });
        self.updated_at = now;
        self.recompute();
        let detail = format!("{} tendered {}, change {}", seq_no, tendered, tendered - due);
        self.log(op, OperationKind::CashPaid, detail);
        self.complete_if_paid(op);
        Ok(())
    }

    /// Opens the single PENDING scan attempt for `attempt.amount`.
    pub fn open_scan_payment(
        &mut self,
        attempt: ScanAttempt,
        op: &OperatorContext,
    ) -> CoreResult<()> {
        validate_required("seq_no", &attempt.seq_no)?;
        if self.payment_status == PaymentStatus::Paid {
            return Err(CoreError::AlreadyPaid(self.order_no.clone()));
        }
        self.ensure_placed("take scan payment")?;
        if let Some(pending) = self.pending_scan() {
            return Err(CoreError::ConcurrentPayment {
                order_no: self.order_no.clone(),
                seq_no: pending.seq_no.clone(),
            });
        }

        let due = self.amount.due;
        if !attempt.amount.is_positive() || attempt.amount > due {
            return Err(CoreError::InvalidPaymentAmount {
                amount: attempt.amount,
                due,
            });
        }

        let now = Utc::now();
        let detail = format!("{} via {} for {}", attempt.seq_no, attempt.gateway, attempt.amount);
        self.payments.push(OrderPayment {
            seq_no: attempt.seq_no,
            channel: PayChannel::Scan,
            gateway: Some(attempt.gateway),
            external_ref: None,
            amount: attempt.amount,
            tendered: None,
            change: None,
            state: PayState::Pending,
            failure_reason: None,
            raw_payload: None,
            operator_id: op.operator_id.clone(),
            client_ip: attempt.client_ip,
            created_at: now,
            updated_at: now,
            settled_at: None,
        });
        self.updated_at = now;
        self.recompute();
        self.log(op, OperationKind::ScanOpened, detail);
        Ok(())
    }

    /// Records the gateway transaction id on a pending attempt.
    pub fn attach_external_ref(&mut self, seq_no: &str, external_ref: &str) -> CoreResult<()> {
        let payment = self
            .payments
            .iter_mut()
            .find(|p| p.seq_no == seq_no)
            .ok_or_else(|| CoreError::PaymentNotFound(seq_no.to_string()))?;
        if payment.external_ref.is_none() {
            payment.external_ref = Some(external_ref.to_string());
            payment.updated_at = Utc::now();
        }
        Ok(())
    }

    /// Drops a PENDING attempt that never reached the gateway.
    pub fn discard_pending_payment(&mut self, seq_no: &str, op: &OperatorContext) -> CoreResult<()> {
        let idx = self
            .payments
            .iter()
            .position(|p| p.seq_no == seq_no && p.state == PayState::Pending)
            .ok_or_else(|| CoreError::PaymentNotFound(seq_no.to_string()))?;
        self.payments.remove(idx);
        self.updated_at = Utc::now();
        self.recompute();
        self.log(op, OperationKind::ScanDiscarded, seq_no.to_string());
        Ok(())
    }

    /// Applies a definitive outcome to one attempt.
    ///
    /// ## Outcome Table
    /// ```text
    ///   current    reported   result
    ///   ───────    ────────   ─────────────────────────────
    ///   PENDING    SUCCESS    Settled (maybe COMPLETED)
    ///   PENDING    FAILED     Failed, order stays PLACED
    ///   SUCCESS    SUCCESS    Duplicate
    ///   FAILED     FAILED     Duplicate
    ///   SUCCESS    FAILED     Conflict, unchanged
    ///   FAILED     SUCCESS    Conflict, unchanged
    /// ```
    pub fn apply_payment_outcome(
        &mut self,
        report: &OutcomeReport,
        op: &OperatorContext,
    ) -> CoreResult<OutcomeApplied> {
        let idx = self
            .payments
            .iter()
            .position(|p| p.seq_no == report.seq_no)
            .ok_or_else(|| CoreError::PaymentNotFound(report.seq_no.clone()))?;

        let current = self.payments[idx].state;
        match (current, report.outcome) {
            (PayState::Success, PayOutcome::Success) | (PayState::Failed, PayOutcome::Failed) => {
                return Ok(OutcomeApplied::Duplicate);
            }
            (PayState::Success, PayOutcome::Failed) | (PayState::Failed, PayOutcome::Success) => {
                return Err(CoreError::PaymentOutcomeConflict {
                    seq_no: report.seq_no.clone(),
                    current: current.to_string(),
                    requested: report.outcome.as_state().to_string(),
                });
            }
            (PayState::Pending, _) => {}
        }

        let expected = self.payments[idx].amount;
        if report.outcome == PayOutcome::Success && report.amount != expected {
            return Err(CoreError::AmountMismatch {
                seq_no: report.seq_no.clone(),
                expected,
                reported: report.amount,
            });
        }

        let now = Utc::now();
        let payment = &mut self.payments[idx];
        payment.state = report.outcome.as_state();
        payment.updated_at = now;
        payment.raw_payload = report.raw_payload.clone();
        if payment.external_ref.is_none() {
            payment.external_ref = report.external_ref.clone();
        }

        match report.outcome {
            PayOutcome::Success => {
                payment.settled_at = Some(now);
                self.updated_at = now;
                self.recompute();
                self.check_amounts()?;
                let detail = format!("{} {} via {}", report.seq_no, expected, report.source);
                self.log(op, OperationKind::PaymentSucceeded, detail);
                let completed = self.complete_if_paid(op);
                Ok(OutcomeApplied::Settled { completed })
            }
            PayOutcome::Failed => {
                payment.failure_reason = report.failure_reason.clone();
                self.updated_at = now;
                self.recompute();
                let detail = format!(
                    "{} via {}: {}",
                    report.seq_no,
                    report.source,
                    report.failure_reason.as_deref().unwrap_or("declined")
                );
                self.log(op, OperationKind::PaymentFailed, detail);
                Ok(OutcomeApplied::Failed)
            }
        }
    }

    /// Records a completed refund. Returns `false` if this refund number was
    /// already recorded.
    pub fn record_refund(
        &mut self,
        refund_no: &str,
        amount: Money,
        op: &OperatorContext,
    ) -> CoreResult<bool> {
        validate_required("refund_no", refund_no)?;
        if self.refunds.iter().any(|r| r.refund_no == refund_no) {
            return Ok(false);
        }
        if !amount.is_positive() {
            return Err(ValidationError::MustBePositive {
                field: "refund amount".to_string(),
            }
            .into());
        }

        let refundable = self.amount.paid - self.amount.refunded;
        if amount > refundable {
            return Err(CoreError::RefundExceedsPaid {
                refund_no: refund_no.to_string(),
                amount,
                refundable,
            });
        }

        let now = Utc::now();
        self.refunds.push(RefundSettlement {
            refund_no: refund_no.to_string(),
            amount,
            recorded_at: now,
        });
        self.updated_at = now;
        self.recompute();
        self.log(op, OperationKind::RefundRecorded, format!("{} {}", refund_no, amount));
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Runs `f` against a copy and commits only if it and the amount checks
    /// succeed.
    fn mutate<F>(&mut self, action: &str, f: F) -> CoreResult<()>
    where
        F: FnOnce(&mut Order) -> CoreResult<()>,
    {
        self.ensure_placed(action)?;
        self.ensure_no_pending_scan()?;

        let mut draft = self.clone();
        f(&mut draft)?;
        draft.recompute();
        draft.check_amounts()?;
        draft.updated_at = Utc::now();
        *self = draft;
        Ok(())
    }

    fn ensure_placed(&self, action: &str) -> CoreResult<()> {
        if self.status != OrderStatus::Placed {
            return Err(CoreError::InvalidOrderStatus {
                order_no: self.order_no.clone(),
                status: self.status.to_string(),
                action: action.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_no_pending_scan(&self) -> CoreResult<()> {
        if let Some(pending) = self.pending_scan() {
            return Err(CoreError::PaymentInProgress {
                order_no: self.order_no.clone(),
                seq_no: pending.seq_no.clone(),
            });
        }
        Ok(())
    }

    fn merge_drafts(&mut self, drafts: Vec<ItemDraft>) -> CoreResult<()> {
        for draft in drafts {
            if let Some(line) = self.items.iter_mut().find(|i| i.same_line(&draft)) {
                let quantity = line.quantity + draft.quantity;
                if quantity > MAX_ITEM_QUANTITY {
                    return Err(CoreError::QuantityTooLarge {
                        requested: quantity,
                        max: MAX_ITEM_QUANTITY,
                    });
                }
                line.quantity = quantity;
            } else {
                self.items.push(draft.into_item());
            }
        }

        if self.items.len() > MAX_ORDER_LINES {
            return Err(CoreError::TooManyLines {
                max: MAX_ORDER_LINES,
            });
        }
        Ok(())
    }

    /// Recomputes every amount and the payment status from source data.
    fn recompute(&mut self) {
        let subtotal: Money = self.items.iter().map(OrderItem::line_subtotal).sum();
        let item_discount: Money = self.items.iter().map(|i| i.discount).sum();
        let discountable = (subtotal - item_discount).non_negative();

        if let Some(discount) = self.discount.as_mut() {
            discount.amount = match discount.spec {
                DiscountSpec::Percentage(bps) => discountable.percentage(bps),
                DiscountSpec::Amount(amount) => amount,
            };
        }
        let order_discount = self.discount.map(|d| d.amount).unwrap_or_default();
        let discount = item_discount + order_discount;

        let taxable = (subtotal - discount).non_negative();
        for rate in &mut self.tax_rates {
            rate.amount = taxable.calculate_tax(rate.rate);
        }
        let item_tax: Money = self.items.iter().map(OrderItem::tax).sum();
        let tax = item_tax + self.tax_rates.iter().map(|r| r.amount).sum::<Money>();

        for fee in &mut self.fees {
            fee.amount = match fee.kind {
                FeeKind::Fixed(amount) => amount,
                FeeKind::Percentage(bps) => subtotal.percentage(bps),
            };
        }
        let fee: Money = self.fees.iter().map(|f| f.amount).sum();

        let total = subtotal - discount + tax + fee;
        let paid: Money = self
            .payments
            .iter()
            .filter(|p| p.state == PayState::Success)
            .map(|p| p.amount)
            .sum();
        let refunded: Money = self.refunds.iter().map(|r| r.amount).sum();

        self.amount = OrderAmount {
            subtotal,
            discount,
            tax,
            fee,
            total,
            paid,
            due: (total - paid).non_negative(),
            refunded,
        };
        self.payment_status = self.derive_payment_status();
    }

    fn derive_payment_status(&self) -> PaymentStatus {
        let paid = self.amount.paid;
        if paid.is_positive() && self.amount.refunded >= paid {
            PaymentStatus::Refunded
        } else if self.has_success_payment() && paid >= self.amount.total {
            PaymentStatus::Paid
        } else if self.payments.iter().any(|p| p.state == PayState::Pending) || paid.is_positive() {
            PaymentStatus::Paying
        } else {
            PaymentStatus::Unpaid
        }
    }

    fn check_amounts(&self) -> CoreResult<()> {
        if self.amount.total.is_negative() {
            return Err(CoreError::DiscountTooLarge {
                total: self.amount.total,
            });
        }
        if self.amount.paid > self.amount.total {
            return Err(CoreError::TotalBelowPaid {
                total: self.amount.total,
                paid: self.amount.paid,
            });
        }
        Ok(())
    }

    /// PLACED + PAID → COMPLETED. The table is released implicitly: only
    /// PLACED orders occupy one.
    fn complete_if_paid(&mut self, op: &OperatorContext) -> bool {
        if self.status != OrderStatus::Placed || self.payment_status != PaymentStatus::Paid {
            return false;
        }
        let now = Utc::now();
        self.status = OrderStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        let detail = format!("total {}", self.amount.total);
        self.log(op, OperationKind::Completed, detail);
        true
    }

    fn log(&mut self, op: &OperatorContext, kind: OperationKind, detail: String) {
        self.logs.push(OperationLog {
            seq: self.logs.len() as u32 + 1,
            kind,
            operator_id: op.operator_id.clone(),
            operator_name: op.operator_name.clone(),
            detail,
            at: Utc::now(),
        });
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{ItemSelection, SelectionKind, TaxRate};
    use crate::MAX_PRICE_CENTS;

    fn op() -> OperatorContext {
        OperatorContext {
            operator_id: "u-1".to_string(),
            operator_name: "Mei".to_string(),
            merchant_id: "m-1".to_string(),
            store_id: "store1".to_string(),
            terminal_id: "t-1".to_string(),
        }
    }

    fn draft(product: &str, qty: i64, cents: i64) -> ItemDraft {
        ItemDraft {
            product_id: product.to_string(),
            name: product.to_string(),
            quantity: qty,
            unit_price: Money::from_cents(cents),
            tax_rate: TaxRate::zero(),
            discount: Money::zero(),
            remark: None,
            selections: vec![],
        }
    }

    fn new_order(items: Vec<ItemDraft>) -> NewOrder {
        NewOrder {
            order_no: "S00120240315000001".to_string(),
            merchant_id: "m-1".to_string(),
            store_id: "store1".to_string(),
            business_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            shift_id: None,
            table_id: Some("T1".to_string()),
            people: 2,
            items,
            tax_rates: vec![],
            fees: vec![],
        }
    }

    fn open(items: Vec<ItemDraft>) -> Order {
        Order::open(new_order(items), &op()).unwrap()
    }

    fn scan(seq: &str, cents: i64) -> ScanAttempt {
        ScanAttempt {
            seq_no: seq.to_string(),
            gateway: GatewayKind::Generic,
            amount: Money::from_cents(cents),
            client_ip: Some("10.0.0.8".to_string()),
        }
    }

    fn report(seq: &str, outcome: PayOutcome, cents: i64) -> OutcomeReport {
        OutcomeReport {
            seq_no: seq.to_string(),
            outcome,
            amount: Money::from_cents(cents),
            external_ref: Some(format!("ext-{}", seq)),
            failure_reason: None,
            raw_payload: Some("{}".to_string()),
            source: OutcomeSource::Callback,
        }
    }

    #[test]
    fn test_open_computes_amounts() {
        let order = open(vec![draft("noodles", 2, 2450)]);
        assert_eq!(order.status, OrderStatus::Placed);
        assert_eq!(order.payment_status, PaymentStatus::Unpaid);
        assert_eq!(order.amount.subtotal.cents(), 4900);
        assert_eq!(order.amount.total.cents(), 4900);
        assert_eq!(order.amount.due.cents(), 4900);
        assert_eq!(order.logs.len(), 1);
        assert_eq!(order.version, 1);
    }

    #[test]
    fn test_open_rejects_bad_input() {
        let err = Order::open(new_order(vec![]), &op()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = Order::open(new_order(vec![draft("noodles", 0, 100)]), &op()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let mut new = new_order(vec![draft("noodles", 1, 100)]);
        new.people = 0;
        assert!(Order::open(new, &op()).is_err());
    }

    #[test]
    fn test_taxes_fees_and_selections() {
        let mut item = draft("noodles", 2, 2450);
        item.tax_rate = TaxRate::from_bps(500);
        item.selections.push(ItemSelection {
            kind: SelectionKind::Recipe,
            id: "egg".to_string(),
            name: "Extra egg".to_string(),
            price_delta: Money::from_cents(150),
        });
        let mut new = new_order(vec![item]);
        new.tax_rates.push(OrderTaxRate {
            name: "City".to_string(),
            rate: TaxRate::from_bps(100),
            amount: Money::zero(),
        });
        new.fees.push(OrderFee {
            name: "Service".to_string(),
            kind: FeeKind::Percentage(1000),
            amount: Money::zero(),
        });
        new.fees.push(OrderFee {
            name: "Packaging".to_string(),
            kind: FeeKind::Fixed(Money::from_cents(200)),
            amount: Money::zero(),
        });

        let order = Order::open(new, &op()).unwrap();
        // (2450 + 150) × 2 = 5200
        assert_eq!(order.amount.subtotal.cents(), 5200);
        // item 5% = 260, city 1% = 52
        assert_eq!(order.amount.tax.cents(), 312);
        // 10% of 5200 + 200
        assert_eq!(order.amount.fee.cents(), 720);
        assert_eq!(order.amount.total.cents(), 5200 + 312 + 720);
    }

    #[test]
    fn test_append_merges_identical_lines() {
        let mut order = open(vec![draft("noodles", 1, 2450)]);
        order.append_items(vec![draft("noodles", 2, 2450)], &op()).unwrap();
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].quantity, 3);

        let mut spicy = draft("noodles", 1, 2450);
        spicy.remark = Some("extra spicy".to_string());
        order.append_items(vec![spicy], &op()).unwrap();
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.amount.total.cents(), 4 * 2450);
    }

    #[test]
    fn test_append_rejects_quantity_overflow() {
        let mut order = open(vec![draft("rice", 998, 100)]);
        let err = order.append_items(vec![draft("rice", 2, 100)], &op()).unwrap_err();
        assert!(matches!(err, CoreError::QuantityTooLarge { .. }));
        assert_eq!(order.items[0].quantity, 998);
    }

    #[test]
    fn test_modify_price_remembers_original() {
        let mut order = open(vec![draft("noodles", 2, 2450)]);
        let id = order.items[0].id.clone();
        order.modify_item_price(&id, Money::from_cents(2000), &op()).unwrap();
        order.modify_item_price(&id, Money::from_cents(1800), &op()).unwrap();

        let item = order.item(&id).unwrap();
        assert_eq!(item.original_price, Some(Money::from_cents(2450)));
        assert_eq!(order.amount.total.cents(), 3600);

        let err = order.modify_item_price("nope", Money::from_cents(1), &op()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = order.modify_item_price(&id, Money::from_cents(-1), &op()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_prices_above_ceiling_are_rejected() {
        let mut order = open(vec![draft("noodles", 2, 2450)]);
        let id = order.items[0].id.clone();

        let err = order
            .modify_item_price(&id, Money::from_cents(i64::MAX / 2 + 1), &op())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        order
            .modify_item_price(&id, Money::from_cents(MAX_PRICE_CENTS), &op())
            .unwrap();
        assert_eq!(order.amount.total.cents(), 2 * MAX_PRICE_CENTS);

        let err = order
            .append_items(vec![draft("wine", 1, MAX_PRICE_CENTS + 1)], &op())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let mut topped = draft("tea", 1, MAX_PRICE_CENTS);
        topped.selections.push(ItemSelection {
            kind: SelectionKind::Recipe,
            id: "gold-leaf".to_string(),
            name: "Gold leaf".to_string(),
            price_delta: Money::from_cents(1),
        });
        let err = order.append_items(vec![topped], &op()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = order
            .apply_discount(DiscountSpec::Amount(Money::from_cents(i64::MAX)), &op())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.amount.total.cents(), 2 * MAX_PRICE_CENTS);
    }

    #[test]
    fn test_repricing_respects_selection_deltas() {
        let mut item = draft("noodles", 1, 2450);
        item.selections.push(ItemSelection {
            kind: SelectionKind::Recipe,
            id: "egg".to_string(),
            name: "Extra egg".to_string(),
            price_delta: Money::from_cents(150),
        });
        let mut order = open(vec![item]);
        let id = order.items[0].id.clone();

        let err = order
            .modify_item_price(&id, Money::from_cents(MAX_PRICE_CENTS), &op())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(order.item(&id).unwrap().unit_price.cents(), 2450);
        assert_eq!(order.item(&id).unwrap().original_price, None);
    }

    #[test]
    fn test_fixed_fee_above_ceiling_is_rejected() {
        let mut new = new_order(vec![draft("noodles", 1, 2450)]);
        new.fees.push(OrderFee {
            name: "Corkage".to_string(),
            kind: FeeKind::Fixed(Money::from_cents(i64::MAX)),
            amount: Money::zero(),
        });
        let err = Order::open(new, &op()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_remove_items() {
        let mut order = open(vec![draft("noodles", 3, 1000), draft("tea", 1, 300)]);
        let noodles = order.items[0].id.clone();
        let tea = order.items[1].id.clone();

        order.remove_items(&noodles, 2, &op()).unwrap();
        assert_eq!(order.item(&noodles).unwrap().quantity, 1);

        let err = order.remove_items(&noodles, 2, &op()).unwrap_err();
        assert!(matches!(err, CoreError::RemoveExceedsQuantity { .. }));
        assert!(order.remove_items(&noodles, 0, &op()).is_err());

        order.remove_items(&tea, 1, &op()).unwrap();
        order.remove_items(&noodles, 1, &op()).unwrap();
        assert!(order.items.is_empty());
        assert_eq!(order.amount.total, Money::zero());
    }

    #[test]
    fn test_discount() {
        let mut order = open(vec![draft("noodles", 2, 2500)]);
        order.apply_discount(DiscountSpec::Percentage(1000), &op()).unwrap();
        assert_eq!(order.amount.discount.cents(), 500);
        assert_eq!(order.amount.total.cents(), 4500);

        let err = order
            .apply_discount(DiscountSpec::Amount(Money::from_cents(6000)), &op())
            .unwrap_err();
        assert!(matches!(err, CoreError::DiscountTooLarge { .. }));
        assert_eq!(order.amount.total.cents(), 4500);

        assert!(order.apply_discount(DiscountSpec::Percentage(10001), &op()).is_err());
        assert!(order
            .apply_discount(DiscountSpec::Amount(Money::from_cents(-1)), &op())
            .is_err());

        order.apply_discount(DiscountSpec::Amount(Money::zero()), &op()).unwrap();
        assert!(order.discount.is_none());
        assert_eq!(order.amount.total.cents(), 5000);
    }

    #[test]
    fn test_cash_scenario() {
        let mut order = open(vec![draft("noodles", 2, 2450)]);
        order.settle_cash("P1", Money::from_cents(5000), &op()).unwrap();

        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(!order.occupies_table());
        assert_eq!(order.amount.total.cents(), 4900);
        let payment = order.payment("P1").unwrap();
        assert_eq!(payment.amount.cents(), 4900);
        assert_eq!(payment.change, Some(Money::from_cents(100)));

        let err = order.settle_cash("P2", Money::from_cents(5000), &op()).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyPaid(_)));
    }

    #[test]
    fn test_cash_insufficient() {
        let mut order = open(vec![draft("noodles", 2, 2450)]);
        let err = order.settle_cash("P1", Money::from_cents(4899), &op()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(order.payments.is_empty());
    }

    #[test]
    fn test_mutations_rejected_after_completion() {
        let mut order = open(vec![draft("noodles", 1, 1000)]);
        order.settle_cash("P1", Money::from_cents(1000), &op()).unwrap();
        let before = order.clone();
        let id = order.items[0].id.clone();

        let err = order.append_items(vec![draft("tea", 1, 300)], &op()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        let err = order.remove_items(&id, 1, &op()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        let err = order.modify_item_price(&id, Money::from_cents(1), &op()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(order, before);
    }

    #[test]
    fn test_mutations_rejected_after_cancel() {
        let mut order = open(vec![draft("noodles", 1, 1000)]);
        order.cancel(Some("guest left".to_string()), &op()).unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(!order.occupies_table());

        let before = order.clone();
        let err = order.append_items(vec![draft("tea", 1, 300)], &op()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        let err = order.cancel(None, &op()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(order, before);
    }

    #[test]
    fn test_scan_flow_success() {
        let mut order = open(vec![draft("noodles", 2, 2450)]);
        order.open_scan_payment(scan("S1", 4900), &op()).unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paying);

        let applied = order
            .apply_payment_outcome(&report("S1", PayOutcome::Success, 4900), &op())
            .unwrap();
        assert_eq!(applied, OutcomeApplied::Settled { completed: true });
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.payment("S1").unwrap().external_ref.as_deref(), Some("ext-S1"));

        // Same outcome again changes nothing
        let snapshot = order.clone();
        let applied = order
            .apply_payment_outcome(&report("S1", PayOutcome::Success, 4900), &op())
            .unwrap();
        assert_eq!(applied, OutcomeApplied::Duplicate);
        assert_eq!(order, snapshot);

        // Success is sticky
        let err = order
            .apply_payment_outcome(&report("S1", PayOutcome::Failed, 4900), &op())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(order, snapshot);
    }

    #[test]
    fn test_scan_failure_allows_retry() {
        let mut order = open(vec![draft("noodles", 2, 2450)]);
        order.open_scan_payment(scan("S1", 4900), &op()).unwrap();
        let mut declined = report("S1", PayOutcome::Failed, 4900);
        declined.failure_reason = Some("insufficient balance".to_string());
        assert_eq!(
            order.apply_payment_outcome(&declined, &op()).unwrap(),
            OutcomeApplied::Failed
        );
        assert_eq!(order.status, OrderStatus::Placed);
        assert_eq!(order.payment_status, PaymentStatus::Unpaid);

        // FAILED is terminal for that attempt
        let err = order
            .apply_payment_outcome(&report("S1", PayOutcome::Success, 4900), &op())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        order.open_scan_payment(scan("S2", 4900), &op()).unwrap();
        assert_eq!(order.pending_scan().unwrap().seq_no, "S2");
    }

    #[test]
    fn test_pending_scan_blocks_mutations_and_cash() {
        let mut order = open(vec![draft("noodles", 2, 2450)]);
        order.open_scan_payment(scan("S1", 2000), &op()).unwrap();
        let id = order.items[0].id.clone();

        let err = order.remove_items(&id, 1, &op()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        let err = order.settle_cash("P1", Money::from_cents(4900), &op()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let err = order.open_scan_payment(scan("S2", 100), &op()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let err = order.cancel(None, &op()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        order.discard_pending_payment("S1", &op()).unwrap();
        assert!(order.pending_scan().is_none());
        assert_eq!(order.payment_status, PaymentStatus::Unpaid);
    }

    #[test]
    fn test_scan_amount_bounds_and_mismatch() {
        let mut order = open(vec![draft("noodles", 2, 2450)]);
        assert!(order.open_scan_payment(scan("S1", 0), &op()).is_err());
        assert!(order.open_scan_payment(scan("S1", 4901), &op()).is_err());

        order.open_scan_payment(scan("S1", 4900), &op()).unwrap();
        let err = order
            .apply_payment_outcome(&report("S1", PayOutcome::Success, 4800), &op())
            .unwrap_err();
        assert!(matches!(err, CoreError::AmountMismatch { .. }));
        assert_eq!(order.payment("S1").unwrap().state, PayState::Pending);
    }

    #[test]
    fn test_partial_payments_then_total_below_paid() {
        let mut order = open(vec![draft("noodles", 2, 2450)]);
        order.open_scan_payment(scan("S1", 3000), &op()).unwrap();
        order
            .apply_payment_outcome(&report("S1", PayOutcome::Success, 3000), &op())
            .unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paying);
        assert_eq!(order.amount.due.cents(), 1900);

        let id = order.items[0].id.clone();
        let err = order.remove_items(&id, 1, &op()).unwrap_err();
        assert!(matches!(err, CoreError::TotalBelowPaid { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        order.settle_cash("P1", Money::from_cents(2000), &op()).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.amount.paid.cents(), 4900);
    }

    #[test]
    fn test_cancel_with_success_payment() {
        let mut order = open(vec![draft("noodles", 2, 2450)]);
        order.open_scan_payment(scan("S1", 1000), &op()).unwrap();
        order
            .apply_payment_outcome(&report("S1", PayOutcome::Success, 1000), &op())
            .unwrap();

        let err = order.cancel(None, &op()).unwrap_err();
        assert!(matches!(err, CoreError::SettledPaymentsExist { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        assert!(order.record_refund("R1", Money::from_cents(1000), &op()).unwrap());
        assert_eq!(order.payment_status, PaymentStatus::Refunded);
        order.cancel(Some("refunded".to_string()), &op()).unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_record_refund_is_idempotent_and_capped() {
        let mut order = open(vec![draft("noodles", 2, 2450)]);
        order.settle_cash("P1", Money::from_cents(4900), &op()).unwrap();

        assert!(order.record_refund("R1", Money::from_cents(2450), &op()).unwrap());
        assert!(!order.record_refund("R1", Money::from_cents(2450), &op()).unwrap());
        assert_eq!(order.amount.refunded.cents(), 2450);
        assert_eq!(order.payment_status, PaymentStatus::Paid);

        let err = order.record_refund("R2", Money::from_cents(2451), &op()).unwrap_err();
        assert!(matches!(err, CoreError::RefundExceedsPaid { .. }));

        order.record_refund("R2", Money::from_cents(2450), &op()).unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Refunded);
        assert_eq!(order.status, OrderStatus::Completed);
    }

    #[test]
    fn test_zero_total_order_settles_with_cash() {
        let mut order = open(vec![draft("water", 1, 0)]);
        order.settle_cash("P1", Money::zero(), &op()).unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.status, OrderStatus::Completed);
    }

    #[test]
    fn test_turn_table() {
        let mut order = open(vec![draft("noodles", 1, 1000)]);
        order.turn_table("T9", &op()).unwrap();
        assert_eq!(order.table_id.as_deref(), Some("T9"));
        let logs = order.logs.len();
        order.turn_table("T9", &op()).unwrap();
        assert_eq!(order.logs.len(), logs);
    }

    #[test]
    fn test_body_roundtrips_as_json() {
        let mut order = open(vec![draft("noodles", 2, 2450)]);
        order.apply_discount(DiscountSpec::Percentage(500), &op()).unwrap();
        let json = serde_json::to_string(&order).unwrap();
        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(back, order);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_draft() -> impl Strategy<Value = ItemDraft> {
            (0usize..4, 1i64..20, 0i64..10_000, 0u32..2_000, 0i64..500).prop_map(
                |(product, qty, cents, bps, delta)| ItemDraft {
                    product_id: format!("p-{}", product),
                    name: format!("Dish {}", product),
                    quantity: qty,
                    unit_price: Money::from_cents(cents),
                    tax_rate: TaxRate::from_bps(bps),
                    discount: Money::zero(),
                    remark: None,
                    selections: if delta % 2 == 0 {
                        vec![]
                    } else {
                        vec![ItemSelection {
                            kind: SelectionKind::Spec,
                            id: "large".to_string(),
                            name: "Large".to_string(),
                            price_delta: Money::from_cents(delta),
                        }]
                    },
                },
            )
        }

        fn assert_identity(order: &Order) {
            let a = order.amount;
            assert_eq!(a.total, a.subtotal - a.discount + a.tax + a.fee);
            assert!(!a.total.is_negative());
        }

        proptest! {
            #[test]
            fn total_identity_holds(
                drafts in prop::collection::vec(arb_draft(), 1..8),
                discount_bps in 0u32..=10_000,
                fee_bps in 0u32..2_000,
            ) {
                let mut new = new_order(drafts);
                new.fees.push(OrderFee {
                    name: "Service".to_string(),
                    kind: FeeKind::Percentage(fee_bps),
                    amount: Money::zero(),
                });
                let mut order = Order::open(new, &op()).unwrap();
                assert_identity(&order);

                order.apply_discount(DiscountSpec::Percentage(discount_bps), &op()).unwrap();
                assert_identity(&order);
            }

            #[test]
            fn amounts_independent_of_history(
                drafts in prop::collection::vec(arb_draft(), 1..8),
                extra in 1i64..5,
            ) {
                let all_at_once = Order::open(new_order(drafts.clone()), &op()).unwrap();

                let mut stepwise = Order::open(new_order(drafts[..1].to_vec()), &op()).unwrap();
                for d in drafts[1..].iter().cloned() {
                    stepwise.append_items(vec![d], &op()).unwrap();
                }

                // add and take back the same units
                let mut bump = drafts[0].clone();
                bump.quantity = extra;
                stepwise.append_items(vec![bump.clone()], &op()).unwrap();
                let line = stepwise
                    .items
                    .iter()
                    .find(|i| i.same_line(&bump))
                    .map(|i| i.id.clone())
                    .unwrap();
                stepwise.remove_items(&line, extra, &op()).unwrap();

                prop_assert_eq!(all_at_once.amount, stepwise.amount);
                assert_identity(&stepwise);
            }
        }
    }
}
