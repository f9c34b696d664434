//! # Refund Orders
//!
//! A refund order reverses part (or all) of a settled order. It references
//! the origin order by identity only and carries its own state machine.
//!
//! ## State Machine
//! ```text
//!                ┌──────────► REJECTED
//!                │
//!   PENDING ─────┼──────────► APPROVED ──────► COMPLETED
//!                │
//!                └──────────► CANCELLED
//!
//!   Every other move is illegal. COMPLETED requires refund payments that
//!   cover the refund total.
//! ```

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::order::Order;
use crate::types::{OperatorContext, OrderItem, OrderStatus, PayChannel, PaymentStatus};
use crate::validation::validate_required;
use crate::MAX_REMARK_CHARS;

// =============================================================================
// Status & Type
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
    Cancelled,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Approved => "approved",
            RefundStatus::Rejected => "rejected",
            RefundStatus::Completed => "completed",
            RefundStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(self, next: RefundStatus) -> bool {
        use RefundStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Pending, Cancelled) | (Approved, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RefundStatus::Rejected | RefundStatus::Completed | RefundStatus::Cancelled
        )
    }

    /// Whether quantities on a refund in this status count as taken.
    pub fn holds_quantity(self) -> bool {
        !matches!(self, RefundStatus::Rejected | RefundStatus::Cancelled)
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// FULL refunds every origin line in full; PARTIAL any non-empty subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RefundType {
    Full,
    Partial,
}

impl RefundType {
    /// Parses the raw wire code: 1 = FULL, 2 = PARTIAL.
    pub fn from_code(code: i32) -> CoreResult<RefundType> {
        match code {
            1 => Ok(RefundType::Full),
            2 => Ok(RefundType::Partial),
            _ => Err(ValidationError::NotAllowed {
                field: "refund_type".to_string(),
                allowed: vec!["1".to_string(), "2".to_string()],
            }
            .into()),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            RefundType::Full => 1,
            RefundType::Partial => 2,
        }
    }
}

// =============================================================================
// Lines, Amounts, Payments
// =============================================================================

/// One refunded line, with the origin figures it is bounded by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RefundOrderProduct {
    pub origin_item_id: String,
    pub product_id: String,
    pub name: String,
    pub origin_quantity: i64,
    pub origin_amount: Money,
    pub origin_discount: Money,
    pub origin_tax: Money,
    pub refund_quantity: i64,
    pub refund_amount: Money,
    pub refund_discount: Money,
    pub refund_tax: Money,
}

impl RefundOrderProduct {
    /// Builds a line refunding `quantity` units of `item`, prorating the
    /// line's amount, discount and tax.
    pub fn from_item(item: &OrderItem, quantity: i64) -> RefundOrderProduct {
        let origin_amount = item.line_subtotal();
        let origin_tax = item.tax();
        RefundOrderProduct {
            origin_item_id: item.id.clone(),
            product_id: item.product_id.clone(),
            name: item.name.clone(),
            origin_quantity: item.quantity,
            origin_amount,
            origin_discount: item.discount,
            origin_tax,
            refund_quantity: quantity,
            refund_amount: origin_amount.prorate(quantity, item.quantity),
            refund_discount: item.discount.prorate(quantity, item.quantity),
            refund_tax: origin_tax.prorate(quantity, item.quantity),
        }
    }

    /// Bounds check: 1 ≤ refund qty ≤ origin qty, 0 ≤ refund money ≤ origin
    /// money, refund discount ≤ refund amount.
    pub fn validate(&self, line: usize) -> CoreResult<()> {
        let bad = |reason: String| Err(CoreError::InvalidRefundLine { line, reason });

        if self.origin_item_id.trim().is_empty() {
            return bad("origin item id is required".to_string());
        }
        if self.origin_quantity < 1 {
            return bad(format!("origin quantity {} must be positive", self.origin_quantity));
        }
        if self.refund_quantity < 1 || self.refund_quantity > self.origin_quantity {
            return bad(format!(
                "refund quantity {} must be between 1 and {}",
                self.refund_quantity, self.origin_quantity
            ));
        }

        let pairs = [
            ("amount", self.refund_amount, self.origin_amount),
            ("discount", self.refund_discount, self.origin_discount),
            ("tax", self.refund_tax, self.origin_tax),
        ];
        for (field, refund, origin) in pairs {
            if origin.is_negative() {
                return bad(format!("origin {} {} is negative", field, origin));
            }
            if refund.is_negative() || refund > origin {
                return bad(format!(
                    "refund {} {} must be between 0.00 and {}",
                    field, refund, origin
                ));
            }
        }
        if self.refund_discount > self.refund_amount {
            return bad(format!(
                "refund discount {} exceeds refund amount {}",
                self.refund_discount, self.refund_amount
            ));
        }
        Ok(())
    }

    fn is_whole(&self) -> bool {
        self.refund_quantity == self.origin_quantity
            && self.refund_amount == self.origin_amount
            && self.refund_discount == self.origin_discount
            && self.refund_tax == self.origin_tax
    }
}

/// Refund totals: total = amount − discount + tax.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RefundAmount {
    pub amount: Money,
    pub discount: Money,
    pub tax: Money,
    pub total: Money,
}

impl RefundAmount {
    pub fn from_products(products: &[RefundOrderProduct]) -> RefundAmount {
        let amount: Money = products.iter().map(|p| p.refund_amount).sum();
        let discount: Money = products.iter().map(|p| p.refund_discount).sum();
        let tax: Money = products.iter().map(|p| p.refund_tax).sum();
        RefundAmount {
            amount,
            discount,
            tax,
            total: amount - discount + tax,
        }
    }
}

/// Money actually handed back for a refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RefundPayment {
    pub channel: PayChannel,
    pub amount: Money,
    pub external_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Approver {
    pub id: String,
    pub name: String,
}

// =============================================================================
// Drafts & Patches
// =============================================================================

/// A refund request with origin order and store data already resolved.
#[derive(Debug, Clone)]
pub struct RefundDraft {
    pub merchant_id: String,
    pub store_id: String,
    pub store_code: String,
    pub origin_order_id: String,
    pub origin_order_no: String,
    pub refund_type: RefundType,
    pub business_date: NaiveDate,
    pub reason: Option<String>,
    pub remark: Option<String>,
    pub products: Vec<RefundOrderProduct>,
}

/// Mutable fields of a refund order. `None` leaves a field alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RefundPatch {
    pub status: Option<RefundStatus>,
    pub reason: Option<String>,
    pub approver: Option<Approver>,
    pub payments: Option<Vec<RefundPayment>>,
    pub remark: Option<String>,
}

/// Validates every line of a draft in isolation, then the draft total.
pub fn validate_products(refund_type: RefundType, products: &[RefundOrderProduct]) -> CoreResult<()> {
    if products.is_empty() {
        return Err(ValidationError::Required {
            field: "products".to_string(),
        }
        .into());
    }

    let mut seen = HashSet::new();
    for (line, product) in products.iter().enumerate() {
        product.validate(line)?;
        if !seen.insert(product.origin_item_id.as_str()) {
            return Err(CoreError::InvalidRefundLine {
                line,
                reason: format!("origin item {} listed twice", product.origin_item_id),
            });
        }
        if refund_type == RefundType::Full && !product.is_whole() {
            return Err(CoreError::InvalidRefundLine {
                line,
                reason: "a full refund must return the whole line".to_string(),
            });
        }
    }

    if !RefundAmount::from_products(products).total.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "refund total".to_string(),
        }
        .into());
    }
    Ok(())
}

/// Requires the origin order to hold settled money that is not yet fully
/// refunded: PAID, or PAYING with at least one settled payment. Unpaid,
/// refunded and cancelled orders are rejected.
pub fn ensure_refundable(origin: &Order) -> CoreResult<()> {
    let refundable = origin.status != OrderStatus::Cancelled
        && origin.amount.paid.is_positive()
        && matches!(
            origin.payment_status,
            PaymentStatus::Paid | PaymentStatus::Paying
        );
    if !refundable {
        return Err(CoreError::NothingToRefund {
            order_no: origin.order_no.clone(),
            status: format!("{}/{}", origin.status, origin.payment_status),
        });
    }
    Ok(())
}

/// Checks refund lines against the origin order and the quantities already
/// held by earlier refunds of it (`already_refunded`: item id → quantity).
pub fn validate_against_origin(
    refund_type: RefundType,
    products: &[RefundOrderProduct],
    origin: &Order,
    already_refunded: &HashMap<String, i64>,
) -> CoreResult<()> {
    for (line, product) in products.iter().enumerate() {
        let bad = |reason: String| CoreError::InvalidRefundLine { line, reason };

        let item = origin.item(&product.origin_item_id).ok_or_else(|| {
            bad(format!(
                "item {} is not on order {}",
                product.origin_item_id, origin.order_no
            ))
        })?;
        if item.product_id != product.product_id {
            return Err(bad(format!(
                "product {} does not match order item product {}",
                product.product_id, item.product_id
            )));
        }
        if product.origin_quantity > item.quantity {
            return Err(bad(format!(
                "origin quantity {} exceeds ordered quantity {}",
                product.origin_quantity, item.quantity
            )));
        }

        let taken = already_refunded.get(&item.id).copied().unwrap_or(0);
        if taken + product.refund_quantity > item.quantity {
            return Err(bad(format!(
                "refunding {} more of {} would exceed ordered quantity {} ({} already refunded)",
                product.refund_quantity, item.name, item.quantity, taken
            )));
        }
    }

    if refund_type == RefundType::Full {
        let covered: HashSet<&str> = products.iter().map(|p| p.origin_item_id.as_str()).collect();
        if let Some(missing) = origin.items.iter().find(|i| !covered.contains(i.id.as_str())) {
            return Err(CoreError::InvalidRefundLine {
                line: products.len(),
                reason: format!("full refund is missing item {}", missing.name),
            });
        }
    }
    Ok(())
}

fn validate_text(field: &str, value: Option<&str>) -> CoreResult<()> {
    if let Some(value) = value {
        if value.chars().count() > MAX_REMARK_CHARS {
            return Err(ValidationError::TooLong {
                field: field.to_string(),
                max: MAX_REMARK_CHARS,
            }
            .into());
        }
    }
    Ok(())
}

// =============================================================================
// Refund Order
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RefundOrder {
    pub id: String,
    pub refund_no: String,
    pub merchant_id: String,
    pub store_id: String,
    pub store_code: String,
    pub origin_order_id: String,
    pub origin_order_no: String,
    pub refund_type: RefundType,
    pub status: RefundStatus,
    pub reason: Option<String>,
    pub remark: Option<String>,
    #[ts(as = "String")]
    pub business_date: NaiveDate,
    pub creator_id: String,
    pub creator_name: String,
    pub approver: Option<Approver>,
    #[ts(as = "Option<String>")]
    pub approved_at: Option<DateTime<Utc>>,
    pub amount: RefundAmount,
    pub products: Vec<RefundOrderProduct>,
    pub payments: Vec<RefundPayment>,
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

impl RefundOrder {
    /// Builds a PENDING refund order from a validated draft.
    pub fn create(
        draft: RefundDraft,
        refund_no: String,
        op: &OperatorContext,
    ) -> CoreResult<RefundOrder> {
        validate_required("refund_no", &refund_no)?;
        validate_required("origin_order_no", &draft.origin_order_no)?;
        validate_text("reason", draft.reason.as_deref())?;
        validate_text("remark", draft.remark.as_deref())?;
        validate_products(draft.refund_type, &draft.products)?;

        let now = Utc::now();
        Ok(RefundOrder {
            id: uuid::Uuid::new_v4().to_string(),
            refund_no,
            merchant_id: draft.merchant_id,
            store_id: draft.store_id,
            store_code: draft.store_code,
            origin_order_id: draft.origin_order_id,
            origin_order_no: draft.origin_order_no,
            refund_type: draft.refund_type,
            status: RefundStatus::Pending,
            reason: draft.reason,
            remark: draft.remark,
            business_date: draft.business_date,
            creator_id: op.operator_id.clone(),
            creator_name: op.operator_name.clone(),
            approver: None,
            approved_at: None,
            amount: RefundAmount::from_products(&draft.products),
            products: draft.products,
            payments: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
        })
    }

    /// Sum of recorded refund payments.
    pub fn recorded_payments(&self) -> Money {
        self.payments.iter().map(|p| p.amount).sum()
    }

    /// Applies a patch. Returns the new status when the patch moved it.
    ///
    /// ## Errors
    /// - `IllegalRefundTransition` (Conflict) for a move the machine forbids
    /// - `InvalidRefundStatus` (InvalidState) when editing a closed refund
    /// - `RefundUnderpaid` when completing without covering payments
    pub fn apply_patch(
        &mut self,
        patch: RefundPatch,
        op: &OperatorContext,
    ) -> CoreResult<Option<RefundStatus>> {
        let next = patch.status.filter(|s| *s != self.status);
        if let Some(next) = next {
            if !self.status.can_transition_to(next) {
                return Err(CoreError::IllegalRefundTransition {
                    refund_no: self.refund_no.clone(),
                    from: self.status.to_string(),
                    to: next.to_string(),
                });
            }
        } else if self.status.is_terminal() {
            return Err(CoreError::InvalidRefundStatus {
                refund_no: self.refund_no.clone(),
                status: self.status.to_string(),
                action: "update".to_string(),
            });
        }

        validate_text("reason", patch.reason.as_deref())?;
        validate_text("remark", patch.remark.as_deref())?;

        let mut draft = self.clone();
        let now = Utc::now();

        if let Some(payments) = patch.payments {
            for payment in &payments {
                if !payment.amount.is_positive() {
                    return Err(ValidationError::MustBePositive {
                        field: "refund payment amount".to_string(),
                    }
                    .into());
                }
            }
            draft.payments = payments;
        }
        if patch.reason.is_some() {
            draft.reason = patch.reason;
        }
        if patch.remark.is_some() {
            draft.remark = patch.remark;
        }

        if let Some(next) = next {
            match next {
                RefundStatus::Approved | RefundStatus::Rejected => {
                    draft.approver = Some(patch.approver.unwrap_or_else(|| Approver {
                        id: op.operator_id.clone(),
                        name: op.operator_name.clone(),
                    }));
                    draft.approved_at = Some(now);
                }
                RefundStatus::Completed => {
                    let recorded = draft.recorded_payments();
                    if recorded < draft.amount.total {
                        return Err(CoreError::RefundUnderpaid {
                            refund_no: draft.refund_no.clone(),
                            recorded,
                            total: draft.amount.total,
                        });
                    }
                    draft.completed_at = Some(now);
                }
                RefundStatus::Cancelled => draft.cancelled_at = Some(now),
                RefundStatus::Pending => {}
            }
            draft.status = next;
        } else if let Some(approver) = patch.approver {
            draft.approver = Some(approver);
        }

        draft.updated_at = now;
        *self = draft;
        Ok(next)
    }

    /// PENDING → CANCELLED.
    pub fn cancel(&mut self) -> CoreResult<()> {
        if self.status != RefundStatus::Pending {
            return Err(CoreError::InvalidRefundStatus {
                refund_no: self.refund_no.clone(),
                status: self.status.to_string(),
                action: "cancel".to_string(),
            });
        }
        let now = Utc::now();
        self.status = RefundStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

// =============================================================================
// Listing
// =============================================================================

/// Filter for listing refund orders. All fields are optional and ANDed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RefundFilter {
    pub merchant_id: Option<String>,
    pub store_id: Option<String>,
    pub origin_order_no: Option<String>,
    #[ts(as = "Option<String>")]
    pub date_from: Option<NaiveDate>,
    #[ts(as = "Option<String>")]
    pub date_to: Option<NaiveDate>,
    pub status: Option<RefundStatus>,
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest { page: 1, size: 20 }
    }
}

/// A page of results plus the unpaged total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub size: u32,
}

// =============================================================================
// Unit Tests
// =============================================================================
