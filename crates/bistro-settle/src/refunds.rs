//! # Refund Order Service
//!
//! Refund orders reverse part or all of a settled order. The service reads
//! the origin order but never writes it; completion is forwarded to the
//! [`ReconcileCoordinator`], which records the refunded amount on the order.
//!
//! ```text
//!   PENDING ──► APPROVED ──► COMPLETED ──► Coordinator.apply_refund_settlement
//!      │
//!      ├──► REJECTED
//!      └──► CANCELLED
//! ```

use std::sync::Arc;

use bistro_core::numbering;
use bistro_core::refund::{
    ensure_refundable, validate_against_origin, validate_products, Page, PageRequest, RefundFilter,
    RefundOrderProduct, RefundStatus, RefundType,
};
use bistro_core::validation::validate_page;
use bistro_core::{OperatorContext, RefundDraft, RefundOrder, RefundPatch};
use bistro_db::{Database, DbError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::config::BusinessSettings;
use crate::error::{SettleError, SettleResult};
use crate::reconcile::ReconcileCoordinator;
use crate::sequence::SequenceGenerator;

/// Input for [`RefundService::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRefundRequest {
    pub origin_order_no: String,
    /// Wire code: 1 = FULL, 2 = PARTIAL.
    pub refund_type: i32,
    /// Allocated from the store's refund sequence when absent.
    #[serde(default)]
    pub refund_no: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
    pub products: Vec<RefundOrderProduct>,
}

#[derive(Clone)]
pub struct RefundService {
    db: Database,
    catalog: Arc<dyn Catalog>,
    sequences: Arc<dyn SequenceGenerator>,
    coordinator: Arc<ReconcileCoordinator>,
    business: BusinessSettings,
}

impl RefundService {
    pub fn new(
        db: Database,
        catalog: Arc<dyn Catalog>,
        sequences: Arc<dyn SequenceGenerator>,
        coordinator: Arc<ReconcileCoordinator>,
        business: BusinessSettings,
    ) -> Self {
        RefundService {
            db,
            catalog,
            sequences,
            coordinator,
            business,
        }
    }

    /// Validates and persists a PENDING refund order. Nothing is written
    /// unless every check passes.
    ///
    /// ## Errors
    /// - `InvalidInput` for a bad type code, a bad line, or quantities that
    ///   exceed what is left on the origin order
    /// - `NotFound` for an unknown origin order
    /// - `InvalidState` if the origin order has no settled money left to
    ///   refund (unpaid, refunded or cancelled)
    /// - `Conflict` if the refund number is taken
    pub async fn create(
        &self,
        request: CreateRefundRequest,
        op: &OperatorContext,
    ) -> SettleResult<RefundOrder> {
        let refund_type = RefundType::from_code(request.refund_type)?;
        validate_products(refund_type, &request.products)?;

        let origin = self
            .db
            .orders()
            .get_by_no(&request.origin_order_no)
            .await?
            .ok_or_else(|| SettleError::not_found("Order", &request.origin_order_no))?;
        ensure_refundable(&origin)?;

        let refunds = self.db.refunds();
        let taken = refunds.refunded_quantities(&origin.id).await?;
        validate_against_origin(refund_type, &request.products, &origin, &taken)?;

        let store = self.catalog.store(&origin.store_id).await?;
        let business_date = self.business.today();
        let refund_no = match request.refund_no {
            Some(refund_no) => {
                if refunds.exists_refund_no(&refund_no).await? {
                    return Err(DbError::duplicate("refund_no", refund_no).into());
                }
                refund_no
            }
            None => {
                let seq = self
                    .sequences
                    .next(&numbering::refund_scope(&store.id))
                    .await?;
                numbering::refund_no(&store.code, business_date, seq)
            }
        };

        let refund = RefundOrder::create(
            RefundDraft {
                merchant_id: origin.merchant_id.clone(),
                store_id: store.id.clone(),
                store_code: store.code.clone(),
                origin_order_id: origin.id.clone(),
                origin_order_no: origin.order_no.clone(),
                refund_type,
                business_date,
                reason: request.reason,
                remark: request.remark,
                products: request.products,
            },
            refund_no,
            op,
        )?;
        refunds.insert(&refund).await?;

        info!(
            refund_no = %refund.refund_no,
            origin_order_no = %refund.origin_order_no,
            refund_type = ?refund.refund_type,
            total = %refund.amount.total,
            "Refund order created"
        );
        Ok(refund)
    }

    /// Applies a patch. A move to COMPLETED records the refund on the origin
    /// order before the refund order itself is saved; that step is
    /// idempotent by refund number, so a retry after a failed save is safe.
    ///
    /// ## Errors
    /// - `NotFound` for an unknown id
    /// - `Conflict` for an illegal transition or a concurrent edit
    /// - `InvalidState` when editing a closed refund
    /// - `InvalidInput` when completing without covering refund payments, or
    ///   when the refund exceeds what the origin order has paid
    pub async fn update(
        &self,
        id: &str,
        patch: RefundPatch,
        op: &OperatorContext,
    ) -> SettleResult<RefundOrder> {
        let mut refund = self.load(id).await?;
        let moved = refund.apply_patch(patch, op)?;

        if moved == Some(RefundStatus::Completed) {
            self.coordinator
                .apply_refund_settlement(
                    &refund.origin_order_no,
                    &refund.refund_no,
                    refund.amount.total,
                )
                .await?;
        }

        if let Err(e) = self.db.refunds().update(&mut refund).await {
            if moved == Some(RefundStatus::Completed) {
                warn!(
                    refund_no = %refund.refund_no,
                    error = %e,
                    "Refund recorded on origin order but refund save failed"
                );
            }
            return Err(e.into());
        }

        if let Some(status) = moved {
            info!(refund_no = %refund.refund_no, %status, "Refund order moved");
        }
        Ok(refund)
    }

    /// PENDING → CANCELLED; anything else is `InvalidState`.
    pub async fn cancel(&self, id: &str, op: &OperatorContext) -> SettleResult<RefundOrder> {
        let mut refund = self.load(id).await?;
        refund.cancel()?;
        self.db.refunds().update(&mut refund).await?;
        info!(refund_no = %refund.refund_no, operator = %op.operator_id, "Refund order cancelled");
        Ok(refund)
    }

    pub async fn get(&self, id: &str) -> SettleResult<RefundOrder> {
        self.load(id).await
    }

    /// Newest first. `page` is 1-based, `size` within 1..=100.
    pub async fn list(
        &self,
        filter: &RefundFilter,
        page: PageRequest,
    ) -> SettleResult<Page<RefundOrder>> {
        validate_page(page.page, page.size)?;
        Ok(self.db.refunds().list(filter, page).await?)
    }

    async fn load(&self, id: &str) -> SettleResult<RefundOrder> {
        self.db
            .refunds()
            .get(id)
            .await?
            .ok_or_else(|| SettleError::not_found("RefundOrder", id))
    }
}
