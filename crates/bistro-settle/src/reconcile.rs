//! # Payment Reconciliation Coordinator
//!
//! Every definitive outcome for a scan attempt, whoever reports it, goes
//! through [`ReconcileCoordinator::apply_outcome`].
//!
//! ## Serialization
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Racing reporters for one seq_no                         │
//! │                                                                         │
//! │   polling ──┐                                                           │
//! │   callback ─┼──► load order (version v)                                 │
//! │   sweep ────┘        │                                                  │
//! │                      ▼                                                  │
//! │              Order::apply_payment_outcome                               │
//! │                      │                                                  │
//! │          Duplicate ──┤──► return, nothing written                       │
//! │                      ▼                                                  │
//! │        UPDATE … WHERE id = ? AND version = v                            │
//! │                      │                                                  │
//! │     0 rows (stale) ──┤──► reload, re-evaluate (bounded)                 │
//! │                      ▼                                                  │
//! │                  committed                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loser of a race re-reads the winner's write, so a duplicate report
//! becomes `Duplicate` instead of a second transition.

use std::time::Duration;

use bistro_core::order::OutcomeReport;
use bistro_core::{CoreResult, Money, OperatorContext, Order, OutcomeApplied, OutcomeSource};
use bistro_db::Database;
use tracing::{debug, info, warn};

use crate::error::{SettleError, SettleResult};
use crate::gateway::GatewayRouter;

/// Applies upstream outcomes and refund settlements to orders.
#[derive(Debug, Clone)]
pub struct ReconcileCoordinator {
    db: Database,
    router: GatewayRouter,
    max_retries: u32,
}

impl ReconcileCoordinator {
    pub fn new(db: Database, router: GatewayRouter, max_retries: u32) -> Self {
        ReconcileCoordinator {
            db,
            router,
            max_retries,
        }
    }

    pub fn router(&self) -> &GatewayRouter {
        &self.router
    }

    /// Applies one definitive outcome.
    ///
    /// ## Errors
    /// - `NotFound` for an unknown seq_no
    /// - `Conflict` when it contradicts the recorded outcome
    /// - `InvalidInput` when a SUCCESS amount differs from the attempt
    pub async fn apply_outcome(&self, report: OutcomeReport) -> SettleResult<OutcomeApplied> {
        let seq_no = report.seq_no.clone();
        let applied = self
            .update_by_seq(&seq_no, |order, op| order.apply_payment_outcome(&report, op))
            .await;

        match &applied {
            Ok(Some(outcome)) => info!(
                %seq_no,
                source = %report.source,
                outcome = ?outcome,
                "Payment outcome applied"
            ),
            Ok(None) => debug!(%seq_no, source = %report.source, "Duplicate payment outcome"),
            Err(e) => warn!(%seq_no, source = %report.source, error = %e, "Payment outcome rejected"),
        }
        Ok(applied?.unwrap_or(OutcomeApplied::Duplicate))
    }

    /// Asks the attempt's gateway for its result and applies it if it is
    /// definitive. `Ok(None)` when the attempt is not pending or upstream
    /// still says pending.
    pub async fn query_and_apply(
        &self,
        seq_no: &str,
        source: OutcomeSource,
        timeout: Duration,
    ) -> SettleResult<Option<OutcomeApplied>> {
        let order = self
            .db
            .orders()
            .find_by_seq_no(seq_no)
            .await?
            .ok_or_else(|| SettleError::not_found("Payment", seq_no))?;
        let Some(payment) = order.payment(seq_no).filter(|p| p.is_pending_scan()) else {
            return Ok(None);
        };
        let Some(kind) = payment.gateway else {
            return Ok(None);
        };

        let gateway = self.router.get(kind)?;
        let expected = payment.amount;
        let external_ref = payment.external_ref.clone();

        let outcome = match tokio::time::timeout(
            timeout,
            gateway.query(seq_no, external_ref.as_deref(), expected),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(SettleError::Timeout(timeout)),
        };

        match outcome {
            Some(outcome) => {
                let applied = self.apply_outcome(outcome.into_report(seq_no, source)).await?;
                Ok(Some(applied))
            }
            None => Ok(None),
        }
    }

    /// Records a completed refund against its origin order. Returns `false`
    /// if this refund number was already recorded.
    pub async fn apply_refund_settlement(
        &self,
        order_no: &str,
        refund_no: &str,
        amount: Money,
    ) -> SettleResult<bool> {
        let orders = self.db.orders();
        let mut attempt = 0;
        loop {
            let mut order = orders
                .get_by_no(order_no)
                .await?
                .ok_or_else(|| SettleError::not_found("Order", order_no))?;
            let op = OperatorContext::system(&order.merchant_id, &order.store_id);

            if !order.record_refund(refund_no, amount, &op)? {
                debug!(%order_no, %refund_no, "Refund already recorded");
                return Ok(false);
            }

            match orders.update(&mut order).await {
                Ok(()) => {
                    info!(
                        %order_no,
                        %refund_no,
                        %amount,
                        payment_status = %order.payment_status,
                        "Refund settlement recorded"
                    );
                    return Ok(true);
                }
                Err(e) if e.is_stale() && attempt < self.max_retries => {
                    attempt += 1;
                    debug!(%order_no, attempt, "Stale write recording refund, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Load-mutate-write on the order holding `seq_no`, re-reading on a
    /// stale version. `f` returning `Duplicate` skips the write and yields
    /// `Ok(None)`.
    async fn update_by_seq<F>(&self, seq_no: &str, mut f: F) -> SettleResult<Option<OutcomeApplied>>
    where
        F: FnMut(&mut Order, &OperatorContext) -> CoreResult<OutcomeApplied>,
    {
        let orders = self.db.orders();
        let mut attempt = 0;
        loop {
            let mut order = orders
                .find_by_seq_no(seq_no)
                .await?
                .ok_or_else(|| SettleError::not_found("Payment", seq_no))?;
            let op = OperatorContext::system(&order.merchant_id, &order.store_id);

            let applied = f(&mut order, &op)?;
            if applied == OutcomeApplied::Duplicate {
                return Ok(None);
            }

            match orders.update(&mut order).await {
                Ok(()) => return Ok(Some(applied)),
                Err(e) if e.is_stale() && attempt < self.max_retries => {
                    attempt += 1;
                    debug!(%seq_no, attempt, "Stale write applying outcome, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
