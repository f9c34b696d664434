//! # Payment Settlement Service
//!
//! Cash settles on the spot. Scan payments go through an upstream gateway
//! and may finish later.
//!
//! ## Scan Payment Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  scan_paid                                                              │
//! │    classify auth-code ──► GatewayKind (wallet codes rejected)           │
//! │    validate amount, callback URLs                                       │
//! │    seq_no ◄── "PAY:{store}:{date}"                                      │
//! │    open PENDING attempt ──► versioned write                             │
//! │    dispatch (timeout) ──┬── Unavailable / Rejected ──► discard attempt  │
//! │                         ├── timeout ──► stays PENDING, poll later       │
//! │                         ├── immediate outcome ──► Coordinator           │
//! │                         └── accepted ──► record external_ref            │
//! │                                                                         │
//! │  Later:   webhook ──► CallbackWorker ──► Coordinator                    │
//! │           poll_and_reconcile ──► gateway.query ──► Coordinator          │
//! │           sweep (worker) ──► gateway.query ──► Coordinator              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No database transaction or lock is held while a gateway call is in
//! flight.

use std::sync::Arc;
use std::time::Duration;

use bistro_core::auth_code::resolve_gateway;
use bistro_core::numbering;
use bistro_core::order::ScanAttempt;
use bistro_core::{GatewayKind, Money, OperatorContext, Order, OutcomeSource, PayState, PollResult};
use bistro_db::Database;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::config::{parse_http_url, SettleConfig};
use crate::error::{SettleError, SettleResult};
use crate::gateway::DispatchRequest;
use crate::reconcile::ReconcileCoordinator;
use crate::sequence::SequenceGenerator;

/// A scan payment request from the register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPayRequest {
    pub order_no: String,
    pub amount: Money,
    pub auth_code: String,
    #[serde(default)]
    pub client_ip: Option<String>,
    /// Overrides the configured callback URL.
    #[serde(default)]
    pub notify_url: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
    /// Gateway the cashier selected, if any; the code must match it.
    #[serde(default)]
    pub expected_gateway: Option<GatewayKind>,
    /// Overrides the configured dispatch timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Cash and scan settlement.
#[derive(Clone)]
pub struct SettlementService {
    db: Database,
    catalog: Arc<dyn Catalog>,
    sequences: Arc<dyn SequenceGenerator>,
    coordinator: Arc<ReconcileCoordinator>,
    config: Arc<SettleConfig>,
}

impl SettlementService {
    pub fn new(
        db: Database,
        catalog: Arc<dyn Catalog>,
        sequences: Arc<dyn SequenceGenerator>,
        coordinator: Arc<ReconcileCoordinator>,
        config: Arc<SettleConfig>,
    ) -> Self {
        SettlementService {
            db,
            catalog,
            sequences,
            coordinator,
            config,
        }
    }

    /// Settles the amount due in cash; `tendered` above it becomes change.
    ///
    /// ## Errors
    /// - `InvalidInput` if `tendered` is short or the order is already paid
    /// - `InvalidState` unless PLACED
    /// - `Conflict` while a scan attempt is open
    pub async fn cash_paid(
        &self,
        order_no: &str,
        tendered: Money,
        op: &OperatorContext,
    ) -> SettleResult<Order> {
        let mut order = self.load(order_no).await?;
        let seq_no = self.next_seq_no(&order.store_id).await?;

        order.settle_cash(&seq_no, tendered, op)?;
        self.db.orders().update(&mut order).await?;

        let change = order
            .payment(&seq_no)
            .and_then(|p| p.change)
            .unwrap_or_default();
        info!(
            %order_no,
            %seq_no,
            %tendered,
            %change,
            status = %order.status,
            "Cash payment settled"
        );
        Ok(order)
    }

    /// Opens a scan attempt and dispatches it. Returns the attempt as the
    /// register should show it; PENDING means "poll with this seq_no".
    ///
    /// ## Errors
    /// - `InvalidInput` for a bad or unsupported auth-code, a channel
    ///   mismatch, an amount outside `1..=due`, or a bad callback URL
    /// - `Conflict` if a scan attempt is already open
    /// - `Unavailable` if the gateway could not take the request; nothing
    ///   stays recorded
    pub async fn scan_paid(
        &self,
        request: ScanPayRequest,
        op: &OperatorContext,
    ) -> SettleResult<PollResult> {
        let gateway_kind = resolve_gateway(
            &request.auth_code,
            &self.config.scan.auth_code,
            request.expected_gateway,
            &self.config.gateway.enabled,
        )?;
        let notify_url = request
            .notify_url
            .clone()
            .unwrap_or_else(|| self.config.scan.callback_url.clone());
        parse_http_url(&notify_url)?;
        if let Some(return_url) = request.return_url.as_deref() {
            parse_http_url(return_url)?;
        }
        let gateway = self.coordinator.router().get(gateway_kind)?;

        let mut order = self.load(&request.order_no).await?;
        let seq_no = self.next_seq_no(&order.store_id).await?;
        order.open_scan_payment(
            ScanAttempt {
                seq_no: seq_no.clone(),
                gateway: gateway_kind,
                amount: request.amount,
                client_ip: request.client_ip.clone(),
            },
            op,
        )?;
        self.db.orders().update(&mut order).await?;
        info!(
            order_no = %order.order_no,
            %seq_no,
            gateway = %gateway_kind,
            amount = %request.amount,
            "Scan attempt opened"
        );

        let dispatch = DispatchRequest {
            seq_no: seq_no.clone(),
            order_no: order.order_no.clone(),
            store_id: order.store_id.clone(),
            auth_code: request.auth_code.trim().to_string(),
            amount: request.amount,
            client_ip: request.client_ip,
            notify_url,
            return_url: request.return_url,
        };
        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.gateway.dispatch_timeout());

        match tokio::time::timeout(timeout, gateway.dispatch(&dispatch)).await {
            Err(_) => {
                warn!(%seq_no, ?timeout, "Dispatch timed out, attempt stays pending");
            }
            Ok(Err(e)) => {
                warn!(%seq_no, error = %e, "Dispatch failed, discarding attempt");
                if let Err(discard_err) = self.discard(&seq_no, op).await {
                    warn!(
                        %seq_no,
                        error = %discard_err,
                        "Discard failed, attempt left for the pending sweep"
                    );
                }
                return Err(e.into());
            }
            Ok(Ok(receipt)) => {
                if let Some(outcome) = receipt.immediate {
                    debug!(%seq_no, outcome = ?outcome.outcome, "Gateway answered at dispatch");
                    self.coordinator
                        .apply_outcome(outcome.into_report(&seq_no, OutcomeSource::Dispatch))
                        .await?;
                } else if let Some(external_ref) = receipt.external_ref {
                    self.attach_external_ref(&seq_no, &external_ref).await;
                }
            }
        }

        self.pay_polling(&seq_no).await
    }

    /// Reads the current state of an attempt. Pure read.
    pub async fn pay_polling(&self, seq_no: &str) -> SettleResult<PollResult> {
        let order = self
            .db
            .orders()
            .find_by_seq_no(seq_no)
            .await?
            .ok_or_else(|| SettleError::not_found("Payment", seq_no))?;
        order
            .poll_result(seq_no)
            .ok_or_else(|| SettleError::not_found("Payment", seq_no))
    }

    /// Client polling path: asks upstream about a PENDING attempt, applies
    /// a definitive answer, then reads. Gateway trouble leaves the attempt
    /// PENDING and is only logged.
    pub async fn poll_and_reconcile(
        &self,
        seq_no: &str,
        timeout: Option<Duration>,
    ) -> SettleResult<PollResult> {
        let current = self.pay_polling(seq_no).await?;
        if current.state != PayState::Pending {
            return Ok(current);
        }

        let timeout = timeout.unwrap_or_else(|| self.config.gateway.query_timeout());
        match self
            .coordinator
            .query_and_apply(seq_no, OutcomeSource::Polling, timeout)
            .await
        {
            Ok(Some(applied)) => debug!(%seq_no, ?applied, "Polling reconciled attempt"),
            Ok(None) => debug!(%seq_no, "Upstream still pending"),
            Err(e) => warn!(%seq_no, error = %e, "Polling query failed"),
        }

        self.pay_polling(seq_no).await
    }

    /// Business date and store code decide the seq_no.
    async fn next_seq_no(&self, store_id: &str) -> SettleResult<String> {
        let store = self.catalog.store(store_id).await?;
        let date = self.config.business.today();
        let seq = self
            .sequences
            .next(&numbering::payment_scope(&store.id, date))
            .await?;
        Ok(numbering::payment_seq_no(&store.code, date, seq))
    }

    async fn load(&self, order_no: &str) -> SettleResult<Order> {
        self.db
            .orders()
            .get_by_no(order_no)
            .await?
            .ok_or_else(|| SettleError::not_found("Order", order_no))
    }

    /// Removes an attempt the gateway never took, retrying on a stale read.
    async fn discard(&self, seq_no: &str, op: &OperatorContext) -> SettleResult<()> {
        let orders = self.db.orders();
        let retries = self.config.worker.reconcile_retries;
        let mut attempt = 0;
        loop {
            let Some(mut order) = orders.find_by_seq_no(seq_no).await? else {
                return Ok(());
            };
            if order.payment(seq_no).map(|p| p.is_pending_scan()) != Some(true) {
                // Someone already settled it
                return Ok(());
            }
            order.discard_pending_payment(seq_no, op)?;
            match orders.update(&mut order).await {
                Ok(()) => {
                    info!(%seq_no, order_no = %order.order_no, "Scan attempt discarded");
                    return Ok(());
                }
                Err(e) if e.is_stale() && attempt < retries => attempt += 1,
                Err(e) => {
                    error!(%seq_no, error = %e, "Could not discard scan attempt");
                    return Err(e.into());
                }
            }
        }
    }

    /// Best effort: a lost external_ref only costs the gateway a lookup by
    /// seq_no.
    async fn attach_external_ref(&self, seq_no: &str, external_ref: &str) {
        let orders = self.db.orders();
        let retries = self.config.worker.reconcile_retries;
        for _ in 0..=retries {
            let mut order = match orders.find_by_seq_no(seq_no).await {
                Ok(Some(order)) => order,
                Ok(None) => return,
                Err(e) => {
                    warn!(%seq_no, error = %e, "Could not load attempt for external_ref");
                    return;
                }
            };
            if order.attach_external_ref(seq_no, external_ref).is_err() {
                return;
            }
            match orders.update(&mut order).await {
                Ok(()) => return,
                Err(e) if e.is_stale() => continue,
                Err(e) => {
                    warn!(%seq_no, error = %e, "Could not record external_ref");
                    return;
                }
            }
        }
    }
}
