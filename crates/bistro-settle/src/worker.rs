//! # Callback Worker
//!
//! Applies gateway webhooks off the request path and sweeps scan attempts
//! that have stayed PENDING too long.
//!
//! ## Worker Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Callback Worker Flow                              │
//! │                                                                         │
//! │  webhook ──► PaymentCallback::from_webhook                              │
//! │                    │                                                    │
//! │                    ▼                                                    │
//! │  CallbackWorkerHandle.submit ──► bounded queue (full ⇒ Unavailable)     │
//! │                                       │                                 │
//! │  ┌────────────────────────────────────▼────────────────────────────┐   │
//! │  │                    CallbackWorker::run                          │   │
//! │  │                                                                 │   │
//! │  │  job      ──► Coordinator.apply_outcome (source = callback)     │   │
//! │  │  tick     ──► sweep: PENDING older than pending_age_secs        │   │
//! │  │               ──► Coordinator.query_and_apply (source = sweep)  │   │
//! │  │  shutdown ──► drain queued jobs, stop                           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  TIMING:                                                               │
//! │  • Sweep interval: 30 seconds (configurable)                           │
//! │  • Pending age: 60 seconds (configurable)                              │
//! │  • Sweep batch: 50 attempts (configurable)                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use bistro_core::order::OutcomeReport;
use bistro_core::{Money, OutcomeApplied, OutcomeSource, PayOutcome, ValidationError};
use bistro_db::Database;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::SettleConfig;
use crate::error::{SettleError, SettleResult};
use crate::gateway::StatusBody;
use crate::reconcile::ReconcileCoordinator;

// =============================================================================
// Callback Job
// =============================================================================

/// A definitive outcome reported by a gateway webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCallback {
    pub seq_no: String,
    pub outcome: PayOutcome,
    /// `None` means "the attempt amount".
    pub amount: Option<Money>,
    pub external_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub raw_payload: String,
}

impl PaymentCallback {
    /// Parses a webhook body. `Ok(None)` for a pending notice, which carries
    /// nothing to apply.
    ///
    /// ## Errors
    /// `InvalidInput` for a body that is not a status document or lacks a
    /// seq_no.
    pub fn from_webhook(raw: &str) -> SettleResult<Option<PaymentCallback>> {
        let body: StatusBody = serde_json::from_str(raw).map_err(|e| {
            SettleError::from(ValidationError::InvalidFormat {
                field: "webhook body".to_string(),
                reason: e.to_string(),
            })
        })?;
        let seq_no = body
            .seq_no
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ValidationError::Required {
                field: "seq_no".to_string(),
            })?;
        let amount = body.amount.map(Money::from_cents);

        // The expected amount only fills a missing SUCCESS amount, which
        // `amount` already records as None.
        Ok(body.outcome(Money::zero(), raw).map(|outcome| PaymentCallback {
            seq_no,
            outcome: outcome.outcome,
            amount,
            external_ref: outcome.external_ref,
            failure_reason: outcome.failure_reason,
            raw_payload: raw.to_string(),
        }))
    }
}

// =============================================================================
// Callback Worker
// =============================================================================

/// Background task applying webhooks and sweeping stale attempts.
pub struct CallbackWorker {
    db: Database,
    coordinator: Arc<ReconcileCoordinator>,
    config: Arc<SettleConfig>,

    /// Queued webhooks.
    jobs_rx: mpsc::Receiver<PaymentCallback>,

    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for feeding and stopping the worker.
#[derive(Clone)]
pub struct CallbackWorkerHandle {
    jobs_tx: mpsc::Sender<PaymentCallback>,
    shutdown_tx: mpsc::Sender<()>,
}

impl CallbackWorkerHandle {
    /// Queues a webhook without waiting.
    ///
    /// ## Errors
    /// `QueueFull` or `ShuttingDown`, both `Unavailable`: the gateway should
    /// redeliver.
    pub fn submit(&self, callback: PaymentCallback) -> SettleResult<()> {
        self.jobs_tx.try_send(callback).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SettleError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SettleError::ShuttingDown,
        })
    }

    /// Triggers graceful shutdown. Jobs already queued are still applied.
    pub async fn shutdown(&self) -> SettleResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SettleError::ChannelError("Shutdown channel closed".into()))
    }
}

impl CallbackWorker {
    /// Creates the worker and its handle.
    pub fn new(
        db: Database,
        coordinator: Arc<ReconcileCoordinator>,
        config: Arc<SettleConfig>,
    ) -> (Self, CallbackWorkerHandle) {
        let (jobs_tx, jobs_rx) = mpsc::channel(config.worker.queue_size.max(1));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let worker = CallbackWorker {
            db,
            coordinator,
            config,
            jobs_rx,
            shutdown_rx,
        };
        let handle = CallbackWorkerHandle {
            jobs_tx,
            shutdown_tx,
        };

        (worker, handle)
    }

    /// Runs the worker loop. Spawn it as a background task.
    pub async fn run(mut self) {
        info!("Callback worker starting");

        let sweep_interval = Duration::from_secs(self.config.worker.sweep_interval_secs.max(1));
        let mut interval = tokio::time::interval(sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(0) => {}
                        Ok(applied) => info!(applied, "Sweep settled stale attempts"),
                        Err(e) => error!(?e, "Failed to sweep pending attempts"),
                    }
                }

                Some(callback) = self.jobs_rx.recv() => {
                    self.apply_logged(callback).await;
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Callback worker shutting down");
                    break;
                }
            }
        }

        self.jobs_rx.close();
        while let Ok(callback) = self.jobs_rx.try_recv() {
            self.apply_logged(callback).await;
        }

        info!("Callback worker stopped");
    }

    /// Applies one webhook.
    pub async fn handle_callback(&self, callback: PaymentCallback) -> SettleResult<OutcomeApplied> {
        let amount = match callback.amount {
            Some(amount) => amount,
            None => self.attempt_amount(&callback.seq_no).await?,
        };
        self.coordinator
            .apply_outcome(OutcomeReport {
                seq_no: callback.seq_no,
                outcome: callback.outcome,
                amount,
                external_ref: callback.external_ref,
                failure_reason: callback.failure_reason,
                raw_payload: Some(callback.raw_payload),
                source: OutcomeSource::Callback,
            })
            .await
    }

    /// Queries upstream for attempts PENDING longer than the configured age.
    /// Returns how many were settled.
    pub async fn sweep_once(&self) -> SettleResult<usize> {
        let worker = &self.config.worker;
        let cutoff = Utc::now() - chrono::Duration::seconds(worker.pending_age_secs as i64);
        let stale = self
            .db
            .orders()
            .list_stale_pending_scans(cutoff, worker.sweep_batch)
            .await?;
        if stale.is_empty() {
            return Ok(0);
        }
        debug!(count = stale.len(), "Sweeping stale scan attempts");

        let timeout = self.config.gateway.query_timeout();
        let mut applied = 0;
        for scan in stale {
            match self
                .coordinator
                .query_and_apply(&scan.seq_no, OutcomeSource::Sweep, timeout)
                .await
            {
                Ok(Some(OutcomeApplied::Duplicate)) | Ok(None) => {}
                Ok(Some(_)) => applied += 1,
                Err(e) => warn!(
                    seq_no = %scan.seq_no,
                    order_no = %scan.order_no,
                    error = %e,
                    "Sweep query failed"
                ),
            }
        }
        Ok(applied)
    }

    async fn apply_logged(&self, callback: PaymentCallback) {
        let seq_no = callback.seq_no.clone();
        if let Err(e) = self.handle_callback(callback).await {
            error!(%seq_no, ?e, "Failed to apply payment callback");
        }
    }

    async fn attempt_amount(&self, seq_no: &str) -> SettleResult<Money> {
        self.db
            .orders()
            .find_by_seq_no(seq_no)
            .await?
            .and_then(|order| order.payment(seq_no).map(|p| p.amount))
            .ok_or_else(|| SettleError::not_found("Payment", seq_no))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::gateway::{GatewayOutcome, MemoryGateway};
    use crate::orders::{CreateOrderRequest, LineRequest, OrderService};
    use crate::sequence::SequenceGenerator;
    use crate::settlement::{ScanPayRequest, SettlementService};
    use crate::testing::{cashier, memory_router, offline_config, seeded_db, NOODLES};
    use bistro_core::{ErrorKind, OrderStatus, PayState};

    struct Fixture {
        db: Database,
        coordinator: Arc<ReconcileCoordinator>,
        settlement: SettlementService,
        orders: OrderService,
        generic: Arc<MemoryGateway>,
        config: Arc<SettleConfig>,
    }

    async fn fixture(config: Arc<SettleConfig>) -> Fixture {
        let db = seeded_db().await;
        let (router, generic, _) = memory_router();
        let catalog: Arc<dyn Catalog> = Arc::new(db.catalog());
        let sequences: Arc<dyn SequenceGenerator> = Arc::new(db.sequences());
        let coordinator = Arc::new(ReconcileCoordinator::new(db.clone(), router, 3));
        Fixture {
            orders: OrderService::new(
                db.clone(),
                catalog.clone(),
                sequences.clone(),
                config.business.clone(),
            ),
            settlement: SettlementService::new(
                db.clone(),
                catalog,
                sequences,
                coordinator.clone(),
                config.clone(),
            ),
            db,
            coordinator,
            generic,
            config,
        }
    }

    /// Opens a 49.00 order and a PENDING scan for all of it.
    async fn pending_scan(f: &Fixture) -> String {
        let order = f
            .orders
            .create_order(
                CreateOrderRequest {
                    table_id: Some("T1".into()),
                    people: 2,
                    shift_id: None,
                    items: vec![LineRequest::new(NOODLES, 2)],
                    tax_rates: vec![],
                    fees: vec![],
                },
                &cashier(),
            )
            .await
            .unwrap();
        f.settlement
            .scan_paid(
                ScanPayRequest {
                    order_no: order.order_no,
                    amount: Money::from_cents(4900),
                    auth_code: "134567890123456789".into(),
                    client_ip: None,
                    notify_url: None,
                    return_url: None,
                    expected_gateway: None,
                    timeout_ms: None,
                },
                &cashier(),
            )
            .await
            .unwrap()
            .seq_no
    }

    fn webhook(seq_no: &str, status: &str) -> String {
        format!(r#"{{"seq_no":"{}","status":"{}","external_ref":"tx-1"}}"#, seq_no, status)
    }

    #[test]
    fn test_from_webhook() {
        let pending = PaymentCallback::from_webhook(&webhook("P1", "pending")).unwrap();
        assert!(pending.is_none());

        let raw = r#"{"seq_no":"P1","status":"failed","amount":4900,"failure_reason":"expired"}"#;
        let failed = PaymentCallback::from_webhook(raw).unwrap().unwrap();
        assert_eq!(failed.outcome, PayOutcome::Failed);
        assert_eq!(failed.amount, Some(Money::from_cents(4900)));
        assert_eq!(failed.failure_reason.as_deref(), Some("expired"));
        assert_eq!(failed.raw_payload, raw);

        let no_amount = PaymentCallback::from_webhook(&webhook("P1", "success")).unwrap().unwrap();
        assert_eq!(no_amount.amount, None);

        let err = PaymentCallback::from_webhook(r#"{"status":"success"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = PaymentCallback::from_webhook("not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_queued_callbacks_applied_before_stop() {
        let f = fixture(offline_config()).await;
        let seq_no = pending_scan(&f).await;

        let (worker, handle) = CallbackWorker::new(f.db.clone(), f.coordinator.clone(), f.config.clone());
        let task = tokio::spawn(worker.run());

        let callback = PaymentCallback::from_webhook(&webhook(&seq_no, "success")).unwrap().unwrap();
        handle.submit(callback.clone()).unwrap();
        // Redelivery is harmless
        handle.submit(callback).unwrap();
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        let polled = f.settlement.pay_polling(&seq_no).await.unwrap();
        assert_eq!(polled.state, PayState::Success);
        assert_eq!(polled.order_status, OrderStatus::Completed);

        let stopped = PaymentCallback::from_webhook(&webhook(&seq_no, "success")).unwrap().unwrap();
        assert!(matches!(handle.submit(stopped), Err(SettleError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_submit_reports_full_queue() {
        let mut config = (*offline_config()).clone();
        config.worker.queue_size = 1;
        let f = fixture(Arc::new(config)).await;

        // Worker not running, so nothing drains the queue
        let (_worker, handle) = CallbackWorker::new(f.db.clone(), f.coordinator.clone(), f.config.clone());
        let callback = PaymentCallback::from_webhook(&webhook("P1", "failed")).unwrap().unwrap();
        handle.submit(callback.clone()).unwrap();
        let err = handle.submit(callback).unwrap_err();
        assert!(matches!(err, SettleError::QueueFull));
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_handle_callback_rules() {
        let f = fixture(offline_config()).await;
        let seq_no = pending_scan(&f).await;
        let (worker, _handle) = CallbackWorker::new(f.db.clone(), f.coordinator.clone(), f.config.clone());

        let success = PaymentCallback::from_webhook(&webhook(&seq_no, "success")).unwrap().unwrap();
        assert_eq!(
            worker.handle_callback(success.clone()).await.unwrap(),
            OutcomeApplied::Settled { completed: true }
        );
        assert_eq!(worker.handle_callback(success).await.unwrap(), OutcomeApplied::Duplicate);

        let failed = PaymentCallback::from_webhook(&webhook(&seq_no, "failed")).unwrap().unwrap();
        let err = worker.handle_callback(failed).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(f.settlement.pay_polling(&seq_no).await.unwrap().state, PayState::Success);

        let unknown = PaymentCallback::from_webhook(&webhook("nope", "success")).unwrap().unwrap();
        let err = worker.handle_callback(unknown).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_sweep_settles_stale_attempts() {
        let mut config = (*offline_config()).clone();
        config.worker.pending_age_secs = 0;
        let f = fixture(Arc::new(config)).await;
        let seq_no = pending_scan(&f).await;
        let (worker, _handle) = CallbackWorker::new(f.db.clone(), f.coordinator.clone(), f.config.clone());
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Upstream has no answer yet
        assert_eq!(worker.sweep_once().await.unwrap(), 0);
        assert_eq!(f.generic.query_count().await, 1);

        f.generic
            .settle(
                &seq_no,
                GatewayOutcome {
                    outcome: PayOutcome::Failed,
                    amount: Money::from_cents(4900),
                    external_ref: None,
                    failure_reason: Some("expired".into()),
                    raw_payload: None,
                },
            )
            .await;
        assert_eq!(worker.sweep_once().await.unwrap(), 1);

        let polled = f.settlement.pay_polling(&seq_no).await.unwrap();
        assert_eq!(polled.state, PayState::Failed);
        assert_eq!(polled.order_status, OrderStatus::Placed);

        // Nothing left pending
        assert_eq!(worker.sweep_once().await.unwrap(), 0);
        assert_eq!(f.generic.query_count().await, 2);
    }
}
