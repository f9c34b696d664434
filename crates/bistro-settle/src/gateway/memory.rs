//! # In-Process Gateway
//!
//! Offline mode and tests. Each dispatch follows a scripted
//! [`DispatchBehavior`]; upstream results can be set later with
//! [`MemoryGateway::settle`] and are then returned by `query`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bistro_core::{GatewayKind, Money, PayOutcome};
use tokio::sync::Mutex;
use tracing::debug;

use super::{DispatchReceipt, DispatchRequest, GatewayError, GatewayOutcome, PaymentGateway};

/// How the next dispatch is answered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DispatchBehavior {
    /// Accepted, result follows later.
    #[default]
    Pending,
    /// Settled on the spot.
    Approve,
    /// Declined on the spot.
    Decline(String),
    /// Transport failure; nothing was opened upstream.
    Unavailable,
    /// Never answers within any sane deadline.
    Hang,
}

#[derive(Debug, Default)]
struct State {
    behavior: DispatchBehavior,
    dispatched: Vec<DispatchRequest>,
    results: HashMap<String, GatewayOutcome>,
    queries: usize,
}

/// Scriptable [`PaymentGateway`].
#[derive(Debug)]
pub struct MemoryGateway {
    kind: GatewayKind,
    state: Mutex<State>,
}

impl MemoryGateway {
    pub fn new(kind: GatewayKind) -> Self {
        MemoryGateway {
            kind,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_behavior(kind: GatewayKind, behavior: DispatchBehavior) -> Self {
        MemoryGateway {
            kind,
            state: Mutex::new(State {
                behavior,
                ..State::default()
            }),
        }
    }

    pub async fn set_behavior(&self, behavior: DispatchBehavior) {
        self.state.lock().await.behavior = behavior;
    }

    /// Records the upstream result `query` will report for `seq_no`.
    pub async fn settle(&self, seq_no: &str, outcome: GatewayOutcome) {
        self.state
            .lock()
            .await
            .results
            .insert(seq_no.to_string(), outcome);
    }

    /// Every request dispatched so far.
    pub async fn dispatched(&self) -> Vec<DispatchRequest> {
        self.state.lock().await.dispatched.clone()
    }

    pub async fn query_count(&self) -> usize {
        self.state.lock().await.queries
    }

    fn external_ref(seq_no: &str) -> String {
        format!("mem-{}", seq_no)
    }
}

#[async_trait]
impl PaymentGateway for MemoryGateway {
    fn kind(&self) -> GatewayKind {
        self.kind
    }

    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, GatewayError> {
        let behavior = {
            let mut state = self.state.lock().await;
            state.dispatched.push(request.clone());
            state.behavior.clone()
        };
        debug!(gateway = %self.kind, seq_no = %request.seq_no, ?behavior, "Memory dispatch");

        let external_ref = Some(Self::external_ref(&request.seq_no));
        match behavior {
            DispatchBehavior::Pending => Ok(DispatchReceipt {
                external_ref,
                immediate: None,
            }),
            DispatchBehavior::Approve => Ok(DispatchReceipt {
                external_ref: external_ref.clone(),
                immediate: Some(GatewayOutcome {
                    outcome: PayOutcome::Success,
                    amount: request.amount,
                    external_ref,
                    failure_reason: None,
                    raw_payload: None,
                }),
            }),
            DispatchBehavior::Decline(reason) => Ok(DispatchReceipt {
                external_ref: external_ref.clone(),
                immediate: Some(GatewayOutcome {
                    outcome: PayOutcome::Failed,
                    amount: request.amount,
                    external_ref,
                    failure_reason: Some(reason),
                    raw_payload: None,
                }),
            }),
            DispatchBehavior::Unavailable => Err(GatewayError::Unavailable(
                self.kind,
                "connection refused".to_string(),
            )),
            DispatchBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                Err(GatewayError::Unavailable(self.kind, "hung".to_string()))
            }
        }
    }

    async fn query(
        &self,
        seq_no: &str,
        _external_ref: Option<&str>,
        _expected: Money,
    ) -> Result<Option<GatewayOutcome>, GatewayError> {
        let mut state = self.state.lock().await;
        state.queries += 1;
        Ok(state.results.get(seq_no).cloned())
    }
}
