//! # Payment Gateways
//!
//! A scan payment is settled by one of two upstream gateways, picked by the
//! auth-code the customer presented. Both speak the same contract.
//!
//! ## Gateway Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        PaymentGateway                                   │
//! │                                                                         │
//! │  dispatch(DispatchRequest) ──► DispatchReceipt                          │
//! │     • external_ref   gateway transaction id (if assigned)               │
//! │     • immediate      Some(outcome) when settled on the spot             │
//! │                      None when the result arrives later                 │
//! │                                                                         │
//! │  query(seq_no, external_ref) ──► Option<GatewayOutcome>                 │
//! │     • None           still pending upstream                             │
//! │                                                                         │
//! │  Errors: Unavailable (transport / 5xx), Rejected (4xx),                 │
//! │          InvalidResponse (body did not decode)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//!
//!   GatewayRouter
//!   ┌──────────────────┬──────────────────────────────┐
//!   │ Generic          │ HttpGateway / MemoryGateway  │
//!   │ LoyaltyPoints    │ HttpGateway / MemoryGateway  │
//!   └──────────────────┴──────────────────────────────┘
//! ```

pub mod http;
pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bistro_core::order::OutcomeReport;
use bistro_core::{ErrorKind, GatewayKind, Money, OutcomeSource, PayOutcome};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{GatewayMode, GatewaySettings};
use crate::error::SettleResult;

pub use http::HttpGateway;
pub use memory::{DispatchBehavior, MemoryGateway};

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The gateway could not be reached or failed on its side.
    #[error("{0} gateway unavailable: {1}")]
    Unavailable(GatewayKind, String),

    /// The gateway refused the request.
    #[error("{0} gateway rejected the request: {1}")]
    Rejected(GatewayKind, String),

    /// The gateway answered with something we could not read.
    #[error("{0} gateway sent an invalid response: {1}")]
    InvalidResponse(GatewayKind, String),

    /// No gateway is registered for this kind.
    #[error("{0} gateway is not configured")]
    NotConfigured(GatewayKind),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Rejected(..) => ErrorKind::InvalidInput,
            GatewayError::Unavailable(..)
            | GatewayError::InvalidResponse(..)
            | GatewayError::NotConfigured(_) => ErrorKind::Unavailable,
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// What we send to open a scan payment upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub seq_no: String,
    pub order_no: String,
    pub store_id: String,
    pub auth_code: String,
    pub amount: Money,
    pub client_ip: Option<String>,
    /// Where the gateway posts the asynchronous outcome.
    pub notify_url: String,
    pub return_url: Option<String>,
}

/// A definitive upstream result for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOutcome {
    pub outcome: PayOutcome,
    pub amount: Money,
    pub external_ref: Option<String>,
    pub failure_reason: Option<String>,
    /// The body exactly as received, kept for audit.
    pub raw_payload: Option<String>,
}

impl GatewayOutcome {
    /// Converts into the report the order aggregate applies.
    pub fn into_report(self, seq_no: &str, source: OutcomeSource) -> OutcomeReport {
        OutcomeReport {
            seq_no: seq_no.to_string(),
            outcome: self.outcome,
            amount: self.amount,
            external_ref: self.external_ref,
            failure_reason: self.failure_reason,
            raw_payload: self.raw_payload,
            source,
        }
    }
}

/// Answer to a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DispatchReceipt {
    pub external_ref: Option<String>,
    pub immediate: Option<GatewayOutcome>,
}

/// Status body shared by dispatch responses, query responses and webhooks.
///
/// ```json
/// {"seq_no": "S0012024031500000001", "status": "success",
///  "amount": 4900, "external_ref": "tx-88", "failure_reason": null}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBody {
    #[serde(default)]
    pub seq_no: Option<String>,
    pub status: WireStatus,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub external_ref: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireStatus {
    Pending,
    Success,
    Failed,
}

impl StatusBody {
    /// The definitive outcome, or `None` while pending. A SUCCESS without an
    /// amount is taken to cover `expected`.
    pub fn outcome(&self, expected: Money, raw: &str) -> Option<GatewayOutcome> {
        let outcome = match self.status {
            WireStatus::Pending => return None,
            WireStatus::Success => PayOutcome::Success,
            WireStatus::Failed => PayOutcome::Failed,
        };
        Some(GatewayOutcome {
            outcome,
            amount: self.amount.map(Money::from_cents).unwrap_or(expected),
            external_ref: self.external_ref.clone(),
            failure_reason: self.failure_reason.clone(),
            raw_payload: Some(raw.to_string()),
        })
    }
}

// =============================================================================
// Gateway Trait
// =============================================================================

/// One upstream payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    /// Opens the payment upstream. Timeouts are the caller's business.
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, GatewayError>;

    /// Asks for the current result of an attempt. `expected` is the attempt
    /// amount.
    async fn query(
        &self,
        seq_no: &str,
        external_ref: Option<&str>,
        expected: Money,
    ) -> Result<Option<GatewayOutcome>, GatewayError>;
}

// =============================================================================
// Router
// =============================================================================

/// Picks the gateway for a [`GatewayKind`].
#[derive(Clone, Default)]
pub struct GatewayRouter {
    gateways: HashMap<GatewayKind, Arc<dyn PaymentGateway>>,
}

impl std::fmt::Debug for GatewayRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRouter")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl GatewayRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `gateway` under its own kind, replacing any previous one.
    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.kind(), gateway);
        self
    }

    /// Builds the router the configuration describes.
    pub fn from_settings(settings: &GatewaySettings) -> SettleResult<Self> {
        let mut router = GatewayRouter::new();
        for kind in &settings.enabled {
            let gateway: Arc<dyn PaymentGateway> = match settings.mode {
                GatewayMode::Http => {
                    let base = settings
                        .base_url(*kind)
                        .ok_or(GatewayError::NotConfigured(*kind))?;
                    Arc::new(HttpGateway::new(*kind, base)?)
                }
                GatewayMode::Offline => Arc::new(MemoryGateway::new(*kind)),
            };
            router = router.with(gateway);
        }
        Ok(router)
    }

    pub fn get(&self, kind: GatewayKind) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        self.gateways
            .get(&kind)
            .cloned()
            .ok_or(GatewayError::NotConfigured(kind))
    }

    pub fn kinds(&self) -> Vec<GatewayKind> {
        let mut kinds: Vec<GatewayKind> = self.gateways.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}
