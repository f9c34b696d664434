//! # HTTP Gateway Client
//!
//! JSON-over-HTTP client for an upstream gateway.
//!
//! ```text
//!   POST {base}/payments            DispatchRequest ──► StatusBody
//!   GET  {base}/payments/{seq_no}   ?external_ref=…  ──► StatusBody
//!
//!   2xx ──► decode StatusBody        4xx ──► Rejected
//!   5xx / transport ──► Unavailable  bad JSON ──► InvalidResponse
//! ```

use async_trait::async_trait;
use bistro_core::{GatewayKind, Money};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};
use url::Url;

use super::{DispatchReceipt, DispatchRequest, GatewayError, GatewayOutcome, PaymentGateway, StatusBody};
use crate::config::parse_http_url;
use crate::error::SettleResult;

/// reqwest-backed [`PaymentGateway`].
#[derive(Debug, Clone)]
pub struct HttpGateway {
    kind: GatewayKind,
    base: Url,
    client: Client,
}

impl HttpGateway {
    /// `base` must be an http(s) URL; a trailing slash is added if missing
    /// so relative joins stay under it.
    pub fn new(kind: GatewayKind, base: &str) -> SettleResult<Self> {
        let mut base = parse_http_url(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(HttpGateway {
            kind,
            base,
            client: Client::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base
            .join(path)
            .map_err(|e| GatewayError::Rejected(self.kind, e.to_string()))
    }

    /// Maps status codes, then returns the raw body and its decoded form.
    async fn read(&self, response: Response) -> Result<(String, StatusBody), GatewayError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(self.kind, e.to_string()))?;

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::Unavailable(
                self.kind,
                format!("HTTP {}: {}", status, text),
            ));
        }
        if !status.is_success() {
            return Err(GatewayError::Rejected(
                self.kind,
                format!("HTTP {}: {}", status, text),
            ));
        }

        let body: StatusBody = serde_json::from_str(&text)
            .map_err(|e| GatewayError::InvalidResponse(self.kind, e.to_string()))?;
        Ok((text, body))
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    fn kind(&self) -> GatewayKind {
        self.kind
    }

    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, GatewayError> {
        let url = self.endpoint("payments")?;
        debug!(gateway = %self.kind, seq_no = %request.seq_no, %url, "Dispatching scan payment");

        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(self.kind, e.to_string()))?;

        let (raw, body) = self.read(response).await?;
        if let Some(seq_no) = &body.seq_no {
            if seq_no != &request.seq_no {
                warn!(expected = %request.seq_no, got = %seq_no, "Gateway echoed a different seq_no");
                return Err(GatewayError::InvalidResponse(
                    self.kind,
                    format!("answer for {} while dispatching {}", seq_no, request.seq_no),
                ));
            }
        }

        Ok(DispatchReceipt {
            external_ref: body.external_ref.clone(),
            immediate: body.outcome(request.amount, &raw),
        })
    }

    async fn query(
        &self,
        seq_no: &str,
        external_ref: Option<&str>,
        expected: Money,
    ) -> Result<Option<GatewayOutcome>, GatewayError> {
        let mut url = self.endpoint(&format!("payments/{}", seq_no))?;
        if let Some(external_ref) = external_ref {
            url.query_pairs_mut().append_pair("external_ref", external_ref);
        }
        debug!(gateway = %self.kind, %seq_no, "Querying scan payment");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(self.kind, e.to_string()))?;

        let (raw, body) = self.read(response).await?;
        Ok(body.outcome(expected, &raw))
    }
}
