//! # Auth-Code Classification
//!
//! The customer shows a barcode; the cashier scans it. The digits alone
//! decide which gateway settles the payment.
//!
//! ```text
//!   scanned code ──► classify() ──┬── Generic        ──► GatewayKind::Generic
//!                                 ├── LoyaltyPoints  ──► GatewayKind::LoyaltyPoints
//!                                 └── LoyaltyWallet  ──► rejected (unsupported)
//! ```
//!
//! Loyalty codes are recognised by prefix; everything else that looks like a
//! scan code is a generic third-party code.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::GatewayKind;

/// What a scanned code turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthCodeClass {
    Generic,
    LoyaltyPoints,
    LoyaltyWallet,
}

impl AuthCodeClass {
    /// The gateway that settles this class of code.
    pub fn gateway(&self) -> CoreResult<GatewayKind> {
        match self {
            AuthCodeClass::Generic => Ok(GatewayKind::Generic),
            AuthCodeClass::LoyaltyPoints => Ok(GatewayKind::LoyaltyPoints),
            AuthCodeClass::LoyaltyWallet => Err(CoreError::UnsupportedAuthCode(
                "loyalty wallet codes are not accepted".to_string(),
            )),
        }
    }
}

/// Prefix and length rules for recognising codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCodeRules {
    pub loyalty_points_prefixes: Vec<String>,
    pub loyalty_wallet_prefixes: Vec<String>,
    pub min_len: usize,
    pub max_len: usize,
}

impl Default for AuthCodeRules {
    fn default() -> Self {
        AuthCodeRules {
            loyalty_points_prefixes: vec!["98".to_string()],
            loyalty_wallet_prefixes: vec!["99".to_string()],
            min_len: 16,
            max_len: 24,
        }
    }
}

/// Classifies a scanned auth-code.
///
/// ## Errors
/// `Validation` if the code is empty, not all digits, or outside the
/// configured length bounds.
///
/// ## Example
/// ```rust
/// use bistro_core::auth_code::{classify, AuthCodeClass, AuthCodeRules};
///
/// let rules = AuthCodeRules::default();
/// assert_eq!(classify("134567890123456789", &rules).unwrap(), AuthCodeClass::Generic);
/// assert_eq!(classify("980000000000000001", &rules).unwrap(), AuthCodeClass::LoyaltyPoints);
/// ```
pub fn classify(code: &str, rules: &AuthCodeRules) -> CoreResult<AuthCodeClass> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "auth_code".to_string(),
        }
        .into());
    }

    if !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "auth_code".to_string(),
            reason: "must contain only digits".to_string(),
        }
        .into());
    }

    if code.len() < rules.min_len || code.len() > rules.max_len {
        return Err(ValidationError::OutOfRange {
            field: "auth_code length".to_string(),
            min: rules.min_len as i64,
            max: rules.max_len as i64,
        }
        .into());
    }

    let starts = |prefixes: &[String]| prefixes.iter().any(|p| code.starts_with(p.as_str()));

    if starts(&rules.loyalty_wallet_prefixes) {
        Ok(AuthCodeClass::LoyaltyWallet)
    } else if starts(&rules.loyalty_points_prefixes) {
        Ok(AuthCodeClass::LoyaltyPoints)
    } else {
        Ok(AuthCodeClass::Generic)
    }
}

/// Resolves the gateway for `code`, checking it against an expected channel
/// and the channels enabled for the store.
pub fn resolve_gateway(
    code: &str,
    rules: &AuthCodeRules,
    expected: Option<GatewayKind>,
    enabled: &[GatewayKind],
) -> CoreResult<GatewayKind> {
    let gateway = classify(code, rules)?.gateway()?;

    if let Some(expected) = expected {
        if expected != gateway {
            return Err(CoreError::AuthCodeChannelMismatch {
                expected: expected.to_string(),
                actual: gateway.to_string(),
            });
        }
    }

    if !enabled.contains(&gateway) {
        return Err(CoreError::AuthCodeChannelMismatch {
            expected: enabled
                .iter()
                .map(|g| g.as_str())
                .collect::<Vec<_>>()
                .join("|"),
            actual: gateway.to_string(),
        });
    }

    Ok(gateway)
}
