//! # Settlement Error Types
//!
//! What service callers see. Every variant maps onto one [`ErrorKind`].
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Settlement Error Categories                         │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Domain      │  │     Gateway             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Core (rules)   │  │  Unavailable            │ │
//! │  │  InvalidUrl     │  │  NotFound       │  │  Timeout                │ │
//! │  │  ConfigLoad…    │  │  TableOccupied  │  │  Rejected               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │    Database     │  │     Internal                                │  │
//! │  │                 │  │                                             │  │
//! │  │  Database(Db…)  │  │  QueueFull, ShuttingDown, ChannelError      │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use bistro_core::{CoreError, ErrorKind};
use bistro_db::DbError;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Result type alias for settlement operations.
pub type SettleResult<T> = Result<T, SettleError>;

/// Errors returned by every service in this crate.
#[derive(Debug, Error)]
pub enum SettleError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A callback or gateway URL did not parse or is not http(s).
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// A business rule rejected the request.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A referenced order, refund, store, table or product is absent.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Another PLACED order already sits at the table.
    #[error("Table {table_id} is occupied by order {order_no}")]
    TableOccupied { table_id: String, order_no: String },

    // =========================================================================
    // Gateway Errors
    // =========================================================================
    /// The upstream gateway failed.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Storage failed, or a versioned write lost the race.
    #[error(transparent)]
    Database(#[from] DbError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// The callback queue is full; the gateway should retry.
    #[error("Callback queue is full")]
    QueueFull,

    /// The worker is shutting down.
    #[error("Worker is shutting down")]
    ShuttingDown,

    /// Channel send/receive error.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// A gateway call exceeded its deadline.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// From Implementations
// =============================================================================

impl From<url::ParseError> for SettleError {
    fn from(err: url::ParseError) -> Self {
        SettleError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SettleError {
    fn from(err: std::io::Error) -> Self {
        SettleError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SettleError {
    fn from(err: toml::de::Error) -> Self {
        SettleError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SettleError {
    fn from(err: toml::ser::Error) -> Self {
        SettleError::ConfigSaveFailed(err.to_string())
    }
}

impl From<bistro_core::ValidationError> for SettleError {
    fn from(err: bistro_core::ValidationError) -> Self {
        SettleError::Core(CoreError::Validation(err))
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SettleError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        SettleError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// The caller-facing category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettleError::Core(e) => e.kind(),
            SettleError::Database(e) => e.kind(),
            SettleError::Gateway(e) => e.kind(),
            SettleError::NotFound { .. } => ErrorKind::NotFound,
            SettleError::TableOccupied { .. } => ErrorKind::Conflict,
            SettleError::InvalidConfig(_)
            | SettleError::InvalidUrl(_)
            | SettleError::ConfigLoadFailed(_)
            | SettleError::ConfigSaveFailed(_) => ErrorKind::InvalidInput,
            SettleError::QueueFull
            | SettleError::ShuttingDown
            | SettleError::ChannelError(_)
            | SettleError::Timeout(_)
            | SettleError::Internal(_) => ErrorKind::Unavailable,
        }
    }

    /// True when a versioned write lost a race.
    pub fn is_stale(&self) -> bool {
        matches!(self, SettleError::Database(e) if e.is_stale())
    }

    /// Returns true if the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SettleError::InvalidConfig(_)
                | SettleError::InvalidUrl(_)
                | SettleError::ConfigLoadFailed(_)
                | SettleError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_write_is_conflict() {
        let err: SettleError = DbError::stale("Order", "S00120240315000001", 3).into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.is_stale());
        assert!(err.to_string().contains("modified concurrently"));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(SettleError::not_found("Order", "x").kind(), ErrorKind::NotFound);
        assert_eq!(SettleError::QueueFull.kind(), ErrorKind::Unavailable);
        assert!(SettleError::QueueFull.is_retryable());
        assert_eq!(
            SettleError::TableOccupied {
                table_id: "T1".into(),
                order_no: "S001".into()
            }
            .kind(),
            ErrorKind::Conflict
        );

        let core: SettleError = CoreError::AlreadyPaid("S001".into()).into();
        assert_eq!(core.kind(), ErrorKind::InvalidInput);
        assert!(!core.is_retryable());
    }

    #[test]
    fn test_config_errors() {
        let err: SettleError = url::Url::parse("not a url").unwrap_err().into();
        assert!(err.is_config_error());
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
