//! # Settlement Configuration
//!
//! Configuration for the services and the reconciliation daemon.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     BISTRO_GATEWAY_MODE=offline                                        │
//! │     BISTRO_DB_PATH=/var/lib/bistro/bistro.db                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/bistro-pos/settle.toml (Linux)                           │
//! │     ~/Library/Application Support/com.bistro.pos/settle.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     GatewayMode::Http, UTC, 04:00 business-day cutoff                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # settle.toml
//! [store]
//! id = "store1"
//! merchant_id = "merchant-dev"
//!
//! [business]
//! utc_offset_minutes = 480
//! cutoff_hour = 4
//!
//! [database]
//! path = "/var/lib/bistro/bistro.db"
//! max_connections = 5
//!
//! [gateway]
//! mode = "http"          # http | offline
//! generic_url = "https://pay.example.com/v1/"
//! loyalty_points_url = "https://points.example.com/v1/"
//! enabled = ["generic", "loyalty_points"]
//! dispatch_timeout_ms = 10000
//! query_timeout_ms = 5000
//!
//! [scan]
//! callback_url = "https://pos.example.com/callbacks/payment"
//!
//! [worker]
//! queue_size = 100
//! sweep_interval_secs = 30
//! pending_age_secs = 60
//! sweep_batch = 50
//! reconcile_retries = 3
//! ```

use std::path::PathBuf;
use std::time::Duration;

use bistro_core::auth_code::AuthCodeRules;
use bistro_core::numbering;
use bistro_core::GatewayKind;
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{SettleError, SettleResult};

// =============================================================================
// Gateway Mode
// =============================================================================

/// How scan payments reach an upstream gateway.
///
/// ## Mode Selection
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                       Gateway Mode Behavior                             │
/// │                                                                         │
/// │  HTTP (Default)                                                        │
/// │  ──────────────                                                        │
/// │  • One reqwest client per enabled gateway kind                         │
/// │  • Base URL required for every enabled kind                            │
/// │                                                                         │
/// │  OFFLINE                                                               │
/// │  ───────                                                               │
/// │  • In-process gateway, attempts stay PENDING until a callback          │
/// │  • Use for training terminals and local testing                        │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayMode {
    #[default]
    Http,
    Offline,
}

impl std::fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayMode::Http => write!(f, "http"),
            GatewayMode::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for GatewayMode {
    type Err = SettleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" | "online" => Ok(GatewayMode::Http),
            "offline" | "memory" => Ok(GatewayMode::Offline),
            other => Err(SettleError::InvalidConfig(format!(
                "Unknown gateway mode: '{}'. Valid options: http, offline",
                other
            ))),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Identity of the store this daemon serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_id")]
    pub id: String,

    #[serde(default = "default_merchant_id")]
    pub merchant_id: String,

    /// Terminal id stamped on work done by the daemon itself.
    #[serde(default = "default_terminal_id")]
    pub terminal_id: String,
}

fn default_store_id() -> String {
    "store1".to_string()
}

fn default_merchant_id() -> String {
    "merchant-dev".to_string()
}

fn default_terminal_id() -> String {
    format!("settled-{}", Uuid::new_v4())
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            id: default_store_id(),
            merchant_id: default_merchant_id(),
            terminal_id: default_terminal_id(),
        }
    }
}

/// Local time and business-day rollover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessSettings {
    /// Store offset from UTC in minutes (e.g. 480 for UTC+8).
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Local hour before which activity belongs to the previous day.
    #[serde(default = "default_cutoff_hour")]
    pub cutoff_hour: u32,
}

fn default_cutoff_hour() -> u32 {
    4
}

impl Default for BusinessSettings {
    fn default() -> Self {
        BusinessSettings {
            utc_offset_minutes: 0,
            cutoff_hour: default_cutoff_hour(),
        }
    }
}

impl BusinessSettings {
    /// The store's fixed offset. Out-of-range values fall back to UTC;
    /// `validate` rejects them at load time.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or(Utc.fix())
    }

    /// Business date `now` belongs to.
    pub fn business_date(&self, now: DateTime<Utc>) -> NaiveDate {
        numbering::business_date(now, self.offset(), self.cutoff_hour)
    }

    /// Today's business date.
    pub fn today(&self) -> NaiveDate {
        self.business_date(Utc::now())
    }
}

/// Database location and pool size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseSettings {
    /// Configured path, or `<data dir>/bistro.db`.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(|| {
            directories::ProjectDirs::from("com", "bistro", "pos")
                .map(|dirs| dirs.data_dir().join("bistro.db"))
        })
    }
}

/// Upstream payment gateways.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default)]
    pub mode: GatewayMode,

    /// Base URL of the generic scan gateway.
    #[serde(default)]
    pub generic_url: Option<String>,

    /// Base URL of the loyalty-points gateway.
    #[serde(default)]
    pub loyalty_points_url: Option<String>,

    /// Gateway kinds accepted by this store.
    #[serde(default = "default_enabled")]
    pub enabled: Vec<GatewayKind>,

    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_ms: u64,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,
}

fn default_enabled() -> Vec<GatewayKind> {
    vec![GatewayKind::Generic, GatewayKind::LoyaltyPoints]
}

fn default_dispatch_timeout() -> u64 {
    10_000
}

fn default_query_timeout() -> u64 {
    5_000
}

impl Default for GatewaySettings {
    fn default() -> Self {
        GatewaySettings {
            mode: GatewayMode::default(),
            generic_url: None,
            loyalty_points_url: None,
            enabled: default_enabled(),
            dispatch_timeout_ms: default_dispatch_timeout(),
            query_timeout_ms: default_query_timeout(),
        }
    }
}

impl GatewaySettings {
    pub fn base_url(&self, kind: GatewayKind) -> Option<&str> {
        match kind {
            GatewayKind::Generic => self.generic_url.as_deref(),
            GatewayKind::LoyaltyPoints => self.loyalty_points_url.as_deref(),
        }
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Scan-code recognition and callback routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    #[serde(default)]
    pub auth_code: AuthCodeRules,

    /// Where gateways post asynchronous outcomes unless the caller overrides.
    #[serde(default = "default_callback_url")]
    pub callback_url: String,
}

fn default_callback_url() -> String {
    "http://127.0.0.1:8080/callbacks/payment".to_string()
}

impl Default for ScanSettings {
    fn default() -> Self {
        ScanSettings {
            auth_code: AuthCodeRules::default(),
            callback_url: default_callback_url(),
        }
    }
}

/// Callback worker and pending sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Callback jobs buffered before `submit` reports Unavailable.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// How long a scan attempt stays PENDING before the sweep asks upstream.
    #[serde(default = "default_pending_age")]
    pub pending_age_secs: u64,

    #[serde(default = "default_sweep_batch")]
    pub sweep_batch: i64,

    /// Reload-and-retry budget for versioned writes that lose a race.
    #[serde(default = "default_reconcile_retries")]
    pub reconcile_retries: u32,
}

fn default_queue_size() -> usize {
    100
}
fn default_sweep_interval() -> u64 {
    30
}
fn default_pending_age() -> u64 {
    60
}
fn default_sweep_batch() -> i64 {
    50
}
fn default_reconcile_retries() -> u32 {
    3
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            queue_size: default_queue_size(),
            sweep_interval_secs: default_sweep_interval(),
            pending_age_secs: default_pending_age(),
            sweep_batch: default_sweep_batch(),
            reconcile_retries: default_reconcile_retries(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete settlement configuration. See the module docs for the file
/// format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettleConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub business: BusinessSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub scan: ScanSettings,

    #[serde(default)]
    pub worker: WorkerSettings,
}

impl SettleConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (settle.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SettleResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading settle config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SettleResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SettleError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Settle config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SettleResult<()> {
        if self.store.id.is_empty() {
            return Err(SettleError::InvalidConfig("store.id is required".into()));
        }

        if !(-14 * 60..=14 * 60).contains(&self.business.utc_offset_minutes) {
            return Err(SettleError::InvalidConfig(format!(
                "utc_offset_minutes must be within ±840, got {}",
                self.business.utc_offset_minutes
            )));
        }
        if self.business.cutoff_hour > 23 {
            return Err(SettleError::InvalidConfig(format!(
                "cutoff_hour must be 0-23, got {}",
                self.business.cutoff_hour
            )));
        }

        if self.gateway.enabled.is_empty() {
            return Err(SettleError::InvalidConfig(
                "at least one gateway kind must be enabled".into(),
            ));
        }
        if self.gateway.mode == GatewayMode::Http {
            for kind in &self.gateway.enabled {
                let url = self.gateway.base_url(*kind).ok_or_else(|| {
                    SettleError::InvalidConfig(format!("no base URL for enabled gateway {}", kind))
                })?;
                parse_http_url(url)?;
            }
        }
        if self.gateway.dispatch_timeout_ms == 0 || self.gateway.query_timeout_ms == 0 {
            return Err(SettleError::InvalidConfig(
                "gateway timeouts must be greater than 0".into(),
            ));
        }

        let rules = &self.scan.auth_code;
        if rules.min_len == 0 || rules.min_len > rules.max_len {
            return Err(SettleError::InvalidConfig(format!(
                "auth_code length bounds {}..={} are invalid",
                rules.min_len, rules.max_len
            )));
        }
        parse_http_url(&self.scan.callback_url)?;

        if self.worker.queue_size == 0 {
            return Err(SettleError::InvalidConfig(
                "queue_size must be greater than 0".into(),
            ));
        }
        if self.worker.sweep_interval_secs == 0 || self.worker.sweep_batch <= 0 {
            return Err(SettleError::InvalidConfig(
                "sweep_interval_secs and sweep_batch must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("BISTRO_STORE_ID") {
            debug!(store_id = %id, "Overriding store ID from environment");
            self.store.id = id;
        }

        if let Ok(id) = std::env::var("BISTRO_MERCHANT_ID") {
            self.store.merchant_id = id;
        }

        if let Ok(path) = std::env::var("BISTRO_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Ok(mode) = std::env::var("BISTRO_GATEWAY_MODE") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding gateway mode from environment");
                    self.gateway.mode = parsed;
                }
                Err(_) => warn!(mode = %mode, "Unknown gateway mode in environment"),
            }
        }

        if let Ok(url) = std::env::var("BISTRO_GENERIC_GATEWAY_URL") {
            self.gateway.generic_url = Some(url);
        }

        if let Ok(url) = std::env::var("BISTRO_LOYALTY_GATEWAY_URL") {
            self.gateway.loyalty_points_url = Some(url);
        }

        if let Ok(url) = std::env::var("BISTRO_CALLBACK_URL") {
            self.scan.callback_url = url;
        }

        if let Ok(offset) = std::env::var("BISTRO_UTC_OFFSET_MINUTES") {
            if let Ok(m) = offset.parse::<i32>() {
                self.business.utc_offset_minutes = m;
            }
        }

        if let Ok(hour) = std::env::var("BISTRO_CUTOFF_HOUR") {
            if let Ok(h) = hour.parse::<u32>() {
                self.business.cutoff_hour = h;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "bistro", "pos")
            .map(|dirs| dirs.config_dir().join("settle.toml"))
    }
}

/// Parses `raw` and requires an http(s) scheme.
pub fn parse_http_url(raw: &str) -> SettleResult<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(SettleError::InvalidUrl(format!(
            "{} must use http or https, got {}",
            raw, other
        ))),
    }
}
