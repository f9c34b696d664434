//! # Engine
//!
//! Wires the services to one database, one gateway router and one
//! configuration. Embedders hold an [`Engine`]; the daemon binary builds
//! one with [`Engine::open`].

use std::sync::Arc;

use bistro_db::{Database, DbConfig};
use tracing::info;

use crate::catalog::Catalog;
use crate::config::SettleConfig;
use crate::error::{SettleError, SettleResult};
use crate::gateway::GatewayRouter;
use crate::orders::OrderService;
use crate::reconcile::ReconcileCoordinator;
use crate::refunds::RefundService;
use crate::sequence::SequenceGenerator;
use crate::settlement::SettlementService;
use crate::worker::{CallbackWorker, CallbackWorkerHandle};

/// All services, sharing one pool and one coordinator.
#[derive(Clone)]
pub struct Engine {
    pub orders: OrderService,
    pub settlement: SettlementService,
    pub refunds: RefundService,
    pub coordinator: Arc<ReconcileCoordinator>,
    db: Database,
    config: Arc<SettleConfig>,
}

impl Engine {
    pub fn new(db: Database, config: Arc<SettleConfig>, router: GatewayRouter) -> Self {
        let catalog: Arc<dyn Catalog> = Arc::new(db.catalog());
        let sequences: Arc<dyn SequenceGenerator> = Arc::new(db.sequences());
        let coordinator = Arc::new(ReconcileCoordinator::new(
            db.clone(),
            router,
            config.worker.reconcile_retries,
        ));

        Engine {
            orders: OrderService::new(
                db.clone(),
                catalog.clone(),
                sequences.clone(),
                config.business.clone(),
            ),
            settlement: SettlementService::new(
                db.clone(),
                catalog.clone(),
                sequences.clone(),
                coordinator.clone(),
                config.clone(),
            ),
            refunds: RefundService::new(
                db.clone(),
                catalog,
                sequences,
                coordinator.clone(),
                config.business.clone(),
            ),
            coordinator,
            db,
            config,
        }
    }

    /// Validates `config`, opens (and migrates) its database and builds the
    /// gateway router it describes.
    pub async fn open(config: SettleConfig) -> SettleResult<Self> {
        config.validate()?;

        let path = config.database.resolved_path().ok_or_else(|| {
            SettleError::InvalidConfig("no database path and no platform data directory".into())
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::new(
            DbConfig::new(path.clone()).max_connections(config.database.max_connections.max(1)),
        )
        .await?;
        let router = GatewayRouter::from_settings(&config.gateway)?;
        info!(
            path = %path.display(),
            store = %config.store.id,
            gateway_mode = %config.gateway.mode,
            gateways = ?router.kinds(),
            "Engine ready"
        );

        Ok(Engine::new(db, Arc::new(config), router))
    }

    /// Builds the callback worker. Spawn [`CallbackWorker::run`] and keep
    /// the handle for webhooks and shutdown.
    pub fn callback_worker(&self) -> (CallbackWorker, CallbackWorkerHandle) {
        CallbackWorker::new(self.db.clone(), self.coordinator.clone(), self.config.clone())
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &SettleConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayMode;

    #[tokio::test]
    async fn test_open_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SettleConfig::default();
        config.gateway.mode = GatewayMode::Offline;
        config.database.path = Some(dir.path().join("nested").join("bistro.db"));

        let engine = Engine::open(config).await.unwrap();
        assert!(dir.path().join("nested").join("bistro.db").exists());
        assert_eq!(engine.config().gateway.mode, GatewayMode::Offline);
        assert!(engine.database().catalog().store("store1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let mut config = SettleConfig::default();
        config.gateway.mode = GatewayMode::Http;
        config.gateway.generic_url = None;
        let err = Engine::open(config).await.err().unwrap();
        assert!(err.is_config_error());
    }
}
