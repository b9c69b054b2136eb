//! `Ledger`: one opened database and the three handles callers work with.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::RwLock;
use tracing::info;

use drumledger_inventory::OccupancyMode;

use crate::admin::Administration;
use crate::config::LedgerConfig;
use crate::engine::TransitionEngine;
use crate::error::LedgerResult;
use crate::query::QueryLayer;
use crate::store::InventoryStore;

/// An opened drum ledger.
///
/// The engine, query layer and administration handle share one connection
/// pool and one reset gate; cloning any of them is cheap.
#[derive(Debug, Clone)]
pub struct Ledger {
    store: InventoryStore,
    engine: TransitionEngine,
    queries: QueryLayer,
    admin: Administration,
}

impl Ledger {
    pub async fn open(config: &LedgerConfig) -> LedgerResult<Self> {
        let store = InventoryStore::open(config).await?;
        let gate = Arc::new(RwLock::new(()));

        info!(
            database_url = %config.database_url,
            occupancy = %store.mode(),
            "drum ledger opened"
        );
        Ok(Self {
            engine: TransitionEngine::new(store.clone(), gate.clone()),
            queries: QueryLayer::new(store.clone()),
            admin: Administration::new(store.clone(), gate),
            store,
        })
    }

    /// Open the ledger described by the `DRUMLEDGER_*` environment.
    pub async fn open_from_env() -> anyhow::Result<Self> {
        let config = LedgerConfig::from_env().context("failed to load ledger configuration")?;
        Self::open(&config)
            .await
            .with_context(|| format!("failed to open drum ledger at {}", config.database_url))
    }

    pub fn engine(&self) -> &TransitionEngine {
        &self.engine
    }

    pub fn queries(&self) -> &QueryLayer {
        &self.queries
    }

    pub fn admin(&self) -> &Administration {
        &self.admin
    }

    pub fn mode(&self) -> OccupancyMode {
        self.store.mode()
    }

    pub async fn close(self) {
        self.store.close().await;
    }
}
