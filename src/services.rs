//! Service container wiring the store, configuration and game components
//!
//! Everything is built once from a `TrustConfig` and a store handle and then
//! shared by reference with the HTTP layer and tests.

use crate::config::{StorageBackend, TrustConfig};
use crate::errors::{ConfigurationError, TrustResult};
use crate::games::{GameEngine, GameWatcher, Matchmaker, UserDirectory};
use crate::metrics::Metrics;
use crate::notify::ChangeNotifier;
use crate::storage::{MemoryStore, RocksStore, SharedStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct ServiceContainer {
    config: Arc<TrustConfig>,
    store: SharedStore,
    metrics: Arc<Metrics>,
    users: UserDirectory,
    matchmaker: Matchmaker,
    engine: GameEngine,
    watcher: GameWatcher,
}

impl ServiceContainer {
    /// Open the configured storage backend and build every service on it
    pub fn new(config: TrustConfig) -> TrustResult<Self> {
        let store = Self::create_storage(&config)?;
        Self::with_store(config, store)
    }

    pub fn with_store(config: TrustConfig, store: SharedStore) -> TrustResult<Self> {
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new().map_err(|e| {
            ConfigurationError::InvalidValue {
                field: "metrics".to_string(),
                value: String::new(),
                reason: e.to_string(),
            }
        })?);
        let notifier = ChangeNotifier::new();
        let engine = GameEngine::new(store.clone(), config.clone(), notifier.clone(), metrics.clone());

        Ok(Self {
            users: UserDirectory::new(store.clone(), config.clone()),
            matchmaker: Matchmaker::new(
                store.clone(),
                engine.clone(),
                config.clone(),
                notifier.clone(),
                metrics.clone(),
            ),
            engine,
            watcher: GameWatcher::new(store.clone(), notifier, config.long_poll.clone()),
            config,
            store,
            metrics,
        })
    }

    fn create_storage(config: &TrustConfig) -> TrustResult<SharedStore> {
        match config.storage.backend {
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; state is lost on exit");
                Ok(Arc::new(MemoryStore::new()))
            }
            StorageBackend::RocksDb => {
                tracing::info!(path = %config.storage.data_directory, "Opening RocksDB storage");
                Ok(Arc::new(RocksStore::new_with_config(&config.storage)?))
            }
        }
    }

    pub fn config(&self) -> &TrustConfig {
        &self.config
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub fn matchmaker(&self) -> &Matchmaker {
        &self.matchmaker
    }

    pub fn engine(&self) -> &GameEngine {
        &self.engine
    }

    pub fn watcher(&self) -> &GameWatcher {
        &self.watcher
    }
}
