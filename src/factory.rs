//! Wiring of a complete settlement runtime from configuration
//!
//! Every port is constructed here and handed to the coordinator explicitly;
//! nothing below this module reaches for shared global state.

use crate::{
    common::traits::{BalanceLedger, OutcomeNotifier, OutcomeSink, RandomSource, SessionStore},
    config::{StakeplayConfig, StorageBackend, StorageConfig},
    errors::StakeResult,
    game_store::{InMemorySessionStore, RocksSessionStore},
    games::{
        random::ThreadRandom,
        reaper::SessionReaper,
        settlement::{SettlementCoordinator, SettlementOptions, SettlementPorts},
        ChestGame, CoinGame, CrackerGame,
    },
    ledger::InMemoryLedger,
    metrics::SettlementMetrics,
    notifications::{BroadcastSink, DisabledNotifier, LogSink, OutcomeWatchers, QueuedNotifier},
    storage::OptimizedStorage,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Everything a host process needs to run games
pub struct StakeplayRuntime {
    pub config: StakeplayConfig,
    pub coordinator: Arc<SettlementCoordinator>,
    pub coin: CoinGame,
    pub chest: ChestGame,
    pub cracker: CrackerGame,
    pub store: Arc<dyn SessionStore>,
    pub ledger: Arc<dyn BalanceLedger>,
    pub feed: BroadcastSink,
    pub watchers: OutcomeWatchers,
    pub reaper: Arc<SessionReaper>,
    pub metrics: Arc<SettlementMetrics>,
    notification_worker: Option<JoinHandle<()>>,
}

impl StakeplayRuntime {
    /// Run the stale-session reaper until `shutdown` fires
    pub fn spawn_reaper(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.reaper.clone().spawn(shutdown)
    }

    /// Drop the runtime's handles and let the notification worker drain the queue
    pub async fn shutdown(self, timeout: Duration) {
        let StakeplayRuntime {
            coordinator,
            coin,
            chest,
            cracker,
            reaper,
            notification_worker,
            ..
        } = self;
        drop((coordinator, coin, chest, cracker, reaper));

        if let Some(worker) = notification_worker {
            match tokio::time::timeout(timeout, worker).await {
                Ok(Ok(())) => info!("Notification queue drained"),
                Ok(Err(e)) => warn!(error = %e, "Notification worker panicked"),
                Err(_) => warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Notification worker still busy at shutdown, pending events dropped"
                ),
            }
        }
    }
}

pub struct StakeplayFactory;

impl StakeplayFactory {
    /// Runtime with the in-process ledger and the thread-local RNG.
    /// Must be called from within a tokio runtime.
    pub async fn build(config: StakeplayConfig) -> StakeResult<StakeplayRuntime> {
        Self::build_with(config, Arc::new(InMemoryLedger::new()), Arc::new(ThreadRandom)).await
    }

    /// Runtime around a caller-supplied ledger and random source
    pub async fn build_with(
        config: StakeplayConfig,
        ledger: Arc<dyn BalanceLedger>,
        random: Arc<dyn RandomSource>,
    ) -> StakeResult<StakeplayRuntime> {
        config.validate()?;

        let metrics = Arc::new(SettlementMetrics::new());
        let store = Self::create_store(&config.storage)?;
        let feed = BroadcastSink::new(config.notifications.broadcast_capacity);
        let watchers = OutcomeWatchers::new();

        let mut notification_worker = None;
        let notifier: Arc<dyn OutcomeNotifier> = if config.notifications.enabled {
            let sinks: Vec<Arc<dyn OutcomeSink>> = vec![
                Arc::new(watchers.clone()) as Arc<dyn OutcomeSink>,
                Arc::new(feed.clone()),
                Arc::new(LogSink),
            ];
            let (notifier, worker) =
                QueuedNotifier::spawn(config.notifications.queue_capacity, sinks, metrics.clone());
            notification_worker = Some(worker);
            Arc::new(notifier)
        } else {
            Arc::new(DisabledNotifier)
        };

        let ports = SettlementPorts {
            store: store.clone(),
            ledger: ledger.clone(),
            notifier,
            random,
        };
        let coordinator = Arc::new(SettlementCoordinator::new(
            ports,
            SettlementOptions::from_config(&config),
            metrics.clone(),
        ));

        let coin = CoinGame::new(coordinator.clone(), config.games.coin.clone());
        let chest = ChestGame::new(coordinator.clone(), config.games.chest.clone());
        let cracker = CrackerGame::new(coordinator.clone(), config.games.cracker.clone());
        let reaper = Arc::new(SessionReaper::new(coordinator.clone(), &config.settlement));

        info!(
            backend = ?config.storage.backend,
            notifications = config.notifications.enabled,
            "Settlement runtime ready"
        );

        Ok(StakeplayRuntime {
            config,
            coordinator,
            coin,
            chest,
            cracker,
            store,
            ledger,
            feed,
            watchers,
            reaper,
            metrics,
            notification_worker,
        })
    }

    pub fn create_store(config: &StorageConfig) -> StakeResult<Arc<dyn SessionStore>> {
        match config.backend {
            StorageBackend::Memory => Ok(Arc::new(InMemorySessionStore::new())),
            StorageBackend::RocksDb => {
                let storage = Arc::new(OptimizedStorage::new_with_config(config)?);
                Ok(Arc::new(RocksSessionStore::new(storage)))
            }
        }
    }
}
