//! Runtime assembly
//!
//! Centralizes the wiring every binary and integration test needs: storage,
//! randomness, scheduler, dispatcher and engine, plus their background loops.

use crate::{
    config::{LotteryConfig, RandomnessConfig},
    dispatcher::{LogTransport, OutboundDispatcher, Transport},
    errors::{ConfigurationError, LotteryError, LotteryResult, StorageError},
    game_store::{GameStore, MemoryGameStore, RocksGameStore},
    games::{AdaptivePacing, EngineParts, GameEngine, RandomnessSource, VrfRandomness},
    metrics::EngineMetrics,
    scheduler::Scheduler,
    services::{spawn_background_tasks, BackgroundTasks},
    storage::OptimizedStorage,
};
use std::{fs, sync::Arc};
use tokio::task::JoinHandle;

/// Running engine and the loops that drive it
pub struct RuntimeHandle {
    engine: Arc<GameEngine>,
    scheduler: Arc<Scheduler>,
    dispatcher: Arc<OutboundDispatcher>,
    metrics: Arc<EngineMetrics>,
    background: BackgroundTasks,
    loops: Vec<JoinHandle<()>>,
    restored: usize,
}

impl RuntimeHandle {
    pub fn engine(&self) -> Arc<GameEngine> {
        Arc::clone(&self.engine)
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn dispatcher(&self) -> Arc<OutboundDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Games reloaded from the store at startup
    pub fn restored_games(&self) -> usize {
        self.restored
    }

    /// Stop timers, render pending bundles, write a final snapshot and stop the loops
    pub async fn shutdown(self) {
        self.scheduler.stop();
        self.background.shutdown().await;
        self.dispatcher.flush_all();
        let written = self.engine.snapshot_all();
        self.dispatcher.stop();

        for handle in self.loops {
            if let Err(e) = handle.await {
                tracing::warn!("Background loop ended abnormally: {}", e);
            }
        }

        self.metrics.report();
        tracing::info!(snapshots = written, "Runtime stopped");
    }
}

pub struct LotteryFactory;

impl LotteryFactory {
    /// RocksDB-backed runtime delivering through the log
    pub async fn create(config: LotteryConfig) -> LotteryResult<RuntimeHandle> {
        Self::create_with_transport(config, Arc::new(LogTransport)).await
    }

    pub async fn create_with_transport(
        config: LotteryConfig,
        transport: Arc<dyn Transport>,
    ) -> LotteryResult<RuntimeHandle> {
        Self::validate(&config)?;

        let data_dir = &config.storage.data_directory;
        if config.storage.clear_on_start {
            println!("⚠️  Testing mode: Clearing game database at {}", data_dir);
            let _ = fs::remove_dir_all(data_dir);
        } else {
            println!("📦 Preserving existing game data at {}", data_dir);
        }

        let storage = OptimizedStorage::new_with_config(&config.storage).map_err(|e| {
            StorageError::DatabaseOpenFailed(format!("Failed to open {}: {}", data_dir, e))
        })?;
        let store: Arc<dyn GameStore> = Arc::new(RocksGameStore::new(Arc::new(storage)));

        Self::assemble(config, store, transport)
    }

    /// Runtime without durable storage, for tests and dry runs
    pub async fn create_in_memory(
        config: LotteryConfig,
        transport: Arc<dyn Transport>,
    ) -> LotteryResult<RuntimeHandle> {
        Self::validate(&config)?;
        Self::assemble(config, Arc::new(MemoryGameStore::new()), transport)
    }

    fn validate(config: &LotteryConfig) -> LotteryResult<()> {
        config.validate().map_err(|e| {
            LotteryError::Configuration(ConfigurationError::ValidationFailed(e.to_string()))
        })
    }

    /// Build the randomness source from configuration
    pub fn create_randomness(config: &RandomnessConfig) -> LotteryResult<Arc<dyn RandomnessSource>> {
        match &config.vrf_seed_hex {
            Some(seed_hex) => {
                let seed = hex::decode(seed_hex).map_err(|e| ConfigurationError::InvalidValue {
                    field: "randomness.vrf_seed_hex".to_string(),
                    value: "<redacted>".to_string(),
                    reason: e.to_string(),
                })?;
                let source = VrfRandomness::from_seed(&seed, &config.signing_context)?;
                tracing::info!(public_key = %source.public_key_hex(), "VRF key loaded");
                Ok(Arc::new(source))
            }
            None => {
                let source = VrfRandomness::new_random(&config.signing_context);
                tracing::warn!(
                    public_key = %source.public_key_hex(),
                    "No VRF seed configured; using an ephemeral key"
                );
                Ok(Arc::new(source))
            }
        }
    }

    fn assemble(
        config: LotteryConfig,
        store: Arc<dyn GameStore>,
        transport: Arc<dyn Transport>,
    ) -> LotteryResult<RuntimeHandle> {
        let metrics = Arc::new(EngineMetrics::new());
        let randomness = Self::create_randomness(&config.randomness)?;
        let scheduler = Arc::new(Scheduler::new(config.scheduler.clone()));
        let dispatcher = Arc::new(OutboundDispatcher::new(
            config.dispatcher.clone(),
            metrics.clone(),
        ));

        let engine = Arc::new(GameEngine::new(
            config.game.clone(),
            EngineParts {
                store,
                randomness,
                scheduler: scheduler.clone(),
                dispatcher: dispatcher.clone(),
                pacing: Arc::new(AdaptivePacing::new(config.game.pacing.clone())),
                metrics: metrics.clone(),
            },
        ));

        let restored = engine.restore()?;
        if restored > 0 {
            println!("♻️  Restored {} game(s) from storage", restored);
        }

        let loops = vec![
            scheduler.clone().spawn(engine.clone()),
            dispatcher.clone().spawn(transport),
        ];
        let background = spawn_background_tasks(engine.clone(), metrics.clone(), &config);

        Ok(RuntimeHandle {
            engine,
            scheduler,
            dispatcher,
            metrics,
            background,
            loops,
            restored,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ChannelTransport;

    #[tokio::test]
    async fn test_in_memory_runtime_starts_and_stops() {
        let (transport, _rx) = ChannelTransport::new();
        let runtime = LotteryFactory::create_in_memory(LotteryConfig::testing(), Arc::new(transport))
            .await
            .expect("runtime");

        assert_eq!(runtime.restored_games(), 0);
        assert_eq!(runtime.engine().live_game_count(), 0);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = LotteryConfig::testing();
        config.game.prize_min = 10;
        config.game.prize_max = 1;

        let (transport, _rx) = ChannelTransport::new();
        let result = LotteryFactory::create_in_memory(config, Arc::new(transport)).await;
        assert!(matches!(result, Err(LotteryError::Configuration(_))));
    }

    #[test]
    fn test_seeded_randomness_is_stable() {
        let config = RandomnessConfig {
            vrf_seed_hex: Some(hex::encode([9u8; 32])),
            ..Default::default()
        };
        let a = LotteryFactory::create_randomness(&config).expect("source");
        let b = LotteryFactory::create_randomness(&config).expect("source");
        assert_eq!(a.uniform(1, 1_000, "g:prize"), b.uniform(1, 1_000, "g:prize"));
    }

    #[tokio::test]
    async fn test_rocks_runtime_restores_games() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = LotteryConfig::testing();
        config.storage.data_directory = dir.path().join("db").to_string_lossy().to_string();
        config.storage.clear_on_start = false;
        config.game.default_start_delay_secs = 600;

        let runtime = LotteryFactory::create(config.clone()).await.expect("runtime");
        let game = runtime.engine().open_default("chat-1").expect("open");
        runtime.shutdown().await;

        let runtime = LotteryFactory::create(config).await.expect("runtime");
        assert_eq!(runtime.restored_games(), 1);
        assert_eq!(runtime.engine().status(&game.id).expect("status").id, game.id);
        runtime.shutdown().await;
    }
}
