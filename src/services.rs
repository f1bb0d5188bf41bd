//! Recurring background jobs
//!
//! Call `spawn_background_tasks` once the engine has been restored. Each job
//! is idempotent and ticks on its own interval:
//! - snapshot every game to the store (safety net for missed writes)
//! - prune finished games past their retention
//! - log the engine counters

use crate::{config::LotteryConfig, games::GameEngine, metrics::EngineMetrics};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handles of the spawned jobs
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Abort every job and wait until each has been dropped
    pub async fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
        for handle in self.handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!("Background job ended abnormally: {}", e);
                }
            }
        }
    }
}

fn every<F>(period: Duration, mut job: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; skip it so jobs start one period in.
        tick.tick().await;
        loop {
            tick.tick().await;
            job();
        }
    })
}

pub fn spawn_background_tasks(
    engine: Arc<GameEngine>,
    metrics: Arc<EngineMetrics>,
    config: &LotteryConfig,
) -> BackgroundTasks {
    let mut handles = Vec::new();

    {
        let engine = engine.clone();
        handles.push(every(config.snapshot_interval(), move || {
            let written = engine.snapshot_all();
            tracing::trace!(written, "Periodic snapshot");
        }));
    }

    {
        let engine = engine.clone();
        handles.push(every(config.prune_interval(), move || {
            let pruned = engine.prune(Utc::now());
            if pruned > 0 {
                tracing::info!(pruned, "Pruned finished games");
            }
        }));
    }

    handles.push(every(config.metrics_interval(), move || {
        tracing::info!(
            live_games = engine.live_game_count(),
            retained_games = engine.game_count(),
            "Engine status"
        );
        metrics.report();
    }));

    BackgroundTasks { handles }
}
