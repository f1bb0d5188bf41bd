//! Absolute-time task arena
//!
//! Tasks are keyed by `(game_id, kind)` and carry only their target time; the
//! handler re-reads the game when a task fires. Arming the same key again
//! replaces the earlier task, so a kind never fires twice for one arming.
//!
//! The background loop sleeps until the nearest deadline (capped by the sweep
//! interval) and then fires everything already due. After a restart the engine
//! re-arms tasks from persisted timestamps and the first sweep catches up on
//! anything that elapsed while the process was down.

use crate::config::SchedulerConfig;
use crate::games::types::GameId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    StartGame,
    CountdownNotice,
    ResumeDraw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub game_id: GameId,
    pub kind: TaskKind,
    pub target_at: DateTime<Utc>,
}

/// Receives fired tasks
pub trait TimerHandler: Send + Sync {
    fn on_timer(&self, task: &ScheduledTask);
}

pub struct Scheduler {
    config: SchedulerConfig,
    tasks: Mutex<HashMap<(GameId, TaskKind), ScheduledTask>>,
    wakeup: Notify,
    running: AtomicBool,
}

fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            tasks: Mutex::new(HashMap::new()),
            wakeup: Notify::new(),
            running: AtomicBool::new(true),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<(GameId, TaskKind), ScheduledTask>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a task, replacing any pending one of the same kind for the game
    pub fn arm(&self, game_id: &GameId, kind: TaskKind, target_at: DateTime<Utc>) -> DateTime<Utc> {
        let task = ScheduledTask {
            game_id: game_id.clone(),
            kind,
            target_at,
        };

        let replaced = self.tasks().insert((game_id.clone(), kind), task);
        if let Some(previous) = replaced {
            tracing::debug!(
                game_id = %game_id,
                kind = ?kind,
                previous = %previous.target_at,
                "Re-armed task"
            );
        }

        self.wakeup.notify_one();
        target_at
    }

    pub fn arm_after(&self, game_id: &GameId, kind: TaskKind, delay: Duration) -> DateTime<Utc> {
        self.arm(game_id, kind, Utc::now() + to_chrono(delay))
    }

    /// Remove one kind, or every task when `kind` is `None`; returns how many were removed
    pub fn cancel(&self, game_id: &GameId, kind: Option<TaskKind>) -> usize {
        let mut tasks = self.tasks();
        match kind {
            Some(kind) => tasks.remove(&(game_id.clone(), kind)).map_or(0, |_| 1),
            None => {
                let before = tasks.len();
                tasks.retain(|(id, _), _| id != game_id);
                before - tasks.len()
            }
        }
    }

    /// True when a pending task for the game is already past its target
    pub fn is_overdue(&self, game_id: &GameId, now: DateTime<Utc>) -> bool {
        self.tasks()
            .values()
            .any(|t| &t.game_id == game_id && t.target_at <= now)
    }

    pub fn pending(&self, game_id: &GameId) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = self
            .tasks()
            .values()
            .filter(|t| &t.game_id == game_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.target_at);
        tasks
    }

    pub fn pending_count(&self) -> usize {
        self.tasks().len()
    }

    /// Remove and return every task due at `now`, earliest first
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        let mut tasks = self.tasks();
        let due_keys: Vec<(GameId, TaskKind)> = tasks
            .iter()
            .filter(|(_, t)| t.target_at <= now)
            .map(|(k, _)| k.clone())
            .collect();

        let mut due: Vec<ScheduledTask> = due_keys
            .into_iter()
            .filter_map(|k| tasks.remove(&k))
            .collect();
        due.sort_by_key(|t| t.target_at);
        due
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.tasks().values().map(|t| t.target_at).min()
    }

    /// Overdue sweep: fire everything due at `now`
    pub fn run_due(&self, handler: &dyn TimerHandler, now: DateTime<Utc>) -> usize {
        let due = self.take_due(now);
        let grace = to_chrono(Duration::from_millis(self.config.overdue_grace_ms));

        for task in &due {
            let lateness = now - task.target_at;
            if lateness > grace {
                tracing::info!(
                    game_id = %task.game_id,
                    kind = ?task.kind,
                    late_ms = lateness.num_milliseconds(),
                    "Firing overdue task"
                );
            } else {
                tracing::debug!(game_id = %task.game_id, kind = ?task.kind, "Firing task");
            }
            handler.on_timer(task);
        }

        due.len()
    }

    /// Start the sweep loop; handler work runs on the blocking pool
    pub fn spawn(self: Arc<Self>, handler: Arc<dyn TimerHandler>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let sweep = Duration::from_millis(self.config.sweep_interval_ms.max(1));

            while self.running.load(Ordering::SeqCst) {
                let scheduler = self.clone();
                let fired_handler = handler.clone();
                let fired = tokio::task::spawn_blocking(move || {
                    scheduler.run_due(fired_handler.as_ref(), Utc::now())
                })
                .await;

                if let Err(e) = fired {
                    tracing::error!("Scheduler sweep panicked: {}", e);
                }

                let wait = self
                    .next_deadline()
                    .map(|deadline| {
                        (deadline - Utc::now())
                            .to_std()
                            .unwrap_or(Duration::ZERO)
                            .min(sweep)
                    })
                    .unwrap_or(sweep);

                tokio::select! {
                    _ = self.wakeup.notified() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            tracing::debug!("Scheduler loop stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wakeup.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        fired: Mutex<Vec<ScheduledTask>>,
    }

    impl TimerHandler for Recorder {
        fn on_timer(&self, task: &ScheduledTask) {
            self.fired.lock().expect("lock").push(task.clone());
        }
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig::default())
    }

    #[test]
    fn test_rearm_replaces_previous_task() {
        let s = scheduler();
        let game = GameId::from("g1");
        let now = Utc::now();

        s.arm(&game, TaskKind::StartGame, now + chrono::Duration::seconds(60));
        s.arm(&game, TaskKind::StartGame, now + chrono::Duration::seconds(30));

        let pending = s.pending(&game);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].target_at, now + chrono::Duration::seconds(30));
    }

    #[test]
    fn test_cancel_one_or_all() {
        let s = scheduler();
        let (g1, g2) = (GameId::from("g1"), GameId::from("g2"));
        let at = Utc::now() + chrono::Duration::seconds(10);

        s.arm(&g1, TaskKind::StartGame, at);
        s.arm(&g1, TaskKind::CountdownNotice, at);
        s.arm(&g2, TaskKind::StartGame, at);

        assert_eq!(s.cancel(&g1, Some(TaskKind::CountdownNotice)), 1);
        assert_eq!(s.cancel(&g1, Some(TaskKind::CountdownNotice)), 0);
        assert_eq!(s.cancel(&g1, None), 1);
        assert_eq!(s.pending_count(), 1);
    }

    #[test]
    fn test_overdue_sweep_fires_once_in_time_order() {
        let s = scheduler();
        let recorder = Recorder::default();
        let now = Utc::now();
        let (g1, g2) = (GameId::from("g1"), GameId::from("g2"));

        s.arm(&g1, TaskKind::StartGame, now - chrono::Duration::seconds(5));
        s.arm(&g2, TaskKind::ResumeDraw, now - chrono::Duration::seconds(10));
        s.arm(&g2, TaskKind::CountdownNotice, now + chrono::Duration::seconds(10));

        assert!(s.is_overdue(&g1, now));
        assert_eq!(s.run_due(&recorder, now), 2);
        assert_eq!(s.run_due(&recorder, now), 0);

        let fired = recorder.fired.lock().expect("lock");
        assert_eq!(fired[0].game_id, g2);
        assert_eq!(fired[1].game_id, g1);
        assert!(!s.is_overdue(&g1, now));
        assert_eq!(s.next_deadline(), Some(now + chrono::Duration::seconds(10)));
    }

    #[tokio::test]
    async fn test_loop_fires_armed_task() {
        let s = Arc::new(Scheduler::new(SchedulerConfig {
            sweep_interval_ms: 20,
            overdue_grace_ms: 10,
        }));
        let recorder = Arc::new(Recorder::default());
        let handle = s.clone().spawn(recorder.clone());

        let game = GameId::from("g1");
        s.arm_after(&game, TaskKind::ResumeDraw, Duration::from_millis(30));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while recorder.fired.lock().expect("lock").is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "task never fired");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(recorder.fired.lock().expect("lock")[0].kind, TaskKind::ResumeDraw);
        s.stop();
        handle.await.expect("loop exits");
    }
}
