//! Engine counters and periodic reporting

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct EngineMetrics {
    start_time: Instant,
    games_opened: AtomicU64,
    games_started: AtomicU64,
    games_finished: AtomicU64,
    games_cancelled: AtomicU64,
    rounds_played: AtomicU64,
    players_eliminated: AtomicU64,
    round_faults: AtomicU64,
    messages_delivered: AtomicU64,
    messages_failed: AtomicU64,
    messages_dropped: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub games_opened: u64,
    pub games_started: u64,
    pub games_finished: u64,
    pub games_cancelled: u64,
    pub rounds_played: u64,
    pub players_eliminated: u64,
    pub round_faults: u64,
    pub messages_delivered: u64,
    pub messages_failed: u64,
    pub messages_dropped: u64,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            games_opened: AtomicU64::new(0),
            games_started: AtomicU64::new(0),
            games_finished: AtomicU64::new(0),
            games_cancelled: AtomicU64::new(0),
            rounds_played: AtomicU64::new(0),
            players_eliminated: AtomicU64::new(0),
            round_faults: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            messages_failed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    pub fn record_game_opened(&self) {
        self.games_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_game_started(&self) {
        self.games_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_game_finished(&self) {
        self.games_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_game_cancelled(&self) {
        self.games_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_round(&self, eliminated: usize) {
        self.rounds_played.fetch_add(1, Ordering::Relaxed);
        self.players_eliminated
            .fetch_add(eliminated as u64, Ordering::Relaxed);
    }

    pub fn record_round_fault(&self) {
        self.round_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self, ok: bool) {
        if ok {
            self.messages_delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.messages_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            games_opened: self.games_opened.load(Ordering::Relaxed),
            games_started: self.games_started.load(Ordering::Relaxed),
            games_finished: self.games_finished.load(Ordering::Relaxed),
            games_cancelled: self.games_cancelled.load(Ordering::Relaxed),
            rounds_played: self.rounds_played.load(Ordering::Relaxed),
            players_eliminated: self.players_eliminated.load(Ordering::Relaxed),
            round_faults: self.round_faults.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
        }
    }

    /// One structured log line with every counter
    pub fn report(&self) {
        let s = self.snapshot();
        tracing::info!(
            uptime_secs = self.uptime().as_secs(),
            games_opened = s.games_opened,
            games_started = s.games_started,
            games_finished = s.games_finished,
            games_cancelled = s.games_cancelled,
            rounds = s.rounds_played,
            eliminated = s.players_eliminated,
            round_faults = s.round_faults,
            delivered = s.messages_delivered,
            failed = s.messages_failed,
            dropped = s.messages_dropped,
            "engine metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = EngineMetrics::new();
        metrics.record_game_opened();
        metrics.record_round(3);
        metrics.record_round(0);
        metrics.record_delivery(true);
        metrics.record_delivery(false);
        metrics.record_dropped();

        let s = metrics.snapshot();
        assert_eq!(s.games_opened, 1);
        assert_eq!(s.rounds_played, 2);
        assert_eq!(s.players_eliminated, 3);
        assert_eq!(s.messages_delivered, 1);
        assert_eq!(s.messages_failed, 1);
        assert_eq!(s.messages_dropped, 1);
    }
}
