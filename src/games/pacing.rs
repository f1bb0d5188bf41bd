//! Round pacing policies
//!
//! The engine asks a `PacingPolicy` how many numbers to draw next and how long
//! to wait before the following round. Policies are pure functions of the
//! game's progress, which keeps tuning out of the state machine.

use crate::config::PacingConfig;
use std::time::Duration;

/// Gap between active players and survivors at which the draw goes one number at a time
const ENDGAME_GAP: usize = 2;

/// Active players per extra number drawn in a round
const PLAYERS_PER_EXTRA_NUMBER: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundPlan {
    pub numbers_per_round: usize,
    pub inter_round_delay: Duration,
}

pub trait PacingPolicy: Send + Sync {
    /// `recent` holds per-round elimination counts, oldest first
    fn plan(&self, active: usize, survivors: usize, recent: &[usize]) -> RoundPlan;
}

/// Draws faster while the field is large or stalled, slower near the end
#[derive(Debug, Clone)]
pub struct AdaptivePacing {
    config: PacingConfig,
}

impl AdaptivePacing {
    pub fn new(config: PacingConfig) -> Self {
        Self { config }
    }

    fn stalled(&self, recent: &[usize]) -> bool {
        let window = self.config.stall_rounds;
        window > 0
            && recent.len() >= window
            && recent[recent.len() - window..].iter().all(|&n| n == 0)
    }
}

impl PacingPolicy for AdaptivePacing {
    fn plan(&self, active: usize, survivors: usize, recent: &[usize]) -> RoundPlan {
        let max_numbers = self.config.max_numbers_per_round.max(1);
        let gap = active.saturating_sub(survivors);
        let base = self.config.base_delay_ms;

        let (numbers, delay_ms) = if gap <= ENDGAME_GAP {
            (1, base + base / 2)
        } else {
            let mut numbers = 1 + gap / PLAYERS_PER_EXTRA_NUMBER;
            let mut delay = base;
            if self.stalled(recent) {
                numbers += 1;
                delay = base * 3 / 4;
            }
            (numbers.min(max_numbers), delay)
        };

        RoundPlan {
            numbers_per_round: numbers,
            inter_round_delay: Duration::from_millis(
                delay_ms.clamp(self.config.min_delay_ms, self.config.max_delay_ms),
            ),
        }
    }
}

/// Constant plan regardless of progress
#[derive(Debug, Clone, Copy)]
pub struct FixedPacing {
    pub numbers_per_round: usize,
    pub inter_round_delay: Duration,
}

impl FixedPacing {
    pub fn new(numbers_per_round: usize, inter_round_delay: Duration) -> Self {
        Self {
            numbers_per_round: numbers_per_round.max(1),
            inter_round_delay,
        }
    }
}

impl PacingPolicy for FixedPacing {
    fn plan(&self, _active: usize, _survivors: usize, _recent: &[usize]) -> RoundPlan {
        RoundPlan {
            numbers_per_round: self.numbers_per_round,
            inter_round_delay: self.inter_round_delay,
        }
    }
}
