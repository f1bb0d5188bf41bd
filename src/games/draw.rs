//! Number assignment and draw rounds
//!
//! Seeds are namespaced per purpose (`shuffle`, `draw`, `prize`) so no two
//! semantically distinct draws ever share one.

use crate::errors::RandomnessError;
use crate::games::pacing::RoundPlan;
use crate::games::randomness::RandomnessSource;
use crate::games::types::{Game, GameId, NumberRange, PlayerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub fn shuffle_seed(game_id: &GameId, position: usize) -> String {
    format!("{}:shuffle:{}", game_id, position)
}

pub fn draw_seed(game_id: &GameId, round_index: u32, draw_index: usize) -> String {
    format!("{}:draw:{}:{}", game_id, round_index, draw_index)
}

pub fn prize_seed(game_id: &GameId) -> String {
    format!("{}:prize", game_id)
}

/// Fisher-Yates shuffle of the range, then player i takes `pool[i % pool.len()]`.
///
/// Players are taken in id order. When the range is shorter than the roster
/// the wrap hands the same number to several players; they then fall together.
pub fn assign_numbers(
    game_id: &GameId,
    players: &[PlayerId],
    range: NumberRange,
    randomness: &dyn RandomnessSource,
) -> Result<BTreeMap<PlayerId, BTreeSet<u32>>, RandomnessError> {
    let mut pool: Vec<u32> = range.numbers().collect();

    for i in (1..pool.len()).rev() {
        let j = randomness.uniform(0, i as u64, &shuffle_seed(game_id, i))? as usize;
        pool.swap(i, j);
    }

    Ok(players
        .iter()
        .enumerate()
        .map(|(idx, player_id)| {
            let number = pool[idx % pool.len()];
            (player_id.clone(), [number].into_iter().collect())
        })
        .collect())
}

/// Outcome of one draw round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrawEvent {
    pub round_index: u32,
    pub numbers_drawn: Vec<u32>,
    /// `(player id, display name)` in elimination order
    pub eliminated: Vec<(PlayerId, String)>,
    pub remaining_active_count: usize,
}

/// Draw up to `plan.numbers_per_round` numbers and eliminate their holders.
///
/// Mutates `game` in place; callers that need all-or-nothing semantics run this
/// on a copy. Stops early once the survivor target is met.
pub fn play_round(
    game: &mut Game,
    plan: &RoundPlan,
    randomness: &dyn RandomnessSource,
) -> Result<DrawEvent, RandomnessError> {
    let round_index = game.round_index + 1;
    let mut numbers_drawn = Vec::new();
    let mut eliminated = Vec::new();

    for draw_index in 0..plan.numbers_per_round.max(1) {
        if game.active_count() <= game.survivor_count {
            break;
        }

        let undrawn = game.undrawn_numbers();
        if undrawn.is_empty() {
            break;
        }

        let seed = draw_seed(&game.id, round_index, draw_index);
        let idx = randomness.uniform(0, (undrawn.len() - 1) as u64, &seed)? as usize;
        let number = undrawn[idx];
        game.drawn_numbers.push(number);
        numbers_drawn.push(number);

        let holders: Vec<PlayerId> = game
            .number_assignment
            .iter()
            .filter(|(_, numbers)| numbers.contains(&number))
            .map(|(player_id, _)| player_id.clone())
            .collect();

        for player_id in holders {
            if let Some(player) = game.players.get_mut(&player_id) {
                if player.is_active() {
                    player.eliminated_round = Some(round_index);
                    eliminated.push((player.id.clone(), player.display_name.clone()));
                }
            }
        }
    }

    game.record_round(eliminated.len());

    Ok(DrawEvent {
        round_index,
        numbers_drawn,
        eliminated,
        remaining_active_count: game.active_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::randomness::HashRandomness;
    use crate::games::types::Player;
    use chrono::Utc;
    use std::time::Duration;

    fn plan(numbers_per_round: usize) -> RoundPlan {
        RoundPlan {
            numbers_per_round,
            inter_round_delay: Duration::ZERO,
        }
    }

    fn drawing_game(id: &str, players: usize, survivors: usize, multiplier: f64) -> Game {
        let now = Utc::now();
        let mut game = Game::new("chat".to_string(), players.max(2), survivors, multiplier, now);
        game.id = GameId::from(id);
        for i in 0..players {
            let pid = format!("p{:02}", i);
            game.players
                .insert(pid.clone(), Player::new(pid.clone(), format!("Player {}", i), now));
        }
        let range = NumberRange::for_players(players, multiplier);
        let ids: Vec<PlayerId> = game.players.keys().cloned().collect();
        game.number_assignment =
            assign_numbers(&game.id, &ids, range, &HashRandomness::new("draw-tests")).expect("assign");
        game.number_range = Some(range);
        game
    }

    fn run_to_completion(game: &mut Game, randomness: &dyn RandomnessSource) -> Vec<DrawEvent> {
        let mut events = Vec::new();
        while !game.draw_complete() {
            events.push(play_round(game, &plan(1), randomness).expect("round"));
            assert!(events.len() <= 1_000, "draw did not terminate");
        }
        events
    }

    #[test]
    fn test_assignment_is_a_permutation_when_range_is_large_enough() {
        let game = drawing_game("g-perm", 10, 1, 2.0);
        let numbers: BTreeSet<u32> = game
            .number_assignment
            .values()
            .flat_map(|s| s.iter().copied())
            .collect();

        assert_eq!(numbers.len(), 10, "every player gets a distinct number");
        assert!(numbers.iter().all(|n| (1..=20).contains(n)));
    }

    #[test]
    fn test_small_range_wraps_and_shares_numbers() {
        let game = drawing_game("g-wrap", 6, 1, 0.5);
        assert_eq!(game.number_range, Some(NumberRange { min: 1, max: 3 }));

        let numbers: Vec<u32> = game
            .number_assignment
            .values()
            .flat_map(|s| s.iter().copied())
            .collect();
        assert_eq!(numbers.len(), 6);
        let distinct: BTreeSet<u32> = numbers.iter().copied().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_shared_number_eliminates_all_holders() {
        let mut game = drawing_game("g-shared", 6, 1, 0.5);
        let source = HashRandomness::new("shared");

        let event = play_round(&mut game, &plan(1), &source).expect("round");
        let number = event.numbers_drawn[0];
        let holders = game
            .number_assignment
            .values()
            .filter(|s| s.contains(&number))
            .count();

        assert_eq!(event.eliminated.len(), holders);
        assert_eq!(holders, 2);
        assert_eq!(event.remaining_active_count, 4);
    }

    #[test]
    fn test_same_seed_sequence_same_elimination_order() {
        let source = HashRandomness::new("replay");
        let mut first = drawing_game("g-replay", 12, 3, 2.0);
        let mut second = drawing_game("g-replay", 12, 3, 2.0);

        let a = run_to_completion(&mut first, &source);
        let b = run_to_completion(&mut second, &source);

        assert_eq!(a, b);
        assert_eq!(first.drawn_numbers, second.drawn_numbers);
    }

    #[test]
    fn test_partition_and_no_duplicate_draws() {
        let source = HashRandomness::new("partition");
        let mut game = drawing_game("g-part", 15, 4, 2.0);
        run_to_completion(&mut game, &source);

        let active: BTreeSet<_> = game.active_players().map(|p| p.id.clone()).collect();
        let eliminated: BTreeSet<_> = game.eliminated_players().map(|p| p.id.clone()).collect();
        let all: BTreeSet<_> = game.players.keys().cloned().collect();

        assert!(active.is_disjoint(&eliminated));
        assert_eq!(active.union(&eliminated).cloned().collect::<BTreeSet<_>>(), all);
        assert_eq!(active.len(), 4);

        let distinct: BTreeSet<u32> = game.drawn_numbers.iter().copied().collect();
        assert_eq!(distinct.len(), game.drawn_numbers.len());
        let range = game.number_range.expect("range fixed");
        assert!(game.drawn_numbers.iter().all(|n| range.contains(*n)));
    }

    #[test]
    fn test_round_stops_once_survivor_target_met() {
        let source = HashRandomness::new("stop-early");
        let mut game = drawing_game("g-stop", 3, 2, 1.0);

        // Range == roster, so every draw eliminates exactly one player.
        let event = play_round(&mut game, &plan(3), &source).expect("round");
        assert_eq!(event.numbers_drawn.len(), 1);
        assert_eq!(event.remaining_active_count, 2);
        assert!(game.draw_complete());
    }

    #[test]
    fn test_elimination_round_is_recorded() {
        let source = HashRandomness::new("rounds");
        let mut game = drawing_game("g-rounds", 8, 1, 2.0);
        let events = run_to_completion(&mut game, &source);

        for player in game.eliminated_players() {
            let round = player.eliminated_round.expect("eliminated");
            let event = &events[(round - 1) as usize];
            assert!(event.eliminated.iter().any(|(id, _)| id == &player.id));
        }
    }
}
