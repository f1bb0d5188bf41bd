//! Events emitted by the engine
//!
//! Every event goes out on the engine's broadcast channel and, rendered as an
//! `OutboundMessage`, through the dispatcher.

use crate::dispatcher::{OutboundMessage, Priority};
use crate::games::draw::DrawEvent;
use crate::games::types::{CancelReason, ChatRef, GameId, NumberRange, PlayerId, Prize};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

pub const JOIN_BUNDLE_SUFFIX: &str = "joined the game";

/// Dispatcher bundle collecting a game's join notices
pub fn join_bundle_key(game_id: &GameId) -> String {
    format!("joined:{}", game_id)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    EnrollmentOpened {
        game_id: GameId,
        chat_ref: ChatRef,
        short_code: String,
        max_players: usize,
        survivor_count: usize,
        starts_at: DateTime<Utc>,
    },
    PlayerJoined {
        game_id: GameId,
        chat_ref: ChatRef,
        player_id: PlayerId,
        display_name: String,
        enrolled: usize,
        max_players: usize,
    },
    PlayerLeft {
        game_id: GameId,
        chat_ref: ChatRef,
        player_id: PlayerId,
        display_name: String,
        enrolled: usize,
    },
    CountdownNotice {
        game_id: GameId,
        chat_ref: ChatRef,
        seconds_left: u64,
        enrolled: usize,
    },
    DrawStarted {
        game_id: GameId,
        chat_ref: ChatRef,
        number_range: NumberRange,
        /// `(display name, numbers)` per player, ordered by player id
        assignments: Vec<(String, Vec<u32>)>,
        prize_total: u64,
        per_survivor: u64,
    },
    RoundResult {
        game_id: GameId,
        chat_ref: ChatRef,
        draw: DrawEvent,
    },
    GameFinished {
        game_id: GameId,
        chat_ref: ChatRef,
        /// `(player id, display name)`
        winners: Vec<(PlayerId, String)>,
        prize: Option<Prize>,
    },
    GameCancelled {
        game_id: GameId,
        chat_ref: ChatRef,
        reason: CancelReason,
    },
}

impl GameEvent {
    pub fn game_id(&self) -> &GameId {
        match self {
            GameEvent::EnrollmentOpened { game_id, .. }
            | GameEvent::PlayerJoined { game_id, .. }
            | GameEvent::PlayerLeft { game_id, .. }
            | GameEvent::CountdownNotice { game_id, .. }
            | GameEvent::DrawStarted { game_id, .. }
            | GameEvent::RoundResult { game_id, .. }
            | GameEvent::GameFinished { game_id, .. }
            | GameEvent::GameCancelled { game_id, .. } => game_id,
        }
    }

    pub fn chat_ref(&self) -> &str {
        match self {
            GameEvent::EnrollmentOpened { chat_ref, .. }
            | GameEvent::PlayerJoined { chat_ref, .. }
            | GameEvent::PlayerLeft { chat_ref, .. }
            | GameEvent::CountdownNotice { chat_ref, .. }
            | GameEvent::DrawStarted { chat_ref, .. }
            | GameEvent::RoundResult { chat_ref, .. }
            | GameEvent::GameFinished { chat_ref, .. }
            | GameEvent::GameCancelled { chat_ref, .. } => chat_ref,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            GameEvent::GameFinished { .. } | GameEvent::GameCancelled { .. } => Priority::Critical,
            GameEvent::DrawStarted { .. }
            | GameEvent::RoundResult { .. }
            | GameEvent::EnrollmentOpened { .. } => Priority::High,
            GameEvent::CountdownNotice { .. } => Priority::Normal,
            GameEvent::PlayerJoined { .. } | GameEvent::PlayerLeft { .. } => Priority::Low,
        }
    }

    /// Dispatcher form; joins are bundled per game inside `join_window`
    pub fn to_outbound(&self, join_window: Duration) -> OutboundMessage {
        let message = OutboundMessage::new(self.chat_ref(), self.body(), self.priority())
            .for_game(self.game_id());

        match self {
            GameEvent::PlayerJoined {
                game_id, player_id, ..
            } => message
                .bundled(join_bundle_key(game_id), join_window, JOIN_BUNDLE_SUFFIX)
                .with_member(player_id.clone()),
            _ => message,
        }
    }

    fn body(&self) -> String {
        match self {
            GameEvent::EnrollmentOpened {
                short_code,
                max_players,
                survivor_count,
                starts_at,
                ..
            } => format!(
                "New survivor draw {} is open: up to {} players, {} survive. Starts at {}.",
                short_code,
                max_players,
                survivor_count,
                starts_at.format("%H:%M:%S UTC")
            ),
            GameEvent::PlayerJoined { display_name, .. } => display_name.clone(),
            GameEvent::PlayerLeft {
                display_name,
                enrolled,
                ..
            } => format!("{} left the game ({} enrolled)", display_name, enrolled),
            GameEvent::CountdownNotice {
                seconds_left,
                enrolled,
                ..
            } => format!("Draw starts in {}s with {} players enrolled", seconds_left, enrolled),
            GameEvent::DrawStarted {
                number_range,
                assignments,
                prize_total,
                per_survivor,
                ..
            } => {
                let numbers = assignments
                    .iter()
                    .map(|(name, numbers)| {
                        let list: Vec<String> = numbers.iter().map(u32::to_string).collect();
                        format!("{}: {}", name, list.join("/"))
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "Draw started! Numbers {}-{}. Prize pool {} ({} each). {}",
                    number_range.min, number_range.max, prize_total, per_survivor, numbers
                )
            }
            GameEvent::RoundResult { draw, .. } => {
                let drawn: Vec<String> = draw.numbers_drawn.iter().map(u32::to_string).collect();
                let out: Vec<&str> = draw.eliminated.iter().map(|(_, name)| name.as_str()).collect();
                if out.is_empty() {
                    format!(
                        "Round {}: drew {}. Nobody is out, {} still in.",
                        draw.round_index,
                        drawn.join(", "),
                        draw.remaining_active_count
                    )
                } else {
                    format!(
                        "Round {}: drew {}. Out: {}. {} still in.",
                        draw.round_index,
                        drawn.join(", "),
                        out.join(", "),
                        draw.remaining_active_count
                    )
                }
            }
            GameEvent::GameFinished { winners, prize, .. } => {
                let names: Vec<&str> = winners.iter().map(|(_, name)| name.as_str()).collect();
                match prize {
                    Some(p) if p.distributed => format!(
                        "Game over! Survivors: {}. Each wins {}.",
                        names.join(", "),
                        p.per_survivor_amount
                    ),
                    _ => "Game over! Nobody survived, the prize is not distributed.".to_string(),
                }
            }
            GameEvent::GameCancelled { reason, .. } => format!("Game cancelled: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_is_bundled_per_game() {
        let event = GameEvent::PlayerJoined {
            game_id: GameId::from("g1"),
            chat_ref: "chat".into(),
            player_id: "u1".into(),
            display_name: "Alice".into(),
            enrolled: 1,
            max_players: 5,
        };

        let message = event.to_outbound(Duration::from_secs(3));
        assert_eq!(message.body, "Alice");
        assert_eq!(message.priority, Priority::Low);
        let bundle = message.bundle.expect("join is bundled");
        assert_eq!(bundle.key, "joined:g1");
        assert_eq!(bundle.suffix, JOIN_BUNDLE_SUFFIX);
        assert_eq!(bundle.member.as_deref(), Some("u1"));
    }

    #[test]
    fn test_terminal_events_are_critical() {
        let event = GameEvent::GameCancelled {
            game_id: GameId::from("g1"),
            chat_ref: "chat".into(),
            reason: CancelReason::NotEnoughPlayers,
        };
        let message = event.to_outbound(Duration::from_secs(3));
        assert_eq!(message.priority, Priority::Critical);
        assert!(message.bundle.is_none());
        assert_eq!(message.game_id, Some(GameId::from("g1")));
        assert!(message.body.contains("not enough players"));
    }

    #[test]
    fn test_round_result_lists_eliminated() {
        let event = GameEvent::RoundResult {
            game_id: GameId::from("g1"),
            chat_ref: "chat".into(),
            draw: DrawEvent {
                round_index: 2,
                numbers_drawn: vec![7, 3],
                eliminated: vec![("u1".into(), "Alice".into())],
                remaining_active_count: 4,
            },
        };
        let message = event.to_outbound(Duration::ZERO);
        assert_eq!(message.body, "Round 2: drew 7, 3. Out: Alice. 4 still in.");
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let event = GameEvent::CountdownNotice {
            game_id: GameId::from("g1"),
            chat_ref: "chat".into(),
            seconds_left: 30,
            enrolled: 3,
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["event"], "countdown_notice");
        assert_eq!(value["seconds_left"], 30);
    }
}
