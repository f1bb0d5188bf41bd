//! Chat to live-game index
//!
//! Holds only games that are still WAITING or DRAWING. The engine is the sole
//! writer; it binds on open-enrollment and releases on FINISHED or CANCELLED.

use crate::games::types::{ChatRef, Game, GameId};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct GameRegistry {
    by_chat: HashMap<ChatRef, GameId>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from restored games, skipping terminal ones
    pub fn from_games<'a>(games: impl IntoIterator<Item = &'a Game>) -> Self {
        let mut registry = Self::new();
        for game in games {
            if !game.state.is_terminal() {
                registry.by_chat.insert(game.chat_ref.clone(), game.id.clone());
            }
        }
        registry
    }

    pub fn live_game(&self, chat_ref: &str) -> Option<&GameId> {
        self.by_chat.get(chat_ref)
    }

    /// Bind a chat to a game; returns the game already bound, if any
    pub fn bind(&mut self, chat_ref: &str, game_id: &GameId) -> Result<(), GameId> {
        if let Some(existing) = self.by_chat.get(chat_ref) {
            return Err(existing.clone());
        }
        self.by_chat.insert(chat_ref.to_string(), game_id.clone());
        Ok(())
    }

    /// Release the chat only if it still points at `game_id`
    pub fn release(&mut self, chat_ref: &str, game_id: &GameId) -> bool {
        match self.by_chat.get(chat_ref) {
            Some(bound) if bound == game_id => {
                self.by_chat.remove(chat_ref);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.by_chat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_chat.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::types::GameState;
    use chrono::Utc;

    #[test]
    fn test_one_live_game_per_chat() {
        let mut registry = GameRegistry::new();
        let first = GameId::from("g1");
        let second = GameId::from("g2");

        assert!(registry.bind("chat", &first).is_ok());
        assert_eq!(registry.bind("chat", &second), Err(first.clone()));
        assert!(registry.bind("other", &second).is_ok());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_release_ignores_stale_game() {
        let mut registry = GameRegistry::new();
        let current = GameId::from("current");
        registry.bind("chat", &current).expect("bind");

        assert!(!registry.release("chat", &GameId::from("stale")));
        assert_eq!(registry.live_game("chat"), Some(&current));
        assert!(registry.release("chat", &current));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rebuild_skips_terminal_games() {
        let now = Utc::now();
        let live = Game::new("a".into(), 5, 1, 2.0, now);
        let mut done = Game::new("b".into(), 5, 1, 2.0, now);
        done.state = GameState::Finished;

        let registry = GameRegistry::from_games([&live, &done]);
        assert_eq!(registry.live_game("a"), Some(&live.id));
        assert_eq!(registry.live_game("b"), None);
    }
}
