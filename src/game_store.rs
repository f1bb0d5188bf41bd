//! Persistent game records
//!
//! One JSON record per chat, keyed `game:chat:{chat_ref}`. A chat only ever
//! has one live game, so a new game in the same chat overwrites the previous
//! (terminal) record.

use crate::{
    errors::{LotteryResult, StorageError},
    games::types::{Game, GameId},
    storage::OptimizedStorage,
};
use dashmap::DashMap;
use std::sync::Arc;

const GAME_RECORD_PREFIX: &str = "game:chat:";

fn game_record_key(chat_ref: &str) -> Vec<u8> {
    format!("{}{}", GAME_RECORD_PREFIX, chat_ref).into_bytes()
}

fn encode_game(game: &Game) -> LotteryResult<Vec<u8>> {
    serde_json::to_vec(game).map_err(|e| {
        StorageError::WriteFailed(format!("Failed to encode game {}: {}", game.id, e)).into()
    })
}

/// Decode every record, skipping the ones that fail
fn decode_records<I>(rows: I) -> Vec<Game>
where
    I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
{
    rows.into_iter()
        .filter_map(|(key, value)| match serde_json::from_slice::<Game>(&value) {
            Ok(game) => Some(game),
            Err(e) => {
                tracing::warn!(
                    key = %String::from_utf8_lossy(&key),
                    "Skipping corrupt game record: {}",
                    e
                );
                None
            }
        })
        .collect()
}

pub trait GameStore: Send + Sync {
    /// Durably record the full game aggregate
    fn snapshot(&self, game: &Game) -> LotteryResult<()>;

    /// Record several games at once; returns how many were written
    fn snapshot_batch(&self, games: &[&Game]) -> LotteryResult<usize> {
        for game in games {
            self.snapshot(game)?;
        }
        Ok(games.len())
    }

    /// Every readable record
    fn load_all(&self) -> LotteryResult<Vec<Game>>;

    /// Delete the chat's record if it still belongs to `game_id`
    fn remove(&self, chat_ref: &str, game_id: &GameId) -> LotteryResult<bool>;
}

/// RocksDB-backed store
pub struct RocksGameStore {
    storage: Arc<OptimizedStorage>,
}

impl RocksGameStore {
    pub fn new(storage: Arc<OptimizedStorage>) -> Self {
        Self { storage }
    }

    pub fn load(&self, chat_ref: &str) -> LotteryResult<Option<Game>> {
        let Some(bytes) = self.storage.get(&game_record_key(chat_ref)) else {
            return Ok(None);
        };

        let game = serde_json::from_slice(&bytes).map_err(|e| {
            StorageError::CorruptedData(format!("Failed to decode game for chat {}: {}", chat_ref, e))
        })?;
        Ok(Some(game))
    }
}

impl GameStore for RocksGameStore {
    fn snapshot(&self, game: &Game) -> LotteryResult<()> {
        let bytes = encode_game(game)?;
        self.storage
            .put(&game_record_key(&game.chat_ref), &bytes)
            .map_err(|e| StorageError::WriteFailed(format!("Failed to store game {}: {}", game.id, e)))?;
        tracing::trace!(game_id = %game.id, state = %game.state, "Game snapshot written");
        Ok(())
    }

    /// One RocksDB write batch, so a crash never leaves half of a sweep on disk
    fn snapshot_batch(&self, games: &[&Game]) -> LotteryResult<usize> {
        let rows = games
            .iter()
            .map(|game| -> LotteryResult<(Vec<u8>, Vec<u8>)> {
                Ok((game_record_key(&game.chat_ref), encode_game(game)?))
            })
            .collect::<LotteryResult<Vec<_>>>()?;
        self.storage
            .batch_write(&rows)
            .map_err(|e| StorageError::WriteFailed(format!("Failed to store snapshot batch: {}", e)))?;
        Ok(rows.len())
    }

    fn load_all(&self) -> LotteryResult<Vec<Game>> {
        Ok(decode_records(
            self.storage.scan_prefix(GAME_RECORD_PREFIX.as_bytes()),
        ))
    }

    fn remove(&self, chat_ref: &str, game_id: &GameId) -> LotteryResult<bool> {
        let key = game_record_key(chat_ref);
        let Some(bytes) = self.storage.get(&key) else {
            return Ok(false);
        };

        // A newer game may already own the slot; corrupt records are fair game.
        if let Ok(stored) = serde_json::from_slice::<Game>(&bytes) {
            if &stored.id != game_id {
                return Ok(false);
            }
        }

        self.storage.delete(&key)?;
        Ok(true)
    }
}

/// In-memory store holding the same encoded bytes the RocksDB store writes
#[derive(Default)]
pub struct MemoryGameStore {
    records: DashMap<Vec<u8>, Vec<u8>>,
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write raw bytes under a chat's key
    pub fn insert_raw(&self, chat_ref: &str, bytes: Vec<u8>) {
        self.records.insert(game_record_key(chat_ref), bytes);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl GameStore for MemoryGameStore {
    fn snapshot(&self, game: &Game) -> LotteryResult<()> {
        let bytes = encode_game(game)?;
        self.records.insert(game_record_key(&game.chat_ref), bytes);
        Ok(())
    }

    fn load_all(&self) -> LotteryResult<Vec<Game>> {
        let mut rows: Vec<(Vec<u8>, Vec<u8>)> = self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(decode_records(rows))
    }

    fn remove(&self, chat_ref: &str, game_id: &GameId) -> LotteryResult<bool> {
        let key = game_record_key(chat_ref);
        let removed = self.records.remove_if(&key, |_, bytes| {
            serde_json::from_slice::<Game>(bytes)
                .map(|stored| &stored.id == game_id)
                .unwrap_or(true)
        });
        Ok(removed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::types::{GameState, NumberRange, Player};
    use chrono::{TimeZone, Utc};

    fn sample_game(chat: &str) -> Game {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid time");
        let mut game = Game::new(chat.to_string(), 5, 2, 2.0, created);
        for (i, name) in ["Alice", "Bob", "Carol"].iter().enumerate() {
            let id = format!("u{}", i);
            game.players
                .insert(id.clone(), Player::new(id.clone(), name.to_string(), created));
            game.number_assignment
                .insert(id, [i as u32 * 2 + 1].into_iter().collect());
        }
        game.state = GameState::Drawing;
        game.number_range = Some(NumberRange { min: 1, max: 6 });
        game.drawn_numbers = vec![3, 6];
        game.scheduled_start_at = Some(created + chrono::Duration::seconds(90));
        game.started_at = Some(created + chrono::Duration::seconds(91));
        if let Some(bob) = game.players.get_mut("u1") {
            bob.eliminated_round = Some(1);
        }
        game
    }

    #[test]
    fn test_memory_round_trip() {
        let store = MemoryGameStore::new();
        let game = sample_game("chat-1");
        store.snapshot(&game).expect("snapshot");

        let loaded = store.load_all().expect("load");
        assert_eq!(loaded, vec![game]);
    }

    #[test]
    fn test_rocks_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = Arc::new(OptimizedStorage::new(dir.path()).expect("open"));
        let store = RocksGameStore::new(storage);

        let game = sample_game("chat-1");
        store.snapshot(&game).expect("snapshot");

        assert_eq!(store.load("chat-1").expect("load"), Some(game.clone()));
        assert_eq!(store.load_all().expect("load"), vec![game]);
        assert_eq!(store.load("chat-2").expect("load"), None);
    }

    #[test]
    fn test_rocks_batch_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = Arc::new(OptimizedStorage::new(dir.path()).expect("open"));
        let store = RocksGameStore::new(storage);

        let (a, b) = (sample_game("chat-a"), sample_game("chat-b"));
        assert_eq!(store.snapshot_batch(&[&a, &b]).expect("batch"), 2);
        assert_eq!(store.load_all().expect("load"), vec![a, b]);
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        let store = MemoryGameStore::new();
        store.snapshot(&sample_game("chat-a")).expect("snapshot");
        store.insert_raw("chat-b", b"{not json".to_vec());
        store.snapshot(&sample_game("chat-c")).expect("snapshot");

        let loaded = store.load_all().expect("load");
        let chats: Vec<_> = loaded.iter().map(|g| g.chat_ref.as_str()).collect();
        assert_eq!(chats, vec!["chat-a", "chat-c"]);
    }

    #[test]
    fn test_remove_only_matching_game() {
        let store = MemoryGameStore::new();
        let old = sample_game("chat-1");
        let newer = sample_game("chat-1");
        store.snapshot(&newer).expect("snapshot");

        assert!(!store.remove("chat-1", &old.id).expect("remove"));
        assert_eq!(store.len(), 1);
        assert!(store.remove("chat-1", &newer.id).expect("remove"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_rocks_remove_and_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = Arc::new(OptimizedStorage::new(dir.path()).expect("open"));
        let store = RocksGameStore::new(storage);

        let first = sample_game("chat-1");
        let second = sample_game("chat-1");
        store.snapshot(&first).expect("snapshot");
        store.snapshot(&second).expect("snapshot");

        assert_eq!(store.load_all().expect("load").len(), 1);
        assert!(!store.remove("chat-1", &first.id).expect("remove"));
        assert!(store.remove("chat-1", &second.id).expect("remove"));
        assert!(store.load_all().expect("load").is_empty());
    }
}
