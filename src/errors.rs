//! Error types for the survivor-draw engine
//!
//! Commands rejected by the game engine are ordinary values (`GameError`), not
//! faults. Everything else funnels into `LotteryError`.

use crate::games::types::{GameId, GameState};

/// Root error type for all survivor-draw operations
#[derive(Debug, thiserror::Error)]
pub enum LotteryError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Storage system errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Rejected game commands
    #[error("Game error: {0}")]
    Game(#[from] GameError),

    /// Randomness source errors
    #[error("Randomness error: {0}")]
    Randomness(#[from] RandomnessError),

    /// Outbound transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Configuration and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue { field: String, value: String, reason: String },
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
}

/// Storage system errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),
    #[error("Read failed: {0}")]
    ReadFailed(String),
    #[error("Write failed: {0}")]
    WriteFailed(String),
    #[error("Corrupted data: {0}")]
    CorruptedData(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// Commands the engine refuses. None of these change game state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("Unknown game: {0}")]
    UnknownGame(GameId),
    #[error("No open game in chat {0}")]
    UnknownChat(String),
    #[error("Chat {chat_ref} already has game {game_id} in progress")]
    ChatBusy { chat_ref: String, game_id: GameId },
    #[error("Player {player_id} already joined game {game_id}")]
    AlreadyEnrolled { game_id: GameId, player_id: String },
    #[error("Player {player_id} is not enrolled in game {game_id}")]
    NotEnrolled { game_id: GameId, player_id: String },
    #[error("Game {game_id} is full ({max_players} players)")]
    GameFull { game_id: GameId, max_players: usize },
    #[error("Enrollment for game {game_id} is closed (state {state})")]
    EnrollmentClosed { game_id: GameId, state: GameState },
    #[error("Invalid game settings: {0}")]
    InvalidSettings(String),
}

/// Randomness source errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RandomnessError {
    #[error("Empty range: min {min} > max {max}")]
    InvalidRange { min: u64, max: u64 },
    #[error("VRF evaluation failed: {0}")]
    Vrf(String),
    #[error("Invalid randomness proof: {0}")]
    InvalidProof(String),
}

/// Outbound transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Delivery to {chat_ref} failed: {reason}")]
    DeliveryFailed { chat_ref: String, reason: String },
    #[error("Transport closed")]
    Closed,
}

// External error conversions
impl From<rocksdb::Error> for LotteryError {
    fn from(e: rocksdb::Error) -> Self {
        LotteryError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

impl From<std::io::Error> for LotteryError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                LotteryError::Storage(StorageError::PermissionDenied(e.to_string()))
            }
            _ => LotteryError::Storage(StorageError::ReadFailed(e.to_string())),
        }
    }
}

impl From<serde_json::Error> for LotteryError {
    fn from(e: serde_json::Error) -> Self {
        LotteryError::Storage(StorageError::CorruptedData(e.to_string()))
    }
}

impl From<toml::de::Error> for LotteryError {
    fn from(e: toml::de::Error) -> Self {
        LotteryError::Configuration(ConfigurationError::LoadFailed(e.to_string()))
    }
}

// Convenience type alias for Results
pub type LotteryResult<T> = Result<T, LotteryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let config_error = ConfigurationError::ValidationFailed("test".to_string());
        let error = LotteryError::Configuration(config_error);

        assert!(error.to_string().contains("Configuration error"));
        assert!(error.to_string().contains("test"));
    }

    #[test]
    fn test_game_error_details() {
        let error = GameError::GameFull {
            game_id: GameId::from("g-1"),
            max_players: 5,
        };

        assert!(error.to_string().contains("g-1"));
        assert!(error.to_string().contains("5 players"));
    }

    #[test]
    fn test_error_conversion() {
        let game_error = GameError::UnknownGame(GameId::from("missing"));
        let error: LotteryError = game_error.into();

        match error {
            LotteryError::Game(GameError::UnknownGame(id)) => assert_eq!(id.as_str(), "missing"),
            _ => panic!("Expected game error"),
        }
    }

    #[test]
    fn test_error_source() {
        let error = LotteryError::Storage(StorageError::ReadFailed("disk".to_string()));
        assert!(error.source().is_some());
    }

    #[test]
    fn test_io_permission_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let error: LotteryError = io.into();
        assert!(matches!(error, LotteryError::Storage(StorageError::PermissionDenied(_))));
    }
}
