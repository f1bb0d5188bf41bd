//! Survivor Draw - timed elimination lottery engine
//!
//! Players enroll during a window, receive a random number, and are knocked
//! out round by round as numbers are drawn until only the survivors remain.
//! Games survive restarts through RocksDB snapshots; draws and prizes come
//! from a seeded VRF so every outcome can be replayed and verified.

pub mod config;
pub mod console;
pub mod dispatcher;
pub mod errors;
pub mod factory;
pub mod game_store;
pub mod games;
pub mod metrics;
pub mod scheduler;
pub mod services;
pub mod storage;

pub use config::{ConfigLoader, LotteryConfig};
pub use dispatcher::{LogTransport, OutboundDispatcher, OutboundMessage, Priority, Transport};
pub use errors::{GameError, LotteryError, LotteryResult};
pub use factory::{LotteryFactory, RuntimeHandle};
pub use game_store::{GameStore, MemoryGameStore, RocksGameStore};
pub use games::{GameEngine, GameEvent, GameId, GameState};
pub use scheduler::{Scheduler, TaskKind};
pub use storage::OptimizedStorage;
