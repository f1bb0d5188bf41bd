//! Elimination-draw game: data model, draw algorithm and engine

pub mod draw;
pub mod engine;
pub mod events;
pub mod pacing;
pub mod randomness;
pub mod registry;
pub mod types;

pub use draw::DrawEvent;
pub use engine::{EngineParts, GameEngine};
pub use events::GameEvent;
pub use pacing::{AdaptivePacing, FixedPacing, PacingPolicy, RoundPlan};
pub use randomness::{HashRandomness, RandomnessSource, VrfRandomness};
pub use registry::GameRegistry;
pub use types::*;
