use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub type PlayerId = String;
pub type ChatRef = String;

/// Opaque game identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GameId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for GameId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const SHORT_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const SHORT_CODE_LEN: usize = 6;

/// Human-shareable code, no 0/O or 1/I
pub fn generate_short_code() -> String {
    let mut rng = rand::thread_rng();
    (0..SHORT_CODE_LEN)
        .map(|_| SHORT_CODE_ALPHABET[rng.gen_range(0..SHORT_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Game lifecycle states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameState {
    Waiting,
    Drawing,
    Finished,
    Cancelled,
}

impl GameState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GameState::Finished | GameState::Cancelled)
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameState::Waiting => write!(f, "WAITING"),
            GameState::Drawing => write!(f, "DRAWING"),
            GameState::Finished => write!(f, "FINISHED"),
            GameState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    NotEnoughPlayers,
    AdminAbort,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::NotEnoughPlayers => write!(f, "not enough players"),
            CancelReason::AdminAbort => write!(f, "cancelled by an admin"),
        }
    }
}

/// Inclusive number range offered once enrollment closes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NumberRange {
    pub min: u32,
    pub max: u32,
}

impl NumberRange {
    /// `[1, floor(players * multiplier)]`, never empty
    pub fn for_players(player_count: usize, multiplier: f64) -> Self {
        let max = (player_count as f64 * multiplier).floor() as u32;
        Self { min: 1, max: max.max(1) }
    }

    pub fn len(&self) -> usize {
        (self.max - self.min + 1) as usize
    }

    pub fn contains(&self, number: u32) -> bool {
        number >= self.min && number <= self.max
    }

    pub fn numbers(&self) -> impl Iterator<Item = u32> {
        self.min..=self.max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
    /// Round in which the player was knocked out
    pub eliminated_round: Option<u32>,
}

impl Player {
    pub fn new(id: PlayerId, display_name: String, joined_at: DateTime<Utc>) -> Self {
        Self {
            id,
            display_name,
            joined_at,
            eliminated_round: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.eliminated_round.is_none()
    }
}

/// VRF evidence that accompanies a random value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RandomnessProof {
    /// Seed the value was derived from
    pub input_message: String,
    /// Hex-encoded VRF output
    pub output: String,
    /// Hex-encoded VRF proof; empty for sources without proofs
    pub proof: String,
    /// Hex-encoded public key
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prize {
    pub total_amount: u64,
    pub per_survivor_amount: u64,
    pub randomness_proof: RandomnessProof,
    /// False when the game ends without survivors
    pub distributed: bool,
}

impl Prize {
    /// Any remainder of the integer split stays with the treasury
    pub fn split(total_amount: u64, survivor_count: usize, randomness_proof: RandomnessProof) -> Self {
        let per_survivor_amount = total_amount / survivor_count.max(1) as u64;
        Self {
            total_amount,
            per_survivor_amount,
            randomness_proof,
            distributed: true,
        }
    }

    /// Amount returned to the treasury
    pub fn remainder(&self, survivor_count: usize) -> u64 {
        if !self.distributed {
            return self.total_amount;
        }
        self.total_amount - self.per_survivor_amount * survivor_count.max(1) as u64
    }
}

/// One elimination lottery, bound to a chat
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Game {
    pub id: GameId,
    pub short_code: String,
    pub chat_ref: ChatRef,
    pub state: GameState,
    #[serde(with = "pairs")]
    pub players: BTreeMap<PlayerId, Player>,
    pub max_players: usize,
    pub survivor_count: usize,
    pub number_range_multiplier: f64,
    pub number_range: Option<NumberRange>,
    #[serde(with = "pairs")]
    pub number_assignment: BTreeMap<PlayerId, BTreeSet<u32>>,
    pub drawn_numbers: Vec<u32>,
    pub round_index: u32,
    pub recent_eliminations: Vec<usize>,
    pub created_at: DateTime<Utc>,
    pub scheduled_start_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub next_round_at: Option<DateTime<Utc>>,
    pub prize: Option<Prize>,
    pub winners: Vec<PlayerId>,
    pub cancel_reason: Option<CancelReason>,
}

/// Rounds of elimination history kept for the pacing policy
pub const RECENT_HISTORY_LEN: usize = 8;

impl Game {
    pub fn new(
        chat_ref: ChatRef,
        max_players: usize,
        survivor_count: usize,
        number_range_multiplier: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: GameId::generate(),
            short_code: generate_short_code(),
            chat_ref,
            state: GameState::Waiting,
            players: BTreeMap::new(),
            max_players,
            survivor_count,
            number_range_multiplier,
            number_range: None,
            number_assignment: BTreeMap::new(),
            drawn_numbers: Vec::new(),
            round_index: 0,
            recent_eliminations: Vec::new(),
            created_at,
            scheduled_start_at: None,
            started_at: None,
            ended_at: None,
            next_round_at: None,
            prize: None,
            winners: Vec::new(),
            cancel_reason: None,
        }
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    pub fn active_players(&self) -> impl Iterator<Item = &Player> {
        self.players.values().filter(|p| p.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.active_players().count()
    }

    pub fn eliminated_players(&self) -> impl Iterator<Item = &Player> {
        self.players.values().filter(|p| !p.is_active())
    }

    /// Numbers of the fixed range not drawn yet, ascending
    pub fn undrawn_numbers(&self) -> Vec<u32> {
        let Some(range) = self.number_range else {
            return Vec::new();
        };
        let drawn: BTreeSet<u32> = self.drawn_numbers.iter().copied().collect();
        range.numbers().filter(|n| !drawn.contains(n)).collect()
    }

    pub fn draw_complete(&self) -> bool {
        self.active_count() <= self.survivor_count || self.undrawn_numbers().is_empty()
    }

    pub fn display_name<'a>(&'a self, player_id: &'a str) -> &'a str {
        self.players
            .get(player_id)
            .map(|p| p.display_name.as_str())
            .unwrap_or(player_id)
    }

    pub fn record_round(&mut self, eliminated: usize) {
        self.round_index += 1;
        self.recent_eliminations.push(eliminated);
        if self.recent_eliminations.len() > RECENT_HISTORY_LEN {
            let excess = self.recent_eliminations.len() - RECENT_HISTORY_LEN;
            self.recent_eliminations.drain(..excess);
        }
    }
}

/// Serializes maps as ordered `[key, value]` pairs and rebuilds them on load
mod pairs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let entries: Vec<(K, V)> = Vec::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}
