//! Offline inspector for persisted games
//!
//! Usage: inspect-games [DATA_DIR]
//! Falls back to SURVIVOR_DRAW_DATA_DIR, then the configured default.

use std::{path::Path, sync::Arc};
use survivor_draw::{
    games::{draw::prize_seed, Game, GameState, VrfRandomness},
    ConfigLoader, GameStore, LotteryConfig, OptimizedStorage, RocksGameStore,
};

fn main() {
    let config = ConfigLoader::new().load().unwrap_or_else(|e| {
        println!("⚠️  Using default configuration: {}", e);
        LotteryConfig::default()
    });

    let data_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.storage.data_directory.clone());
    let db_path = Path::new(&data_dir);

    if !db_path.exists() {
        println!("❌ No game data found at {:?}", db_path);
        return;
    }

    let storage = match OptimizedStorage::new(db_path) {
        Ok(storage) => storage,
        Err(e) => {
            println!("❌ Failed to open database at {:?}: {}", db_path, e);
            println!("   Is the engine still running?");
            return;
        }
    };
    let store = RocksGameStore::new(Arc::new(storage));

    let mut games = match store.load_all() {
        Ok(games) => games,
        Err(e) => {
            println!("❌ Failed to read games: {}", e);
            return;
        }
    };
    games.sort_by_key(|g| g.created_at);

    println!("🔍 Game Inspector");
    println!("=================");
    println!("Database: {:?}", db_path);
    println!("Records: {}\n", games.len());

    for game in &games {
        print_game(game, &config);
    }

    let live = games.iter().filter(|g| !g.state.is_terminal()).count();
    println!("📊 {} live, {} finished or cancelled", live, games.len() - live);
}

fn print_game(game: &Game, config: &LotteryConfig) {
    let icon = match game.state {
        GameState::Waiting => "⏳",
        GameState::Drawing => "🎲",
        GameState::Finished => "🏆",
        GameState::Cancelled => "🚫",
    };

    println!("{} Game {} ({})", icon, game.short_code, game.id);
    println!("   Chat: {}", game.chat_ref);
    println!("   State: {}", game.state);
    println!(
        "   Players: {}/{} ({} survive)",
        game.players.len(),
        game.max_players,
        game.survivor_count
    );
    println!("   Created: {}", game.created_at);

    if let Some(start) = game.scheduled_start_at {
        println!("   Scheduled start: {}", start);
    }
    if let Some(range) = game.number_range {
        println!("   Numbers: {}..={}", range.min, range.max);
    }
    if game.round_index > 0 {
        println!(
            "   Round {}: drawn {:?}, {} active",
            game.round_index,
            game.drawn_numbers,
            game.active_count()
        );
    }
    if let Some(next) = game.next_round_at {
        println!("   Next round: {}", next);
    }
    if !game.winners.is_empty() {
        let names: Vec<&str> = game.winners.iter().map(|id| game.display_name(id)).collect();
        println!("   Winners: {}", names.join(", "));
    }
    if let Some(reason) = game.cancel_reason {
        println!("   Cancelled: {}", reason);
    }

    if let Some(prize) = &game.prize {
        println!(
            "   Prize: {} ({} per survivor, distributed: {})",
            prize.total_amount, prize.per_survivor_amount, prize.distributed
        );
        match VrfRandomness::verify_proof(
            &prize.randomness_proof,
            &config.randomness.signing_context,
            &prize_seed(&game.id),
            config.game.prize_min,
            config.game.prize_max,
        ) {
            Ok(value) if value == prize.total_amount => println!("   ✓ Prize proof verified"),
            Ok(value) => println!("   ❌ Proof yields {}, record says {}", value, prize.total_amount),
            Err(e) => println!("   ⚠️  Proof not verifiable with current config: {}", e),
        }
    }
    println!();
}
