//! Survivor Draw - elimination lottery engine
//!
//! Runs the engine with an operator console on stdin. Each console line names
//! the chat it acts on; announcements are printed as they are delivered.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use survivor_draw::{
    console::{self, Command},
    errors::{LotteryResult, TransportError},
    games::VrfRandomness,
    ConfigLoader, LotteryConfig, LotteryFactory, OutboundMessage, Transport,
};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Survivor Draw CLI
#[derive(Parser)]
#[command(name = "survivor-draw")]
#[command(about = "Elimination-draw lottery engine with provably fair randomness")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Data directory for game storage
    #[arg(short, long)]
    data_dir: Option<String>,

    /// Use the short-timing testing preset instead of the config file
    #[arg(long)]
    testing: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine with an interactive console (default)
    Run {
        /// Keep games in memory only
        #[arg(long)]
        in_memory: bool,
    },

    /// Generate a VRF seed for `randomness.vrf_seed_hex`
    Keygen {
        /// Signing context the key will be used with
        #[arg(long, default_value = "survivor-draw")]
        context: String,
    },
}

/// Prints deliveries to stdout, prefixed with the target chat
struct ConsoleTransport;

#[async_trait]
impl Transport for ConsoleTransport {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        println!("💬 [{}] {}", message.chat_ref, message.body);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> LotteryResult<()> {
    let cli = Cli::parse();

    let mut config = if cli.testing {
        LotteryConfig::testing()
    } else {
        let mut loader = ConfigLoader::new();
        if let Some(path) = &cli.config {
            loader = loader.with_path(path);
        }
        loader.load()?
    };

    if let Some(dir) = cli.data_dir {
        config.storage.data_directory = dir;
    }

    let default_filter = if cli.verbose {
        "debug"
    } else {
        config.monitoring.log_level.as_filter()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("survivor_draw={}", default_filter).into()),
        )
        .init();

    match cli.command.unwrap_or(Commands::Run { in_memory: false }) {
        Commands::Run { in_memory } => run_console(config, in_memory).await,
        Commands::Keygen { context } => {
            let seed: [u8; 32] = rand::random();
            let source = VrfRandomness::from_seed(&seed, &context)?;
            println!("🔑 VRF key generated");
            println!("   vrf_seed_hex = \"{}\"", hex::encode(seed));
            println!("   public key   = {}", source.public_key_hex());
            println!("⚠️  Keep the seed secret; publish only the public key.");
            Ok(())
        }
    }
}

async fn run_console(config: LotteryConfig, in_memory: bool) -> LotteryResult<()> {
    println!("🎲 Survivor Draw");
    println!("================");

    let transport = Arc::new(ConsoleTransport);
    let runtime = if in_memory {
        println!("🧪 In-memory mode: games are not persisted");
        LotteryFactory::create_in_memory(config, transport).await?
    } else {
        LotteryFactory::create_with_transport(config, transport).await?
    };

    let engine = runtime.engine();
    println!("✅ Engine ready ({} live game(s))", engine.live_game_count());
    println!("{}", console::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("🛑 Interrupted");
                break;
            }
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read console input: {}", e);
                break;
            }
        };

        let command = match console::parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("❌ {}", e);
                continue;
            }
        };

        if command == Command::Quit {
            break;
        }

        let engine = engine.clone();
        match tokio::task::spawn_blocking(move || console::execute(&engine, command)).await {
            Ok(Ok(reply)) => println!("{}", reply),
            Ok(Err(e)) => println!("❌ {}", e),
            Err(e) => tracing::error!("Console command panicked: {}", e),
        }
    }

    println!("💾 Shutting down...");
    runtime.shutdown().await;
    println!("👋 Stopped");
    Ok(())
}
