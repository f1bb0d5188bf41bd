//! Line-oriented operator commands
//!
//! Stands in for the chat transport: every command names the chat it acts on,
//! the same way a chat bot would receive it.

use crate::{
    errors::GameError,
    games::{Game, GameEngine, GameState},
};
use std::time::Duration;

pub const HELP: &str = "\
Commands:
  open <chat> [max_players] [survivors] [start_delay_secs]
  join <chat> <player_id> [display name]
  leave <chat> <player_id>
  start <chat>
  end <chat>
  status <chat>
  help
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open {
        chat: String,
        max_players: Option<usize>,
        survivors: Option<usize>,
        start_delay_secs: Option<u64>,
    },
    Join {
        chat: String,
        player_id: String,
        display_name: String,
    },
    Leave {
        chat: String,
        player_id: String,
    },
    Start {
        chat: String,
    },
    End {
        chat: String,
    },
    Status {
        chat: String,
    },
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command '{0}' (try 'help')")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("'{0}' is not a valid number")]
    InvalidNumber(String),
}

fn number<T: std::str::FromStr>(raw: Option<&&str>) -> Result<Option<T>, CommandError> {
    raw.map(|s| s.parse::<T>().map_err(|_| CommandError::InvalidNumber(s.to_string())))
        .transpose()
}

pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, args)) = words.split_first() else {
        return Ok(None);
    };

    let chat = |usage: &'static str| -> Result<String, CommandError> {
        args.first()
            .map(|s| s.to_string())
            .ok_or(CommandError::Usage(usage))
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "open" => Command::Open {
            chat: chat("open <chat> [max_players] [survivors] [start_delay_secs]")?,
            max_players: number(args.get(1))?,
            survivors: number(args.get(2))?,
            start_delay_secs: number(args.get(3))?,
        },
        "join" => {
            const USAGE: &str = "join <chat> <player_id> [display name]";
            let chat = chat(USAGE)?;
            let player_id = args.get(1).ok_or(CommandError::Usage(USAGE))?.to_string();
            let display_name = if args.len() > 2 {
                args[2..].join(" ")
            } else {
                player_id.clone()
            };
            Command::Join {
                chat,
                player_id,
                display_name,
            }
        }
        "leave" => {
            const USAGE: &str = "leave <chat> <player_id>";
            Command::Leave {
                chat: chat(USAGE)?,
                player_id: args.get(1).ok_or(CommandError::Usage(USAGE))?.to_string(),
            }
        }
        "start" => Command::Start {
            chat: chat("start <chat>")?,
        },
        "end" => Command::End {
            chat: chat("end <chat>")?,
        },
        "status" => Command::Status {
            chat: chat("status <chat>")?,
        },
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };

    Ok(Some(command))
}

/// One-paragraph summary of a game
pub fn format_status(game: &Game) -> String {
    let mut out = format!(
        "Game {} [{}] in {}: {} | {}/{} players, {} survive",
        game.short_code,
        game.id,
        game.chat_ref,
        game.state,
        game.players.len(),
        game.max_players,
        game.survivor_count
    );

    match game.state {
        GameState::Waiting => {
            if let Some(start) = game.scheduled_start_at {
                out.push_str(&format!(" | starts at {}", start.format("%H:%M:%S")));
            }
        }
        GameState::Drawing => {
            out.push_str(&format!(
                " | round {}, {} active, drawn {:?}",
                game.round_index,
                game.active_count(),
                game.drawn_numbers
            ));
        }
        GameState::Finished => {
            let names: Vec<&str> = game.winners.iter().map(|id| game.display_name(id)).collect();
            out.push_str(&format!(" | winners: {}", names.join(", ")));
            if let Some(prize) = &game.prize {
                out.push_str(&format!(
                    " | prize {} ({} each{})",
                    prize.total_amount,
                    prize.per_survivor_amount,
                    if prize.distributed { "" } else { ", not distributed" }
                ));
            }
        }
        GameState::Cancelled => {
            if let Some(reason) = game.cancel_reason {
                out.push_str(&format!(" | {}", reason));
            }
        }
    }

    out
}

/// Run a command against the engine and describe the outcome
pub fn execute(engine: &GameEngine, command: Command) -> Result<String, GameError> {
    match command {
        Command::Open {
            chat,
            max_players,
            survivors,
            start_delay_secs,
        } => {
            let config = engine.config();
            let game = engine.open_enrollment(
                &chat,
                max_players.unwrap_or(config.default_max_players),
                survivors.unwrap_or(config.default_survivor_count),
                start_delay_secs
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| config.default_start_delay()),
            )?;
            Ok(format!("✅ Opened {}", format_status(&game)))
        }
        Command::Join {
            chat,
            player_id,
            display_name,
        } => {
            let game_id = engine.status_by_chat(&chat)?.id;
            let game = engine.enroll(&game_id, &player_id, &display_name)?;
            Ok(format!("✅ {} joined ({}/{})", display_name, game.players.len(), game.max_players))
        }
        Command::Leave { chat, player_id } => {
            let game_id = engine.status_by_chat(&chat)?.id;
            let game = engine.leave(&game_id, &player_id)?;
            Ok(format!("✅ {} left ({} enrolled)", player_id, game.players.len()))
        }
        Command::Start { chat } => {
            let game_id = engine.status_by_chat(&chat)?.id;
            let state = engine.force_start(&game_id)?;
            Ok(format!("▶️  Game {} is {}", game_id, state))
        }
        Command::End { chat } => {
            let game_id = engine.status_by_chat(&chat)?.id;
            let state = engine.force_end(&game_id)?;
            Ok(format!("⏹️  Game {} is {}", game_id, state))
        }
        Command::Status { chat } => Ok(format_status(&engine.status_by_chat(&chat)?)),
        Command::Help => Ok(HELP.to_string()),
        Command::Quit => Ok("Bye".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_line_is_ignored() {
        assert_eq!(parse_command("   "), Ok(None));
    }

    #[test]
    fn test_open_with_optional_numbers() {
        assert_eq!(
            parse_command("open lobby 10 2"),
            Ok(Some(Command::Open {
                chat: "lobby".into(),
                max_players: Some(10),
                survivors: Some(2),
                start_delay_secs: None,
            }))
        );
        assert_eq!(
            parse_command("open lobby ten"),
            Err(CommandError::InvalidNumber("ten".into()))
        );
    }

    #[test]
    fn test_join_display_name_defaults_to_id() {
        assert_eq!(
            parse_command("JOIN lobby u42 Mary Ann"),
            Ok(Some(Command::Join {
                chat: "lobby".into(),
                player_id: "u42".into(),
                display_name: "Mary Ann".into(),
            }))
        );
        assert_eq!(
            parse_command("join lobby u7"),
            Ok(Some(Command::Join {
                chat: "lobby".into(),
                player_id: "u7".into(),
                display_name: "u7".into(),
            }))
        );
    }

    #[test]
    fn test_missing_arguments_report_usage() {
        assert!(matches!(parse_command("join lobby"), Err(CommandError::Usage(_))));
        assert!(matches!(parse_command("start"), Err(CommandError::Usage(_))));
        assert_eq!(
            parse_command("dance"),
            Err(CommandError::Unknown("dance".into()))
        );
    }
}
