//! Configuration management with validation and defaults
//!
//! Every tunable of the engine lives here. Files are TOML; a handful of
//! environment variables override the file for container deployments.

use crate::errors::{ConfigurationError, LotteryResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Full runtime configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LotteryConfig {
    pub game: GameConfig,
    pub scheduler: SchedulerConfig,
    pub dispatcher: DispatcherConfig,
    pub storage: StorageConfig,
    pub randomness: RandomnessConfig,
    pub monitoring: MonitoringConfig,
}

/// Game rules and engine timings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub default_max_players: usize,
    /// Hard upper bound accepted by `open_enrollment`
    pub max_players_limit: usize,
    pub default_survivor_count: usize,
    /// Numbers offered = players x multiplier, fixed when enrollment closes
    pub number_range_multiplier: f64,
    /// Refuse multipliers that can produce shared numbers
    pub strict_number_range: bool,
    pub default_start_delay_secs: u64,
    /// Seconds before the start at which a countdown notice goes out
    pub countdown_notice_secs: Vec<u64>,
    /// Pause between the draw-started announcement and the first round
    pub first_round_delay_ms: u64,
    pub fault_retry_delay_ms: u64,
    pub prize_min: u64,
    pub prize_max: u64,
    /// How long finished games stay queryable before pruning
    pub retention_secs: u64,
    pub join_bundle_window_ms: u64,
    pub pacing: PacingConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            default_max_players: 50,
            max_players_limit: 100,
            default_survivor_count: 1,
            number_range_multiplier: 2.0,
            strict_number_range: false,
            default_start_delay_secs: 120,
            countdown_notice_secs: vec![60, 30, 10],
            first_round_delay_ms: 5_000,
            fault_retry_delay_ms: 3_000,
            prize_min: 1_000,
            prize_max: 100_000,
            retention_secs: 3_600,
            join_bundle_window_ms: 3_000,
            pacing: PacingConfig::default(),
        }
    }
}

/// Inputs for the adaptive pacing policy
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub base_delay_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_numbers_per_round: usize,
    /// Consecutive empty rounds before the draw speeds up
    pub stall_rounds: usize,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 4_000,
            min_delay_ms: 1_500,
            max_delay_ms: 8_000,
            max_numbers_per_round: 3,
            stall_rounds: 2,
        }
    }
}

/// Scheduler sweep configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub sweep_interval_ms: u64,
    /// Lateness past which a fired task is reported as overdue
    pub overdue_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 2_000,
            overdue_grace_ms: 500,
        }
    }
}

/// Outbound dispatcher configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Minimum spacing between two deliveries
    pub min_send_interval_ms: u64,
    pub max_queue_len: usize,
    pub idle_poll_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            min_send_interval_ms: 350,
            max_queue_len: 1_000,
            idle_poll_ms: 250,
        }
    }
}

/// Storage configuration with optimization settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_directory: String,
    pub write_buffer_size_mb: usize,
    pub max_write_buffer_number: usize,
    pub compression_type: CompressionType,
    pub snapshot_interval_secs: u64,
    /// Whether to clear database on startup (testing only!)
    pub clear_on_start: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CompressionType {
    None,
    Snappy,
    Lz4,
    Zstd,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/survivor_draw".to_string(),
            write_buffer_size_mb: 16,
            max_write_buffer_number: 2,
            compression_type: CompressionType::Lz4,
            snapshot_interval_secs: 30,
            clear_on_start: false,
        }
    }
}

/// VRF key material
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomnessConfig {
    /// Hex-encoded 32-byte mini secret. A random key is generated when absent,
    /// which makes proofs unverifiable across restarts.
    pub vrf_seed_hex: Option<String>,
    pub signing_context: String,
}

impl Default for RandomnessConfig {
    fn default() -> Self {
        Self {
            vrf_seed_hex: None,
            signing_context: "survivor-draw".to_string(),
        }
    }
}

/// Monitoring and logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: LogLevel,
    pub metrics_interval_secs: u64,
    pub prune_interval_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(ConfigurationError::InvalidValue {
                field: "monitoring.log_level".to_string(),
                value: other.to_string(),
                reason: "expected error|warn|info|debug|trace".to_string(),
            }),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            metrics_interval_secs: 60,
            prune_interval_secs: 300,
        }
    }
}

impl LotteryConfig {
    /// Short timings, scratch database
    pub fn testing() -> Self {
        Self {
            game: GameConfig {
                default_start_delay_secs: 5,
                countdown_notice_secs: vec![3],
                first_round_delay_ms: 10,
                fault_retry_delay_ms: 10,
                join_bundle_window_ms: 50,
                pacing: PacingConfig {
                    base_delay_ms: 20,
                    min_delay_ms: 5,
                    max_delay_ms: 40,
                    ..Default::default()
                },
                ..Default::default()
            },
            scheduler: SchedulerConfig {
                sweep_interval_ms: 20,
                overdue_grace_ms: 10,
            },
            dispatcher: DispatcherConfig {
                min_send_interval_ms: 1,
                idle_poll_ms: 10,
                ..Default::default()
            },
            storage: StorageConfig {
                data_directory: "./DB/survivor_draw_test".to_string(),
                snapshot_interval_secs: 1,
                clear_on_start: true,
                ..Default::default()
            },
            monitoring: MonitoringConfig {
                log_level: LogLevel::Debug,
                metrics_interval_secs: 5,
                prune_interval_secs: 1,
            },
            ..Default::default()
        }
    }

    /// Durable storage and chat-friendly pacing
    pub fn production() -> Self {
        Self {
            storage: StorageConfig {
                write_buffer_size_mb: 64,
                max_write_buffer_number: 4,
                clear_on_start: false,
                ..Default::default()
            },
            dispatcher: DispatcherConfig {
                min_send_interval_ms: 1_000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let game = &self.game;

        if game.max_players_limit < 2 {
            return Err(ConfigValidationError::InvalidValue(
                "game.max_players_limit must be >= 2".to_string(),
            ));
        }

        if game.default_max_players < 2 || game.default_max_players > game.max_players_limit {
            return Err(ConfigValidationError::InvalidValue(format!(
                "game.default_max_players must be within 2..={}",
                game.max_players_limit
            )));
        }

        if game.default_survivor_count == 0 || game.default_survivor_count >= game.default_max_players {
            return Err(ConfigValidationError::LogicalInconsistency(
                "game.default_survivor_count must be >= 1 and below default_max_players".to_string(),
            ));
        }

        if !game.number_range_multiplier.is_finite() || game.number_range_multiplier <= 0.0 {
            return Err(ConfigValidationError::InvalidValue(
                "game.number_range_multiplier must be a positive number".to_string(),
            ));
        }

        if game.strict_number_range && game.number_range_multiplier < 1.0 {
            return Err(ConfigValidationError::LogicalInconsistency(
                "strict_number_range requires number_range_multiplier >= 1.0".to_string(),
            ));
        }

        if game.prize_min > game.prize_max {
            return Err(ConfigValidationError::LogicalInconsistency(
                "game.prize_min must not exceed game.prize_max".to_string(),
            ));
        }

        let pacing = &game.pacing;
        if pacing.max_numbers_per_round == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "game.pacing.max_numbers_per_round must be > 0".to_string(),
            ));
        }
        if pacing.min_delay_ms > pacing.max_delay_ms {
            return Err(ConfigValidationError::LogicalInconsistency(
                "game.pacing.min_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }

        if self.scheduler.sweep_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "scheduler.sweep_interval_ms must be > 0".to_string(),
            ));
        }

        if self.dispatcher.max_queue_len == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "dispatcher.max_queue_len must be > 0".to_string(),
            ));
        }

        if self.storage.data_directory.trim().is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "storage.data_directory".to_string(),
            ));
        }

        if let Some(seed) = &self.randomness.vrf_seed_hex {
            match hex::decode(seed) {
                Ok(bytes) if bytes.len() == 32 => {}
                _ => {
                    return Err(ConfigValidationError::InvalidValue(
                        "randomness.vrf_seed_hex must be 32 hex-encoded bytes".to_string(),
                    ))
                }
            }
        }

        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.sweep_interval_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.storage.snapshot_interval_secs.max(1))
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring.prune_interval_secs.max(1))
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring.metrics_interval_secs.max(1))
    }
}

impl GameConfig {
    pub fn first_round_delay(&self) -> Duration {
        Duration::from_millis(self.first_round_delay_ms)
    }

    pub fn fault_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fault_retry_delay_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn join_bundle_window(&self) -> Duration {
        Duration::from_millis(self.join_bundle_window_ms)
    }

    pub fn default_start_delay(&self) -> Duration {
        Duration::from_secs(self.default_start_delay_secs)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
    #[error("Configuration logical inconsistency: {0}")]
    LogicalInconsistency(String),
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> LotteryResult<LotteryConfig> {
        let mut config = match &self.config_path {
            Some(path) => Self::load_from_file(path)?,
            None => LotteryConfig::default(),
        };

        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

        config
            .validate()
            .map_err(|e| ConfigurationError::ValidationFailed(e.to_string()))?;

        Ok(config)
    }

    fn load_from_file(path: &str) -> LotteryResult<LotteryConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        Ok(toml::from_str(&content)?)
    }

    /// Environment overrides; `lookup` is injectable so tests never touch the real env
    fn apply_env_overrides<F>(config: &mut LotteryConfig, lookup: F) -> LotteryResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("SURVIVOR_DRAW_DATA_DIR") {
            config.storage.data_directory = dir;
        }

        if let Some(level) = lookup("SURVIVOR_DRAW_LOG_LEVEL") {
            config.monitoring.log_level = level.parse()?;
        }

        if let Some(seed) = lookup("SURVIVOR_DRAW_VRF_SEED") {
            config.randomness.vrf_seed_hex = Some(seed);
        }

        if let Some(interval) = lookup("SURVIVOR_DRAW_SWEEP_INTERVAL_MS") {
            config.scheduler.sweep_interval_ms =
                interval.parse().map_err(|_| ConfigurationError::InvalidValue {
                    field: "scheduler.sweep_interval_ms".to_string(),
                    value: interval.clone(),
                    reason: "not an integer".to_string(),
                })?;
        }

        Ok(())
    }
}
