//! Configuration management with validation and defaults
//!
//! Loaded from an optional TOML file, then overridden from `STAKEPLAY_*`
//! environment variables, then validated as a whole.

use crate::errors::{ConfigurationError, StakeResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StakeplayConfig {
    pub storage: StorageConfig,
    pub games: GamesConfig,
    pub settlement: SettlementConfig,
    pub notifications: NotificationConfig,
    pub monitoring: MonitoringConfig,
}

/// Which session store backs the coordinator
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    RocksDb,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_directory: String,
    /// Whether to clear the database on startup (testing only!)
    pub clear_on_start: bool,
    /// How long a guarded write waits for a competing writer's row lock
    pub lock_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::RocksDb,
            data_directory: "./DB/sessions".to_string(),
            clear_on_start: false,
            lock_timeout_ms: 1_000,
        }
    }
}

/// Inclusive stake bounds in minor units
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BetLimits {
    pub min: u64,
    pub max: u64,
}

impl BetLimits {
    pub fn contains(&self, bet: u64) -> bool {
        (self.min..=self.max).contains(&bet)
    }
}

impl Default for BetLimits {
    fn default() -> Self {
        Self { min: 10, max: 1_000_000 }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GamesConfig {
    pub coin: CoinGameConfig,
    pub chest: ChestGameConfig,
    pub cracker: CrackerGameConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoinGameConfig {
    /// Gross payout on a win, as a multiple of the bet
    pub payout_multiplier: f64,
    pub limits: BetLimits,
}

impl Default for CoinGameConfig {
    fn default() -> Self {
        Self {
            payout_multiplier: 2.0,
            limits: BetLimits::default(),
        }
    }
}

/// An item that can be placed in the chest pool
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChestItem {
    pub id: String,
    pub name: String,
    pub value: u64,
}

impl ChestItem {
    fn new(id: &str, name: &str, value: u64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            value,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChestGameConfig {
    pub max_items: usize,
    pub limits: BetLimits,
    pub catalog: Vec<ChestItem>,
}

impl Default for ChestGameConfig {
    fn default() -> Self {
        Self {
            max_items: 6,
            limits: BetLimits::default(),
            catalog: vec![
                ChestItem::new("crown", "Golden Crown", 50_000),
                ChestItem::new("ring", "Ruby Ring", 25_000),
                ChestItem::new("goblet", "Silver Goblet", 10_000),
                ChestItem::new("dagger", "Jeweled Dagger", 5_000),
                ChestItem::new("coins", "Pouch of Coins", 1_000),
                ChestItem::new("boot", "Old Boot", 50),
            ],
        }
    }
}

impl ChestGameConfig {
    pub fn item(&self, id: &str) -> Option<&ChestItem> {
        self.catalog.iter().find(|item| item.id == id)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrackerGameConfig {
    pub limits: BetLimits,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Reject a new session while the owner has an open one of the same variant
    pub one_open_session_per_owner: bool,
    /// Open sessions older than this are cancelled and refunded by the reaper; 0 disables it
    pub open_session_ttl_secs: u64,
    pub reaper_interval_secs: u64,
    pub reaper_batch_size: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            one_open_session_per_owner: true,
            open_session_ttl_secs: 15 * 60,
            reaper_interval_secs: 60,
            reaper_batch_size: 100,
        }
    }
}

impl SettlementConfig {
    pub fn open_session_ttl(&self) -> Duration {
        Duration::from_secs(self.open_session_ttl_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    /// Bounded queue between settlement and the delivery worker
    pub queue_capacity: usize,
    /// Live-feed broadcast buffer
    pub broadcast_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 1_024,
            broadcast_capacity: 256,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl StakeplayConfig {
    /// In-memory session store; for tests and simulations
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> StakeResult<()> {
        if self.storage.backend == StorageBackend::RocksDb && self.storage.data_directory.is_empty() {
            return Err(invalid("storage.data_directory", "", "Required for the rocksdb backend"));
        }

        check_limits("games.coin.limits", &self.games.coin.limits)?;
        check_limits("games.chest.limits", &self.games.chest.limits)?;
        check_limits("games.cracker.limits", &self.games.cracker.limits)?;

        let multiplier = self.games.coin.payout_multiplier;
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(invalid(
                "games.coin.payout_multiplier",
                &multiplier.to_string(),
                "Must be a positive number",
            ));
        }

        let chest = &self.games.chest;
        if chest.max_items == 0 {
            return Err(invalid("games.chest.max_items", "0", "Must be > 0"));
        }
        let mut seen = HashSet::new();
        for item in &chest.catalog {
            if !seen.insert(item.id.as_str()) {
                return Err(invalid("games.chest.catalog", &item.id, "Duplicate item id"));
            }
            if item.value == 0 {
                return Err(invalid("games.chest.catalog", &item.id, "Item value must be > 0"));
            }
        }

        if self.settlement.reaper_batch_size == 0 {
            return Err(invalid("settlement.reaper_batch_size", "0", "Must be > 0"));
        }
        if self.settlement.open_session_ttl_secs > 0 && self.settlement.reaper_interval_secs == 0 {
            return Err(invalid(
                "settlement.reaper_interval_secs",
                "0",
                "Must be > 0 when a session TTL is set",
            ));
        }

        if self.notifications.enabled
            && (self.notifications.queue_capacity == 0 || self.notifications.broadcast_capacity == 0)
        {
            return Err(ConfigurationError::ValidationFailed(
                "Notification queue and broadcast capacities must be > 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

fn check_limits(field: &str, limits: &BetLimits) -> StakeResult<()> {
    if limits.min == 0 || limits.min > limits.max {
        return Err(invalid(
            field,
            &format!("{}..={}", limits.min, limits.max),
            "Expected 0 < min <= max",
        ));
    }
    Ok(())
}

fn invalid(field: &str, value: &str, reason: &str) -> crate::errors::StakeError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
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
    pub fn load(&self) -> StakeResult<StakeplayConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => StakeplayConfig::default(),
        };

        self.apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> StakeResult<StakeplayConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(&self, config: &mut StakeplayConfig) -> StakeResult<()> {
        if let Ok(dir) = env::var("STAKEPLAY_DATA_DIR") {
            config.storage.data_directory = dir;
        }
        if let Ok(backend) = env::var("STAKEPLAY_STORAGE_BACKEND") {
            config.storage.backend = match backend.to_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "rocksdb" => StorageBackend::RocksDb,
                _ => return Err(invalid("STAKEPLAY_STORAGE_BACKEND", &backend, "Expected memory or rocksdb")),
            };
        }
        if let Ok(level) = env::var("STAKEPLAY_LOG_LEVEL") {
            config.monitoring.log_level = level;
        }
        if let Ok(json) = env::var("STAKEPLAY_JSON_LOGS") {
            config.monitoring.json_logs = parse_env("STAKEPLAY_JSON_LOGS", json)?;
        }
        if let Ok(multiplier) = env::var("STAKEPLAY_COIN_PAYOUT_MULTIPLIER") {
            config.games.coin.payout_multiplier = parse_env("STAKEPLAY_COIN_PAYOUT_MULTIPLIER", multiplier)?;
        }
        if let Ok(ttl) = env::var("STAKEPLAY_OPEN_SESSION_TTL_SECS") {
            config.settlement.open_session_ttl_secs = parse_env("STAKEPLAY_OPEN_SESSION_TTL_SECS", ttl)?;
        }
        Ok(())
    }

    /// Write a configuration out as TOML
    pub fn save(&self, config: &StakeplayConfig, path: &str) -> StakeResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: String) -> StakeResult<T> {
    value
        .parse()
        .map_err(|_| invalid(field, &value, "Could not parse value"))
}
