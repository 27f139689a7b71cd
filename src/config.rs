//! Configuration management with validation and defaults
//!
//! One `TrustConfig` value is loaded at startup (TOML file, then `TRUST_*`
//! environment overrides, then validation) and shared by handle with every
//! component that needs it.

use crate::errors::{ConfigurationError, TrustResult};
use crate::lease::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Complete service configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub game: GameConfig,
    pub lobby: LobbyConfig,
    pub locks: LockConfig,
    pub rate_limit: RateLimitConfig,
    pub long_poll: LongPollConfig,
    pub users: UserConfig,
}

/// HTTP server settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    /// Must exceed the long-poll bound and the worst-case matchmaking time
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 90,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    RocksDb,
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_directory: String,
    /// Whether to clear database on startup (testing only!)
    pub clear_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::RocksDb,
            data_directory: "./DB/trust_data".to_string(),
            clear_on_start: false,
        }
    }
}

/// Parameters stamped on every new game
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub coins: i64,
    pub max_steal: u32,
    pub time_limit_secs: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            coins: 400,
            max_steal: 4,
            time_limit_secs: 120,
        }
    }
}

/// Waiting slot and wait loop bounds
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    pub slot_ttl_ms: u64,
    pub wait_interval_ms: u64,
    pub wait_attempts: u32,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            slot_ttl_ms: 30_000,
            wait_interval_ms: 500,
            wait_attempts: 62,
        }
    }
}

impl LobbyConfig {
    pub fn slot_ttl(&self) -> Duration {
        Duration::from_millis(self.slot_ttl_ms)
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms)
    }
}

/// Lease parameters for one lock family
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockPolicyConfig {
    pub ttl_ms: u64,
    pub backoff_ms: u64,
    pub max_attempts: u32,
    #[serde(default)]
    pub jitter: bool,
}

impl LockPolicyConfig {
    fn new(ttl_ms: u64, backoff_ms: u64, max_attempts: u32) -> Self {
        Self {
            ttl_ms,
            backoff_ms,
            max_attempts,
            jitter: false,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Longest time spent sleeping between attempts before giving up
    pub fn max_backoff_ms(&self) -> u64 {
        self.backoff_ms
            .saturating_mul(u64::from(self.max_attempts.saturating_sub(1)))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(Duration::from_millis(self.backoff_ms), self.max_attempts)
            .with_jitter(self.jitter)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Serializes one user's start-game requests
    pub user: LockPolicyConfig,
    pub lobby: LockPolicyConfig,
    pub game: LockPolicyConfig,
    pub balance: LockPolicyConfig,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            user: LockPolicyConfig::new(30_000, 1_000, 31),
            lobby: LockPolicyConfig::new(5_000, 500, 5),
            game: LockPolicyConfig::new(5_000, 100, 100),
            balance: LockPolicyConfig::new(5_000, 100, 10),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { window_secs: 3_600 }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LongPollConfig {
    pub interval_ms: u64,
    pub max_iterations: u32,
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            max_iterations: 100,
        }
    }
}

impl LongPollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// First-contact user defaults
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub starting_balance: i64,
    pub hour_limit: i64,
    pub history_cap: usize,
    pub menu_history: usize,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            starting_balance: 900,
            hour_limit: 10,
            history_cap: 20,
            menu_history: 6,
        }
    }
}

impl TrustConfig {
    /// Small timings for tests and local runs
    pub fn fast() -> Self {
        let mut config = Self::default();
        config.storage.backend = StorageBackend::Memory;
        config.lobby = LobbyConfig {
            slot_ttl_ms: 2_000,
            wait_interval_ms: 20,
            wait_attempts: 50,
        };
        config.locks.user = LockPolicyConfig::new(2_000, 20, 100);
        config.locks.lobby = LockPolicyConfig::new(1_000, 10, 50);
        config.locks.game = LockPolicyConfig::new(1_000, 5, 200);
        config.locks.balance = LockPolicyConfig::new(1_000, 5, 50);
        config.long_poll = LongPollConfig {
            interval_ms: 10,
            max_iterations: 20,
        };
        config
    }
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
    pub fn load(&self) -> TrustResult<TrustConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => TrustConfig::default(),
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> TrustResult<TrustConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e))
        })?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(&self, config: &mut TrustConfig) -> TrustResult<()> {
        if let Ok(host) = env::var("TRUST_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = env::var("TRUST_PORT") {
            config.server.port = parse_env("TRUST_PORT", port, "Invalid port number")?;
        }
        if let Ok(data_dir) = env::var("TRUST_DATA_DIR") {
            config.storage.data_directory = data_dir;
        }
        if let Ok(backend) = env::var("TRUST_STORAGE_BACKEND") {
            config.storage.backend = match backend.as_str() {
                "memory" => StorageBackend::Memory,
                "rocksdb" => StorageBackend::RocksDb,
                _ => {
                    return Err(ConfigurationError::InvalidValue {
                        field: "TRUST_STORAGE_BACKEND".to_string(),
                        value: backend,
                        reason: "Expected 'memory' or 'rocksdb'".to_string(),
                    }
                    .into())
                }
            };
        }
        if let Ok(balance) = env::var("TRUST_STARTING_BALANCE") {
            config.users.starting_balance =
                parse_env("TRUST_STARTING_BALANCE", balance, "Invalid balance")?;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self, config: &TrustConfig) -> TrustResult<()> {
        if config.server.port == 0 {
            return Err(invalid("server.port", "0", "Port cannot be zero"));
        }

        if config.storage.backend == StorageBackend::RocksDb && config.storage.data_directory.is_empty() {
            return Err(ConfigurationError::MissingRequired("storage.data_directory".to_string()).into());
        }

        if config.game.coins <= 0 {
            return Err(invalid(
                "game.coins",
                &config.game.coins.to_string(),
                "Coin pool must be positive",
            ));
        }

        if config.lobby.wait_interval_ms == 0 || config.long_poll.interval_ms == 0 {
            return Err(invalid("wait_interval_ms", "0", "Poll intervals cannot be zero"));
        }

        if config.users.history_cap == 0 {
            return Err(invalid("users.history_cap", "0", "History cap cannot be zero"));
        }

        for (field, policy) in [
            ("locks.user", &config.locks.user),
            ("locks.lobby", &config.locks.lobby),
            ("locks.game", &config.locks.game),
            ("locks.balance", &config.locks.balance),
        ] {
            if policy.ttl_ms == 0 || policy.max_attempts == 0 {
                return Err(invalid(field, "0", "Lock ttl and attempts must be positive"));
            }
        }

        let long_poll_ms = config.long_poll.interval_ms * config.long_poll.max_iterations as u64;
        if config.server.request_timeout_secs * 1_000 <= long_poll_ms {
            return Err(invalid(
                "server.request_timeout_secs",
                &config.server.request_timeout_secs.to_string(),
                "Request timeout must exceed the long-poll bound",
            ));
        }

        // A start-game request may wait on its user lease, finalize a finished
        // game (game lease plus both balance leases), wait on the lobby lease
        // and then sit out the whole lobby wait loop.
        let matchmaking_ms = [
            config.locks.user.max_backoff_ms(),
            config.locks.game.max_backoff_ms(),
            config.locks.balance.max_backoff_ms().saturating_mul(2),
            config.locks.lobby.max_backoff_ms(),
            config.lobby.wait_interval_ms.saturating_mul(u64::from(config.lobby.wait_attempts)),
        ]
        .into_iter()
        .fold(0u64, u64::saturating_add);
        if config.server.request_timeout_secs.saturating_mul(1_000) <= matchmaking_ms {
            return Err(invalid(
                "server.request_timeout_secs",
                &config.server.request_timeout_secs.to_string(),
                "Request timeout must exceed the worst-case matchmaking time",
            ));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &TrustConfig, path: &str) -> TrustResult<()> {
        let toml_string = toml::to_string_pretty(config).map_err(|e| {
            ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, toml_string).map_err(|e| {
            ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into()
        })
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: String, reason: &str) -> TrustResult<T> {
    value.parse().map_err(|_| {
        ConfigurationError::InvalidValue {
            field: field.to_string(),
            value,
            reason: reason.to_string(),
        }
        .into()
    })
}

fn invalid(field: &str, value: &str, reason: &str) -> crate::errors::TrustError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
