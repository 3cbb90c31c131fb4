//! Configuration module
//!
//! Handles loading and saving tablecast configuration.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::discovery::BroadcastConfig;
use crate::network::{ClientConfig, ServerConfig};
use crate::protocol::{DEFAULT_GAME_PORT, DISCOVERY_PORT};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Table settings (server side)
    #[serde(default)]
    pub table: TableConfig,

    /// Player settings (client side)
    #[serde(default)]
    pub client: PlayerConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Server name announced to players
    pub name: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "tablecast".to_string()),
        }
    }
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// UDP port offers are sent to and listened on
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    /// Time between offers in ms
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    /// Destination of offers
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    /// How long a client listens before giving up, in ms
    #[serde(default = "default_discovery_timeout")]
    pub timeout_ms: u64,
}

fn default_discovery_port() -> u16 {
    DISCOVERY_PORT
}

fn default_interval() -> u64 {
    1000
}

fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}

fn default_discovery_timeout() -> u64 {
    10_000
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: default_discovery_port(),
            interval_ms: default_interval(),
            broadcast_address: default_broadcast_address(),
            timeout_ms: default_discovery_timeout(),
        }
    }
}

/// Table configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// TCP port for game sessions (0 = any free port)
    #[serde(default = "default_game_port")]
    pub port: u16,
    /// Join window after the first waiting player, in ms
    #[serde(default = "default_join_window")]
    pub join_window_ms: u64,
    /// Players per round
    #[serde(default = "default_max_players")]
    pub max_players: usize,
    /// Idle player auto-stands after this many ms
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_ms: u64,
    /// Hard limit on a round's length in ms
    #[serde(default = "default_round_deadline")]
    pub round_deadline_ms: u64,
    /// Time allowed between connect and PlayerName, in ms
    #[serde(default = "default_name_timeout")]
    pub name_timeout_ms: u64,
    /// Fixed deck seed for reproducible rounds
    pub deck_seed: Option<u64>,
}

fn default_game_port() -> u16 {
    DEFAULT_GAME_PORT
}

fn default_join_window() -> u64 {
    10_000
}

fn default_max_players() -> usize {
    4
}

fn default_turn_timeout() -> u64 {
    30_000
}

fn default_round_deadline() -> u64 {
    300_000
}

fn default_name_timeout() -> u64 {
    30_000
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            port: default_game_port(),
            join_window_ms: default_join_window(),
            max_players: default_max_players(),
            turn_timeout_ms: default_turn_timeout(),
            round_deadline_ms: default_round_deadline(),
            name_timeout_ms: default_name_timeout(),
            deck_seed: None,
        }
    }
}

/// Player configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Name sent in PlayerName
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// TCP connect timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Rounds to play before leaving
    #[serde(default = "default_rounds")]
    pub rounds: u32,
}

fn default_player_name() -> String {
    "player".to_string()
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_rounds() -> u32 {
    3
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            player_name: default_player_name(),
            connect_timeout_ms: default_connect_timeout(),
            rounds: default_rounds(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tablecast/config.toml")),
            Some(PathBuf::from("./tablecast.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                tracing::debug!("Loading config from {}", path.display());
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values no server could run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.table.max_players == 0 {
            return Err(ConfigError::Invalid {
                field: "table.max_players",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.discovery.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "discovery.interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        self.broadcast_target()?;
        Ok(())
    }

    fn broadcast_target(&self) -> ConfigResult<IpAddr> {
        self.discovery
            .broadcast_address
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                field: "discovery.broadcast_address",
                reason: e.to_string(),
            })
    }

    /// Runtime settings for the game server
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            name: self.general.name.clone(),
            port: self.table.port,
            join_window: Duration::from_millis(self.table.join_window_ms),
            max_players: self.table.max_players.max(1),
            turn_timeout: Duration::from_millis(self.table.turn_timeout_ms),
            round_deadline: Duration::from_millis(self.table.round_deadline_ms),
            name_timeout: Duration::from_millis(self.table.name_timeout_ms),
            deck_seed: self.table.deck_seed,
        }
    }

    /// Runtime settings for the offer broadcaster
    pub fn broadcast_config(&self) -> ConfigResult<BroadcastConfig> {
        Ok(BroadcastConfig {
            discovery_port: self.discovery.port,
            interval: Duration::from_millis(self.discovery.interval_ms),
            target: self.broadcast_target()?,
        })
    }

    /// Runtime settings for joining a table
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            player_name: self.client.player_name.clone(),
            connect_timeout: Duration::from_millis(self.client.connect_timeout_ms),
        }
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery.timeout_ms)
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        general: GeneralConfig {
            name: "Back Room Table".to_string(),
        },
        table: TableConfig {
            port: 5555,
            deck_seed: Some(2024),
            ..Default::default()
        },
        client: PlayerConfig {
            player_name: "Ann".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.discovery.port, DISCOVERY_PORT);
        assert_eq!(config.table.port, DEFAULT_GAME_PORT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.table.max_players = 6;
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.table.max_players, 6);
        assert_eq!(loaded.discovery.interval_ms, config.discovery.interval_ms);
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/tablecast.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[table]\njoin_window_ms = 250\n").unwrap();
        assert_eq!(config.table.join_window_ms, 250);
        assert_eq!(config.table.max_players, 4);
        assert_eq!(config.discovery.port, DISCOVERY_PORT);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.discovery.broadcast_address = "not-an-ip".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "discovery.broadcast_address", .. })
        ));

        let mut config = Config::default();
        config.table.max_players = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_runtime_configs() {
        let mut config = Config::default();
        config.table.join_window_ms = 1500;
        config.table.deck_seed = Some(9);

        let server = config.server_config();
        assert_eq!(server.join_window, Duration::from_millis(1500));
        assert_eq!(server.deck_seed, Some(9));

        let broadcast = config.broadcast_config().unwrap();
        assert_eq!(broadcast.discovery_port, DISCOVERY_PORT);
        assert_eq!(broadcast.interval, Duration::from_secs(1));
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.general.name, "Back Room Table");
        assert_eq!(parsed.table.deck_seed, Some(2024));
    }
}
