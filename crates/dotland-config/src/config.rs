//! Configuration sections, their defaults, and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name inside the config directory.
pub const CONFIG_FILE: &str = "config.ron";

const APP_NAME: &str = "dotland";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Connection settings.
    pub network: NetworkConfig,
    /// World shape, spawn and content.
    pub world: WorldConfig,
    /// Prediction and broadcast tuning.
    pub sync: SyncConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the server binds, or the client connects to.
    pub server_address: String,
    /// Server port.
    pub server_port: u16,
    /// Idle connections are dropped after this many seconds.
    pub timeout_seconds: u32,
    /// Maximum number of players (server only).
    pub max_players: u32,
}

/// World configuration (server only).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    /// Grid width in cells.
    pub width: u32,
    /// Grid height in cells.
    pub height: u32,
    /// Preferred spawn column.
    pub spawn_x: i32,
    /// Preferred spawn row.
    pub spawn_y: i32,
    /// Inventory slots per player.
    pub inventory_capacity: usize,
    /// RON content pack. `None` uses the built-in items and cell types.
    pub content_path: Option<PathBuf>,
    /// Items granted on join, as `(item id, count)`.
    pub starting_items: Vec<(u32, u32)>,
}

/// Sync tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Unacknowledged commands a client may have in flight.
    pub max_pending_commands: usize,
    /// Delta batching period in milliseconds. 0 broadcasts after every
    /// command.
    pub broadcast_interval_ms: u64,
    /// Payloads at least this large are LZ4-compressed. 0 disables
    /// compression.
    pub compression_threshold: usize,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 7777,
            timeout_seconds: 30,
            max_players: 32,
        }
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 20,
            height: 50,
            spawn_x: 0,
            spawn_y: 0,
            inventory_capacity: 8,
            content_path: None,
            starting_items: Vec::new(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_pending_commands: 128,
            broadcast_interval_ms: 0,
            compression_threshold: 512,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Platform config directory for Dotland, e.g. `~/.config/dotland`.
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|base| base.join(APP_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::WriteError)
    }

    /// Re-reads the file. Returns `Some(new_config)` if it differs from
    /// `self`, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE))?;
        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        ron::from_str(&contents).map_err(ConfigError::ParseError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.network.server_port, 7777);
        assert_eq!((config.world.width, config.world.height), (20, 50));
        assert_eq!(config.sync.max_pending_commands, 128);
        assert_eq!(config.sync.broadcast_interval_ms, 0);
        assert_eq!(config.debug.log_level, "info");
        assert!(config.world.content_path.is_none());
    }

    #[test]
    fn test_default_config_serializes() {
        let ron_str =
            ron::ser::to_string_pretty(&Config::default(), ron::ser::PrettyConfig::new())
                .unwrap();
        assert!(ron_str.contains("server_port: 7777"));
        assert!(ron_str.contains("height: 50"));
    }

    #[test]
    fn test_missing_section_uses_default() {
        let config: Config = ron::from_str("(network: (server_port: 9000))").unwrap();
        assert_eq!(config.network.server_port, 9000);
        assert_eq!(config.network.server_address, "127.0.0.1");
        assert_eq!(config.world, WorldConfig::default());
        assert_eq!(config.sync, SyncConfig::default());
    }

    #[test]
    fn test_unknown_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(render_distance: 16)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_starting_items_and_content_path_parse() {
        let ron_str = r#"(world: (starting_items: [(1, 3), (2, 1)], content_path: Some("pack.ron")))"#;
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.world.starting_items, vec![(1, 3), (2, 1)]);
        assert_eq!(config.world.content_path, Some(PathBuf::from("pack.ron")));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.world.width = 5;
        config.world.starting_items.push((1, 2));
        config.network.server_address = "10.0.0.1".to_string();

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let config = Config::load_or_create(&nested).unwrap();
        assert_eq!(config, Config::default());
        assert!(nested.join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());

        let mut modified = config.clone();
        modified.sync.broadcast_interval_ms = 50;
        modified.save(dir.path()).unwrap();

        let reloaded = config.reload(dir.path()).unwrap().unwrap();
        assert_eq!(reloaded.sync.broadcast_interval_ms, 50);
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{{not valid}}").unwrap();
        assert!(matches!(
            Config::load_or_create(dir.path()),
            Err(ConfigError::ParseError(_))
        ));
    }
}
