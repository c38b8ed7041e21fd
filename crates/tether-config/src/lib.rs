//! # tether-config
//!
//! Configuration management for the tether renter client.
//!
//! Loads configuration from:
//! 1. `~/.tether/config.toml` (global)
//! 2. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Current config schema version
pub const CONFIG_VERSION: u32 = 1;

/// Default erasure coding split: 10 data pieces, 20 parity pieces.
pub const DEFAULT_DATA_PIECES: u32 = 10;
pub const DEFAULT_PARITY_PIECES: u32 = 20;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Config schema version (for forward compatibility)
    pub config_version: u32,
    pub renter: RenterConfig,
    pub upload: UploadSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            renter: RenterConfig::default(),
            upload: UploadSettings::default(),
        }
    }
}

impl Config {
    /// Load config from the global location with env overrides applied.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(&global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Global config path: ~/.tether/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".tether/config.toml"))
    }

    /// Apply environment variable overrides (highest priority)
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("TETHER_FILES_DIR") {
            self.renter.files_dir = PathBuf::from(dir);
        }
        if let Ok(pieces) = std::env::var("TETHER_DATA_PIECES") {
            if let Ok(n) = pieces.parse() {
                self.upload.default_data_pieces = n;
            }
        }
        if let Ok(pieces) = std::env::var("TETHER_PARITY_PIECES") {
            if let Ok(n) = pieces.parse() {
                self.upload.default_parity_pieces = n;
            }
        }
        if std::env::var("TETHER_TESTING").is_ok() {
            self.upload.testing = true;
        }
    }

    // ========== Convenience Accessors ==========

    /// Directory holding persisted file metadata
    pub fn files_dir(&self) -> &Path {
        &self.renter.files_dir
    }

    /// Whether pre-flight checks run in relaxed testing mode
    pub fn testing_mode(&self) -> bool {
        self.upload.testing
    }
}

/// Renter-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenterConfig {
    /// Directory where file metadata is persisted
    pub files_dir: PathBuf,
}

impl Default for RenterConfig {
    fn default() -> Self {
        Self {
            files_dir: dirs::home_dir()
                .map(|h| h.join(".tether/files"))
                .unwrap_or_else(|| PathBuf::from("/tmp/tether_files")),
        }
    }
}

/// Upload pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadSettings {
    /// Data pieces used when an upload supplies no erasure settings
    pub default_data_pieces: u32,
    /// Parity pieces used when an upload supplies no erasure settings
    pub default_parity_pieces: u32,
    /// Relax the contract-count pre-flight check (tests only)
    pub testing: bool,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            default_data_pieces: DEFAULT_DATA_PIECES,
            default_parity_pieces: DEFAULT_PARITY_PIECES,
            testing: false,
        }
    }
}
