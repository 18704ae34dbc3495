//! Layered configuration
//!
//! Defaults, then an optional TOML file, then `CREDITLEDGER__*` environment
//! variables (`CREDITLEDGER__SERVER__PORT=9000`).

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::ledger::format::{DEFAULT_PREFIX, DEFAULT_WIDTH};
use crate::ledger::AllocationOrder;
use crate::storage::Compression;

pub const DEFAULT_CONFIG_FILE: &str = "creditledger.toml";
pub const ENV_PREFIX: &str = "CREDITLEDGER";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_serial_prefix")]
    pub serial_prefix: String,
    #[serde(default = "default_serial_width")]
    pub serial_width: usize,
    #[serde(default)]
    pub allocation_order: AllocationOrder,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default = "default_fsync")]
    pub fsync: bool,
    /// Compact the commit log once it holds this many batches (0 = never).
    #[serde(default)]
    pub compact_after_batches: u64,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_serial_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_serial_width() -> usize {
    DEFAULT_WIDTH
}

fn default_fsync() -> bool {
    true
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_enable_cors() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            enable_cors: default_enable_cors(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            serial_prefix: default_serial_prefix(),
            serial_width: default_serial_width(),
            allocation_order: AllocationOrder::default(),
            compression: Compression::default(),
            fsync: default_fsync(),
            compact_after_batches: 0,
            server: ServerConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Loads `path` (or `creditledger.toml` if present) under environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.serial_prefix.trim().is_empty() {
            return Err(Error::Config("serial_prefix must not be empty".to_string()));
        }
        if self.serial_width == 0 || self.serial_width > 20 {
            return Err(Error::Config(format!(
                "serial_width must be between 1 and 20, got {}",
                self.serial_width
            )));
        }
        Ok(())
    }

    /// The effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::SerializationError(e.to_string()))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() -> Result<()> {
        let config = LedgerConfig::default();
        config.validate()?;
        assert_eq!(config.serial_prefix, "SIM-REG");
        assert_eq!(config.serial_width, 8);
        assert_eq!(config.allocation_order, AllocationOrder::LowestFirst);
        assert_eq!(config.listen_addr(), "127.0.0.1:8080");
        Ok(())
    }

    #[test]
    fn test_load_file_with_partial_keys() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("creditledger_config_{}", std::process::id()));
        std::fs::create_dir_all(&dir).map_err(|e| Error::Config(e.to_string()))?;
        let path = dir.join("ledger.toml");
        std::fs::write(
            &path,
            "allocation_order = \"highest_first\"\ncompression = \"zstd\"\n\n[server]\nport = 9100\n",
        )
        .map_err(|e| Error::Config(e.to_string()))?;

        let config = LedgerConfig::load(Some(&path))?;
        assert_eq!(config.allocation_order, AllocationOrder::HighestFirst);
        assert_eq!(config.compression, Compression::Zstd);
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert!(config.fsync);

        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_invalid_width_rejected() {
        let config = LedgerConfig {
            serial_width: 0,
            ..LedgerConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_toml_rendering_round_trips() -> Result<()> {
        let config = LedgerConfig::default();
        let rendered = config.to_toml()?;
        assert!(rendered.contains("serial_prefix = \"SIM-REG\""));
        let parsed: LedgerConfig =
            toml::from_str(&rendered).map_err(|e| Error::Config(e.to_string()))?;
        assert_eq!(parsed, config);
        Ok(())
    }
}
