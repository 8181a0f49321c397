//! Node configuration file

use anyhow::{bail, Context, Result};
use chain_db::{MemoryDatabase, SharedDatabase};
use chain_settlement::SettlementConfig;
use chain_vm::GasSchedule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Rocksdb,
}

/// `[database]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: Backend,
    /// Data directory of persistent backends
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            path: PathBuf::from(".chain_data"),
        }
    }
}

impl DatabaseConfig {
    /// Open the configured backend
    pub fn open(&self) -> Result<SharedDatabase> {
        match self.backend {
            Backend::Memory => Ok(Arc::new(MemoryDatabase::new())),
            #[cfg(feature = "rocksdb-backend")]
            Backend::Rocksdb => {
                let db = chain_db::RocksDatabase::open(&self.path).with_context(|| {
                    format!("Failed to open RocksDB at {}", self.path.display())
                })?;
                info!("Opened RocksDB at {}", self.path.display());
                Ok(Arc::new(db))
            }
            #[cfg(not(feature = "rocksdb-backend"))]
            Backend::Rocksdb => bail!("RocksDB backend requires the rocksdb-backend feature"),
        }
    }
}

/// Complete node configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub settlement: SettlementConfig,
    pub gas: GasSchedule,
    pub database: DatabaseConfig,
}

impl NodeConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: NodeConfig = toml::from_str(toml_str).context("Failed to parse node config")?;
        config.settlement.validate()?;
        if config.database.backend == Backend::Rocksdb && config.database.path.as_os_str().is_empty()
        {
            bail!("database.path is required for the rocksdb backend");
        }
        Ok(config)
    }

    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize node config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sections_default_independently() {
        let config = NodeConfig::from_toml(
            r#"
            [settlement.fee_split]
            vesting_share_bps = 1500

            [gas]
            storage_write = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.settlement.fee_split.vesting_share_bps, 1500);
        assert_eq!(config.settlement.max_gas_limit, 10_000_000);
        assert_eq!(config.gas.storage_write, 100);
        assert_eq!(config.gas.request_base, 21000);
        assert_eq!(config.database.backend, Backend::Memory);
    }

    #[test]
    fn test_invalid_settlement_section() {
        let err = NodeConfig::from_toml("[settlement.fee_split]\nvesting_share_bps = 20000\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.toml");
        let mut config = NodeConfig::default();
        config.settlement.max_gas_limit = 42_000;
        fs::write(&path, config.to_toml().unwrap()).unwrap();

        assert_eq!(NodeConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_memory_backend_opens() {
        let db = DatabaseConfig::default().open().unwrap();
        assert!(db.get("balances", b"missing").unwrap().is_none());
    }
}
