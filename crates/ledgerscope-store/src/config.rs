//! Data directory configuration.
//!
//! A data directory holds `config.json`, the `chain/` and `scripts/` record
//! stores, and derived outputs such as `clusters/`. The config file carries
//! the on-disk format version; opening a directory written by an
//! incompatible version fails before any file is mapped.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ledgerscope_core::address::DedupAddressType;
use ledgerscope_core::constants::{CONFIG_FILE_NAME, DATA_FORMAT_VERSION};
use ledgerscope_core::error::{ConfigError, LedgerError, StoreError};

/// Chain description recorded by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    /// Human-readable coin name, e.g. "bitcoin".
    pub coin_name: String,
    /// Directory the raw chain was parsed from.
    pub data_directory: PathBuf,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            coin_name: "bitcoin".to_string(),
            data_directory: PathBuf::new(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    version: u32,
    chain_config: ChainConfig,
}

/// Location and access options for a parsed ledger.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Root of the parsed data.
    pub data_dir: PathBuf,
    /// Chain description from `config.json`.
    pub chain: ChainConfig,
    /// Fail reads with a reorg error when the tip hash changes underneath.
    pub error_on_reorg: bool,
    /// Number of newest blocks hidden from readers.
    pub blocks_ignored: u32,
}

impl Default for DataConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ledgerscope");

        Self {
            data_dir,
            chain: ChainConfig::default(),
            error_on_reorg: false,
            blocks_ignored: 0,
        }
    }
}

impl DataConfig {
    /// Load `config.json` from `data_dir` and check its format version.
    pub fn load(data_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let path = data_dir.join(CONFIG_FILE_NAME);
        let text = fs::read_to_string(&path).map_err(|_| ConfigError::MissingConfig(path.clone()))?;
        let file: ConfigFile = serde_json::from_str(&text).map_err(|e| ConfigError::Malformed {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if file.version != DATA_FORMAT_VERSION {
            return Err(ConfigError::VersionMismatch {
                found: file.version,
                expected: DATA_FORMAT_VERSION,
            });
        }
        tracing::info!(path = %data_dir.display(), coin = %file.chain_config.coin_name, "loaded data config");
        Ok(Self {
            data_dir,
            chain: file.chain_config,
            ..Self::default()
        })
    }

    /// Initialise a new data directory: write `config.json` and create the
    /// store subdirectories.
    pub fn create(data_dir: impl AsRef<Path>, chain: ChainConfig) -> Result<Self, LedgerError> {
        let config = Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            chain,
            ..Self::default()
        };
        for dir in [config.chain_dir(), config.scripts_dir()] {
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }
        config.write_config()?;
        Ok(config)
    }

    /// Write `config.json` for this configuration.
    pub fn write_config(&self) -> Result<(), StoreError> {
        let path = self.config_path();
        let file = ConfigFile {
            version: DATA_FORMAT_VERSION,
            chain_config: self.chain.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| StoreError::io(&path, std::io::Error::other(e)))?;
        fs::write(&path, json).map_err(|e| StoreError::io(&path, e))
    }

    pub fn with_error_on_reorg(mut self, enabled: bool) -> Self {
        self.error_on_reorg = enabled;
        self
    }

    pub fn with_blocks_ignored(mut self, blocks: u32) -> Self {
        self.blocks_ignored = blocks;
        self
    }

    /// Fail with [`ConfigError::MissingDirectory`] unless both stores exist.
    pub fn check_layout(&self) -> Result<(), ConfigError> {
        for dir in [self.chain_dir(), self.scripts_dir()] {
            if !dir.is_dir() {
                return Err(ConfigError::MissingDirectory(dir));
            }
        }
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    pub fn chain_dir(&self) -> PathBuf {
        self.data_dir.join("chain")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.data_dir.join("scripts")
    }

    /// Default location for clustering output.
    pub fn cluster_dir(&self) -> PathBuf {
        self.data_dir.join("clusters")
    }

    pub fn block_file(&self) -> PathBuf {
        self.chain_dir().join("block.dat")
    }

    pub fn tx_file(&self) -> PathBuf {
        self.chain_dir().join("tx_data.dat")
    }

    pub fn tx_index_file(&self) -> PathBuf {
        self.chain_dir().join("tx_index.dat")
    }

    pub fn coinbase_file(&self) -> PathBuf {
        self.chain_dir().join("coinbases.dat")
    }

    /// Fixed-stride script file for `dedup`. Variable-length types live in
    /// `<name>_data.dat` / `<name>_index.dat` pairs instead.
    pub fn script_file(&self, dedup: DedupAddressType) -> PathBuf {
        self.scripts_dir().join(format!("{}.dat", dedup.name()))
    }
}
