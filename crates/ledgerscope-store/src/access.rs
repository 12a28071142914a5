//! The context object handed to every analysis.

use ledgerscope_core::error::LedgerError;

use crate::chain::{ChainAccess, ReloadSummary};
use crate::config::DataConfig;
use crate::scripts::ScriptAccess;

/// Open handles on one parsed ledger.
///
/// Built once per process and passed by reference; there is no global
/// instance.
#[derive(Debug)]
pub struct DataAccess {
    pub config: DataConfig,
    pub chain: ChainAccess,
    pub scripts: ScriptAccess,
}

impl DataAccess {
    /// Check the directory layout and map both stores.
    pub fn open(config: DataConfig) -> Result<Self, LedgerError> {
        config.check_layout()?;
        let chain = ChainAccess::open(&config)?;
        let scripts = ScriptAccess::open(&config)?;
        Ok(Self { config, chain, scripts })
    }

    /// Load `config.json` from `data_dir` and open it with default options.
    pub fn load(data_dir: impl AsRef<std::path::Path>) -> Result<Self, LedgerError> {
        Self::open(DataConfig::load(data_dir)?)
    }

    /// Pick up records appended since open.
    pub fn reload(&mut self) -> Result<ReloadSummary, LedgerError> {
        let summary = self.chain.reload()?;
        self.scripts.reload()?;
        Ok(summary)
    }
}
