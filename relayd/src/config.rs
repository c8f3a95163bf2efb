use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Domain;
use crate::{attestation, evm, server};

#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct Config {
    /// Source domains a burn may be relayed from
    pub source_domains: Vec<Domain>,
    /// Pause between a new relay and the fulfillment, so the minted funds are visible to
    /// the hook's rpc node
    #[serde(with = "humantime_serde")]
    pub settling_delay: Duration,
    /// Fulfillment records are kept in memory only when not set
    pub ledger_path: Option<PathBuf>,
    pub server: server::Config,
    pub attestation: attestation::Config,
    pub destination: evm::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_domains: vec![0, 1],
            settling_delay: Duration::from_millis(2500),
            ledger_path: None,
            server: server::Config::default(),
            attestation: attestation::Config::default(),
            destination: evm::Config::default(),
        }
    }
}

/// Replaces a leading `~` with the home directory, if there is one.
pub fn expand_home_dir(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(relative) => dirs::home_dir()
            .map(|home| home.join(relative))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
