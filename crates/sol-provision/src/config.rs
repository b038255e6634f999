//! Client configuration.
//!
//! Everything a component needs to reach the ledger is passed in through a
//! [`ClientConfig`]; nothing is read from the environment here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SolError;
use crate::rpc::CommitmentLevel;

/// The ledger cluster a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cluster {
    Mainnet,
    Testnet,
    Devnet,
    Localnet,
}

impl Cluster {
    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Cluster::Mainnet => "https://api.mainnet-beta.solana.com",
            Cluster::Testnet => "https://api.testnet.solana.com",
            Cluster::Devnet => "https://api.devnet.solana.com",
            Cluster::Localnet => "http://127.0.0.1:8899",
        }
    }

    /// Faucet funding exists only on test networks.
    pub fn allows_airdrop(&self) -> bool {
        !matches!(self, Cluster::Mainnet)
    }
}

impl std::fmt::Display for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Cluster::Mainnet => "mainnet",
            Cluster::Testnet => "testnet",
            Cluster::Devnet => "devnet",
            Cluster::Localnet => "localnet",
        };
        f.write_str(name)
    }
}

/// Connection and confirmation settings shared by all client components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub rpc_url: String,
    pub cluster: Cluster,
    /// Commitment used for reads and as the default confirmation target.
    pub commitment: CommitmentLevel,
    pub confirm_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_cluster(Cluster::Localnet)
    }
}

impl ClientConfig {
    pub fn for_cluster(cluster: Cluster) -> Self {
        Self {
            rpc_url: cluster.default_rpc_url().to_string(),
            cluster,
            commitment: CommitmentLevel::Confirmed,
            confirm_timeout_ms: 30_000,
            poll_interval_ms: 500,
            request_timeout_ms: 30_000,
        }
    }

    /// Parse a JSON document; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, SolError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SolError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SolError> {
        if self.rpc_url.is_empty() {
            return Err(SolError::Config("rpc_url is empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(SolError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(SolError::Config("request_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_localnet() {
        let config = ClientConfig::default();
        assert_eq!(config.cluster, Cluster::Localnet);
        assert_eq!(config.rpc_url, "http://127.0.0.1:8899");
        assert_eq!(config.commitment, CommitmentLevel::Confirmed);
    }

    #[test]
    fn from_json_fills_missing_fields() {
        let config =
            ClientConfig::from_json(r#"{"cluster":"devnet","rpc_url":"http://x:1","commitment":"finalized"}"#)
                .unwrap();
        assert_eq!(config.cluster, Cluster::Devnet);
        assert_eq!(config.commitment, CommitmentLevel::Finalized);
        assert_eq!(config.poll_interval_ms, 500);
    }

    #[test]
    fn from_json_rejects_bad_values() {
        assert!(matches!(
            ClientConfig::from_json(r#"{"poll_interval_ms":0}"#),
            Err(SolError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_json(r#"{"cluster":"moonnet"}"#),
            Err(SolError::Config(_))
        ));
    }

    #[test]
    fn airdrop_only_off_mainnet() {
        assert!(!Cluster::Mainnet.allows_airdrop());
        assert!(Cluster::Devnet.allows_airdrop());
        assert!(Cluster::Testnet.allows_airdrop());
        assert!(Cluster::Localnet.allows_airdrop());
    }
}
