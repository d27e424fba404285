//! Per-network parameters consumed by coin views.
//!
//! [`ChainParams`] is injected at construction: the durable backend takes
//! the genesis hash as its initial tip, the write-back cache takes the set
//! of historically duplicated transaction ids.
//!
//! # Examples
//!
//! ```
//! use coinview_core::params::{ChainParams, NetworkKind};
//! let params = ChainParams::for_network(NetworkKind::Regtest);
//! assert!(params.duplicate_txids.is_empty());
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::{Hash256, TxId};

/// Bitcoin mainnet genesis block hash.
pub const MAINNET_GENESIS: Hash256 =
    Hash256::from_display_hex("000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f");

/// Bitcoin testnet3 genesis block hash.
pub const TESTNET_GENESIS: Hash256 =
    Hash256::from_display_hex("000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943");

/// Bitcoin regtest genesis block hash.
pub const REGTEST_GENESIS: Hash256 =
    Hash256::from_display_hex("0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206");

/// Mainnet coinbase transactions that were later duplicated (BIP 30).
pub const MAINNET_DUPLICATE_TXIDS: [TxId; 2] = [
    Hash256::from_display_hex("d5d27987d2a3dfc724e359870c6644b40e497bdc0589a033220fe15429d88599"),
    Hash256::from_display_hex("e3bf3d07d4b0375638d5f1db5255fe07ba2c4cb067cd81b84ee974b6585fb468"),
];

/// Network selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    #[default]
    Mainnet,
    Testnet,
    /// Local regression-test network.
    Regtest,
}

impl NetworkKind {
    /// Subdirectory name appended to the base data directory path.
    pub fn data_dir_suffix(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }
}

impl std::str::FromStr for NetworkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Self::Mainnet),
            "testnet" | "test" => Ok(Self::Testnet),
            "regtest" => Ok(Self::Regtest),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

/// Parameters a coin view needs from the network it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    pub network: NetworkKind,
    /// Tip of an empty coin set.
    pub genesis_hash: Hash256,
    /// Transactions treated as already known to the backend when first saved.
    pub duplicate_txids: HashSet<TxId>,
}

impl ChainParams {
    /// Built-in parameters for `network`.
    pub fn for_network(network: NetworkKind) -> Self {
        let (genesis_hash, duplicate_txids) = match network {
            NetworkKind::Mainnet => (MAINNET_GENESIS, MAINNET_DUPLICATE_TXIDS.into_iter().collect()),
            NetworkKind::Testnet => (TESTNET_GENESIS, HashSet::new()),
            NetworkKind::Regtest => (REGTEST_GENESIS, HashSet::new()),
        };
        Self {
            network,
            genesis_hash,
            duplicate_txids,
        }
    }

    /// Parameters with a custom genesis and no duplicate exceptions.
    pub fn custom(genesis_hash: Hash256) -> Self {
        Self {
            network: NetworkKind::Regtest,
            genesis_hash,
            duplicate_txids: HashSet::new(),
        }
    }

    /// Add transaction ids to the duplicate exception set.
    pub fn with_duplicate_txids(mut self, txids: impl IntoIterator<Item = TxId>) -> Self {
        self.duplicate_txids.extend(txids);
        self
    }

    pub fn is_duplicate_txid(&self, txid: &TxId) -> bool {
        self.duplicate_txids.contains(txid)
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::for_network(NetworkKind::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_has_bip30_exceptions() {
        let params = ChainParams::for_network(NetworkKind::Mainnet);
        assert_eq!(params.duplicate_txids.len(), 2);
        for txid in MAINNET_DUPLICATE_TXIDS {
            assert!(params.is_duplicate_txid(&txid));
        }
    }

    #[test]
    fn genesis_hashes_are_distinct() {
        let hashes: HashSet<Hash256> = [MAINNET_GENESIS, TESTNET_GENESIS, REGTEST_GENESIS]
            .into_iter()
            .collect();
        assert_eq!(hashes.len(), 3);
    }

    #[test]
    fn genesis_display_roundtrip() {
        assert_eq!(
            MAINNET_GENESIS.to_string(),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
    }

    #[test]
    fn custom_params_have_no_exceptions() {
        let params = ChainParams::custom(Hash256([7; 32]))
            .with_duplicate_txids([Hash256([1; 32])]);
        assert_eq!(params.genesis_hash, Hash256([7; 32]));
        assert!(params.is_duplicate_txid(&Hash256([1; 32])));
        assert!(!params.is_duplicate_txid(&Hash256([2; 32])));
    }

    #[test]
    fn network_parse_is_case_insensitive() {
        assert_eq!("Regtest".parse::<NetworkKind>().unwrap(), NetworkKind::Regtest);
        assert_eq!("main".parse::<NetworkKind>().unwrap(), NetworkKind::Mainnet);
        assert!("signet".parse::<NetworkKind>().is_err());
    }

    #[test]
    fn data_dir_suffixes() {
        assert_eq!(NetworkKind::Testnet.data_dir_suffix(), "testnet");
        assert_eq!(NetworkKind::default(), NetworkKind::Mainnet);
    }
}
