//! Store configuration.
//!
//! [`StoreConfig`] is read from an optional TOML file and then overridden by
//! `COINVIEW__*` environment variables (`COINVIEW__CACHE__MAX_ITEMS=5000`).
//! Every field has a default, so an empty configuration is valid.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use coinview_core::params::{ChainParams, NetworkKind};
use coinview_core::types::{Hash256, TxId};

use crate::cache::{
    CacheOptions, DEFAULT_FLUSH_DIRTY_THRESHOLD, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_ITEMS,
};
use crate::eviction::{EvictionPolicy, LruEviction, RandomEviction};
use crate::storage::BackendOptions;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "COINVIEW";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("invalid duplicate txid {value}: {reason}")]
    InvalidTxid { value: String, reason: String },
}

/// Which [`EvictionPolicy`] the cache uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionKind {
    #[default]
    Random,
    Lru,
}

impl EvictionKind {
    pub fn build(self) -> Box<dyn EvictionPolicy> {
        match self {
            Self::Random => Box::new(RandomEviction::new()),
            Self::Lru => Box::new(LruEviction::new()),
        }
    }
}

/// Write-back cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_items: usize,
    pub eviction: EvictionKind,
    pub flush_interval_secs: u64,
    pub flush_dirty_threshold: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            eviction: EvictionKind::default(),
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL.as_secs(),
            flush_dirty_threshold: DEFAULT_FLUSH_DIRTY_THRESHOLD,
        }
    }
}

/// Undo log settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    /// Reset to genesis, instead of failing, when rewinding with an empty undo log.
    pub genesis_fallback: bool,
}

/// Top-level configuration for a coin store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for persistent data. Defaults to the platform data
    /// directory plus `coinview/<network>`.
    pub data_dir: Option<PathBuf>,
    pub network: NetworkKind,
    /// Display-hex txids added to the network's duplicate exception set.
    pub extra_duplicate_txids: Vec<String>,
    pub cache: CacheConfig,
    pub undo: UndoConfig,
    /// Log level filter string (e.g. "info", "coinview_store=debug").
    pub log_level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            network: NetworkKind::default(),
            extra_duplicate_txids: Vec::new(),
            cache: CacheConfig::default(),
            undo: UndoConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl StoreConfig {
    /// Load from `path` (if given and present) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`load`](Self::load), with `env` standing in for the process
    /// environment when given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let cfg = builder.build()?.try_deserialize::<StoreConfig>()?;
        Ok(cfg)
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("coinview")
                .join(self.network.data_dir_suffix()),
        }
    }

    /// Path to the RocksDB coin database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("coins")
    }

    /// Network parameters plus the configured extra duplicate txids.
    pub fn chain_params(&self) -> Result<ChainParams, ConfigError> {
        let extra = self
            .extra_duplicate_txids
            .iter()
            .map(|value| {
                value
                    .parse::<TxId>()
                    .map_err(|e| ConfigError::InvalidTxid {
                        value: value.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<Hash256>, _>>()?;
        Ok(ChainParams::for_network(self.network).with_duplicate_txids(extra))
    }

    pub fn backend_options(&self, params: &ChainParams) -> BackendOptions {
        BackendOptions {
            genesis_hash: params.genesis_hash,
            genesis_fallback: self.undo.genesis_fallback,
        }
    }

    pub fn cache_options(&self, params: &ChainParams) -> CacheOptions {
        CacheOptions::new(params)
            .with_max_items(self.cache.max_items)
            .with_eviction(self.cache.eviction.build())
            .with_flush_interval(Duration::from_secs(self.cache.flush_interval_secs))
            .with_flush_dirty_threshold(self.cache.flush_dirty_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinview_core::params::MAINNET_DUPLICATE_TXIDS;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn defaults() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.cache.max_items, 100_000);
        assert_eq!(cfg.cache.eviction, EvictionKind::Random);
        assert_eq!(cfg.cache.flush_interval_secs, 60);
        assert!(!cfg.undo.genesis_fallback);
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.network, NetworkKind::Mainnet);
    }

    #[test]
    fn empty_sources_give_defaults() {
        let cfg = StoreConfig::load_with_env(None, env(&[])).unwrap();
        assert_eq!(cfg, StoreConfig::default());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg =
            StoreConfig::load_with_env(Some(&dir.path().join("absent.toml")), env(&[])).unwrap();
        assert_eq!(cfg, StoreConfig::default());
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coinview.toml");
        std::fs::write(
            &path,
            r#"
network = "regtest"
data_dir = "/tmp/coinview-test"
extra_duplicate_txids = ["0000000000000000000000000000000000000000000000000000000000000001"]

[cache]
max_items = 500
eviction = "lru"

[undo]
genesis_fallback = true
"#,
        )
        .unwrap();

        let cfg = StoreConfig::load_with_env(Some(&path), env(&[])).unwrap();
        assert_eq!(cfg.network, NetworkKind::Regtest);
        assert_eq!(cfg.cache.max_items, 500);
        assert_eq!(cfg.cache.eviction, EvictionKind::Lru);
        // Unset fields keep their defaults.
        assert_eq!(cfg.cache.flush_dirty_threshold, 50_000);
        assert!(cfg.undo.genesis_fallback);
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/coinview-test/coins"));

        let params = cfg.chain_params().unwrap();
        let mut one = [0u8; 32];
        one[0] = 1;
        assert!(params.is_duplicate_txid(&Hash256(one)));
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coinview.toml");
        std::fs::write(&path, "[cache]\nmax_items = 500\n").unwrap();

        let cfg = StoreConfig::load_with_env(
            Some(&path),
            env(&[
                ("COINVIEW__CACHE__MAX_ITEMS", "42"),
                ("COINVIEW__LOG_LEVEL", "debug"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.cache.max_items, 42);
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn invalid_txid_is_rejected() {
        let cfg = StoreConfig {
            extra_duplicate_txids: vec!["not-hex".into()],
            ..StoreConfig::default()
        };
        assert!(matches!(
            cfg.chain_params(),
            Err(ConfigError::InvalidTxid { .. })
        ));
    }

    #[test]
    fn mainnet_params_keep_builtin_exceptions() {
        let params = StoreConfig::default().chain_params().unwrap();
        for txid in MAINNET_DUPLICATE_TXIDS {
            assert!(params.is_duplicate_txid(&txid));
        }
    }

    #[test]
    fn default_data_dir_ends_with_network() {
        let cfg = StoreConfig {
            network: NetworkKind::Testnet,
            ..StoreConfig::default()
        };
        assert!(
            cfg.data_dir().ends_with("coinview/testnet"),
            "unexpected data dir: {:?}",
            cfg.data_dir()
        );
    }

    #[test]
    fn option_builders_follow_config() {
        let cfg = StoreConfig {
            undo: UndoConfig {
                genesis_fallback: true,
            },
            ..StoreConfig::default()
        };
        let params = ChainParams::for_network(NetworkKind::Regtest);

        let backend = cfg.backend_options(&params);
        assert!(backend.genesis_fallback);
        assert_eq!(backend.genesis_hash, params.genesis_hash);

        let cache = cfg.cache_options(&params);
        assert_eq!(cache.max_items, 100_000);
        assert_eq!(cache.eviction.name(), "random");
        assert_eq!(cache.flush_interval, Duration::from_secs(60));
    }

    #[test]
    fn default_config_matches_default_cache_options() {
        let params = ChainParams::for_network(NetworkKind::Regtest);
        let from_config = StoreConfig::default().cache_options(&params);
        let direct = CacheOptions::new(&params);
        assert_eq!(from_config.max_items, direct.max_items);
        assert_eq!(from_config.flush_interval, direct.flush_interval);
        assert_eq!(from_config.flush_dirty_threshold, direct.flush_dirty_threshold);
        assert_eq!(direct.flush_dirty_threshold, DEFAULT_FLUSH_DIRTY_THRESHOLD);
    }
}
