//! # coinview-store
//! Durable and cached coin views.
//!
//! - [`storage`] — [`CoinDb`], the RocksDB coin/tip/undo/aux tables
//! - [`backend`] — [`RocksCoinView`], `CoinDb` behind a single worker thread
//! - [`cache`] — [`CachedCoinView`], the write-back cache actor
//! - [`eviction`] — pluggable cache eviction policies
//! - [`side_table`] — [`AuxRecordBuffer`] for the auxiliary side table
//! - [`config`] — [`StoreConfig`] from file and environment

pub mod backend;
pub mod cache;
pub mod config;
pub mod eviction;
pub mod side_table;
pub mod storage;

pub use backend::RocksCoinView;
pub use cache::{CacheEntry, CacheOptions, CacheState, CacheStats, CachedCoinView};
pub use config::{ConfigError, EvictionKind, StoreConfig};
pub use eviction::{EvictionPolicy, LruEviction, RandomEviction};
pub use side_table::AuxRecordBuffer;
pub use storage::{BackendOptions, CoinDb};
