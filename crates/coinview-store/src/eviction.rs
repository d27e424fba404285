//! Eviction policies for the write-back cache.
//!
//! A policy only ever sees clean entries: the cache filters out dirty ones
//! before asking for victims, so no policy can drop an unflushed change.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use coinview_core::types::TxId;

/// Chooses which clean cache entries to drop when the cache is over capacity.
pub trait EvictionPolicy: Send {
    fn name(&self) -> &'static str;

    /// Record an access to `txid`.
    fn touch(&mut self, _txid: &TxId) {}

    /// Forget a removed entry.
    fn forget(&mut self, _txid: &TxId) {}

    /// Pick victims among `clean` entries. `excess` is how many entries the
    /// cache holds above its limit; a policy may return fewer or more.
    fn select(&mut self, clean: &[TxId], excess: usize) -> Vec<TxId>;
}

/// Drop each clean entry with probability one in three, independent of
/// how far over capacity the cache is.
pub struct RandomEviction {
    rng: StdRng,
}

impl RandomEviction {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic victim selection, for tests and benchmarks.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomEviction {
    fn default() -> Self {
        Self::new()
    }
}

impl EvictionPolicy for RandomEviction {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(&mut self, clean: &[TxId], _excess: usize) -> Vec<TxId> {
        clean
            .iter()
            .filter(|_| self.rng.gen_ratio(1, 3))
            .copied()
            .collect()
    }
}

/// Drop the least recently touched clean entries, exactly enough to get
/// back under the limit.
#[derive(Default)]
pub struct LruEviction {
    clock: u64,
    last_used: HashMap<TxId, u64>,
}

impl LruEviction {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvictionPolicy for LruEviction {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn touch(&mut self, txid: &TxId) {
        self.clock += 1;
        self.last_used.insert(*txid, self.clock);
    }

    fn forget(&mut self, txid: &TxId) {
        self.last_used.remove(txid);
    }

    fn select(&mut self, clean: &[TxId], excess: usize) -> Vec<TxId> {
        let mut ranked: Vec<(u64, TxId)> = clean
            .iter()
            .map(|txid| (self.last_used.get(txid).copied().unwrap_or(0), *txid))
            .collect();
        ranked.sort_unstable();
        ranked.into_iter().take(excess).map(|(_, txid)| txid).collect()
    }
}
