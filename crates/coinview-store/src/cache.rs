//! Write-back cache over any [`CoinView`].
//!
//! [`CachedCoinView`] is a handle to a single tokio task that owns all cache
//! state ([`CacheState`]). Fetch, save, flush, rewind and evict are ordered
//! messages; an operation that awaits the inner view finishes before the
//! next message is taken, so no operation ever observes another one half
//! applied.
//!
//! Saves are absorbed in memory and pushed to the inner view as one batch
//! per flush, tagged with the inner view's last known tip. Flushes happen
//! when asked for, when eviction alone cannot bring the cache back under its
//! limit, and on [`shutdown`](CachedCoinView::shutdown). Dropping every
//! handle without a shutdown loses unflushed changes.

use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use coinview_core::error::CoinViewError;
use coinview_core::params::ChainParams;
use coinview_core::traits::{AuxiliaryStore, CoinView, FetchResult};
use coinview_core::types::{Hash256, OutputSlots, TxId, UnspentOutputs};

use crate::eviction::{EvictionPolicy, RandomEviction};

/// Default resident entry limit.
pub const DEFAULT_MAX_ITEMS: usize = 100_000;

/// Default time between non-forced flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Default dirty entry count that triggers a non-forced flush.
pub const DEFAULT_FLUSH_DIRTY_THRESHOLD: usize = 50_000;

const ACTOR: &str = "coin cache actor";

// ---------------------------------------------------------------------------
// Options and statistics
// ---------------------------------------------------------------------------

/// Construction parameters for [`CachedCoinView`].
pub struct CacheOptions {
    pub max_items: usize,
    /// Transactions treated as already in the inner view when first saved.
    pub duplicate_txids: HashSet<TxId>,
    pub eviction: Box<dyn EvictionPolicy>,
    /// A non-forced flush runs once this much time has passed since the last one.
    pub flush_interval: Duration,
    /// A non-forced flush runs once this many entries are dirty.
    pub flush_dirty_threshold: usize,
    /// Flushed before every inner save.
    pub aux_store: Option<Arc<dyn AuxiliaryStore>>,
}

impl CacheOptions {
    /// Defaults for `params`: duplicate txids from the network, random
    /// eviction, 100 000 entries.
    pub fn new(params: &ChainParams) -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            duplicate_txids: params.duplicate_txids.clone(),
            eviction: Box::new(RandomEviction::new()),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_dirty_threshold: DEFAULT_FLUSH_DIRTY_THRESHOLD,
            aux_store: None,
        }
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_eviction(mut self, policy: Box<dyn EvictionPolicy>) -> Self {
        self.eviction = policy;
        self
    }

    pub fn with_aux_store(mut self, store: Arc<dyn AuxiliaryStore>) -> Self {
        self.aux_store = Some(store);
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_flush_dirty_threshold(mut self, threshold: usize) -> Self {
        self.flush_dirty_threshold = threshold;
        self
    }
}

/// Counters reported by [`CachedCoinView::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub dirty: usize,
    pub hits: u64,
    pub misses: u64,
    pub flushes: u64,
    pub evicted: u64,
}

// ---------------------------------------------------------------------------
// Cache state
// ---------------------------------------------------------------------------

/// One cached transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// `None` when the inner view did not know the transaction.
    pub coins: Option<UnspentOutputs>,
    pub exists_in_backend: bool,
    pub dirty: bool,
    /// Output array as of the last sync with the inner view.
    pub original: Option<OutputSlots>,
}

impl CacheEntry {
    fn is_prunable(&self) -> bool {
        self.coins.as_ref().is_none_or(|c| c.is_prunable())
    }
}

/// Changes gathered for one flush, aligned by index.
#[derive(Debug, Default)]
pub struct FlushBatch {
    pub outputs: Vec<UnspentOutputs>,
    pub originals: Vec<Option<OutputSlots>>,
}

impl FlushBatch {
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Everything the cache actor owns apart from the views it talks to.
pub struct CacheState {
    entries: HashMap<TxId, CacheEntry>,
    tip: Hash256,
    inner_tip: Hash256,
    max_items: usize,
    duplicate_txids: HashSet<TxId>,
    policy: Box<dyn EvictionPolicy>,
    stats: CacheStats,
    last_flush: Instant,
    flush_interval: Duration,
    flush_dirty_threshold: usize,
}

impl CacheState {
    /// Empty state synchronized with an inner view at `inner_tip`.
    ///
    /// The auxiliary store in `options`, if any, is not part of the state.
    pub fn new(inner_tip: Hash256, options: CacheOptions) -> Self {
        Self {
            entries: HashMap::new(),
            tip: inner_tip,
            inner_tip,
            max_items: options.max_items,
            duplicate_txids: options.duplicate_txids,
            policy: options.eviction,
            stats: CacheStats::default(),
            last_flush: Instant::now(),
            flush_interval: options.flush_interval,
            flush_dirty_threshold: options.flush_dirty_threshold,
        }
    }

    pub fn tip(&self) -> Hash256 {
        self.tip
    }

    pub fn inner_tip(&self) -> Hash256 {
        self.inner_tip
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, txid: &TxId) -> Option<&CacheEntry> {
        self.entries.get(txid)
    }

    pub fn dirty_count(&self) -> usize {
        self.entries.values().filter(|e| e.dirty).count()
    }

    pub fn over_capacity(&self) -> bool {
        self.entries.len() > self.max_items
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            dirty: self.dirty_count(),
            ..self.stats
        }
    }

    /// Serve what the cache holds. Returns one slot per id (filled for
    /// hits) and the `(index, id)` pairs that missed.
    pub fn lookup(&mut self, ids: &[TxId]) -> (Vec<Option<UnspentOutputs>>, Vec<(usize, TxId)>) {
        let mut outputs = Vec::with_capacity(ids.len());
        let mut misses = Vec::new();

        for (index, id) in ids.iter().enumerate() {
            match self.entries.get(id) {
                Some(entry) => {
                    self.stats.hits += 1;
                    self.policy.touch(id);
                    // A pruned entry is as good as absent.
                    outputs.push(entry.coins.as_ref().filter(|c| !c.is_prunable()).cloned());
                }
                None => {
                    self.stats.misses += 1;
                    outputs.push(None);
                    misses.push((index, *id));
                }
            }
        }

        (outputs, misses)
    }

    /// Cache a record read from the inner view. An existing entry wins.
    pub fn insert_fetched(&mut self, txid: TxId, coins: Option<UnspentOutputs>) {
        if let Entry::Vacant(slot) = self.entries.entry(txid) {
            slot.insert(CacheEntry {
                exists_in_backend: coins.is_some(),
                original: coins.as_ref().map(UnspentOutputs::snapshot_outputs),
                coins,
                dirty: false,
            });
            self.policy.touch(&txid);
        }
    }

    /// Merge a block's changes and advance the tip.
    pub fn apply_save(
        &mut self,
        new_outputs: &[UnspentOutputs],
        old_tip: Hash256,
        new_tip: Hash256,
    ) -> Result<(), CoinViewError> {
        if old_tip != self.tip {
            return Err(CoinViewError::StaleTip {
                expected: self.tip,
                got: old_tip,
            });
        }

        for coins in new_outputs {
            let txid = coins.txid;
            let drop_entry = match self.entries.entry(txid) {
                Entry::Occupied(mut slot) => {
                    let entry = slot.get_mut();
                    match entry.coins.as_mut() {
                        Some(existing) => existing.spend(coins),
                        None => entry.coins = Some(coins.clone()),
                    }
                    entry.dirty = true;
                    entry.is_prunable() && !entry.exists_in_backend
                }
                Entry::Vacant(slot) => {
                    let exists_in_backend =
                        !coins.is_full() || self.duplicate_txids.contains(&txid);
                    let entry = slot.insert(CacheEntry {
                        coins: Some(coins.clone()),
                        exists_in_backend,
                        dirty: true,
                        original: None,
                    });
                    entry.is_prunable() && !entry.exists_in_backend
                }
            };

            if drop_entry {
                self.entries.remove(&txid);
                self.policy.forget(&txid);
            } else {
                self.policy.touch(&txid);
            }
        }

        self.tip = new_tip;
        Ok(())
    }

    /// Drop clean entries chosen by the eviction policy. Dirty entries are
    /// never candidates. Returns the number removed.
    pub fn evict(&mut self) -> usize {
        let clean: Vec<TxId> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.dirty)
            .map(|(id, _)| *id)
            .collect();
        let excess = self.entries.len().saturating_sub(self.max_items);

        let mut removed = 0;
        for txid in self.policy.select(&clean, excess) {
            if self.entries.get(&txid).is_some_and(|e| !e.dirty) {
                self.entries.remove(&txid);
                self.policy.forget(&txid);
                removed += 1;
            }
        }

        self.stats.evicted += removed as u64;
        debug!(
            policy = self.policy.name(),
            removed,
            remaining = self.entries.len(),
            "evicted cache entries"
        );
        removed
    }

    /// Whether a non-forced flush should run now.
    pub fn should_flush(&self) -> bool {
        self.dirty_count() >= self.flush_dirty_threshold
            || self.last_flush.elapsed() >= self.flush_interval
    }

    /// Whether there is anything the inner view does not have yet.
    pub fn has_pending(&self) -> bool {
        self.tip != self.inner_tip || self.entries.values().any(|e| e.dirty)
    }

    /// Snapshot every dirty entry.
    pub fn dirty_batch(&self) -> FlushBatch {
        let mut batch = FlushBatch::default();
        for entry in self.entries.values().filter(|e| e.dirty) {
            if let Some(coins) = &entry.coins {
                batch.outputs.push(coins.clone());
                batch.originals.push(entry.original.clone());
            }
        }
        batch
    }

    /// Record that `batch` reached the inner view at the current tip.
    pub fn commit_flush(&mut self, batch: &FlushBatch) {
        for coins in &batch.outputs {
            if coins.is_prunable() {
                if self.entries.remove(&coins.txid).is_some() {
                    self.policy.forget(&coins.txid);
                }
            } else if let Some(entry) = self.entries.get_mut(&coins.txid) {
                entry.dirty = false;
                entry.exists_in_backend = true;
                entry.original = Some(coins.snapshot_outputs());
            }
        }
        self.inner_tip = self.tip;
        self.stats.flushes += 1;
        self.last_flush = Instant::now();
    }

    /// Note a flush that had nothing to write.
    pub fn mark_flushed(&mut self) {
        self.last_flush = Instant::now();
    }

    /// Drop every entry. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        for txid in self.entries.keys() {
            self.policy.forget(txid);
        }
        self.entries.clear();
        dropped
    }

    /// Set both tips after the inner view moved.
    pub fn reset_tip(&mut self, tip: Hash256) {
        self.tip = tip;
        self.inner_tip = tip;
    }

    pub fn set_max_items(&mut self, max_items: usize) {
        self.max_items = max_items;
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

type Reply<T> = oneshot::Sender<Result<T, CoinViewError>>;

/// Commands sent from [`CachedCoinView`] to the cache actor.
enum Command {
    Fetch {
        ids: Vec<TxId>,
        reply: Reply<FetchResult>,
    },
    Save {
        outputs: Vec<UnspentOutputs>,
        old_tip: Hash256,
        new_tip: Hash256,
        reply: Reply<()>,
    },
    Flush {
        force: bool,
        reply: Reply<bool>,
    },
    Rewind {
        reply: Reply<Hash256>,
    },
    Evict {
        reply: oneshot::Sender<usize>,
    },
    Len {
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<CacheStats>,
    },
    SetMaxItems {
        max_items: usize,
        reply: oneshot::Sender<()>,
    },
    MaxItems {
        reply: oneshot::Sender<usize>,
    },
    /// Flush everything, then stop.
    Shutdown {
        reply: Reply<()>,
    },
}

struct CacheActor {
    state: CacheState,
    inner: Arc<dyn CoinView>,
    aux_store: Option<Arc<dyn AuxiliaryStore>>,
}

impl CacheActor {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = command_rx.recv().await {
            match cmd {
                Command::Fetch { ids, reply } => {
                    let _ = reply.send(self.fetch(&ids).await);
                }
                Command::Save {
                    outputs,
                    old_tip,
                    new_tip,
                    reply,
                } => {
                    let _ = reply.send(self.state.apply_save(&outputs, old_tip, new_tip));
                }
                Command::Flush { force, reply } => {
                    let _ = reply.send(self.flush(force).await);
                }
                Command::Rewind { reply } => {
                    let _ = reply.send(self.rewind().await);
                }
                Command::Evict { reply } => {
                    let _ = reply.send(self.state.evict());
                }
                Command::Len { reply } => {
                    let _ = reply.send(self.state.len());
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.state.stats());
                }
                Command::SetMaxItems { max_items, reply } => {
                    self.state.set_max_items(max_items);
                    let _ = reply.send(());
                }
                Command::MaxItems { reply } => {
                    let _ = reply.send(self.state.max_items());
                }
                Command::Shutdown { reply } => {
                    let result = self.flush(true).await.map(|_| ());
                    command_rx.close();
                    info!(tip = %self.state.tip(), "coin cache stopped");
                    let _ = reply.send(result);
                    return;
                }
            }
        }
        debug!("coin cache actor exited");
    }

    async fn fetch(&mut self, ids: &[TxId]) -> Result<FetchResult, CoinViewError> {
        let (mut outputs, misses) = self.state.lookup(ids);

        if !misses.is_empty() {
            let miss_ids: Vec<TxId> = misses.iter().map(|(_, id)| *id).collect();
            let fetched = self.inner.fetch(&miss_ids).await?;

            for ((index, txid), coins) in misses.into_iter().zip(fetched.outputs) {
                outputs[index] = coins.as_ref().filter(|c| !c.is_prunable()).cloned();
                self.state.insert_fetched(txid, coins);
            }

            if self.state.over_capacity() {
                self.state.evict();
                if self.state.over_capacity() {
                    self.flush(true).await?;
                    self.state.evict();
                }
            }
        }

        Ok(FetchResult::new(outputs, self.state.tip()))
    }

    /// Push dirty entries to the inner view. Returns whether a save was issued.
    async fn flush(&mut self, force: bool) -> Result<bool, CoinViewError> {
        if !force && !self.state.should_flush() {
            return Ok(false);
        }

        if let Some(aux) = &self.aux_store {
            aux.flush(true).await?;
        }

        if !self.state.has_pending() {
            self.state.mark_flushed();
            return Ok(false);
        }

        let batch = self.state.dirty_batch();
        let old_tip = self.state.inner_tip();
        let new_tip = self.state.tip();
        self.inner
            .save(&batch.outputs, Some(&batch.originals), old_tip, new_tip)
            .await?;
        self.state.commit_flush(&batch);

        debug!(%old_tip, %new_tip, count = batch.outputs.len(), "flushed coin cache");
        Ok(true)
    }

    async fn rewind(&mut self) -> Result<Hash256, CoinViewError> {
        if self.state.tip() == self.state.inner_tip() {
            self.state.clear();
            let tip = self.inner.rewind().await?;
            self.state.reset_tip(tip);
            return Ok(tip);
        }

        // Unflushed blocks: drop them all and fall back to the inner tip.
        let dropped = self.state.clear();
        let tip = self.state.inner_tip();
        warn!(
            from = %self.state.tip(),
            to = %tip,
            dropped,
            "rewind discarded unflushed cache contents"
        );
        self.state.reset_tip(tip);
        Ok(tip)
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to the write-back cache.
pub struct CachedCoinView {
    command_tx: mpsc::UnboundedSender<Command>,
    inner: Arc<dyn CoinView>,
}

impl std::fmt::Debug for CachedCoinView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedCoinView")
            .field("inner", &self.inner.name())
            .field("running", &!self.command_tx.is_closed())
            .finish()
    }
}

impl CachedCoinView {
    /// Read the inner view's tip and spawn the cache actor on the current
    /// tokio runtime.
    pub async fn start(
        inner: Arc<dyn CoinView>,
        mut options: CacheOptions,
    ) -> Result<Self, CoinViewError> {
        let inner_tip = inner.tip().await?;
        let aux_store = options.aux_store.take();
        let state = CacheState::new(inner_tip, options);
        info!(
            tip = %inner_tip,
            inner = inner.name(),
            max_items = state.max_items(),
            "starting coin cache"
        );

        let actor = CacheActor {
            state,
            inner: Arc::clone(&inner),
            aux_store,
        };
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(actor.run(command_rx));

        Ok(Self { command_tx, inner })
    }

    /// Push dirty entries to the inner view.
    ///
    /// A non-forced flush does nothing unless the flush interval has passed
    /// or enough entries are dirty. Returns whether anything was saved.
    pub async fn flush(&self, force: bool) -> Result<bool, CoinViewError> {
        self.request(|reply| Command::Flush { force, reply }).await
    }

    /// Run the eviction policy once. Returns the number of entries removed.
    pub async fn evict(&self) -> Result<usize, CoinViewError> {
        self.ask(|reply| Command::Evict { reply }).await
    }

    /// Resident entry count.
    pub async fn len(&self) -> Result<usize, CoinViewError> {
        self.ask(|reply| Command::Len { reply }).await
    }

    pub async fn is_empty(&self) -> Result<bool, CoinViewError> {
        Ok(self.len().await? == 0)
    }

    pub async fn stats(&self) -> Result<CacheStats, CoinViewError> {
        self.ask(|reply| Command::Stats { reply }).await
    }

    pub async fn max_items(&self) -> Result<usize, CoinViewError> {
        self.ask(|reply| Command::MaxItems { reply }).await
    }

    /// Change the resident entry limit. Takes effect on the next fetch miss.
    pub async fn set_max_items(&self, max_items: usize) -> Result<(), CoinViewError> {
        self.ask(|reply| Command::SetMaxItems { max_items, reply })
            .await
    }

    /// Flush everything and stop the actor.
    pub async fn shutdown(&self) -> Result<(), CoinViewError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, CoinViewError> {
        self.ask(build).await?
    }

    async fn ask<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CoinViewError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(build(reply))
            .map_err(|_| CoinViewError::WorkerStopped(ACTOR))?;
        rx.await.map_err(|_| CoinViewError::WorkerStopped(ACTOR))
    }
}

#[async_trait]
impl CoinView for CachedCoinView {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn fetch(&self, ids: &[TxId]) -> Result<FetchResult, CoinViewError> {
        let ids = ids.to_vec();
        self.request(|reply| Command::Fetch { ids, reply }).await
    }

    /// Original outputs are ignored: the cache tracks its own snapshot of
    /// each entry as of the last sync with the inner view.
    async fn save(
        &self,
        new_outputs: &[UnspentOutputs],
        _original_outputs: Option<&[Option<OutputSlots>]>,
        old_tip: Hash256,
        new_tip: Hash256,
    ) -> Result<(), CoinViewError> {
        let outputs = new_outputs.to_vec();
        self.request(|reply| Command::Save {
            outputs,
            old_tip,
            new_tip,
            reply,
        })
        .await
    }

    async fn rewind(&self) -> Result<Hash256, CoinViewError> {
        self.request(|reply| Command::Rewind { reply }).await
    }

    fn inner(&self) -> Option<&Arc<dyn CoinView>> {
        Some(&self.inner)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
