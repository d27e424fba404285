//! Buffered writer for the backend's auxiliary side table.
//!
//! Per-block records produced by a collaborator (stake data, for example)
//! are queued in memory and written to the durable backend when flushed.
//! Attach the buffer to the cache with
//! [`CacheOptions::with_aux_store`](crate::cache::CacheOptions::with_aux_store)
//! so it is always written before the coins it belongs with.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use coinview_core::error::CoinViewError;
use coinview_core::traits::AuxiliaryStore;
use coinview_core::types::Hash256;

use crate::backend::RocksCoinView;

/// Default number of pending records that makes a non-forced flush write.
pub const DEFAULT_AUX_THRESHOLD: usize = 500;

/// Queued records keyed by id, written in first-queued order.
#[derive(Default)]
struct PendingRecords {
    order: Vec<Hash256>,
    records: HashMap<Hash256, Vec<u8>>,
}

impl PendingRecords {
    fn insert(&mut self, id: Hash256, blob: Vec<u8>) {
        if self.records.insert(id, blob).is_none() {
            self.order.push(id);
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn get(&self, id: &Hash256) -> Option<&Vec<u8>> {
        self.records.get(id)
    }

    fn into_batch(mut self) -> Vec<(Hash256, Vec<u8>)> {
        self.order
            .into_iter()
            .filter_map(|id| self.records.remove(&id).map(|blob| (id, blob)))
            .collect()
    }
}

/// In-memory queue of auxiliary records in front of a [`RocksCoinView`].
pub struct AuxRecordBuffer {
    backend: Arc<RocksCoinView>,
    pending: Mutex<PendingRecords>,
    threshold: usize,
}

impl AuxRecordBuffer {
    pub fn new(backend: Arc<RocksCoinView>) -> Self {
        Self::with_threshold(backend, DEFAULT_AUX_THRESHOLD)
    }

    pub fn with_threshold(backend: Arc<RocksCoinView>, threshold: usize) -> Self {
        Self {
            backend,
            pending: Mutex::new(PendingRecords::default()),
            threshold,
        }
    }

    /// Queue a record. A later record for the same id replaces the earlier one.
    pub fn push(&self, id: Hash256, blob: Vec<u8>) {
        self.pending.lock().insert(id, blob);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Read records, preferring queued ones over what the backend holds.
    pub async fn get(&self, ids: &[Hash256]) -> Result<Vec<Option<Vec<u8>>>, CoinViewError> {
        let mut stored = self.backend.get_aux(ids.to_vec()).await?;
        let pending = self.pending.lock();
        for (id, slot) in ids.iter().zip(stored.iter_mut()) {
            if let Some(blob) = pending.get(id) {
                *slot = Some(blob.clone());
            }
        }
        Ok(stored)
    }
}

#[async_trait]
impl AuxiliaryStore for AuxRecordBuffer {
    async fn flush(&self, force: bool) -> Result<(), CoinViewError> {
        let batch = {
            let mut pending = self.pending.lock();
            if pending.is_empty() || (!force && pending.len() < self.threshold) {
                return Ok(());
            }
            std::mem::take(&mut *pending).into_batch()
        };

        let count = batch.len();
        if let Err(e) = self.backend.put_aux(batch.clone()).await {
            // Put the records back ahead of anything queued meanwhile.
            let mut pending = self.pending.lock();
            let newer = std::mem::take(&mut *pending);
            for (id, blob) in batch.into_iter().chain(newer.into_batch()) {
                pending.insert(id, blob);
            }
            warn!(error = %e, count, "auxiliary flush failed; records re-queued");
            return Err(e);
        }

        debug!(count, "flushed auxiliary records");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BackendOptions;

    fn h(seed: u8) -> Hash256 {
        Hash256([seed; 32])
    }

    fn temp_backend() -> (Arc<RocksCoinView>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let view = RocksCoinView::open(dir.path(), BackendOptions::new(h(0xEE))).unwrap();
        (Arc::new(view), dir)
    }

    #[tokio::test]
    async fn forced_flush_writes_pending_records() {
        let (backend, _dir) = temp_backend();
        let buffer = AuxRecordBuffer::new(backend.clone());
        buffer.push(h(1), vec![1]);
        buffer.push(h(2), vec![2]);

        buffer.flush(true).await.unwrap();
        assert_eq!(buffer.pending_len(), 0);
        assert_eq!(
            backend.get_aux(vec![h(1), h(2)]).await.unwrap(),
            vec![Some(vec![1]), Some(vec![2])]
        );
    }

    #[tokio::test]
    async fn non_forced_flush_respects_threshold() {
        let (backend, _dir) = temp_backend();
        let buffer = AuxRecordBuffer::with_threshold(backend.clone(), 2);
        buffer.push(h(1), vec![1]);

        buffer.flush(false).await.unwrap();
        assert_eq!(buffer.pending_len(), 1);
        assert_eq!(backend.get_aux(vec![h(1)]).await.unwrap(), vec![None]);

        buffer.push(h(2), vec![2]);
        buffer.flush(false).await.unwrap();
        assert_eq!(buffer.pending_len(), 0);
    }

    #[tokio::test]
    async fn push_replaces_same_id() {
        let (backend, _dir) = temp_backend();
        let buffer = AuxRecordBuffer::new(backend);
        buffer.push(h(1), vec![1]);
        buffer.push(h(1), vec![9]);
        assert_eq!(buffer.pending_len(), 1);
        assert_eq!(buffer.get(&[h(1)]).await.unwrap(), vec![Some(vec![9])]);
    }

    #[tokio::test]
    async fn get_merges_pending_and_stored() {
        let (backend, _dir) = temp_backend();
        let buffer = AuxRecordBuffer::new(backend);
        buffer.push(h(1), vec![1]);
        buffer.flush(true).await.unwrap();
        buffer.push(h(2), vec![2]);

        let blobs = buffer.get(&[h(1), h(2), h(3)]).await.unwrap();
        assert_eq!(blobs, vec![Some(vec![1]), Some(vec![2]), None]);
    }

    #[tokio::test]
    async fn failed_flush_requeues_records() {
        let (backend, _dir) = temp_backend();
        let buffer = AuxRecordBuffer::new(backend.clone());
        buffer.push(h(1), vec![1]);
        backend.close().await.unwrap();

        let err = buffer.flush(true).await.unwrap_err();
        assert!(matches!(err, CoinViewError::WorkerStopped(_)));
        assert_eq!(buffer.pending_len(), 1);
    }

    #[tokio::test]
    async fn requeue_keeps_newer_record_for_same_id() {
        let (backend, _dir) = temp_backend();
        let buffer = AuxRecordBuffer::new(backend.clone());
        buffer.push(h(1), vec![1]);
        buffer.push(h(2), vec![2]);
        backend.close().await.unwrap();

        buffer.flush(true).await.unwrap_err();
        buffer.push(h(1), vec![7]);
        buffer.push(h(3), vec![3]);
        assert_eq!(buffer.pending_len(), 3);

        let batch = std::mem::take(&mut *buffer.pending.lock()).into_batch();
        assert_eq!(batch, vec![(h(1), vec![7]), (h(2), vec![2]), (h(3), vec![3])]);
    }

    #[tokio::test]
    async fn storage_errors_reach_the_cache_flush_unchanged() {
        use crate::cache::{CacheOptions, CachedCoinView};
        use coinview_core::params::ChainParams;

        let (backend, _dir) = temp_backend();
        let buffer = Arc::new(AuxRecordBuffer::new(backend.clone()));
        let cache = CachedCoinView::start(
            backend.clone(),
            CacheOptions::new(&ChainParams::custom(h(0xEE))).with_aux_store(buffer.clone()),
        )
        .await
        .unwrap();
        buffer.push(h(1), vec![1]);
        backend.close().await.unwrap();

        let err = cache.flush(true).await.unwrap_err();
        assert!(matches!(err, CoinViewError::WorkerStopped(_)));
        assert_eq!(buffer.pending_len(), 1);
    }
}
