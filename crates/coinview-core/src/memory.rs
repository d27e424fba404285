//! In-memory coin view for tests.
//!
//! [`MemoryCoinView`] applies saves linearly and keeps no undo data, so
//! [`rewind`](CoinView::rewind) fails with
//! [`CoinViewError::RewindNotSupported`]. Use the durable backend wherever
//! rewinds matter.

use std::any::Any;
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::CoinViewError;
use crate::traits::{CoinView, FetchResult};
use crate::types::{Hash256, OutputSlots, TxId, UnspentOutputs};

struct MemoryState {
    coins: HashMap<TxId, UnspentOutputs>,
    tip: Hash256,
}

/// Linear-append coin view stored in a `HashMap`.
pub struct MemoryCoinView {
    state: Mutex<MemoryState>,
}

impl MemoryCoinView {
    /// Create an empty view at `tip`.
    pub fn new(tip: Hash256) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                coins: HashMap::new(),
                tip,
            }),
        }
    }

    /// Number of stored (non-prunable) records.
    pub fn len(&self) -> usize {
        self.state.lock().coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().coins.is_empty()
    }
}

#[async_trait]
impl CoinView for MemoryCoinView {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn fetch(&self, ids: &[TxId]) -> Result<FetchResult, CoinViewError> {
        let state = self.state.lock();
        let outputs = ids.iter().map(|id| state.coins.get(id).cloned()).collect();
        Ok(FetchResult::new(outputs, state.tip))
    }

    async fn save(
        &self,
        new_outputs: &[UnspentOutputs],
        _original_outputs: Option<&[Option<OutputSlots>]>,
        old_tip: Hash256,
        new_tip: Hash256,
    ) -> Result<(), CoinViewError> {
        let mut state = self.state.lock();
        if state.tip != old_tip {
            return Err(CoinViewError::StaleTip {
                expected: state.tip,
                got: old_tip,
            });
        }

        state.tip = new_tip;
        for coins in new_outputs {
            if coins.is_prunable() {
                state.coins.remove(&coins.txid);
            } else {
                state.coins.insert(coins.txid, coins.clone());
            }
        }
        Ok(())
    }

    async fn rewind(&self) -> Result<Hash256, CoinViewError> {
        Err(CoinViewError::RewindNotSupported(self.name()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
