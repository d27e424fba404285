//! Undo log records for rewinding applied blocks.
//!
//! One [`UndoEntry`] is written per saved block. Rewinding that block
//! deletes the transactions it created and restores the output arrays of
//! the transactions it modified, then moves the tip back to
//! [`UndoEntry::previous_tip`].

use serde::{Deserialize, Serialize};

use crate::error::CoinViewError;
use crate::types::{Hash256, OutputSlots, TxId, UnspentOutputs};

/// Undo data for one applied block.
#[derive(
    Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct UndoEntry {
    /// Tip the view had before the block was applied.
    pub previous_tip: Hash256,
    /// Transactions that did not exist before the block.
    pub txids_to_remove: Vec<TxId>,
    /// Pre-block state of transactions the block modified.
    pub outputs_to_restore: Vec<UnspentOutputs>,
}

impl UndoEntry {
    /// Create an empty entry rewinding to `previous_tip`.
    pub fn new(previous_tip: Hash256) -> Self {
        Self {
            previous_tip,
            ..Self::default()
        }
    }

    /// Build the entry for a batch of changes.
    ///
    /// `originals` is aligned with `outputs` by position: `None` means the
    /// transaction did not exist before the block, `Some(slots)` is its
    /// output array before the block.
    pub fn from_changes(
        previous_tip: Hash256,
        outputs: &[UnspentOutputs],
        originals: &[Option<OutputSlots>],
    ) -> Result<Self, CoinViewError> {
        if outputs.len() != originals.len() {
            return Err(CoinViewError::MisalignedOriginals {
                outputs: outputs.len(),
                originals: originals.len(),
            });
        }

        let mut entry = Self::new(previous_tip);
        for (coins, original) in outputs.iter().zip(originals) {
            match original {
                None => entry.record_created(coins.txid),
                Some(slots) => entry.record_modified(coins.with_outputs(slots.clone())),
            }
        }
        Ok(entry)
    }

    /// Record a transaction created by the block.
    pub fn record_created(&mut self, txid: TxId) {
        self.txids_to_remove.push(txid);
    }

    /// Record the pre-block state of a modified transaction.
    pub fn record_modified(&mut self, original: UnspentOutputs) {
        self.outputs_to_restore.push(original);
    }

    /// Whether rewinding this entry changes no coins.
    pub fn is_empty(&self) -> bool {
        self.txids_to_remove.is_empty() && self.outputs_to_restore.is_empty()
    }

    /// Encode for storage.
    pub fn encode(&self) -> Result<Vec<u8>, CoinViewError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CoinViewError::Storage(e.to_string()))
    }

    /// Decode an entry produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self, CoinViewError> {
        let (entry, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CoinViewError::Storage(e.to_string()))?;
        Ok(entry)
    }
}
