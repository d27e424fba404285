//! Trait interfaces for coin views.
//!
//! - [`CoinView`] — fetch / save / rewind over the UTXO set at a chain tip.
//!   Implemented by the durable backend, the write-back cache and the
//!   in-memory view.
//! - [`AuxiliaryStore`] — a collaborator store the cache flushes before its
//!   own coin data, so the collaborator's on-disk state is never ahead of the
//!   coins it refers to.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoinViewError;
use crate::types::{Hash256, OutputSlots, TxId, UnspentOutputs};

/// Result of a [`CoinView::fetch`].
///
/// `outputs` is aligned with the requested ids: `None` for a transaction
/// the view does not know or that is fully spent.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FetchResult {
    /// One entry per requested id, in request order.
    pub outputs: Vec<Option<UnspentOutputs>>,
    /// Tip of the view at the time of the read.
    pub tip: Hash256,
}

impl FetchResult {
    pub fn new(outputs: Vec<Option<UnspentOutputs>>, tip: Hash256) -> Self {
        Self { outputs, tip }
    }

    /// Number of entries (equals the number of requested ids).
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// A view of the UTXO set as of a specific chain tip.
///
/// Every mutation is guarded by the tip: [`save`](CoinView::save) is only
/// accepted from a writer that knows the view's current tip. Records handed
/// out by [`fetch`](CoinView::fetch) are copies.
#[async_trait]
pub trait CoinView: Send + Sync + 'static {
    /// Short name of the layer, for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Look up the unspent outputs of each id, plus the current tip.
    ///
    /// An empty `ids` slice still reads the tip.
    async fn fetch(&self, ids: &[TxId]) -> Result<FetchResult, CoinViewError>;

    /// Atomically apply a block's coin changes and move the tip from
    /// `old_tip` to `new_tip`.
    ///
    /// `original_outputs`, when given, is aligned with `new_outputs` and
    /// holds each transaction's output array before the block (`None` if it
    /// did not exist). It is only used to build undo data.
    ///
    /// # Errors
    ///
    /// - [`CoinViewError::StaleTip`] if `old_tip` is not the current tip;
    ///   nothing is applied.
    async fn save(
        &self,
        new_outputs: &[UnspentOutputs],
        original_outputs: Option<&[Option<OutputSlots>]>,
        old_tip: Hash256,
        new_tip: Hash256,
    ) -> Result<(), CoinViewError>;

    /// Revert the most recently applied block and return the resulting tip.
    async fn rewind(&self) -> Result<Hash256, CoinViewError>;

    /// Current tip.
    ///
    /// Default implementation: `fetch(&[])`.
    async fn tip(&self) -> Result<Hash256, CoinViewError> {
        Ok(self.fetch(&[]).await?.tip)
    }

    /// The view this layer wraps, if any.
    ///
    /// Default implementation returns `None` (a bottom layer).
    fn inner(&self) -> Option<&Arc<dyn CoinView>> {
        None
    }

    /// Downcast support for [`CoinViewStack::find`](crate::stack::CoinViewStack::find).
    fn as_any(&self) -> &dyn Any;
}

/// A store whose persisted state refers to coin data and must therefore be
/// flushed no later than the coins themselves.
#[async_trait]
pub trait AuxiliaryStore: Send + Sync {
    /// Persist buffered state. A non-forced flush may decide there is
    /// nothing worth writing yet.
    async fn flush(&self, force: bool) -> Result<(), CoinViewError>;
}

/// Rewind `count` blocks, returning the tip reached after each step.
pub async fn rewind_blocks(
    view: &dyn CoinView,
    count: usize,
) -> Result<Vec<Hash256>, CoinViewError> {
    let mut tips = Vec::with_capacity(count);
    for step in 0..count {
        let tip = view.rewind().await?;
        debug!(view = view.name(), step, %tip, "rewound block");
        tips.push(tip);
    }
    Ok(tips)
}
