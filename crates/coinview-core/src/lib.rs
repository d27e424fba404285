//! # coinview-core
//! Coin set model, undo log and the coin view contract.
//!
//! - [`types`] — [`Hash256`], [`TxOut`], [`UnspentOutputs`]
//! - [`undo`] — per-block [`UndoEntry`] records
//! - [`traits`] — the [`CoinView`] contract and [`AuxiliaryStore`]
//! - [`stack`] — [`CoinViewStack`] for walking wrapped views
//! - [`memory`] — [`MemoryCoinView`], a linear-append view for tests
//! - [`params`] — per-network [`ChainParams`]

pub mod error;
pub mod memory;
pub mod params;
pub mod stack;
pub mod traits;
pub mod types;
pub mod undo;

pub use error::{CoinViewError, CoinViewResult};
pub use memory::MemoryCoinView;
pub use params::{ChainParams, NetworkKind};
pub use stack::CoinViewStack;
pub use traits::{rewind_blocks, AuxiliaryStore, CoinView, FetchResult};
pub use types::{Hash256, OutputSlots, TxId, TxOut, UnspentOutputs};
pub use undo::UndoEntry;
