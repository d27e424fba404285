//! Error types for coin views.
use thiserror::Error;

use crate::types::Hash256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoinViewError {
    #[error("stale tip: view is at {expected}, writer assumed {got}")] StaleTip { expected: Hash256, got: Hash256 },
    #[error("rewind not supported by {0}")] RewindNotSupported(&'static str),
    #[error("undo log is empty at tip {tip}")] UndoLogEmpty { tip: Hash256 },
    #[error("original outputs misaligned: {outputs} outputs, {originals} originals")] MisalignedOriginals { outputs: usize, originals: usize },
    #[error("worker stopped: {0}")] WorkerStopped(&'static str),
    #[error("auxiliary store: {0}")] Aux(String),
    #[error("storage: {0}")] Storage(String),
}

pub type CoinViewResult<T> = Result<T, CoinViewError>;
