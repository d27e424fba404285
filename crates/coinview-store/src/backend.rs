//! Durable coin view served by a single database worker.
//!
//! [`RocksCoinView`] is a cheap handle: every method sends a [`Command`]
//! over an unbounded channel to a dedicated OS thread that owns the
//! [`CoinDb`] and answers on a oneshot channel. Operations are therefore
//! applied one at a time, in submission order, and RocksDB's blocking I/O
//! never runs on the async runtime.

use std::any::Any;
use std::path::Path;
use std::thread;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use coinview_core::error::CoinViewError;
use coinview_core::traits::{CoinView, FetchResult};
use coinview_core::types::{Hash256, OutputSlots, TxId, UnspentOutputs};

use crate::storage::{BackendOptions, CoinDb};

const WORKER: &str = "coin database worker";

type Reply<T> = oneshot::Sender<Result<T, CoinViewError>>;

/// Commands sent from [`RocksCoinView`] to the database worker.
enum Command {
    Fetch {
        ids: Vec<TxId>,
        reply: Reply<FetchResult>,
    },
    Save {
        outputs: Vec<UnspentOutputs>,
        originals: Option<Vec<Option<OutputSlots>>>,
        old_tip: Hash256,
        new_tip: Hash256,
        reply: Reply<()>,
    },
    Rewind {
        reply: Reply<Hash256>,
    },
    PutAux {
        records: Vec<(Hash256, Vec<u8>)>,
        reply: Reply<()>,
    },
    GetAux {
        ids: Vec<Hash256>,
        reply: Reply<Vec<Option<Vec<u8>>>>,
    },
    CoinCount {
        reply: Reply<u64>,
    },
    EstimatedCoinCount {
        reply: Reply<u64>,
    },
    UndoDepth {
        reply: Reply<u64>,
    },
    /// Flush and release the database, then stop the worker.
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the durable coin view.
///
/// Created via [`RocksCoinView::open`]. Dropping every handle stops the
/// worker once queued commands have drained; [`close`](Self::close) does the
/// same but waits until the database files are released.
pub struct RocksCoinView {
    command_tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for RocksCoinView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksCoinView")
            .field("running", &!self.command_tx.is_closed())
            .finish()
    }
}

impl RocksCoinView {
    /// Open the database at `path` and start its worker thread.
    pub fn open(path: impl AsRef<Path>, options: BackendOptions) -> Result<Self, CoinViewError> {
        let db = CoinDb::open(path, options)?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        thread::Builder::new()
            .name("coinview-db".into())
            .spawn(move || worker_loop(db, command_rx))
            .map_err(|e| CoinViewError::Storage(format!("failed to spawn database worker: {e}")))?;

        Ok(Self { command_tx })
    }

    /// Write opaque auxiliary records.
    pub async fn put_aux(&self, records: Vec<(Hash256, Vec<u8>)>) -> Result<(), CoinViewError> {
        self.request(|reply| Command::PutAux { records, reply }).await
    }

    /// Read auxiliary records, aligned with `ids`.
    pub async fn get_aux(&self, ids: Vec<Hash256>) -> Result<Vec<Option<Vec<u8>>>, CoinViewError> {
        self.request(|reply| Command::GetAux { ids, reply }).await
    }

    /// Number of stored coin records.
    pub async fn coin_count(&self) -> Result<u64, CoinViewError> {
        self.request(|reply| Command::CoinCount { reply }).await
    }

    /// RocksDB's estimate of the coin record count; no table scan.
    pub async fn estimated_coin_count(&self) -> Result<u64, CoinViewError> {
        self.request(|reply| Command::EstimatedCoinCount { reply }).await
    }

    /// Number of blocks that can be rewound.
    pub async fn undo_depth(&self) -> Result<u64, CoinViewError> {
        self.request(|reply| Command::UndoDepth { reply }).await
    }

    /// Finish queued work, flush and release the database.
    ///
    /// Later calls on any handle fail with [`CoinViewError::WorkerStopped`].
    pub async fn close(&self) -> Result<(), CoinViewError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Close { reply })
            .map_err(|_| CoinViewError::WorkerStopped(WORKER))?;
        rx.await.map_err(|_| CoinViewError::WorkerStopped(WORKER))
    }

    /// Whether the worker is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.command_tx.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, CoinViewError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(build(reply))
            .map_err(|_| CoinViewError::WorkerStopped(WORKER))?;
        rx.await.map_err(|_| CoinViewError::WorkerStopped(WORKER))?
    }
}

#[async_trait]
impl CoinView for RocksCoinView {
    fn name(&self) -> &'static str {
        "rocksdb"
    }

    async fn fetch(&self, ids: &[TxId]) -> Result<FetchResult, CoinViewError> {
        let ids = ids.to_vec();
        self.request(|reply| Command::Fetch { ids, reply }).await
    }

    async fn save(
        &self,
        new_outputs: &[UnspentOutputs],
        original_outputs: Option<&[Option<OutputSlots>]>,
        old_tip: Hash256,
        new_tip: Hash256,
    ) -> Result<(), CoinViewError> {
        let outputs = new_outputs.to_vec();
        let originals = original_outputs.map(|o| o.to_vec());
        self.request(|reply| Command::Save {
            outputs,
            originals,
            old_tip,
            new_tip,
            reply,
        })
        .await
    }

    async fn rewind(&self) -> Result<Hash256, CoinViewError> {
        self.request(|reply| Command::Rewind { reply }).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Worker thread body: apply commands one at a time until the channel
/// closes or a `Close` arrives.
fn worker_loop(db: CoinDb, mut command_rx: mpsc::UnboundedReceiver<Command>) {
    debug!("coin database worker started");

    while let Some(cmd) = command_rx.blocking_recv() {
        match cmd {
            Command::Fetch { ids, reply } => {
                let _ = reply.send(db.fetch(&ids));
            }
            Command::Save {
                outputs,
                originals,
                old_tip,
                new_tip,
                reply,
            } => {
                let _ = reply.send(db.save(outputs, originals, old_tip, new_tip));
            }
            Command::Rewind { reply } => {
                let _ = reply.send(db.rewind());
            }
            Command::PutAux { records, reply } => {
                let _ = reply.send(db.put_aux(&records));
            }
            Command::GetAux { ids, reply } => {
                let _ = reply.send(db.get_aux(&ids));
            }
            Command::CoinCount { reply } => {
                let _ = reply.send(db.coin_count());
            }
            Command::EstimatedCoinCount { reply } => {
                let _ = reply.send(db.estimated_coin_count());
            }
            Command::UndoDepth { reply } => {
                let _ = reply.send(db.undo_depth());
            }
            Command::Close { reply } => {
                if let Err(e) = db.flush() {
                    error!(error = %e, "failed to flush coin database on close");
                }
                command_rx.close();
                drop(db);
                info!("coin database closed");
                let _ = reply.send(());
                return;
            }
        }
    }

    debug!("coin database worker stopped");
}
