//! RocksDB-backed durable coin storage.
//!
//! [`CoinDb`] keeps four column families: coins (txid → encoded
//! [`UnspentOutputs`], non-prunable records only), metadata (the tip
//! pointer), the undo log (big-endian sequence number → encoded
//! [`UndoEntry`]) and an opaque auxiliary side table. Every mutation is a
//! single atomic [`WriteBatch`], so the tip never points at a half-applied
//! block.
//!
//! `CoinDb` is not meant to be shared: the [`RocksCoinView`] worker owns it
//! and runs its operations one at a time.
//!
//! [`RocksCoinView`]: crate::backend::RocksCoinView

use std::path::Path;

use rocksdb::{BlockBasedOptions, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info, warn};

use coinview_core::error::CoinViewError;
use coinview_core::traits::FetchResult;
use coinview_core::types::{Hash256, OutputSlots, TxId, UnspentOutputs};
use coinview_core::undo::UndoEntry;

// --- Column family names ---

const CF_COINS: &str = "coins";
const CF_METADATA: &str = "metadata";
const CF_UNDO: &str = "undo";
const CF_AUX: &str = "aux";

/// All column family names.
const ALL_CFS: &[&str] = &[CF_COINS, CF_METADATA, CF_UNDO, CF_AUX];

// --- Metadata keys ---

const META_TIP_HASH: &[u8] = b"tip_hash";

// --- Coin key range ---

const COIN_KEY_FIRST: [u8; 32] = [0x00; 32];
/// Sorts after every 32-byte key.
const COIN_KEY_END: [u8; 33] = [0xFF; 33];

/// Options fixed for the lifetime of an open [`CoinDb`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOptions {
    /// Tip of a freshly created database.
    pub genesis_hash: Hash256,
    /// Reset to genesis instead of failing when rewinding with an empty undo log.
    pub genesis_fallback: bool,
}

impl BackendOptions {
    pub fn new(genesis_hash: Hash256) -> Self {
        Self {
            genesis_hash,
            genesis_fallback: false,
        }
    }
}

fn db_err(e: rocksdb::Error) -> CoinViewError {
    CoinViewError::Storage(e.to_string())
}

/// Durable coin set, tip pointer, undo log and auxiliary side table.
pub struct CoinDb {
    db: DB,
    options: BackendOptions,
}

impl CoinDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all column families if they don't exist. A database without
    /// a tip is initialised to the genesis hash.
    pub fn open(path: impl AsRef<Path>, options: BackendOptions) -> Result<Self, CoinViewError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| {
                let mut opts = Options::default();
                // Point lookups dominate the coins table.
                if *name == CF_COINS {
                    let mut block_opts = BlockBasedOptions::default();
                    block_opts.set_bloom_filter(10.0, false);
                    opts.set_block_based_table_factory(&block_opts);
                }
                ColumnFamilyDescriptor::new(*name, opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors).map_err(db_err)?;
        let store = Self { db, options };

        match store.read_tip()? {
            Some(tip) => {
                info!(%tip, path = %path.as_ref().display(), "opened coin database");
            }
            None => {
                let cf_meta = store.cf_handle(CF_METADATA)?;
                store
                    .db
                    .put_cf(cf_meta, META_TIP_HASH, store.options.genesis_hash.as_bytes())
                    .map_err(db_err)?;
                info!(
                    tip = %store.options.genesis_hash,
                    path = %path.as_ref().display(),
                    "created coin database at genesis"
                );
            }
        }

        Ok(store)
    }

    /// Current tip.
    pub fn tip(&self) -> Result<Hash256, CoinViewError> {
        self.read_tip()?
            .ok_or_else(|| CoinViewError::Storage("tip pointer missing".into()))
    }

    /// Look up each id in the coins table and read the tip.
    pub fn fetch(&self, ids: &[TxId]) -> Result<FetchResult, CoinViewError> {
        let tip = self.tip()?;
        let cf_coins = self.cf_handle(CF_COINS)?;

        let mut outputs = Vec::with_capacity(ids.len());
        for id in ids {
            let coins = match self.db.get_cf(cf_coins, id.as_bytes()).map_err(db_err)? {
                Some(bytes) => Some(UnspentOutputs::decode(&bytes)?),
                None => None,
            };
            outputs.push(coins);
        }

        Ok(FetchResult::new(outputs, tip))
    }

    /// Apply a block's coin changes and move the tip, in one atomic batch.
    ///
    /// Changes are written in txid order. When `originals` is given, an
    /// [`UndoEntry`] is appended to the undo log in the same batch.
    ///
    /// # Errors
    ///
    /// - [`CoinViewError::MisalignedOriginals`] if `originals` and `outputs` differ in length
    /// - [`CoinViewError::StaleTip`] if `old_tip` is not the stored tip
    pub fn save(
        &self,
        outputs: Vec<UnspentOutputs>,
        originals: Option<Vec<Option<OutputSlots>>>,
        old_tip: Hash256,
        new_tip: Hash256,
    ) -> Result<(), CoinViewError> {
        if let Some(originals) = &originals {
            if originals.len() != outputs.len() {
                return Err(CoinViewError::MisalignedOriginals {
                    outputs: outputs.len(),
                    originals: originals.len(),
                });
            }
        }

        let current = self.tip()?;
        if current != old_tip {
            return Err(CoinViewError::StaleTip {
                expected: current,
                got: old_tip,
            });
        }

        // Sort outputs (and their originals alongside) by txid.
        let track_undo = originals.is_some();
        let mut changes: Vec<(UnspentOutputs, Option<OutputSlots>)> = match originals {
            Some(originals) => outputs.into_iter().zip(originals).collect(),
            None => outputs.into_iter().map(|coins| (coins, None)).collect(),
        };
        changes.sort_by(|a, b| a.0.txid.cmp(&b.0.txid));
        let (outputs, originals): (Vec<UnspentOutputs>, Vec<Option<OutputSlots>>) =
            changes.into_iter().unzip();

        let cf_coins = self.cf_handle(CF_COINS)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;
        let cf_undo = self.cf_handle(CF_UNDO)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_meta, META_TIP_HASH, new_tip.as_bytes());

        let mut pruned = 0usize;
        for coins in &outputs {
            if coins.is_prunable() {
                batch.delete_cf(cf_coins, coins.txid.as_bytes());
                pruned += 1;
            } else {
                batch.put_cf(cf_coins, coins.txid.as_bytes(), coins.encode()?);
            }
        }

        let mut undo_seq = None;
        if track_undo {
            let entry = UndoEntry::from_changes(old_tip, &outputs, &originals)?;
            let seq = self.last_undo_seq()?.map_or(0, |seq| seq + 1);
            batch.put_cf(cf_undo, Self::undo_key(seq), entry.encode()?);
            undo_seq = Some(seq);
        }

        self.db.write(batch).map_err(db_err)?;

        debug!(
            %old_tip,
            %new_tip,
            count = outputs.len(),
            pruned,
            undo_seq,
            "saved coin changes"
        );
        Ok(())
    }

    /// Revert the newest undo entry and return the restored tip.
    ///
    /// With an empty undo log this fails with
    /// [`CoinViewError::UndoLogEmpty`], unless the database was opened with
    /// `genesis_fallback`, in which case every coin is deleted and the tip is
    /// reset to genesis.
    pub fn rewind(&self) -> Result<Hash256, CoinViewError> {
        let cf_undo = self.cf_handle(CF_UNDO)?;
        let newest = self
            .db
            .iterator_cf(cf_undo, IteratorMode::End)
            .next()
            .transpose()
            .map_err(db_err)?;

        let Some((key, value)) = newest else {
            return self.rewind_without_undo();
        };

        let seq = Self::decode_undo_key(&key)?;
        let entry = UndoEntry::decode(&value)?;

        let cf_coins = self.cf_handle(CF_COINS)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_meta, META_TIP_HASH, entry.previous_tip.as_bytes());

        for txid in &entry.txids_to_remove {
            batch.delete_cf(cf_coins, txid.as_bytes());
        }
        for coins in &entry.outputs_to_restore {
            if coins.is_prunable() {
                batch.delete_cf(cf_coins, coins.txid.as_bytes());
            } else {
                batch.put_cf(cf_coins, coins.txid.as_bytes(), coins.encode()?);
            }
        }
        batch.delete_cf(cf_undo, key);

        self.db.write(batch).map_err(db_err)?;

        info!(
            seq,
            tip = %entry.previous_tip,
            removed = entry.txids_to_remove.len(),
            restored = entry.outputs_to_restore.len(),
            "rewound coin database"
        );
        Ok(entry.previous_tip)
    }

    /// Write opaque auxiliary records keyed by id.
    pub fn put_aux(&self, records: &[(Hash256, Vec<u8>)]) -> Result<(), CoinViewError> {
        let cf_aux = self.cf_handle(CF_AUX)?;
        let mut batch = WriteBatch::default();
        for (id, blob) in records {
            batch.put_cf(cf_aux, id.as_bytes(), blob);
        }
        self.db.write(batch).map_err(db_err)
    }

    /// Read auxiliary records, one per id.
    pub fn get_aux(&self, ids: &[Hash256]) -> Result<Vec<Option<Vec<u8>>>, CoinViewError> {
        let cf_aux = self.cf_handle(CF_AUX)?;
        ids.iter()
            .map(|id| self.db.get_cf(cf_aux, id.as_bytes()).map_err(db_err))
            .collect()
    }

    /// Number of stored coin records. Scans the coins table.
    pub fn coin_count(&self) -> Result<u64, CoinViewError> {
        let cf = self.cf_handle(CF_COINS)?;
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item.map_err(db_err)?;
            count += 1;
        }
        Ok(count)
    }

    /// RocksDB's estimate of the coin record count, without a scan.
    pub fn estimated_coin_count(&self) -> Result<u64, CoinViewError> {
        let cf = self.cf_handle(CF_COINS)?;
        Ok(self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")
            .map_err(db_err)?
            .unwrap_or(0))
    }

    /// Number of blocks that can be rewound.
    ///
    /// Sequence numbers are contiguous: saves append after the newest entry
    /// and rewinds remove the newest entry.
    pub fn undo_depth(&self) -> Result<u64, CoinViewError> {
        match (self.first_undo_seq()?, self.last_undo_seq()?) {
            (Some(first), Some(last)) => Ok(last - first + 1),
            _ => Ok(0),
        }
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), CoinViewError> {
        self.db.flush().map_err(db_err)
    }

    // --- Internal helpers ---

    /// Rewind with no undo data: reset to genesis if allowed, fail otherwise.
    fn rewind_without_undo(&self) -> Result<Hash256, CoinViewError> {
        let tip = self.tip()?;
        if !self.options.genesis_fallback {
            return Err(CoinViewError::UndoLogEmpty { tip });
        }

        let cf_coins = self.cf_handle(CF_COINS)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        let cleared = self.estimated_coin_count()?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_meta, META_TIP_HASH, self.options.genesis_hash.as_bytes());
        // Every txid key is 32 bytes, so this range covers the whole table.
        batch.delete_range_cf(cf_coins, &COIN_KEY_FIRST[..], &COIN_KEY_END[..]);

        self.db.write(batch).map_err(db_err)?;

        warn!(
            %tip,
            genesis = %self.options.genesis_hash,
            cleared,
            "undo log empty; reset coin database to genesis"
        );
        Ok(self.options.genesis_hash)
    }

    fn read_tip(&self) -> Result<Option<Hash256>, CoinViewError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self.db.get_cf(cf, META_TIP_HASH).map_err(db_err)? {
            Some(bytes) => {
                let bytes: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| CoinViewError::Storage("invalid tip hash length".into()))?;
                Ok(Some(Hash256(bytes)))
            }
            None => Ok(None),
        }
    }

    fn last_undo_seq(&self) -> Result<Option<u64>, CoinViewError> {
        let cf_undo = self.cf_handle(CF_UNDO)?;
        match self.db.iterator_cf(cf_undo, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item.map_err(db_err)?;
                Ok(Some(Self::decode_undo_key(&key)?))
            }
            None => Ok(None),
        }
    }

    fn first_undo_seq(&self) -> Result<Option<u64>, CoinViewError> {
        let cf_undo = self.cf_handle(CF_UNDO)?;
        match self.db.iterator_cf(cf_undo, IteratorMode::Start).next() {
            Some(item) => {
                let (key, _) = item.map_err(db_err)?;
                Ok(Some(Self::decode_undo_key(&key)?))
            }
            None => Ok(None),
        }
    }

    /// Get a column family handle.
    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, CoinViewError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| CoinViewError::Storage(format!("missing column family: {name}")))
    }

    /// Encode an undo sequence number as big-endian bytes for ordered iteration.
    fn undo_key(seq: u64) -> [u8; 8] {
        seq.to_be_bytes()
    }

    fn decode_undo_key(key: &[u8]) -> Result<u64, CoinViewError> {
        let bytes: [u8; 8] = key
            .try_into()
            .map_err(|_| CoinViewError::Storage("invalid undo key length".into()))?;
        Ok(u64::from_be_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinview_core::types::TxOut;

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    const GENESIS: Hash256 = Hash256([0xEE; 32]);

    /// Create a temporary CoinDb.
    fn temp_db() -> (CoinDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = CoinDb::open(dir.path().join("coins"), BackendOptions::new(GENESIS)).unwrap();
        (db, dir)
    }

    fn h(seed: u8) -> Hash256 {
        Hash256([seed; 32])
    }

    fn coins(seed: u8, values: &[u64]) -> UnspentOutputs {
        UnspentOutputs::new(
            h(seed),
            1,
            values.iter().map(|v| TxOut::new(*v, vec![0x76, seed])).collect(),
        )
    }

    fn fetch_one(db: &CoinDb, txid: Hash256) -> Option<UnspentOutputs> {
        db.fetch(&[txid]).unwrap().outputs.remove(0)
    }

    // ------------------------------------------------------------------
    // Open
    // ------------------------------------------------------------------

    #[test]
    fn open_initialises_tip_to_genesis() {
        let (db, _dir) = temp_db();
        assert_eq!(db.tip().unwrap(), GENESIS);
        assert_eq!(db.coin_count().unwrap(), 0);
        assert_eq!(db.undo_depth().unwrap(), 0);
    }

    #[test]
    fn fetch_empty_reads_tip() {
        let (db, _dir) = temp_db();
        let result = db.fetch(&[]).unwrap();
        assert!(result.outputs.is_empty());
        assert_eq!(result.tip, GENESIS);
    }

    #[test]
    fn reopen_keeps_tip_and_coins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coins");
        {
            let db = CoinDb::open(&path, BackendOptions::new(GENESIS)).unwrap();
            db.save(vec![coins(1, &[5])], None, GENESIS, h(10)).unwrap();
        }
        // A different genesis must not overwrite an existing tip.
        let db = CoinDb::open(&path, BackendOptions::new(h(0x99))).unwrap();
        assert_eq!(db.tip().unwrap(), h(10));
        assert_eq!(fetch_one(&db, h(1)), Some(coins(1, &[5])));
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    #[test]
    fn save_then_fetch_roundtrip() {
        let (db, _dir) = temp_db();
        db.save(vec![coins(1, &[5, 3])], None, GENESIS, h(10)).unwrap();

        let result = db.fetch(&[h(1), h(2)]).unwrap();
        assert_eq!(result.outputs, vec![Some(coins(1, &[5, 3])), None]);
        assert_eq!(result.tip, h(10));
    }

    #[test]
    fn save_rejects_stale_tip_without_effect() {
        let (db, _dir) = temp_db();
        db.save(vec![coins(1, &[5])], None, GENESIS, h(10)).unwrap();

        let err = db
            .save(vec![coins(2, &[7])], Some(vec![None]), GENESIS, h(11))
            .unwrap_err();
        assert_eq!(
            err,
            CoinViewError::StaleTip {
                expected: h(10),
                got: GENESIS
            }
        );
        assert_eq!(db.tip().unwrap(), h(10));
        assert_eq!(fetch_one(&db, h(2)), None);
        assert_eq!(db.undo_depth().unwrap(), 0);
    }

    #[test]
    fn save_rejects_misaligned_originals() {
        let (db, _dir) = temp_db();
        let err = db
            .save(vec![coins(1, &[5]), coins(2, &[6])], Some(vec![None]), GENESIS, h(10))
            .unwrap_err();
        assert!(matches!(err, CoinViewError::MisalignedOriginals { outputs: 2, originals: 1 }));
        assert_eq!(db.tip().unwrap(), GENESIS);
    }

    #[test]
    fn prunable_record_leaves_no_row() {
        let (db, _dir) = temp_db();
        db.save(vec![coins(1, &[5])], None, GENESIS, h(10)).unwrap();

        let mut spent = coins(1, &[5]);
        spent.spend_output(0);
        db.save(vec![spent], None, h(10), h(11)).unwrap();

        assert_eq!(fetch_one(&db, h(1)), None);
        assert_eq!(db.coin_count().unwrap(), 0);
    }

    #[test]
    fn save_without_originals_writes_no_undo() {
        let (db, _dir) = temp_db();
        db.save(vec![coins(1, &[5])], None, GENESIS, h(10)).unwrap();
        assert_eq!(db.undo_depth().unwrap(), 0);
    }

    #[test]
    fn undo_sequence_increases() {
        let (db, _dir) = temp_db();
        db.save(vec![coins(1, &[5])], Some(vec![None]), GENESIS, h(10)).unwrap();
        db.save(vec![coins(2, &[6])], Some(vec![None]), h(10), h(11)).unwrap();
        db.save(vec![], Some(vec![]), h(11), h(12)).unwrap();
        assert_eq!(db.undo_depth().unwrap(), 3);
        assert_eq!(db.last_undo_seq().unwrap(), Some(2));
    }

    // ------------------------------------------------------------------
    // Rewind
    // ------------------------------------------------------------------

    #[test]
    fn rewind_restores_spent_outputs() {
        let (db, _dir) = temp_db();
        let tx1 = coins(1, &[5, 5, 5, 5, 5]);
        db.save(vec![tx1.clone()], Some(vec![None]), GENESIS, h(10)).unwrap();

        let mut spent = tx1.clone();
        for i in 0..5 {
            spent.spend_output(i);
        }
        db.save(vec![spent], Some(vec![Some(tx1.snapshot_outputs())]), h(10), h(11))
            .unwrap();
        assert_eq!(fetch_one(&db, h(1)), None);
        assert_eq!(db.tip().unwrap(), h(11));

        assert_eq!(db.rewind().unwrap(), h(10));
        assert_eq!(fetch_one(&db, h(1)), Some(tx1));
        assert_eq!(db.tip().unwrap(), h(10));
    }

    #[test]
    fn rewind_removes_created_transactions() {
        let (db, _dir) = temp_db();
        db.save(vec![coins(1, &[5])], Some(vec![None]), GENESIS, h(10)).unwrap();

        assert_eq!(db.rewind().unwrap(), GENESIS);
        assert_eq!(fetch_one(&db, h(1)), None);
        assert_eq!(db.undo_depth().unwrap(), 0);
    }

    #[test]
    fn rewind_consumes_newest_entry_first() {
        let (db, _dir) = temp_db();
        db.save(vec![coins(1, &[5])], Some(vec![None]), GENESIS, h(10)).unwrap();
        db.save(vec![coins(2, &[6])], Some(vec![None]), h(10), h(11)).unwrap();

        assert_eq!(db.rewind().unwrap(), h(10));
        assert!(fetch_one(&db, h(1)).is_some());
        assert!(fetch_one(&db, h(2)).is_none());

        assert_eq!(db.rewind().unwrap(), GENESIS);
        assert!(fetch_one(&db, h(1)).is_none());
    }

    #[test]
    fn rewind_empty_log_errors_by_default() {
        let (db, _dir) = temp_db();
        db.save(vec![coins(1, &[5])], None, GENESIS, h(10)).unwrap();

        let err = db.rewind().unwrap_err();
        assert_eq!(err, CoinViewError::UndoLogEmpty { tip: h(10) });
        assert_eq!(db.tip().unwrap(), h(10));
        assert!(fetch_one(&db, h(1)).is_some());
    }

    #[test]
    fn rewind_empty_log_resets_to_genesis_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let options = BackendOptions {
            genesis_hash: GENESIS,
            genesis_fallback: true,
        };
        let db = CoinDb::open(dir.path(), options).unwrap();
        db.save(vec![coins(1, &[5]), coins(2, &[6])], None, GENESIS, h(10)).unwrap();

        assert_eq!(db.rewind().unwrap(), GENESIS);
        assert_eq!(db.tip().unwrap(), GENESIS);
        assert_eq!(db.coin_count().unwrap(), 0);
        assert!(fetch_one(&db, h(1)).is_none());
        assert!(fetch_one(&db, h(2)).is_none());
    }

    #[test]
    fn genesis_reset_clears_extreme_keys_and_keeps_aux() {
        let dir = tempfile::tempdir().unwrap();
        let options = BackendOptions {
            genesis_hash: GENESIS,
            genesis_fallback: true,
        };
        let db = CoinDb::open(dir.path(), options).unwrap();
        db.save(vec![coins(0x00, &[1]), coins(0xFF, &[2])], None, GENESIS, h(10)).unwrap();
        db.put_aux(&[(h(0x00), vec![7])]).unwrap();

        db.rewind().unwrap();
        assert!(fetch_one(&db, h(0x00)).is_none());
        assert!(fetch_one(&db, h(0xFF)).is_none());
        assert_eq!(db.coin_count().unwrap(), 0);
        assert_eq!(db.get_aux(&[h(0x00)]).unwrap(), vec![Some(vec![7])]);

        // New coins land normally after the reset.
        db.save(vec![coins(3, &[4])], None, GENESIS, h(11)).unwrap();
        assert_eq!(db.coin_count().unwrap(), 1);
    }

    #[test]
    fn undo_depth_tracks_saves_and_rewinds() {
        let (db, _dir) = temp_db();
        let mut tip = GENESIS;
        for i in 1..=4u8 {
            db.save(vec![coins(i, &[i as u64])], Some(vec![None]), tip, h(10 + i)).unwrap();
            tip = h(10 + i);
        }
        assert_eq!(db.undo_depth().unwrap(), 4);
        db.rewind().unwrap();
        db.rewind().unwrap();
        assert_eq!(db.undo_depth().unwrap(), 2);
        db.save(vec![coins(9, &[9])], Some(vec![None]), h(12), h(20)).unwrap();
        assert_eq!(db.undo_depth().unwrap(), 3);
    }

    #[test]
    fn estimated_coin_count_after_flush() {
        let (db, _dir) = temp_db();
        db.save(vec![coins(1, &[1]), coins(2, &[2]), coins(3, &[3])], None, GENESIS, h(10))
            .unwrap();
        db.flush().unwrap();
        assert!(db.estimated_coin_count().unwrap() > 0);
    }

    #[test]
    fn undo_is_independent_of_input_order() {
        let (a, _dir_a) = temp_db();
        let (b, _dir_b) = temp_db();
        let x = coins(1, &[1]);
        let y = coins(2, &[2]);

        a.save(vec![x.clone(), y.clone()], Some(vec![None, None]), GENESIS, h(10)).unwrap();
        b.save(vec![y, x], Some(vec![None, None]), GENESIS, h(10)).unwrap();

        let cf_a = a.cf_handle(CF_UNDO).unwrap();
        let cf_b = b.cf_handle(CF_UNDO).unwrap();
        let undo_a = a.db.get_cf(cf_a, CoinDb::undo_key(0)).unwrap().unwrap();
        let undo_b = b.db.get_cf(cf_b, CoinDb::undo_key(0)).unwrap().unwrap();
        assert_eq!(undo_a, undo_b);
    }

    // ------------------------------------------------------------------
    // Auxiliary side table
    // ------------------------------------------------------------------

    #[test]
    fn aux_records_roundtrip() {
        let (db, _dir) = temp_db();
        db.put_aux(&[(h(1), vec![1, 2, 3]), (h(2), vec![])]).unwrap();

        let blobs = db.get_aux(&[h(1), h(2), h(3)]).unwrap();
        assert_eq!(blobs, vec![Some(vec![1, 2, 3]), Some(vec![]), None]);
    }

    #[test]
    fn aux_records_do_not_touch_tip() {
        let (db, _dir) = temp_db();
        db.put_aux(&[(h(1), vec![9])]).unwrap();
        assert_eq!(db.tip().unwrap(), GENESIS);
        assert_eq!(db.coin_count().unwrap(), 0);
    }

    #[test]
    fn flush_succeeds() {
        let (db, _dir) = temp_db();
        db.save(vec![coins(1, &[5])], None, GENESIS, h(10)).unwrap();
        db.flush().unwrap();
    }
}
