//! Coin set model: hashes, outputs, and per-transaction unspent state.
//!
//! An [`UnspentOutputs`] record holds every output a transaction created, in
//! index order, with spent outputs replaced by `None`. Records are plain
//! values: cloning one is a deep copy, so a caller can mutate what it got
//! back from a view without affecting the view.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoinViewError;

/// A 32-byte hash value.
///
/// Used for transaction ids and block hashes. Displayed in reversed byte
/// order, the convention block explorers and RPC interfaces use.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

/// A transaction id.
pub type TxId = Hash256;

impl Hash256 {
    /// The zero hash (32 zero bytes).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parse a 64-digit hex string in display (reversed) byte order at compile time.
    ///
    /// Intended for `const` items; malformed input fails const evaluation.
    pub const fn from_display_hex(hex: &str) -> Self {
        let digits = hex.as_bytes();
        assert!(digits.len() == 64, "hash hex must be 64 digits");
        let mut bytes = [0u8; 32];
        let mut i = 0;
        while i < 32 {
            let hi = hex_nibble(digits[2 * i]);
            let lo = hex_nibble(digits[2 * i + 1]);
            bytes[31 - i] = (hi << 4) | lo;
            i += 1;
        }
        Self(bytes)
    }
}

const fn hex_nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => panic!("invalid hex digit"),
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().rev() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Hash256 {
    type Err = hex::FromHexError;

    /// Parse a hash written in display (reversed) byte order.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        bytes.reverse();
        Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A transaction output: an amount and the script that locks it.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOut {
    /// Amount in the chain's smallest unit.
    pub value: u64,
    /// Spending script.
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    pub fn new(value: u64, script_pubkey: impl Into<Vec<u8>>) -> Self {
        Self {
            value,
            script_pubkey: script_pubkey.into(),
        }
    }
}

/// Output array of one transaction. `None` marks a spent output.
pub type OutputSlots = Vec<Option<TxOut>>;

/// Unspent-output state of a single transaction.
///
/// The output array has a fixed length equal to the transaction's output
/// count; spending an output sets its slot to `None` and never shortens
/// the array.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct UnspentOutputs {
    /// Id of the transaction that created these outputs.
    pub txid: TxId,
    /// Transaction version.
    pub version: u32,
    /// Height of the block that included the transaction.
    pub height: u32,
    /// Whether the transaction is a coinbase.
    pub is_coinbase: bool,
    /// Whether the transaction is a coinstake (proof-of-stake chains).
    pub is_coinstake: bool,
    /// Transaction timestamp, zero on chains without one.
    pub time: u32,
    outputs: OutputSlots,
}

impl UnspentOutputs {
    /// Create a record with every output unspent.
    pub fn new(txid: TxId, height: u32, outputs: Vec<TxOut>) -> Self {
        Self::from_slots(txid, height, outputs.into_iter().map(Some).collect())
    }

    /// Create a record from an explicit output array.
    pub fn from_slots(txid: TxId, height: u32, outputs: OutputSlots) -> Self {
        Self {
            txid,
            version: 1,
            height,
            is_coinbase: false,
            is_coinstake: false,
            time: 0,
            outputs,
        }
    }

    /// Mark the record as coming from a coinbase transaction.
    pub fn coinbase(mut self) -> Self {
        self.is_coinbase = true;
        self
    }

    /// Mark the record as coming from a coinstake transaction.
    pub fn coinstake(mut self) -> Self {
        self.is_coinstake = true;
        self
    }

    /// The output array, spent slots included.
    pub fn outputs(&self) -> &[Option<TxOut>] {
        &self.outputs
    }

    /// Copy of the output array.
    pub fn snapshot_outputs(&self) -> OutputSlots {
        self.outputs.clone()
    }

    /// Same transaction metadata with a different output array.
    pub fn with_outputs(&self, outputs: OutputSlots) -> Self {
        Self {
            outputs,
            ..self.clone()
        }
    }

    /// Replace the output array.
    pub fn set_outputs(&mut self, outputs: OutputSlots) {
        self.outputs = outputs;
    }

    /// Unspent output at `index`, if any.
    pub fn output(&self, index: usize) -> Option<&TxOut> {
        self.outputs.get(index).and_then(Option::as_ref)
    }

    /// Number of output slots, spent or not.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// No output has been spent.
    pub fn is_full(&self) -> bool {
        self.outputs.iter().all(Option::is_some)
    }

    /// Every output has been spent; the record can be forgotten.
    pub fn is_prunable(&self) -> bool {
        self.outputs.iter().all(Option::is_none)
    }

    /// Number of outputs still unspent.
    pub fn unspent_count(&self) -> usize {
        self.outputs.iter().filter(|o| o.is_some()).count()
    }

    /// Sum of all unspent output values. Returns `None` on overflow.
    pub fn unspent_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .flatten()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Spend the output at `index`, returning it if it was unspent.
    pub fn spend_output(&mut self, index: usize) -> Option<TxOut> {
        self.outputs.get_mut(index).and_then(Option::take)
    }

    /// Apply `other`'s spent slots onto this record.
    ///
    /// Every index that is spent in `other` becomes spent here. Slots spent
    /// here are never re-created.
    pub fn spend(&mut self, other: &UnspentOutputs) {
        for (slot, theirs) in self.outputs.iter_mut().zip(other.outputs.iter()) {
            if theirs.is_none() {
                *slot = None;
            }
        }
    }

    /// Encode for storage.
    pub fn encode(&self) -> Result<Vec<u8>, CoinViewError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CoinViewError::Storage(e.to_string()))
    }

    /// Decode a record produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self, CoinViewError> {
        let (coins, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CoinViewError::Storage(e.to_string()))?;
        Ok(coins)
    }
}
