//! Block structure, digest recomputation, and proof-of-work mining

use crate::error::ChainError;
use crate::transaction::Transaction;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};

/// Nonce attempts between cancellation checks.
const CANCEL_POLL_INTERVAL: u64 = 4096;

/// An ordered batch of transactions with a header linking to the previous
/// block by hash value.
///
/// `previous_hash` is a lookup key, never an ownership pointer; `hash` is a
/// stored copy of the digest over all other fields and is recomputed, not
/// trusted, during validation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub nonce: u64,
    pub hash: String,
}

impl Block {
    /// Construct a block with `nonce = 0` and the immediate (non-mined) hash.
    pub fn new(
        index: u64,
        timestamp: i64,
        transactions: Vec<Transaction>,
        previous_hash: impl Into<String>,
    ) -> Self {
        let mut block = Block {
            index,
            timestamp,
            transactions,
            previous_hash: previous_hash.into(),
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Pure digest over `(index, previous_hash, timestamp, transactions,
    /// nonce)`, hex-encoded.
    ///
    /// Each transaction contributes its recomputed content preimage plus its
    /// signature, in inclusion order, so altering any embedded field changes
    /// the block hash.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_le_bytes());
        hasher.update(self.previous_hash.as_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        for tx in &self.transactions {
            hasher.update(tx.digest_preimage());
            match &tx.signature {
                Some(sig) => {
                    hasher.update([1u8]);
                    hasher.update(sig.as_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
        hasher.update(self.nonce.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether a hex hash satisfies the proof-of-work target: its first
    /// `difficulty` characters are all `'0'`.
    pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
        hash.bytes().take(difficulty as usize).all(|b| b == b'0')
    }

    /// Search for a nonce whose hash meets the difficulty target, store the
    /// winning hash, and return it. Unbounded in wall-clock time; difficulty
    /// bounds the expected duration.
    pub fn mine(&mut self, difficulty: u32) -> String {
        loop {
            let hash = self.compute_hash();
            if Self::meets_difficulty(&hash, difficulty) {
                self.hash = hash.clone();
                return hash;
            }
            self.nonce += 1;
        }
    }

    /// Same nonce search, polling `cancel` every few thousand attempts.
    ///
    /// On interruption the stored hash is untouched; the nonce may have
    /// advanced, which is harmless because the block has not been published.
    pub fn mine_cancellable(
        &mut self,
        difficulty: u32,
        cancel: &AtomicBool,
    ) -> Result<String, ChainError> {
        let mut attempts: u64 = 0;
        loop {
            if attempts % CANCEL_POLL_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                return Err(ChainError::MiningInterrupted);
            }
            let hash = self.compute_hash();
            if Self::meets_difficulty(&hash, difficulty) {
                self.hash = hash.clone();
                return Ok(hash);
            }
            self.nonce += 1;
            attempts += 1;
        }
    }
}
